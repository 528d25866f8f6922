//! crates/expense_tracker_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format,
//! apart from the serde derives needed by the notification stream and the
//! feedback sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Predictions with a confidence strictly above this value are accepted
/// without asking the user. Everything at or below it needs a correction.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

//=========================================================================================
// Users
//=========================================================================================

// Represents a user - used throughout app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    pub telegram_id: Option<i64>,
    pub username: Option<String>,
}

//=========================================================================================
// Ledger Records
//=========================================================================================

/// Where a record was entered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Website,
    Telegram,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Website => "website",
            Origin::Telegram => "telegram",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "website" => Some(Origin::Website),
            "telegram" => Some(Origin::Telegram),
            _ => None,
        }
    }
}

/// An income "bucket". `remaining_amount` is drawn down by expenses and must
/// stay within `0..=amount`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Income {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub source: String,
    pub notes: Option<String>,
    pub amount: i64,
    pub remaining_amount: i64,
    pub date: DateTime<Utc>,
    pub origin: Origin,
}

impl Income {
    /// How much of this income has been spent by the expenses bound to it.
    pub fn spent(&self) -> i64 {
        self.amount - self.remaining_amount
    }
}

/// A recorded expense, always funded by exactly one income.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub amount: i64,
    pub category: String,
    pub date: DateTime<Utc>,
    pub source_income_id: Uuid,
    pub origin: Origin,
    pub confidence: Option<f64>,
}

/// Input for creating an expense. Every field the ledger validates is optional
/// here so that missing data is reported as `InvalidInput`, not a panic.
#[derive(Debug, Clone, Default)]
pub struct NewExpense {
    pub name: Option<String>,
    pub amount: Option<i64>,
    pub category: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub source_income_id: Option<Uuid>,
    pub origin: Option<Origin>,
    pub confidence: Option<f64>,
}

/// Partial update of an expense. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ExpenseUpdate {
    pub name: Option<String>,
    pub amount: Option<i64>,
    pub category: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub source_income_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewIncome {
    pub name: String,
    pub source: String,
    pub notes: Option<String>,
    pub amount: i64,
    pub date: Option<DateTime<Utc>>,
    pub origin: Origin,
}

#[derive(Debug, Clone, Default)]
pub struct IncomeUpdate {
    pub name: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub amount: Option<i64>,
    pub date: Option<DateTime<Utc>>,
}

//=========================================================================================
// Audit Trail and Notifications
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Expense,
    Income,
}

/// One append-only audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub user_id: Uuid,
    pub action: ActivityAction,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A real-time event pushed to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    ExpenseCreated { user_id: Uuid, expense: Expense },
    ExpenseUpdated { user_id: Uuid, expense: Expense },
    ExpenseDeleted { user_id: Uuid, expense_id: Uuid },
    IncomeCreated { user_id: Uuid, income: Income },
}

impl LedgerEvent {
    pub fn user_id(&self) -> Uuid {
        match self {
            LedgerEvent::ExpenseCreated { user_id, .. }
            | LedgerEvent::ExpenseUpdated { user_id, .. }
            | LedgerEvent::ExpenseDeleted { user_id, .. }
            | LedgerEvent::IncomeCreated { user_id, .. } => *user_id,
        }
    }
}

/// A user correction of a low-confidence prediction, kept for retraining.
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionRecord {
    pub telegram_id: i64,
    pub activity: String,
    pub predicted: String,
    pub corrected: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Classification
//=========================================================================================

/// The classifier's verdict for a single activity.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub category: String,
    pub confidence: f64,
}

impl Prediction {
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: category.into(),
            confidence,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.confidence > CONFIDENCE_THRESHOLD
    }
}

/// One entry of a batch classification, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPrediction {
    pub activity: String,
    pub prediction: Prediction,
}

//=========================================================================================
// Conversation State
//=========================================================================================

/// A batch item still waiting for the user to name its category.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExpense {
    /// 1-based position in the original batch. Stable across corrections.
    pub index: usize,
    pub activity: String,
    pub name: String,
    pub amount: i64,
    pub prediction: String,
}

/// Ephemeral per-user conversation state. Its absence means the user is idle.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationSession {
    AwaitingSingleCorrection { activity: String, prediction: String },
    AwaitingBatchCorrection { expenses: Vec<PendingExpense> },
}

/// A text message received from the chat transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub text: String,
}
