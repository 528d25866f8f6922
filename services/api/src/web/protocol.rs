//! services/api/src/web/protocol.rs
//!
//! Defines the wire formats spoken by the web layer: the subset of the Telegram
//! Bot API `Update` object the webhook consumes, and the JSON payloads of the
//! REST endpoints.

use chrono::{DateTime, Utc};
use expense_tracker_core::domain::{Expense, Income};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Telegram Updates (Inbound Webhook)
//=========================================================================================
// NOTE: Only text messages are handled. Every other update kind deserializes
// with `message: None` (or `text: None`) and is acknowledged without a reply.
//=========================================================================================

#[derive(Deserialize, Debug)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Deserialize, Debug)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Deserialize, Debug)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

//=========================================================================================
// REST Payloads
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateIncomeRequest {
    pub name: String,
    pub source: String,
    pub notes: Option<String>,
    pub amount: i64,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct UpdateIncomeRequest {
    pub name: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub amount: Option<i64>,
    pub date: Option<DateTime<Utc>>,
}

/// A dashboard expense. `date` defaults to now.
#[derive(Deserialize, ToSchema)]
pub struct CreateExpenseRequest {
    pub name: Option<String>,
    pub amount: Option<i64>,
    pub category: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub source_income_id: Option<Uuid>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct UpdateExpenseRequest {
    pub name: Option<String>,
    pub amount: Option<i64>,
    pub category: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub source_income_id: Option<Uuid>,
}

/// An income as returned by the REST API.
#[derive(Serialize, ToSchema)]
pub struct IncomeResponse {
    pub id: Uuid,
    pub name: String,
    pub source: String,
    pub notes: Option<String>,
    pub amount: i64,
    pub remaining_amount: i64,
    pub date: DateTime<Utc>,
    /// `website` or `telegram`.
    pub origin: String,
}

impl From<Income> for IncomeResponse {
    fn from(income: Income) -> Self {
        Self {
            id: income.id,
            name: income.name,
            source: income.source,
            notes: income.notes,
            amount: income.amount,
            remaining_amount: income.remaining_amount,
            date: income.date,
            origin: income.origin.as_str().to_string(),
        }
    }
}

/// An expense as returned by the REST API.
#[derive(Serialize, ToSchema)]
pub struct ExpenseResponse {
    pub id: Uuid,
    pub name: String,
    pub amount: i64,
    pub category: String,
    pub date: DateTime<Utc>,
    pub source_income_id: Uuid,
    pub origin: String,
    pub confidence: Option<f64>,
}

impl From<Expense> for ExpenseResponse {
    fn from(expense: Expense) -> Self {
        Self {
            id: expense.id,
            name: expense.name,
            amount: expense.amount,
            category: expense.category,
            date: expense.date,
            source_income_id: expense.source_income_id,
            origin: expense.origin.as_str().to_string(),
            confidence: expense.confidence,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}
