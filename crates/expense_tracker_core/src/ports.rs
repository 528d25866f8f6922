//! crates/expense_tracker_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases,
//! the category classifier or the chat transport.

use crate::domain::{
    ActivityLog, BatchPrediction, ConversationSession, CorrectionRecord, Expense, Income,
    LedgerEvent, Prediction, User,
};
use async_trait::async_trait;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn get_or_create_telegram_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
    ) -> PortResult<User>;

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> PortResult<User>;

    // --- Incomes ---
    async fn insert_income(&self, income: Income) -> PortResult<Income>;

    async fn get_income(&self, income_id: Uuid) -> PortResult<Income>;

    /// All incomes of a user, most recent date first.
    async fn list_incomes(&self, user_id: Uuid) -> PortResult<Vec<Income>>;

    /// The most recently dated income of `user_id` whose remaining balance covers `amount`.
    async fn find_funding_income(&self, user_id: Uuid, amount: i64) -> PortResult<Option<Income>>;

    /// Overwrites name, source, notes and date. Amounts are left alone.
    async fn update_income_details(&self, income: &Income) -> PortResult<Income>;

    /// Shifts both `amount` and `remaining_amount` by `delta` in one step, only if
    /// the remaining balance stays non-negative. Returns whether the row changed.
    async fn adjust_income_amount(&self, income_id: Uuid, delta: i64) -> PortResult<bool>;

    /// Conditional decrement: `remaining_amount -= amount` only when
    /// `remaining_amount >= amount`. Returns whether the debit happened.
    async fn try_debit_income(&self, income_id: Uuid, amount: i64) -> PortResult<bool>;

    /// Conditional increment capped at the income's original amount.
    /// Returns `false` when the income no longer exists or the cap would be exceeded.
    async fn credit_income(&self, income_id: Uuid, amount: i64) -> PortResult<bool>;

    /// Deletes the income only if no expense references it. Returns whether it was deleted.
    async fn delete_unreferenced_income(&self, income_id: Uuid) -> PortResult<bool>;

    // --- Expenses ---
    async fn insert_expense(&self, expense: Expense) -> PortResult<Expense>;

    async fn get_expense(&self, expense_id: Uuid) -> PortResult<Expense>;

    /// All expenses of a user, most recent date first.
    async fn list_expenses(&self, user_id: Uuid) -> PortResult<Vec<Expense>>;

    async fn list_expenses_for_income(&self, income_id: Uuid) -> PortResult<Vec<Expense>>;

    /// Writes `updated` only while the stored row still has `current`'s amount
    /// and funding income. `None` means the row changed or disappeared meanwhile.
    async fn update_expense(&self, current: &Expense, updated: &Expense)
        -> PortResult<Option<Expense>>;

    /// Deletes the row only while it still has `current`'s amount and funding
    /// income. Returns whether it was deleted.
    async fn delete_expense(&self, current: &Expense) -> PortResult<bool>;

    // --- Audit Trail ---
    async fn record_activity(&self, entry: ActivityLog) -> PortResult<()>;
}

/// The external category-prediction service.
#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    async fn predict_category(&self, activity: &str) -> PortResult<Prediction>;

    /// Order-preserving, one prediction per input activity.
    async fn predict_batch_categories(
        &self,
        activities: &[String],
    ) -> PortResult<Vec<BatchPrediction>>;
}

/// Per-user conversation state, keyed by telegram id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, telegram_id: i64) -> PortResult<Option<ConversationSession>>;

    /// Full replace.
    async fn set(&self, telegram_id: i64, session: ConversationSession) -> PortResult<()>;

    async fn delete(&self, telegram_id: i64) -> PortResult<()>;
}

/// Fire-and-forget real-time events for the dashboard.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn publish(&self, event: LedgerEvent) -> PortResult<()>;
}

/// Append-only sink for user corrections, consumed offline for retraining.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    async fn append_correction(&self, record: CorrectionRecord) -> PortResult<()>;
}

/// Outbound side of the chat transport.
#[async_trait]
pub trait MessagingService: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> PortResult<()>;
}
