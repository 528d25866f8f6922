//! crates/expense_tracker_core/src/ledger.rs
//!
//! The expense ledger and the income service.
//!
//! Every expense draws its amount from exactly one income. For any income the
//! sum of its bound expenses always equals `amount - remaining_amount`. Balances
//! only move through the store's conditional debit/credit primitives, and
//! multi-step changes undo completed steps when a later step fails.

use crate::domain::{
    ActivityAction, ActivityLog, EntityKind, Expense, ExpenseUpdate, Income, IncomeUpdate,
    LedgerEvent, NewExpense, NewIncome, Origin,
};
use crate::ports::{DatabaseService, NotificationService, PortError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

//=========================================================================================
// Ledger Error and Result Types
//=========================================================================================

/// Why the ledger refused an operation. Only `Port` signals an infrastructure
/// failure; every other variant is an expected business outcome.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Amount must be a positive number")]
    InvalidAmount,
    #[error("No income with enough remaining balance")]
    InsufficientFunds,
    #[error("Record not found")]
    NotFound,
    #[error("Record belongs to another user")]
    Unauthorized,
    #[error("Income is still referenced by expenses")]
    IncomeInUse,
    #[error("Expense was changed by another request")]
    Conflict,
    #[error("Storage error: {0}")]
    Port(#[from] PortError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

fn not_found_as_ledger(e: PortError) -> LedgerError {
    match e {
        PortError::NotFound(_) => LedgerError::NotFound,
        other => LedgerError::Port(other),
    }
}

//=========================================================================================
// Best-effort Side Effects
//=========================================================================================

async fn record_activity(
    db: &Arc<dyn DatabaseService>,
    user_id: Uuid,
    action: ActivityAction,
    entity: EntityKind,
    entity_id: Uuid,
    description: String,
) {
    let entry = ActivityLog {
        user_id,
        action,
        entity,
        entity_id,
        description,
        created_at: Utc::now(),
    };
    if let Err(e) = db.record_activity(entry).await {
        warn!("Failed to write activity log for {:?} {}: {}", entity, entity_id, e);
    }
}

async fn publish(notifier: &Arc<dyn NotificationService>, event: LedgerEvent) {
    if let Err(e) = notifier.publish(event).await {
        warn!("Failed to publish ledger event: {}", e);
    }
}

//=========================================================================================
// Expense Ledger Service
//=========================================================================================

#[derive(Clone)]
pub struct ExpenseLedgerService {
    db: Arc<dyn DatabaseService>,
    notifier: Arc<dyn NotificationService>,
}

impl ExpenseLedgerService {
    pub fn new(db: Arc<dyn DatabaseService>, notifier: Arc<dyn NotificationService>) -> Self {
        Self { db, notifier }
    }

    /// Records an expense and draws its amount from a funding income.
    ///
    /// Without an explicit `source_income_id` the most recently dated income
    /// that still covers the amount is used.
    pub async fn create_expense(&self, data: NewExpense, user_id: Uuid) -> LedgerResult<Expense> {
        let name = required_text(data.name, "name")?;
        let category = required_text(data.category, "category")?;
        let amount = data.amount.filter(|a| *a > 0).ok_or(LedgerError::InvalidAmount)?;
        let date = data
            .date
            .ok_or_else(|| LedgerError::InvalidInput("date is required".to_string()))?;

        let income = match data.source_income_id {
            Some(income_id) => self.db.get_income(income_id).await.map_err(not_found_as_ledger)?,
            None => self
                .db
                .find_funding_income(user_id, amount)
                .await?
                .ok_or(LedgerError::InsufficientFunds)?,
        };
        if income.user_id != user_id {
            return Err(LedgerError::Unauthorized);
        }
        if income.remaining_amount < amount {
            return Err(LedgerError::InsufficientFunds);
        }

        // The balance may have moved since the read above; the store re-checks.
        if !self.db.try_debit_income(income.id, amount).await? {
            return Err(LedgerError::InsufficientFunds);
        }

        let expense = Expense {
            id: Uuid::new_v4(),
            user_id,
            name,
            amount,
            category,
            date,
            source_income_id: income.id,
            origin: data.origin.unwrap_or(Origin::Website),
            confidence: data.confidence,
        };
        let expense = match self.db.insert_expense(expense).await {
            Ok(expense) => expense,
            Err(e) => {
                self.undo_debit(income.id, amount).await;
                return Err(e.into());
            }
        };

        info!(
            "Recorded expense {} ({} from income {}) for user {}",
            expense.id, expense.amount, income.id, user_id
        );
        record_activity(
            &self.db,
            user_id,
            ActivityAction::Create,
            EntityKind::Expense,
            expense.id,
            format!("Added expense {} ({})", expense.name, expense.amount),
        )
        .await;
        publish(
            &self.notifier,
            LedgerEvent::ExpenseCreated {
                user_id,
                expense: expense.clone(),
            },
        )
        .await;
        Ok(expense)
    }

    /// Updates an expense, moving money between incomes as needed.
    pub async fn edit_expense(
        &self,
        update: ExpenseUpdate,
        expense_id: Uuid,
        user_id: Uuid,
    ) -> LedgerResult<Expense> {
        let current = self.db.get_expense(expense_id).await.map_err(not_found_as_ledger)?;
        if current.user_id != user_id {
            return Err(LedgerError::Unauthorized);
        }

        let new_amount = update.amount.unwrap_or(current.amount);
        if new_amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let new_income_id = update.source_income_id.unwrap_or(current.source_income_id);

        let mut updated = current.clone();
        if let Some(name) = update.name {
            updated.name = required_text(Some(name), "name")?;
        }
        if let Some(category) = update.category {
            updated.category = required_text(Some(category), "category")?;
        }
        if let Some(date) = update.date {
            updated.date = date;
        }
        updated.amount = new_amount;
        updated.source_income_id = new_income_id;

        let old_income_id = current.source_income_id;
        let old_amount = current.amount;

        if new_income_id != old_income_id {
            self.transfer(&current, new_income_id, new_amount, user_id).await?;
        } else if new_amount != old_amount {
            self.apply_delta(old_income_id, new_amount - old_amount).await?;
        }

        // Only lands if nobody else moved the expense since it was read.
        let saved = match self.db.update_expense(&current, &updated).await {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                warn!("Expense {} changed during an edit; rolling back balances", current.id);
                self.revert_balances(&current, &updated).await;
                return Err(LedgerError::Conflict);
            }
            Err(e) => {
                self.revert_balances(&current, &updated).await;
                return Err(e.into());
            }
        };

        record_activity(
            &self.db,
            user_id,
            ActivityAction::Update,
            EntityKind::Expense,
            saved.id,
            format!("Updated expense {} ({})", saved.name, saved.amount),
        )
        .await;
        publish(
            &self.notifier,
            LedgerEvent::ExpenseUpdated {
                user_id,
                expense: saved.clone(),
            },
        )
        .await;
        Ok(saved)
    }

    /// Moves an expense to another income: debit the new one, then refund the old one.
    async fn transfer(
        &self,
        current: &Expense,
        new_income_id: Uuid,
        new_amount: i64,
        user_id: Uuid,
    ) -> LedgerResult<()> {
        let new_income = self
            .db
            .get_income(new_income_id)
            .await
            .map_err(not_found_as_ledger)?;
        if new_income.user_id != user_id {
            return Err(LedgerError::Unauthorized);
        }
        if !self.db.try_debit_income(new_income_id, new_amount).await? {
            return Err(LedgerError::InsufficientFunds);
        }
        match self.db.credit_income(current.source_income_id, current.amount).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Income {} is gone or full; refund of {} for expense {} skipped",
                current.source_income_id, current.amount, current.id
            ),
            Err(e) => {
                self.undo_debit(new_income_id, new_amount).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Applies `delta` to the same income: positive draws more, negative refunds.
    async fn apply_delta(&self, income_id: Uuid, delta: i64) -> LedgerResult<()> {
        if delta > 0 {
            if !self.db.try_debit_income(income_id, delta).await? {
                return Err(LedgerError::InsufficientFunds);
            }
        } else if !self.db.credit_income(income_id, -delta).await? {
            warn!("Income {} could not take back {}; balance left unchanged", income_id, -delta);
        }
        Ok(())
    }

    /// Compensates the balance moves of an edit whose expense write failed.
    async fn revert_balances(&self, before: &Expense, after: &Expense) {
        if before.source_income_id != after.source_income_id {
            self.undo_debit(after.source_income_id, after.amount).await;
            if !matches!(self.db.try_debit_income(before.source_income_id, before.amount).await, Ok(true)) {
                error!(
                    "Rollback failed: could not re-debit {} from income {} for expense {}",
                    before.amount, before.source_income_id, before.id
                );
            }
        } else {
            let delta = after.amount - before.amount;
            if delta > 0 {
                self.undo_debit(after.source_income_id, delta).await;
            } else if delta < 0
                && !matches!(self.db.try_debit_income(after.source_income_id, -delta).await, Ok(true))
            {
                error!(
                    "Rollback failed: could not re-debit {} from income {} for expense {}",
                    -delta, after.source_income_id, before.id
                );
            }
        }
    }

    async fn undo_debit(&self, income_id: Uuid, amount: i64) {
        match self.db.credit_income(income_id, amount).await {
            Ok(true) => {}
            Ok(false) => error!(
                "Rollback failed: income {} refused a refund of {}",
                income_id, amount
            ),
            Err(e) => error!(
                "Rollback failed: refund of {} to income {} errored: {}",
                amount, income_id, e
            ),
        }
    }

    /// Deletes an expense and refunds its income. A missing income is tolerated.
    ///
    /// The row is removed first, so of two concurrent deletes only one refunds.
    pub async fn delete_expense(&self, expense_id: Uuid, user_id: Uuid) -> LedgerResult<Expense> {
        let expense = self.get_expense(expense_id, user_id).await?;

        if !self.db.delete_expense(&expense).await? {
            return Err(LedgerError::Conflict);
        }

        match self.db.credit_income(expense.source_income_id, expense.amount).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Income {} not available for refund of expense {}",
                expense.source_income_id, expense.id
            ),
            Err(e) => {
                if let Err(restore) = self.db.insert_expense(expense.clone()).await {
                    error!(
                        "Rollback failed: expense {} ({} from income {}) deleted without refund: {}",
                        expense.id, expense.amount, expense.source_income_id, restore
                    );
                }
                return Err(e.into());
            }
        }

        record_activity(
            &self.db,
            user_id,
            ActivityAction::Delete,
            EntityKind::Expense,
            expense.id,
            format!("Deleted expense {} ({})", expense.name, expense.amount),
        )
        .await;

        publish(
            &self.notifier,
            LedgerEvent::ExpenseDeleted {
                user_id,
                expense_id: expense.id,
            },
        )
        .await;
        Ok(expense)
    }

    /// Owner-scoped lookup: another user's expense is reported as missing.
    pub async fn get_expense(&self, expense_id: Uuid, user_id: Uuid) -> LedgerResult<Expense> {
        let expense = self.db.get_expense(expense_id).await.map_err(not_found_as_ledger)?;
        if expense.user_id != user_id {
            return Err(LedgerError::NotFound);
        }
        Ok(expense)
    }

    pub async fn list_expenses(&self, user_id: Uuid) -> LedgerResult<Vec<Expense>> {
        Ok(self.db.list_expenses(user_id).await?)
    }
}

fn required_text(value: Option<String>, field: &str) -> LedgerResult<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(LedgerError::InvalidInput(format!("{} is required", field))),
    }
}

//=========================================================================================
// Income Service
//=========================================================================================

#[derive(Clone)]
pub struct IncomeService {
    db: Arc<dyn DatabaseService>,
    notifier: Arc<dyn NotificationService>,
}

impl IncomeService {
    pub fn new(db: Arc<dyn DatabaseService>, notifier: Arc<dyn NotificationService>) -> Self {
        Self { db, notifier }
    }

    /// Creates an income with its whole amount still available.
    pub async fn create_income(&self, data: NewIncome, user_id: Uuid) -> LedgerResult<Income> {
        let name = required_text(Some(data.name), "name")?;
        let source = required_text(Some(data.source), "source")?;
        if data.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let income = Income {
            id: Uuid::new_v4(),
            user_id,
            name,
            source,
            notes: data.notes.filter(|n| !n.trim().is_empty()),
            amount: data.amount,
            remaining_amount: data.amount,
            date: data.date.unwrap_or_else(Utc::now),
            origin: data.origin,
        };
        let income = self.db.insert_income(income).await?;

        record_activity(
            &self.db,
            user_id,
            ActivityAction::Create,
            EntityKind::Income,
            income.id,
            format!("Added income {} ({})", income.name, income.amount),
        )
        .await;
        publish(
            &self.notifier,
            LedgerEvent::IncomeCreated {
                user_id,
                income: income.clone(),
            },
        )
        .await;
        Ok(income)
    }

    pub async fn get_income(&self, income_id: Uuid, user_id: Uuid) -> LedgerResult<Income> {
        let income = self.db.get_income(income_id).await.map_err(not_found_as_ledger)?;
        if income.user_id != user_id {
            return Err(LedgerError::NotFound);
        }
        Ok(income)
    }

    pub async fn list_incomes(&self, user_id: Uuid) -> LedgerResult<Vec<Income>> {
        Ok(self.db.list_incomes(user_id).await?)
    }

    /// Updates an income's details. A new amount shifts the remaining balance by
    /// the same delta and may not fall below what is already spent.
    pub async fn edit_income(
        &self,
        update: IncomeUpdate,
        income_id: Uuid,
        user_id: Uuid,
    ) -> LedgerResult<Income> {
        let mut income = self.get_income(income_id, user_id).await?;

        // Every field is checked before anything is written.
        if let Some(name) = update.name {
            income.name = required_text(Some(name), "name")?;
        }
        if let Some(source) = update.source {
            income.source = required_text(Some(source), "source")?;
        }
        if let Some(notes) = update.notes {
            income.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }
        if let Some(date) = update.date {
            income.date = date;
        }
        let delta = match update.amount {
            Some(amount) if amount <= 0 => return Err(LedgerError::InvalidAmount),
            Some(amount) => amount - income.amount,
            None => 0,
        };

        if delta != 0 && !self.db.adjust_income_amount(income_id, delta).await? {
            return Err(LedgerError::InvalidInput(
                "amount is below what has already been spent".to_string(),
            ));
        }
        if let Err(e) = self.db.update_income_details(&income).await {
            if delta != 0 && !matches!(self.db.adjust_income_amount(income_id, -delta).await, Ok(true)) {
                error!(
                    "Rollback failed: income {} kept an amount change of {} after a failed edit",
                    income_id, delta
                );
            }
            return Err(e.into());
        }
        let saved = self.db.get_income(income_id).await?;

        record_activity(
            &self.db,
            user_id,
            ActivityAction::Update,
            EntityKind::Income,
            saved.id,
            format!("Updated income {} ({})", saved.name, saved.amount),
        )
        .await;
        Ok(saved)
    }

    /// Deletes an income nobody draws from any more.
    pub async fn delete_income(&self, income_id: Uuid, user_id: Uuid) -> LedgerResult<Income> {
        let income = self.get_income(income_id, user_id).await?;
        if !self.db.delete_unreferenced_income(income_id).await? {
            return Err(LedgerError::IncomeInUse);
        }
        record_activity(
            &self.db,
            user_id,
            ActivityAction::Delete,
            EntityKind::Income,
            income.id,
            format!("Deleted income {} ({})", income.name, income.amount),
        )
        .await;
        Ok(income)
    }
}
