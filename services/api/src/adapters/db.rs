//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Balance changes are single conditional `UPDATE` statements, so the check
//! (`remaining_amount >= amount`) and the write happen in one round-trip.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use expense_tracker_core::domain::{
    ActivityAction, ActivityLog, EntityKind, Expense, Income, Origin, User,
};
use expense_tracker_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_origin(raw: &str) -> PortResult<Origin> {
    Origin::parse(raw).ok_or_else(|| PortError::Unexpected(format!("Unknown origin '{}'", raw)))
}

fn action_label(action: ActivityAction) -> &'static str {
    match action {
        ActivityAction::Create => "create",
        ActivityAction::Update => "update",
        ActivityAction::Delete => "delete",
    }
}

fn entity_label(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Expense => "expense",
        EntityKind::Income => "income",
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    telegram_id: Option<i64>,
    username: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            telegram_id: self.telegram_id,
            username: self.username,
        }
    }
}

#[derive(FromRow)]
struct IncomeRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    source: String,
    notes: Option<String>,
    amount: i64,
    remaining_amount: i64,
    date: DateTime<Utc>,
    origin: String,
}
impl IncomeRecord {
    fn to_domain(self) -> PortResult<Income> {
        Ok(Income {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            source: self.source,
            notes: self.notes,
            amount: self.amount,
            remaining_amount: self.remaining_amount,
            date: self.date,
            origin: parse_origin(&self.origin)?,
        })
    }
}

#[derive(FromRow)]
struct ExpenseRecord {
    id: Uuid,
    user_id: Uuid,
    name: String,
    amount: i64,
    category: String,
    date: DateTime<Utc>,
    source_income_id: Uuid,
    origin: String,
    confidence: Option<f64>,
}
impl ExpenseRecord {
    fn to_domain(self) -> PortResult<Expense> {
        Ok(Expense {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            amount: self.amount,
            category: self.category,
            date: self.date,
            source_income_id: self.source_income_id,
            origin: parse_origin(&self.origin)?,
            confidence: self.confidence,
        })
    }
}

const INCOME_COLUMNS: &str =
    "id, user_id, name, source, notes, amount, remaining_amount, date, origin";
const EXPENSE_COLUMNS: &str =
    "id, user_id, name, amount, category, date, source_income_id, origin, confidence";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_or_create_telegram_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (user_id, telegram_id, username) VALUES ($1, $2, $3)
             ON CONFLICT (telegram_id) DO UPDATE SET username = COALESCE(EXCLUDED.username, users.username)
             RETURNING user_id, telegram_id, username",
        )
        .bind(Uuid::new_v4())
        .bind(telegram_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, telegram_id, username FROM users WHERE telegram_id = $1",
        )
        .bind(telegram_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!(
            "User with telegram id {} not found",
            telegram_id
        )))?;
        Ok(record.to_domain())
    }

    async fn insert_income(&self, income: Income) -> PortResult<Income> {
        let record = sqlx::query_as::<_, IncomeRecord>(&format!(
            "INSERT INTO incomes ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {cols}",
            cols = INCOME_COLUMNS
        ))
        .bind(income.id)
        .bind(income.user_id)
        .bind(&income.name)
        .bind(&income.source)
        .bind(&income.notes)
        .bind(income.amount)
        .bind(income.remaining_amount)
        .bind(income.date)
        .bind(income.origin.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_income(&self, income_id: Uuid) -> PortResult<Income> {
        let record = sqlx::query_as::<_, IncomeRecord>(&format!(
            "SELECT {} FROM incomes WHERE id = $1",
            INCOME_COLUMNS
        ))
        .bind(income_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Income {} not found", income_id)))?;
        record.to_domain()
    }

    async fn list_incomes(&self, user_id: Uuid) -> PortResult<Vec<Income>> {
        let records = sqlx::query_as::<_, IncomeRecord>(&format!(
            "SELECT {} FROM incomes WHERE user_id = $1 ORDER BY date DESC, created_at ASC",
            INCOME_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn find_funding_income(&self, user_id: Uuid, amount: i64) -> PortResult<Option<Income>> {
        let record = sqlx::query_as::<_, IncomeRecord>(&format!(
            "SELECT {} FROM incomes WHERE user_id = $1 AND remaining_amount >= $2
             ORDER BY date DESC, created_at ASC LIMIT 1",
            INCOME_COLUMNS
        ))
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn update_income_details(&self, income: &Income) -> PortResult<Income> {
        let record = sqlx::query_as::<_, IncomeRecord>(&format!(
            "UPDATE incomes SET name = $2, source = $3, notes = $4, date = $5 WHERE id = $1 RETURNING {}",
            INCOME_COLUMNS
        ))
        .bind(income.id)
        .bind(&income.name)
        .bind(&income.source)
        .bind(&income.notes)
        .bind(income.date)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Income {} not found", income.id)))?;
        record.to_domain()
    }

    async fn adjust_income_amount(&self, income_id: Uuid, delta: i64) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE incomes SET amount = amount + $2, remaining_amount = remaining_amount + $2
             WHERE id = $1 AND remaining_amount + $2 >= 0 AND amount + $2 > 0",
        )
        .bind(income_id)
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_debit_income(&self, income_id: Uuid, amount: i64) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE incomes SET remaining_amount = remaining_amount - $2
             WHERE id = $1 AND remaining_amount >= $2",
        )
        .bind(income_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn credit_income(&self, income_id: Uuid, amount: i64) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE incomes SET remaining_amount = remaining_amount + $2
             WHERE id = $1 AND remaining_amount + $2 <= amount",
        )
        .bind(income_id)
        .bind(amount)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_unreferenced_income(&self, income_id: Uuid) -> PortResult<bool> {
        let result = sqlx::query(
            "DELETE FROM incomes WHERE id = $1
             AND NOT EXISTS (SELECT 1 FROM expenses WHERE source_income_id = $1)",
        )
        .bind(income_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_expense(&self, expense: Expense) -> PortResult<Expense> {
        let record = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "INSERT INTO expenses ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {cols}",
            cols = EXPENSE_COLUMNS
        ))
        .bind(expense.id)
        .bind(expense.user_id)
        .bind(&expense.name)
        .bind(expense.amount)
        .bind(&expense.category)
        .bind(expense.date)
        .bind(expense.source_income_id)
        .bind(expense.origin.as_str())
        .bind(expense.confidence)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_expense(&self, expense_id: Uuid) -> PortResult<Expense> {
        let record = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "SELECT {} FROM expenses WHERE id = $1",
            EXPENSE_COLUMNS
        ))
        .bind(expense_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Expense {} not found", expense_id)))?;
        record.to_domain()
    }

    async fn list_expenses(&self, user_id: Uuid) -> PortResult<Vec<Expense>> {
        let records = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "SELECT {} FROM expenses WHERE user_id = $1 ORDER BY date DESC",
            EXPENSE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_expenses_for_income(&self, income_id: Uuid) -> PortResult<Vec<Expense>> {
        let records = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "SELECT {} FROM expenses WHERE source_income_id = $1 ORDER BY date DESC",
            EXPENSE_COLUMNS
        ))
        .bind(income_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn update_expense(
        &self,
        current: &Expense,
        updated: &Expense,
    ) -> PortResult<Option<Expense>> {
        let record = sqlx::query_as::<_, ExpenseRecord>(&format!(
            "UPDATE expenses SET name = $2, amount = $3, category = $4, date = $5, source_income_id = $6
             WHERE id = $1 AND amount = $7 AND source_income_id = $8 RETURNING {}",
            EXPENSE_COLUMNS
        ))
        .bind(updated.id)
        .bind(&updated.name)
        .bind(updated.amount)
        .bind(&updated.category)
        .bind(updated.date)
        .bind(updated.source_income_id)
        .bind(current.amount)
        .bind(current.source_income_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(|r| r.to_domain()).transpose()
    }

    async fn delete_expense(&self, current: &Expense) -> PortResult<bool> {
        let result = sqlx::query(
            "DELETE FROM expenses WHERE id = $1 AND amount = $2 AND source_income_id = $3",
        )
        .bind(current.id)
        .bind(current.amount)
        .bind(current.source_income_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_activity(&self, entry: ActivityLog) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO activity_logs (user_id, action, entity, entity_id, description, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.user_id)
        .bind(action_label(entry.action))
        .bind(entity_label(entry.entity))
        .bind(entry.entity_id)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}
