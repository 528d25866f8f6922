//! crates/expense_tracker_core/src/memory.rs
//!
//! In-process implementations of the storage ports.
//!
//! `InMemorySessionStore` is the production session store: conversation state
//! lives only in this process and is lost on restart. `InMemoryDatabase` backs
//! the test suites and the `STORAGE=memory` development mode.

use crate::domain::{ActivityLog, ConversationSession, Expense, Income, User};
use crate::ports::{DatabaseService, PortError, PortResult, SessionStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

//=========================================================================================
// Session Store
//=========================================================================================

struct StoredSession {
    session: ConversationSession,
    touched_at: Instant,
}

/// A process-wide map of conversation sessions keyed by telegram id.
///
/// With a TTL, a session untouched for longer than the TTL is treated as absent
/// and dropped on the next `get` or `evict_expired` sweep.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<i64, StoredSession>>,
    ttl: Option<Duration>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    fn is_expired(&self, stored: &StoredSession) -> bool {
        match self.ttl {
            Some(ttl) => stored.touched_at.elapsed() >= ttl,
            None => false,
        }
    }

    /// Drops every expired session and returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, stored| !self.is_expired(stored));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, telegram_id: i64) -> PortResult<Option<ConversationSession>> {
        let mut sessions = self.sessions.lock().await;
        let expired = match sessions.get(&telegram_id) {
            Some(stored) => self.is_expired(stored),
            None => return Ok(None),
        };
        if expired {
            sessions.remove(&telegram_id);
            return Ok(None);
        }
        Ok(sessions.get(&telegram_id).map(|stored| stored.session.clone()))
    }

    async fn set(&self, telegram_id: i64, session: ConversationSession) -> PortResult<()> {
        self.sessions.lock().await.insert(
            telegram_id,
            StoredSession {
                session,
                touched_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, telegram_id: i64) -> PortResult<()> {
        self.sessions.lock().await.remove(&telegram_id);
        Ok(())
    }
}

//=========================================================================================
// Database
//=========================================================================================

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    incomes: Vec<Income>,
    expenses: Vec<Expense>,
    activity: Vec<ActivityLog>,
}

/// A `DatabaseService` held entirely in memory.
///
/// Every operation runs under one lock, so the conditional debit and credit are
/// atomic just like their single-statement SQL counterparts.
#[derive(Default)]
pub struct InMemoryDatabase {
    tables: Mutex<Tables>,
    offline: Mutex<bool>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, to exercise outage handling.
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.lock().await = offline;
    }

    pub async fn activity_log(&self) -> Vec<ActivityLog> {
        self.tables.lock().await.activity.clone()
    }

    async fn ensure_online(&self) -> PortResult<()> {
        if *self.offline.lock().await {
            return Err(PortError::Unexpected("database is offline".to_string()));
        }
        Ok(())
    }
}

fn same_funding(stored: &Expense, current: &Expense) -> bool {
    stored.id == current.id
        && stored.amount == current.amount
        && stored.source_income_id == current.source_income_id
}

fn newest_first<T>(items: &mut [T], date: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) {
    items.sort_by(|a, b| date(b).cmp(&date(a)));
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn get_or_create_telegram_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
    ) -> PortResult<User> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.iter().find(|u| u.telegram_id == Some(telegram_id)) {
            return Ok(user.clone());
        }
        let user = User {
            user_id: Uuid::new_v4(),
            telegram_id: Some(telegram_id),
            username: username.map(str::to_string),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_telegram_id(&self, telegram_id: i64) -> PortResult<User> {
        self.ensure_online().await?;
        let tables = self.tables.lock().await;
        tables
            .users
            .iter()
            .find(|u| u.telegram_id == Some(telegram_id))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User with telegram id {} not found", telegram_id)))
    }

    async fn insert_income(&self, income: Income) -> PortResult<Income> {
        self.ensure_online().await?;
        self.tables.lock().await.incomes.push(income.clone());
        Ok(income)
    }

    async fn get_income(&self, income_id: Uuid) -> PortResult<Income> {
        self.ensure_online().await?;
        let tables = self.tables.lock().await;
        tables
            .incomes
            .iter()
            .find(|i| i.id == income_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Income {} not found", income_id)))
    }

    async fn list_incomes(&self, user_id: Uuid) -> PortResult<Vec<Income>> {
        self.ensure_online().await?;
        let tables = self.tables.lock().await;
        let mut incomes: Vec<Income> = tables
            .incomes
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut incomes, |i| i.date);
        Ok(incomes)
    }

    async fn find_funding_income(&self, user_id: Uuid, amount: i64) -> PortResult<Option<Income>> {
        let incomes = self.list_incomes(user_id).await?;
        Ok(incomes.into_iter().find(|i| i.remaining_amount >= amount))
    }

    async fn update_income_details(&self, income: &Income) -> PortResult<Income> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        let stored = tables
            .incomes
            .iter_mut()
            .find(|i| i.id == income.id)
            .ok_or_else(|| PortError::NotFound(format!("Income {} not found", income.id)))?;
        stored.name = income.name.clone();
        stored.source = income.source.clone();
        stored.notes = income.notes.clone();
        stored.date = income.date;
        Ok(stored.clone())
    }

    async fn adjust_income_amount(&self, income_id: Uuid, delta: i64) -> PortResult<bool> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        match tables.incomes.iter_mut().find(|i| i.id == income_id) {
            Some(income) if income.remaining_amount + delta >= 0 => {
                income.amount += delta;
                income.remaining_amount += delta;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn try_debit_income(&self, income_id: Uuid, amount: i64) -> PortResult<bool> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        match tables.incomes.iter_mut().find(|i| i.id == income_id) {
            Some(income) if income.remaining_amount >= amount => {
                income.remaining_amount -= amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_income(&self, income_id: Uuid, amount: i64) -> PortResult<bool> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        match tables.incomes.iter_mut().find(|i| i.id == income_id) {
            Some(income) if income.remaining_amount + amount <= income.amount => {
                income.remaining_amount += amount;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_unreferenced_income(&self, income_id: Uuid) -> PortResult<bool> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        if tables.expenses.iter().any(|e| e.source_income_id == income_id) {
            return Ok(false);
        }
        let before = tables.incomes.len();
        tables.incomes.retain(|i| i.id != income_id);
        Ok(tables.incomes.len() < before)
    }

    async fn insert_expense(&self, expense: Expense) -> PortResult<Expense> {
        self.ensure_online().await?;
        self.tables.lock().await.expenses.push(expense.clone());
        Ok(expense)
    }

    async fn get_expense(&self, expense_id: Uuid) -> PortResult<Expense> {
        self.ensure_online().await?;
        let tables = self.tables.lock().await;
        tables
            .expenses
            .iter()
            .find(|e| e.id == expense_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Expense {} not found", expense_id)))
    }

    async fn list_expenses(&self, user_id: Uuid) -> PortResult<Vec<Expense>> {
        self.ensure_online().await?;
        let tables = self.tables.lock().await;
        let mut expenses: Vec<Expense> = tables
            .expenses
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut expenses, |e| e.date);
        Ok(expenses)
    }

    async fn list_expenses_for_income(&self, income_id: Uuid) -> PortResult<Vec<Expense>> {
        self.ensure_online().await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .expenses
            .iter()
            .filter(|e| e.source_income_id == income_id)
            .cloned()
            .collect())
    }

    async fn update_expense(
        &self,
        current: &Expense,
        updated: &Expense,
    ) -> PortResult<Option<Expense>> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        match tables.expenses.iter_mut().find(|e| same_funding(e, current)) {
            Some(stored) => {
                *stored = updated.clone();
                Ok(Some(stored.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_expense(&self, current: &Expense) -> PortResult<bool> {
        self.ensure_online().await?;
        let mut tables = self.tables.lock().await;
        let before = tables.expenses.len();
        tables.expenses.retain(|e| !same_funding(e, current));
        Ok(tables.expenses.len() < before)
    }

    async fn record_activity(&self, entry: ActivityLog) -> PortResult<()> {
        self.ensure_online().await?;
        self.tables.lock().await.activity.push(entry);
        Ok(())
    }
}
