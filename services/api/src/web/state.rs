//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::BroadcastNotifier;
use crate::config::Config;
use expense_tracker_core::ports::MessagingService;
use expense_tracker_core::{ConversationEngine, ExpenseLedgerService, IncomeService};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<ConversationEngine>,
    pub ledger: ExpenseLedgerService,
    pub incomes: IncomeService,
    pub messenger: Arc<dyn MessagingService>,
    /// Kept concrete so the SSE endpoint can subscribe.
    pub notifier: Arc<BroadcastNotifier>,
}
