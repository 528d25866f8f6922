pub mod conversation;
pub mod domain;
pub mod extraction;
pub mod ledger;
pub mod memory;
pub mod ports;

pub use conversation::ConversationEngine;
pub use domain::{
    ActivityLog, BatchPrediction, ConversationSession, CorrectionRecord, Expense, ExpenseUpdate,
    Income, IncomeUpdate, IncomingMessage, LedgerEvent, NewExpense, NewIncome, Origin,
    PendingExpense, Prediction, User, CONFIDENCE_THRESHOLD,
};
pub use ledger::{ExpenseLedgerService, IncomeService, LedgerError, LedgerResult};
pub use memory::{InMemoryDatabase, InMemorySessionStore};
pub use ports::{
    CategoryClassifier, DatabaseService, FeedbackSink, MessagingService, NotificationService,
    PortError, PortResult, SessionStore,
};
