pub mod classifier;
pub mod db;
pub mod feedback;
pub mod notifier;
pub mod telegram;

pub use classifier::HttpClassifierAdapter;
pub use db::DbAdapter;
pub use feedback::JsonlFeedbackSink;
pub use notifier::BroadcastNotifier;
pub use telegram::TelegramAdapter;
