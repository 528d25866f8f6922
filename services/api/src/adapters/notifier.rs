//! services/api/src/adapters/notifier.rs
//!
//! In-process fan-out of ledger events to dashboard subscribers.

use async_trait::async_trait;
use expense_tracker_core::domain::LedgerEvent;
use expense_tracker_core::ports::{NotificationService, PortResult};
use tokio::sync::broadcast;
use tracing::debug;

pub struct BroadcastNotifier {
    sender: broadcast::Sender<LedgerEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationService for BroadcastNotifier {
    async fn publish(&self, event: LedgerEvent) -> PortResult<()> {
        // No subscribers is not an error; the dashboard may simply be closed.
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            debug!("No listeners for event of user {}", event.user_id());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn delivers_to_subscribers_and_tolerates_none() {
        let notifier = BroadcastNotifier::new(8);
        let user_id = Uuid::new_v4();
        let expense_id = Uuid::new_v4();

        notifier
            .publish(LedgerEvent::ExpenseDeleted { user_id, expense_id })
            .await
            .unwrap();

        let mut rx = notifier.subscribe();
        notifier
            .publish(LedgerEvent::ExpenseDeleted { user_id, expense_id })
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id(), user_id);
    }
}
