//! services/api/src/web/events.rs
//!
//! Server-sent event stream of ledger changes for the dashboard.

use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;
use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// GET /events
///
/// Streams every `LedgerEvent` belonging to the calling user. Events of other
/// users are filtered out. A subscriber that falls behind skips the events it
/// missed.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.notifier.subscribe();
    info!("Dashboard subscribed to events of user {}", user_id);

    let events = stream! {
        loop {
            match receiver.recv().await {
                Ok(event) if event.user_id() == user_id => {
                    match Event::default().event("ledger").json_data(&event) {
                        Ok(sse_event) => yield Ok(sse_event),
                        Err(e) => warn!("Failed to encode ledger event: {}", e),
                    }
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event stream of user {} skipped {} events", user_id, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}
