//! services/api/src/web/telegram.rs
//!
//! The Telegram webhook. Every update is acknowledged with 200 so Telegram does
//! not redeliver it; failures past that point only show up in the logs.

use crate::web::protocol::TelegramUpdate;
use crate::web::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use expense_tracker_core::domain::IncomingMessage;
use std::sync::Arc;
use tracing::{debug, error, info};

/// POST /telegram/webhook
pub async fn telegram_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> StatusCode {
    let Some(message) = update.message else {
        debug!("Ignoring update {} without a message", update.update_id);
        return StatusCode::OK;
    };
    let Some(text) = message.text else {
        debug!("Ignoring non-text update {}", update.update_id);
        return StatusCode::OK;
    };

    let chat_id = message.chat.id;
    let (telegram_id, username) = match message.from {
        Some(from) => (from.id, from.username),
        None => (chat_id, None),
    };
    info!("Received message from telegram user {}", telegram_id);

    let reply = state
        .engine
        .handle_message(IncomingMessage {
            telegram_id,
            username,
            text,
        })
        .await;

    if let Err(e) = state.messenger.send_message(chat_id, &reply).await {
        error!("Failed to send reply to chat {}: {}", chat_id, e);
    }
    StatusCode::OK
}
