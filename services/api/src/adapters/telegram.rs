//! services/api/src/adapters/telegram.rs
//!
//! Outbound half of the Telegram transport. Implements the `MessagingService`
//! port by calling the Bot API `sendMessage` method.

use async_trait::async_trait;
use expense_tracker_core::ports::{MessagingService, PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramAdapter {
    client: reqwest::Client,
    send_message_url: String,
}

impl TelegramAdapter {
    pub fn new(api_url: &str, bot_token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            send_message_url: format!(
                "{}/bot{}/sendMessage",
                api_url.trim_end_matches('/'),
                bot_token
            ),
        })
    }
}

#[async_trait]
impl MessagingService for TelegramAdapter {
    async fn send_message(&self, chat_id: i64, text: &str) -> PortResult<()> {
        let response = self
            .client
            .post(&self.send_message_url)
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Timeout(e.to_string())
                } else {
                    PortError::Unexpected(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PortError::Unauthorized);
        }

        let body: BotApiResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if !body.ok {
            return Err(PortError::Unexpected(format!(
                "sendMessage failed ({}): {}",
                status,
                body.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}
