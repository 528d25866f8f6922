//! services/api/src/web/middleware.rs
//!
//! Request guards for the two kinds of callers: dashboard routes identify the
//! user with an `x-user-id` header, and the Telegram webhook proves its origin
//! with the secret token configured via `setWebhook`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::web::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// The authenticated dashboard user, inserted into request extensions.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUser(pub Uuid);

/// Middleware that parses the `x-user-id` header.
///
/// A missing or malformed header is rejected with 401 before the handler runs.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Extract the header
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Parse it as a user id
    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // 3. Insert user_id into request extensions
    req.extensions_mut().insert(CurrentUser(user_id));

    // 4. Continue to the handler
    Ok(next.run(req).await)
}

/// Middleware that checks Telegram's secret token header, when one is configured.
pub async fn verify_telegram_secret(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = state.config.telegram_webhook_secret.as_deref() {
        let provided = req
            .headers()
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("Rejected webhook call with a missing or wrong secret token");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}
