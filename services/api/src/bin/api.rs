//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        BroadcastNotifier, DbAdapter, HttpClassifierAdapter, JsonlFeedbackSink, TelegramAdapter,
    },
    config::{Config, StorageBackend},
    error::ApiError,
    web::{self, state::AppState},
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use expense_tracker_core::ports::{DatabaseService, SessionStore};
use expense_tracker_core::{
    ConversationEngine, ExpenseLedgerService, InMemoryDatabase, InMemorySessionStore,
    IncomeService,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EVENT_BUFFER: usize = 256;
const TELEGRAM_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Storage & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.storage {
        StorageBackend::Postgres { database_url } => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        StorageBackend::Memory => {
            warn!("STORAGE=memory: the ledger will not survive a restart");
            Arc::new(InMemoryDatabase::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let classifier = Arc::new(HttpClassifierAdapter::new(
        config.classifier_url.clone(),
        config.classifier_timeout,
    )?);
    let messenger = Arc::new(TelegramAdapter::new(
        &config.telegram_api_url,
        &config.telegram_bot_token,
        TELEGRAM_SEND_TIMEOUT,
    )?);
    let notifier = Arc::new(BroadcastNotifier::new(EVENT_BUFFER));
    let feedback = Arc::new(JsonlFeedbackSink::new(config.feedback_log_path.clone()));
    let sessions = Arc::new(match config.session_ttl {
        Some(ttl) => InMemorySessionStore::with_ttl(ttl),
        None => InMemorySessionStore::new(),
    });

    // --- 4. Build the Core Services & Shared AppState ---
    let ledger = ExpenseLedgerService::new(db.clone(), notifier.clone());
    let incomes = IncomeService::new(db.clone(), notifier.clone());
    let engine = Arc::new(ConversationEngine::new(
        db.clone(),
        classifier,
        sessions.clone() as Arc<dyn SessionStore>,
        feedback,
        ledger.clone(),
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        engine,
        ledger,
        incomes,
        messenger,
        notifier,
    });

    // --- 5. Spawn the Session Sweeper ---
    let shutdown = CancellationToken::new();
    if let Some(ttl) = config.session_ttl {
        let sweeper_sessions = sessions.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = sweeper_sessions.evict_expired().await;
                        if evicted > 0 {
                            info!("Evicted {} idle conversation sessions", evicted);
                        }
                    }
                }
            }
        });
    }

    // --- 6. Create the Web Router ---
    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-user-id")]);
    let app = web::router(app_state).layer(cors);

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    Ok(())
}
