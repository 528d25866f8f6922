pub mod events;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod telegram;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::{require_user, verify_telegram_secret};
pub use state::AppState;

/// Builds every route of the service. CORS and other outer layers are added by
/// the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Telegram pushes updates here
    let webhook_routes = Router::new()
        .route("/telegram/webhook", post(telegram::telegram_webhook_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            verify_telegram_secret,
        ));

    // Dashboard routes (x-user-id required)
    let dashboard_routes = Router::new()
        .route(
            "/incomes",
            get(rest::list_incomes_handler).post(rest::create_income_handler),
        )
        .route(
            "/incomes/{id}",
            get(rest::get_income_handler)
                .put(rest::update_income_handler)
                .delete(rest::delete_income_handler),
        )
        .route(
            "/expenses",
            get(rest::list_expenses_handler).post(rest::create_expense_handler),
        )
        .route(
            "/expenses/{id}",
            axum::routing::put(rest::update_expense_handler).delete(rest::delete_expense_handler),
        )
        .route("/events", get(events::events_handler))
        .layer(axum_middleware::from_fn(require_user));

    Router::new()
        .route("/health", get(rest::health_handler))
        .merge(webhook_routes)
        .merge(dashboard_routes)
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::BroadcastNotifier;
    use crate::config::Config;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use expense_tracker_core::domain::{BatchPrediction, Prediction};
    use expense_tracker_core::ports::{
        CategoryClassifier, DatabaseService, FeedbackSink, MessagingService, PortResult,
    };
    use expense_tracker_core::{
        ConversationEngine, CorrectionRecord, ExpenseLedgerService, InMemoryDatabase,
        InMemorySessionStore, IncomeService,
    };
    use serde_json::{json, Value};
    use tokio::sync::Mutex;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct KeywordClassifier;

    #[async_trait]
    impl CategoryClassifier for KeywordClassifier {
        async fn predict_category(&self, activity: &str) -> PortResult<Prediction> {
            if activity.contains("bensin") {
                Ok(Prediction::new("Transportasi", 0.9))
            } else {
                Ok(Prediction::new("Lainnya", 0.2))
            }
        }

        async fn predict_batch_categories(
            &self,
            activities: &[String],
        ) -> PortResult<Vec<BatchPrediction>> {
            let mut out = Vec::new();
            for activity in activities {
                out.push(BatchPrediction {
                    activity: activity.clone(),
                    prediction: self.predict_category(activity).await?,
                });
            }
            Ok(out)
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl MessagingService for RecordingMessenger {
        async fn send_message(&self, chat_id: i64, text: &str) -> PortResult<()> {
            self.sent.lock().await.push((chat_id, text.to_string()));
            Ok(())
        }
    }

    struct DiscardFeedback;

    #[async_trait]
    impl FeedbackSink for DiscardFeedback {
        async fn append_correction(&self, _record: CorrectionRecord) -> PortResult<()> {
            Ok(())
        }
    }

    const SECRET: &str = "s3cret";
    const TG: i64 = 777;

    struct TestApp {
        router: Router,
        db: Arc<InMemoryDatabase>,
        messenger: Arc<RecordingMessenger>,
    }

    fn test_app() -> TestApp {
        let config = Config::from_lookup(|key| match key {
            "STORAGE" => Some("memory".to_string()),
            "TELEGRAM_BOT_TOKEN" => Some("1:t".to_string()),
            "TELEGRAM_WEBHOOK_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        let db = Arc::new(InMemoryDatabase::new());
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let messenger = Arc::new(RecordingMessenger::default());
        let ledger = ExpenseLedgerService::new(db.clone(), notifier.clone());
        let incomes = IncomeService::new(db.clone(), notifier.clone());
        let engine = Arc::new(ConversationEngine::new(
            db.clone(),
            Arc::new(KeywordClassifier),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(DiscardFeedback),
            ledger.clone(),
        ));
        let state = Arc::new(AppState {
            config: Arc::new(config),
            engine,
            ledger,
            incomes,
            messenger: messenger.clone(),
            notifier,
        });
        TestApp {
            router: router(state),
            db,
            messenger,
        }
    }

    fn webhook(text: &str, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/telegram/webhook")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(middleware::TELEGRAM_SECRET_HEADER, secret);
        }
        let update = json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "date": 0,
                "chat": {"id": TG, "type": "private"},
                "from": {"id": TG, "is_bot": false, "first_name": "Budi", "username": "budi"},
                "text": text
            }
        });
        builder.body(Body::from(update.to_string())).unwrap()
    }

    fn dashboard(method: &str, uri: &str, user_id: Uuid, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(middleware::USER_ID_HEADER, user_id.to_string())
            .header("content-type", "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app();
        let response = app
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn webhook_requires_the_secret_token() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(webhook("/start", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.messenger.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn webhook_ignores_non_text_updates() {
        let app = test_app();
        let update = json!({"update_id": 2, "message": {
            "message_id": 2, "date": 0, "chat": {"id": TG, "type": "private"},
            "sticker": {"file_id": "abc"}}});
        let request = Request::builder()
            .method("POST")
            .uri("/telegram/webhook")
            .header("content-type", "application/json")
            .header(middleware::TELEGRAM_SECRET_HEADER, SECRET)
            .body(Body::from(update.to_string()))
            .unwrap();
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(app.messenger.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn chat_expense_shows_up_on_the_dashboard() {
        let app = test_app();

        // Register through the bot, then fund the account from the dashboard.
        let response = app
            .router
            .clone()
            .oneshot(webhook("/start", Some(SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let user = app.db.get_user_by_telegram_id(TG).await.unwrap();

        let response = app
            .router
            .clone()
            .oneshot(dashboard(
                "POST",
                "/incomes",
                user.user_id,
                Some(json!({"name": "Gaji", "source": "Kantor", "amount": 1_000_000})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let income = json_body(response).await;
        assert_eq!(income["remaining_amount"], 1_000_000);
        assert_eq!(income["origin"], "website");

        app.router
            .clone()
            .oneshot(webhook("isi bensin 50000", Some(SECRET)))
            .await
            .unwrap();
        {
            let sent = app.messenger.sent.lock().await;
            assert_eq!(sent.len(), 2);
            assert_eq!(sent[1].0, TG);
            assert!(sent[1].1.contains("Transportasi"));
        }

        let response = app
            .router
            .clone()
            .oneshot(dashboard("GET", "/expenses", user.user_id, None))
            .await
            .unwrap();
        let expenses = json_body(response).await;
        assert_eq!(expenses.as_array().unwrap().len(), 1);
        assert_eq!(expenses[0]["amount"], 50_000);
        assert_eq!(expenses[0]["origin"], "telegram");

        let income_uri = format!("/incomes/{}", income["id"].as_str().unwrap());
        let response = app
            .router
            .clone()
            .oneshot(dashboard("GET", &income_uri, user.user_id, None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["remaining_amount"], 950_000);

        // Referenced incomes cannot be deleted; deleting the expense refunds it.
        let response = app
            .router
            .clone()
            .oneshot(dashboard("DELETE", &income_uri, user.user_id, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let expense_uri = format!("/expenses/{}", expenses[0]["id"].as_str().unwrap());
        let response = app
            .router
            .clone()
            .oneshot(dashboard("DELETE", &expense_uri, user.user_id, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .router
            .clone()
            .oneshot(dashboard("GET", &income_uri, user.user_id, None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["remaining_amount"], 1_000_000);
    }

    #[tokio::test]
    async fn dashboard_routes_need_a_user_header() {
        let app = test_app();
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/incomes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/expenses")
                    .header(middleware::USER_ID_HEADER, "not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ledger_errors_map_to_status_codes() {
        let app = test_app();
        let owner = app.db.get_or_create_telegram_user(1, None).await.unwrap();
        let stranger = app.db.get_or_create_telegram_user(2, None).await.unwrap();

        let response = app
            .router
            .clone()
            .oneshot(dashboard(
                "POST",
                "/incomes",
                owner.user_id,
                Some(json!({"name": "Gaji", "source": "Kantor", "amount": 0})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .router
            .clone()
            .oneshot(dashboard(
                "POST",
                "/incomes",
                owner.user_id,
                Some(json!({"name": "Bonus", "source": "Kantor", "amount": 500_000})),
            ))
            .await
            .unwrap();
        let income = json_body(response).await;
        let income_uri = format!("/incomes/{}", income["id"].as_str().unwrap());

        let response = app
            .router
            .clone()
            .oneshot(dashboard("GET", &income_uri, stranger.user_id, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .router
            .clone()
            .oneshot(dashboard(
                "DELETE",
                &format!("/expenses/{}", Uuid::new_v4()),
                owner.user_id,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dashboard_records_expenses_against_a_chosen_income() {
        let app = test_app();
        let owner = app.db.get_or_create_telegram_user(1, None).await.unwrap();
        let stranger = app.db.get_or_create_telegram_user(2, None).await.unwrap();

        let mut income_ids = Vec::new();
        for (name, amount) in [("Gaji", 1_000_000), ("Bonus", 200_000)] {
            let response = app
                .router
                .clone()
                .oneshot(dashboard(
                    "POST",
                    "/incomes",
                    owner.user_id,
                    Some(json!({"name": name, "source": "Kantor", "amount": amount})),
                ))
                .await
                .unwrap();
            income_ids.push(json_body(response).await["id"].as_str().unwrap().to_string());
        }
        let bonus = &income_ids[1];

        let response = app
            .router
            .clone()
            .oneshot(dashboard(
                "POST",
                "/expenses",
                owner.user_id,
                Some(json!({"name": "Sepatu", "amount": 150_000, "category": "Belanja",
                            "source_income_id": bonus})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let expense = json_body(response).await;
        assert_eq!(expense["source_income_id"], bonus.as_str());
        assert_eq!(expense["origin"], "website");

        let response = app
            .router
            .clone()
            .oneshot(dashboard("GET", &format!("/incomes/{}", bonus), owner.user_id, None))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["remaining_amount"], 50_000);

        let cases = [
            (owner.user_id, json!({"name": "Kopi", "amount": 0, "category": "Makanan"}), StatusCode::BAD_REQUEST),
            (owner.user_id, json!({"name": "Tas", "amount": 60_000, "category": "Belanja",
                                   "source_income_id": bonus}), StatusCode::CONFLICT),
            (stranger.user_id, json!({"name": "Kopi", "amount": 10, "category": "Makanan",
                                      "source_income_id": bonus}), StatusCode::FORBIDDEN),
        ];
        for (user_id, body, expected) in cases {
            let response = app
                .router
                .clone()
                .oneshot(dashboard("POST", "/expenses", user_id, Some(body)))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }
    }
}
