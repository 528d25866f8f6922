//! services/api/src/adapters/classifier.rs
//!
//! This module contains the adapter for the external category classifier.
//! It implements the `CategoryClassifier` port from the `core` crate over a
//! small JSON-over-HTTP protocol:
//!
//! - `POST /predict {activity}` -> `{category, confidence}`
//! - `POST /batch-predict {activities}` -> `{predictions: [{activity, category, confidence}]}`

use async_trait::async_trait;
use expense_tracker_core::domain::{BatchPrediction, Prediction};
use expense_tracker_core::ports::{CategoryClassifier, PortError, PortResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
struct PredictRequest<'a> {
    activity: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    category: String,
    confidence: f64,
}

#[derive(Serialize)]
struct BatchPredictRequest<'a> {
    activities: &'a [String],
}

#[derive(Deserialize)]
struct BatchPredictResponse {
    predictions: Vec<BatchPredictionItem>,
}

#[derive(Deserialize)]
struct BatchPredictionItem {
    activity: String,
    category: String,
    confidence: f64,
}

//=========================================================================================
// The Adapter
//=========================================================================================

pub struct HttpClassifierAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClassifierAdapter {
    /// Builds an adapter whose every request is bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<Req: Serialize + ?Sized, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> PortResult<Resp> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("Classifier returned {} for {}: {}", status, path, text);
            return Err(PortError::Unexpected(format!(
                "Classifier returned status {}",
                status
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed classifier response: {}", e)))
    }
}

fn map_transport_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout(e.to_string())
    } else {
        PortError::Unexpected(e.to_string())
    }
}

fn check_confidence(confidence: f64) -> PortResult<f64> {
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(PortError::Unexpected(format!(
            "Classifier confidence {} is outside [0, 1]",
            confidence
        )))
    }
}

#[async_trait]
impl CategoryClassifier for HttpClassifierAdapter {
    async fn predict_category(&self, activity: &str) -> PortResult<Prediction> {
        let response: PredictResponse = self.post("/predict", &PredictRequest { activity }).await?;
        debug!(
            "Classified '{}' as {} ({:.2})",
            activity, response.category, response.confidence
        );
        Ok(Prediction::new(
            response.category,
            check_confidence(response.confidence)?,
        ))
    }

    async fn predict_batch_categories(
        &self,
        activities: &[String],
    ) -> PortResult<Vec<BatchPrediction>> {
        let response: BatchPredictResponse = self
            .post("/batch-predict", &BatchPredictRequest { activities })
            .await?;

        if response.predictions.len() != activities.len() {
            return Err(PortError::Unexpected(format!(
                "Classifier returned {} predictions for {} activities",
                response.predictions.len(),
                activities.len()
            )));
        }

        response
            .predictions
            .into_iter()
            .map(|item| {
                Ok(BatchPrediction {
                    activity: item.activity,
                    prediction: Prediction::new(item.category, check_confidence(item.confidence)?),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn_classifier(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fake_classifier() -> Router {
        Router::new()
            .route(
                "/predict",
                post(|Json(body): Json<Value>| async move {
                    let activity = body["activity"].as_str().unwrap_or_default().to_string();
                    if activity.contains("bensin") {
                        Json(json!({"category": "Transportasi", "confidence": 0.93}))
                    } else {
                        Json(json!({"category": "Lainnya", "confidence": 0.2}))
                    }
                }),
            )
            .route(
                "/batch-predict",
                post(|Json(body): Json<Value>| async move {
                    let predictions: Vec<Value> = body["activities"]
                        .as_array()
                        .cloned()
                        .unwrap_or_default()
                        .into_iter()
                        .map(|a| json!({"activity": a, "category": "Makanan", "confidence": 0.7}))
                        .collect();
                    Json(json!({ "predictions": predictions }))
                }),
            )
    }

    #[tokio::test]
    async fn predicts_single_activity() {
        let url = spawn_classifier(fake_classifier()).await;
        let adapter = HttpClassifierAdapter::new(url, Duration::from_secs(5)).unwrap();

        let prediction = adapter.predict_category("isi bensin").await.unwrap();
        assert_eq!(prediction.category, "Transportasi");
        assert!(prediction.is_recognized());

        let unknown = adapter.predict_category("sesuatu").await.unwrap();
        assert!(!unknown.is_recognized());
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let url = spawn_classifier(fake_classifier()).await;
        let adapter = HttpClassifierAdapter::new(url, Duration::from_secs(5)).unwrap();
        let activities = vec!["nasi goreng".to_string(), "es teh".to_string()];

        let predictions = adapter.predict_batch_categories(&activities).await.unwrap();
        let names: Vec<&str> = predictions.iter().map(|p| p.activity.as_str()).collect();
        assert_eq!(names, vec!["nasi goreng", "es teh"]);
    }

    #[tokio::test]
    async fn server_errors_and_timeouts_become_port_errors() {
        let router = Router::new()
            .route(
                "/predict",
                post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/batch-predict",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(json!({"predictions": []}))
                }),
            );
        let url = spawn_classifier(router).await;
        let adapter = HttpClassifierAdapter::new(url, Duration::from_millis(200)).unwrap();

        let failed = adapter.predict_category("apa saja").await;
        assert!(matches!(failed, Err(PortError::Unexpected(_))));

        let timed_out = adapter
            .predict_batch_categories(&["a".to_string(), "b".to_string()])
            .await;
        assert!(matches!(timed_out, Err(PortError::Timeout(_))));
    }

    #[tokio::test]
    async fn unreachable_classifier_is_an_error() {
        let adapter =
            HttpClassifierAdapter::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(adapter.predict_category("kopi").await.is_err());
    }
}
