//! services/api/src/adapters/feedback.rs
//!
//! Appends user corrections to a JSON Lines file for offline retraining of
//! the classifier.

use async_trait::async_trait;
use expense_tracker_core::domain::CorrectionRecord;
use expense_tracker_core::ports::{FeedbackSink, PortError, PortResult};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct JsonlFeedbackSink {
    path: PathBuf,
    // Serializes appends so lines from concurrent turns never interleave.
    write_lock: Mutex<()>,
}

impl JsonlFeedbackSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl FeedbackSink for JsonlFeedbackSink {
    async fn append_correction(&self, record: CorrectionRecord) -> PortResult<()> {
        let mut line =
            serde_json::to_string(&record).map_err(|e| PortError::Unexpected(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
