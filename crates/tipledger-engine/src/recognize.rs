//! Recognition oracle integration.
//!
//! The oracle is a black box that turns image bytes into typed candidate
//! fields with confidences. The engine defends against it: calls are
//! bounded by a timeout, failures map to the retryable
//! `RecognitionUnavailable`, and a missing or low-confidence field is
//! treated as absence downstream. The engine never busy-retries; a
//! document whose recognition failed stays `Pending` and the caller
//! resubmits.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use tipledger_core::defaults::{ORACLE_TIMEOUT_SECS, ORACLE_URL};
use tipledger_core::{CandidateFields, Error, Result};

/// The external recognition service.
#[async_trait]
pub trait RecognitionOracle: Send + Sync {
    /// Extract candidate fields from image bytes.
    async fn recognize(&self, image: &[u8]) -> Result<CandidateFields>;
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    fields: CandidateFields,
}

/// HTTP client for the recognition service.
pub struct HttpRecognitionClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpRecognitionClient {
    /// Create a client from environment configuration.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TIPLEDGER_ORACLE_URL` | `http://localhost:8750/recognize` | Endpoint |
    /// | `TIPLEDGER_ORACLE_TIMEOUT_SECS` | `30` | Per-call timeout |
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("TIPLEDGER_ORACLE_URL").unwrap_or_else(|_| ORACLE_URL.to_string());
        let timeout_secs = std::env::var("TIPLEDGER_ORACLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(ORACLE_TIMEOUT_SECS);
        Self::with_config(url, Duration::from_secs(timeout_secs))
    }

    pub fn with_config(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build oracle client: {}", e)))?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl RecognitionOracle for HttpRecognitionClient {
    async fn recognize(&self, image: &[u8]) -> Result<CandidateFields> {
        let request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send();

        // Outer timeout in addition to the client-level one: a hung call
        // must surface as retryable, never stall the upload path.
        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                warn!(subsystem = "oracle", op = "recognize", error = %e, "oracle call failed");
                return Err(Error::RecognitionUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!(
                    subsystem = "oracle",
                    op = "recognize",
                    timeout_secs = self.timeout.as_secs(),
                    "oracle call timed out"
                );
                return Err(Error::RecognitionUnavailable("timed out".to_string()));
            }
        };

        if !response.status().is_success() {
            return Err(Error::RecognitionUnavailable(format!(
                "oracle returned {}",
                response.status()
            )));
        }

        let parsed: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| Error::RecognitionUnavailable(format!("malformed response: {}", e)))?;

        debug!(
            subsystem = "oracle",
            op = "recognize",
            field_count = parsed.fields.len(),
            "oracle returned fields"
        );
        Ok(parsed.fields)
    }
}

/// Scripted oracle for tests: pops queued responses, empty fields when the
/// queue runs dry.
#[derive(Default)]
pub struct MockOracle {
    responses: tokio::sync::Mutex<VecDeque<Result<CandidateFields>>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful recognition.
    pub async fn push_fields(&self, fields: CandidateFields) {
        self.responses.lock().await.push_back(Ok(fields));
    }

    /// Queue a failure.
    pub async fn push_failure(&self, msg: &str) {
        self.responses
            .lock()
            .await
            .push_back(Err(Error::RecognitionUnavailable(msg.to_string())));
    }
}

#[async_trait]
impl RecognitionOracle for MockOracle {
    async fn recognize(&self, _image: &[u8]) -> Result<CandidateFields> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(CandidateFields::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tipledger_core::CandidateField;

    #[tokio::test]
    async fn test_mock_oracle_scripted_responses() {
        let oracle = MockOracle::new();
        let mut fields = CandidateFields::new();
        fields.insert(
            "estimated_earnings".to_string(),
            CandidateField::new("$18.50", 0.9),
        );
        oracle.push_fields(fields).await;
        oracle.push_failure("down for maintenance").await;

        let first = oracle.recognize(b"img").await.unwrap();
        assert_eq!(first["estimated_earnings"].value, "$18.50");

        let second = oracle.recognize(b"img").await;
        assert!(matches!(second, Err(Error::RecognitionUnavailable(_))));

        // Queue drained: absence, not an error.
        let third = oracle.recognize(b"img").await.unwrap();
        assert!(third.is_empty());
    }
}
