//! LLM transport: a single converse-shaped operation with retries.
//!
//! The transport knows nothing about prompt content; it ships a composed
//! bundle and returns output text. Transient failures are retried with
//! jittered exponential backoff, at most twice, inside the caller's
//! per-call deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::prompts::{InferenceParams, PromptBundle};

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("LLM returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("call deadline exceeded")]
    Timeout,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) => false,
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Inputs to the converse operation.
#[derive(Debug, Clone, Serialize)]
pub struct ConverseRequest {
    pub model_id: String,
    pub system_text: String,
    pub messages: Vec<Message>,
    pub inference_config: InferenceParams,
}

/// Transport over which converse runs; injected so stages test without a
/// network.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn converse(&self, request: &ConverseRequest) -> Result<String, LlmError>;
}

/// HTTP converse transport.
pub struct HttpLlmTransport {
    endpoint: String,
    client: Client,
}

#[derive(Deserialize)]
struct ConverseResponse {
    output_text: String,
}

impl HttpLlmTransport {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::Connection(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl LlmTransport for HttpLlmTransport {
    async fn converse(&self, request: &ConverseRequest) -> Result<String, LlmError> {
        let url = format!("{}/converse", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: ConverseResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(body.output_text)
    }
}

/// LLM client wrapping a transport with the retry envelope.
pub struct LlmClient {
    transport: Arc<dyn LlmTransport>,
    max_retries: u32,
    base_delay: Duration,
}

impl LlmClient {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            transport,
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    /// Run one composed prompt through the transport.
    ///
    /// Transient failures retry with jittered exponential backoff up to
    /// the cap; permanent failures return immediately.
    pub async fn generate(&self, bundle: &PromptBundle) -> Result<String, LlmError> {
        let request = ConverseRequest {
            model_id: bundle.model_id.clone(),
            system_text: bundle.system_text.clone(),
            messages: vec![Message::user("Produce the requested analysis.")],
            inference_config: bundle.params,
        };

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.base_delay, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying LLM call");
                tokio::time::sleep(delay).await;
            }
            match self.transport.converse(&request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(attempt, error = %e, "transient LLM failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or(LlmError::Timeout))
    }
}

/// Exponential backoff with jitter derived from the clock's subsecond
/// noise.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(6));
    let jitter_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
        % (base.as_millis().max(1) as u64);
    exp + Duration::from_millis(jitter_ns / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::prompts::PromptVariant;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTransport {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl LlmTransport for FlakyTransport {
        async fn converse(&self, _request: &ConverseRequest) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(LlmError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok("{\"ok\":true}".to_string())
            }
        }
    }

    fn bundle() -> PromptBundle {
        PromptBundle {
            variant: PromptVariant::Dd214Comprehensive,
            model_id: "test-model".to_string(),
            system_text: "analyze".to_string(),
            params: InferenceParams {
                max_tokens: 100,
                temperature: 0.5,
                top_p: 0.9,
            },
            truncated: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        let client = LlmClient::new(transport.clone());
        let out = client.generate(&bundle()).await.unwrap();
        assert_eq!(out, "{\"ok\":true}");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_cap() {
        let transport = Arc::new(FlakyTransport {
            calls: AtomicU32::new(0),
            fail_first: 10,
        });
        let client = LlmClient::new(transport.clone());
        assert!(client.generate(&bundle()).await.is_err());
        // Initial call plus two retries.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    struct PermanentFailure;

    #[async_trait]
    impl LlmTransport for PermanentFailure {
        async fn converse(&self, _request: &ConverseRequest) -> Result<String, LlmError> {
            Err(LlmError::Api {
                status: 400,
                message: "bad request".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let client = LlmClient::new(Arc::new(PermanentFailure));
        match client.generate(&bundle()).await {
            Err(LlmError::Api { status, .. }) => assert_eq!(status, 400),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
