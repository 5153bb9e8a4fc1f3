//! OpenAI-compatible implementation of the `TextGenerator` capability.
//!
//! Wraps one logical call to the Responses API with an enforced wall-clock
//! deadline and bounded transport retries (exponential backoff, capped).
//! Transport failures map into the two fixed error kinds: `Timeout`
//! (retryable) and `Failure` (retryability decided here, at the transport
//! layer, before the orchestrator ever sees the error).

use super::{CallOptions, ResponseEnvelope, TextGenerator};
use crate::errors::ClientError;
use crate::prompts::StagePrompt;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 4_000;
/// How much of an upstream error body to keep in our error message.
const ERROR_BODY_LIMIT: usize = 300;

/// Client for an OpenAI-compatible Responses API endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Build a client from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    ///
    /// A missing key is a configuration defect, not a transient fault, so the
    /// resulting failure is tagged not retryable.
    pub fn from_env(model: &str) -> Result<Self, ClientError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ClientError::failure("OPENAI_API_KEY is not set", false))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key, base_url, model))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_once(
        &self,
        prompt: &StagePrompt,
        options: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let url = format!("{}/responses", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "metadata": {"request_id": options.request_id.to_string()},
        });

        let call = async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
                .map_err(|err| ClientError::failure(format!("request failed: {}", err), true))?;

            let status = response.status();
            if !status.is_success() {
                // 5xx and 429 are worth a fresh attempt; other 4xx mean the
                // request itself is bad and will fail again.
                let retryable = status.is_server_error() || status.as_u16() == 429;
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::failure(
                    format!("API returned {}: {}", status, truncate(&body, ERROR_BODY_LIMIT)),
                    retryable,
                ));
            }

            response.json::<ResponseEnvelope>().await.map_err(|err| {
                ClientError::failure(format!("failed to decode response envelope: {}", err), true)
            })
        };

        match tokio::time::timeout(options.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: options.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(
        &self,
        prompt: &StagePrompt,
        options: &CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        info!(
            request_id = %options.request_id,
            model = %self.model,
            "generation request start"
        );

        let mut attempt = 0u32;
        loop {
            match self.call_once(prompt, options).await {
                Ok(envelope) => {
                    info!(
                        request_id = %options.request_id,
                        response_id = envelope.id.as_deref().unwrap_or("unknown"),
                        "generation request success"
                    );
                    return Ok(envelope);
                }
                Err(err) if err.retryable() && attempt < options.max_transport_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        request_id = %options.request_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generation request retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        request_id = %options.request_id,
                        attempt,
                        error = %err,
                        "generation request failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

/// Delay before transport retry `attempt` (0-based): 500ms doubling, 4s cap.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(16);
    let delay = BACKOFF_BASE_MS.saturating_mul(1u64 << exp).min(BACKOFF_CAP_MS);
    Duration::from_millis(delay)
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
