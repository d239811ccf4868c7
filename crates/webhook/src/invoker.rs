//! Downstream reading-generation invocation with bounded retry
//!
//! The reading generator is invoked synchronously over HTTP with a
//! JSON payload carrying the source marker, the user, the internal
//! shared secret, the extracted metadata, and a synthetic authorizer
//! context so the generator reuses the same authorization path as
//! direct user requests.
//!
//! Failures are retried with capped exponential backoff plus jitter.
//! The retry loop's worst case (~1+2+4+8s plus jitter) must fit inside
//! the platform's request timeout.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_RETRIES: u32 = 3;
pub const BASE_DELAY_MS: u64 = 1000;
pub const MAX_DELAY_MS: u64 = 10_000;

/// Header carrying the function-level error marker.
pub const FUNCTION_ERROR_HEADER: &str = "x-function-error";

/// Injected delay abstraction so retry timing is testable without
/// wall-clock waits.
#[async_trait]
pub trait Sleep: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleep;

#[async_trait]
impl Sleep for TokioSleep {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Delay before the next attempt: exponential in the attempt number,
/// plus up to a second of jitter, capped at [`MAX_DELAY_MS`].
pub fn backoff_delay(attempt: u32) -> Duration {
    let jitter: u64 = rand::rng().random_range(0..1000);
    let exponential = BASE_DELAY_MS.saturating_mul(1 << attempt);
    Duration::from_millis(exponential.saturating_add(jitter).min(MAX_DELAY_MS))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvocationPayload<'a> {
    source: &'static str,
    user_id: &'a str,
    internal_secret: &'a str,
    metadata: &'a HashMap<String, Value>,
    request_context: RequestContext<'a>,
}

#[derive(Serialize)]
struct RequestContext<'a> {
    authorizer: Authorizer<'a>,
}

#[derive(Serialize)]
struct Authorizer<'a> {
    claims: Claims<'a>,
}

#[derive(Serialize)]
struct Claims<'a> {
    /// The paying user as the authenticated subject
    sub: &'a str,
}

/// Outer response of the function endpoint: an inner status plus a
/// body that arrives either as a JSON string or already decoded.
#[derive(Deserialize)]
struct FunctionResponse {
    #[serde(rename = "statusCode")]
    status_code: u16,
    #[serde(default)]
    body: Option<Value>,
}

pub struct ReadingInvoker {
    http: reqwest::Client,
    function_url: String,
    internal_secret: String,
    sleeper: Arc<dyn Sleep>,
}

impl ReadingInvoker {
    pub fn new(function_url: String, internal_secret: String, sleeper: Arc<dyn Sleep>) -> Self {
        Self {
            http: reqwest::Client::new(),
            function_url,
            internal_secret,
            sleeper,
        }
    }

    /// Invoke the reading generator, retrying on any transport or
    /// application failure. Returns the generated reading id, or the
    /// last captured error after all attempts are exhausted.
    pub async fn invoke(
        &self,
        user_id: &str,
        metadata: &HashMap<String, Value>,
    ) -> anyhow::Result<String> {
        let payload = InvocationPayload {
            source: "webhook",
            user_id,
            internal_secret: &self.internal_secret,
            metadata,
            request_context: RequestContext {
                authorizer: Authorizer {
                    claims: Claims { sub: user_id },
                },
            },
        };

        tracing::info!(
            function_url = %self.function_url,
            user_id = %user_id,
            "Invoking reading generation"
        );

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            match self.attempt(&payload).await {
                Ok(reading_id) => {
                    tracing::info!(
                        user_id = %user_id,
                        reading_id = %reading_id,
                        attempt = attempt + 1,
                        "Reading generation successful"
                    );
                    return Ok(reading_id);
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        attempt = attempt + 1,
                        error = %e,
                        "Reading generation attempt failed"
                    );
                    last_error = Some(e);

                    if attempt < MAX_RETRIES {
                        let delay = backoff_delay(attempt);
                        tracing::info!(delay_ms = delay.as_millis() as u64, "Retrying");
                        self.sleeper.sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Failed to generate reading after multiple attempts")
        }))
    }

    async fn attempt(&self, payload: &InvocationPayload<'_>) -> anyhow::Result<String> {
        let response = self
            .http
            .post(&self.function_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let function_error = response
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        if !status.is_success() {
            anyhow::bail!("Function invocation failed with status: {}", status.as_u16());
        }

        let text = response.text().await?;

        if let Some(marker) = function_error {
            anyhow::bail!("Function error: {} - {}", marker, text);
        }

        let decoded: FunctionResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Unparseable function response: {}", e))?;

        if decoded.status_code != 200 {
            // String-form bodies are embedded bare, not JSON-quoted
            let body = match decoded.body {
                Some(Value::String(s)) => s,
                Some(v) => v.to_string(),
                None => "Unknown error".to_string(),
            };
            anyhow::bail!("Reading generation failed: {}", body);
        }

        // Inner body arrives as a JSON string or an already-decoded object
        let body = match decoded.body {
            Some(Value::String(s)) => serde_json::from_str::<Value>(&s)
                .map_err(|e| anyhow::anyhow!("Unparseable function response body: {}", e))?,
            Some(v) => v,
            None => anyhow::bail!("Reading generation returned no body"),
        };

        body.get("readingId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Reading generation returned no readingId"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records requested delays instead of waiting.
    #[derive(Default)]
    pub struct RecordingSleep {
        pub delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleep for RecordingSleep {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().await.push(duration);
        }
    }
}
