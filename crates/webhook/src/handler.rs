//! Webhook pipeline orchestration
//!
//! Normalizer → verifier → idempotency guard → dispatcher, with the
//! outcome recorder and metric emitter invoked on every exit path.
//! Business failures (no user, unpaid, unhandled type, downstream
//! exhaustion) are acknowledged with 200 and `success:false` so the
//! sender does not redeliver; only caller-input errors (400) and
//! initialization failures (500) cross the boundary as non-200.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::config::WebhookConfig;
use crate::envelope::{normalize, InboundEnvelope};
use crate::error::WebhookError;
use crate::invoker::{ReadingInvoker, Sleep};
use crate::ledger::{IdempotencyGuard, LedgerStatus, ProcessingLedger};
use crate::metrics::{MetricsEmitter, MetricsSink};
use crate::processor::EventProcessor;
use crate::secrets::{ClientCache, SecretStore};

/// Transport-agnostic response: HTTP status plus JSON body.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

impl WebhookResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn bad_request(message: &str) -> Self {
        Self {
            status: 400,
            body: json!({ "error": message }),
        }
    }

    fn internal_error() -> Self {
        Self {
            status: 500,
            body: json!({ "error": "Internal server error" }),
        }
    }
}

/// The inbound payment-event webhook processor.
pub struct WebhookProcessor {
    cache: ClientCache,
    guard: IdempotencyGuard,
    processor: EventProcessor,
    metrics: MetricsEmitter,
}

impl WebhookProcessor {
    pub fn new(
        config: &WebhookConfig,
        store: Arc<dyn SecretStore>,
        ledger: Option<Arc<dyn ProcessingLedger>>,
        sink: Arc<dyn MetricsSink>,
        sleeper: Arc<dyn Sleep>,
    ) -> Self {
        let metrics = MetricsEmitter::new(sink, config.environment.clone());
        let invoker = ReadingInvoker::new(
            config.generate_reading_function_url.clone(),
            config.internal_invocation_secret.clone(),
            sleeper,
        );

        Self {
            cache: ClientCache::new(store, config),
            guard: IdempotencyGuard::new(ledger),
            processor: EventProcessor::new(invoker, metrics.clone()),
            metrics,
        }
    }

    /// Process one delivery end to end. Never panics and never returns
    /// an error: every outcome maps to a response for the sender.
    pub async fn handle(&self, envelope: InboundEnvelope) -> WebhookResponse {
        tracing::info!(
            body_len = envelope.body.as_ref().map(|b| b.len()).unwrap_or(0),
            base64_encoded = envelope.base64_encoded,
            "Webhook received"
        );

        let payload = match normalize(&envelope) {
            Ok(payload) => payload,
            Err(e) => return WebhookResponse::bad_request(&e.to_string()),
        };

        let secret = match self.cache.signing_secret().await {
            Ok(secret) => secret.to_string(),
            Err(e) => return self.initialization_failure(e).await,
        };
        let client = match self.cache.client().await {
            Ok(client) => client,
            Err(e) => return self.initialization_failure(e).await,
        };

        let event = match client.construct_event(&payload.raw_body, &payload.signature, &secret) {
            Ok(event) => event,
            Err(_) => {
                self.metrics.count("WebhookInvalidSignature", 1.0, &[]).await;
                return WebhookResponse::bad_request("Invalid signature");
            }
        };

        if self.guard.check_processed(&event.id).await {
            self.metrics.count("WebhookDuplicate", 1.0, &[]).await;
            return WebhookResponse::ok(json!({
                "received": true,
                "status": "already_processed"
            }));
        }

        let start = Instant::now();
        let result = self.processor.dispatch(&event).await;

        // Session id is only meaningful for checkout session events
        let session_id = if event.kind.starts_with("checkout.session.") {
            event.data.object.id.clone()
        } else {
            "unknown".to_string()
        };

        let status = if result.success {
            LedgerStatus::Processed
        } else {
            LedgerStatus::Failed
        };
        let recorded = self
            .guard
            .record_outcome(
                &event.id,
                &session_id,
                status,
                result.reading_id.clone(),
                result.error.clone(),
            )
            .await;
        if !recorded {
            self.metrics.count("IdempotencyRecordFailure", 1.0, &[]).await;
        }

        self.metrics
            .count(
                "WebhookProcessed",
                1.0,
                &[
                    ("EventType", event.kind.as_str()),
                    ("Success", if result.success { "true" } else { "false" }),
                ],
            )
            .await;
        self.metrics
            .seconds("WebhookProcessingTime", start.elapsed().as_secs_f64())
            .await;

        let mut body = json!({
            "received": true,
            "success": result.success
        });
        if let Some(reading_id) = result.reading_id {
            body["readingId"] = Value::from(reading_id);
        }

        WebhookResponse::ok(body)
    }

    async fn initialization_failure(&self, error: WebhookError) -> WebhookResponse {
        tracing::error!(error = %error, "Webhook processing error");
        self.metrics.count("WebhookError", 1.0, &[]).await;
        WebhookResponse::internal_error()
    }
}
