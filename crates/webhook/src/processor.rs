//! Event dispatch and checkout-session processing

use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

use crate::event::{CheckoutSession, ProcessingResult, WebhookEvent};
use crate::invoker::ReadingInvoker;
use crate::metrics::MetricsEmitter;

pub const EVENT_CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const EVENT_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

/// Routes verified events to the session-processing path and drives
/// the downstream invocation.
pub struct EventProcessor {
    invoker: ReadingInvoker,
    metrics: MetricsEmitter,
}

impl EventProcessor {
    pub fn new(invoker: ReadingInvoker, metrics: MetricsEmitter) -> Self {
        Self { invoker, metrics }
    }

    /// Dispatch on the verbatim event type string. Unknown types are
    /// recorded as failed outcomes without any downstream work.
    pub async fn dispatch(&self, event: &WebhookEvent) -> ProcessingResult {
        match event.kind.as_str() {
            EVENT_CHECKOUT_COMPLETED => {
                let session = &event.data.object;
                tracing::info!(
                    session_id = %session.id,
                    payment_status = ?session.payment_status,
                    user_id = ?session.user_id(),
                    "Processing checkout.session.completed"
                );
                self.process_checkout_session(session).await
            }
            // Delayed payment methods (e.g. bank transfers) complete later
            EVENT_ASYNC_PAYMENT_SUCCEEDED => {
                let session = &event.data.object;
                tracing::info!(
                    session_id = %session.id,
                    user_id = ?session.user_id(),
                    "Processing checkout.session.async_payment_succeeded"
                );
                self.process_checkout_session(session).await
            }
            other => {
                tracing::info!(event_type = %other, "Unhandled event type");
                ProcessingResult::failure(format!("Unhandled event type: {}", other))
            }
        }
    }

    async fn process_checkout_session(&self, session: &CheckoutSession) -> ProcessingResult {
        let Some(user_id) = session.user_id() else {
            tracing::error!(
                session_id = %session.id,
                client_reference_id = ?session.client_reference_id,
                metadata = ?session.metadata,
                "No userId found in session"
            );
            return ProcessingResult::failure("No userId found in checkout session");
        };

        if session.payment_status.as_deref() != Some("paid") {
            let status = session.payment_status.as_deref().unwrap_or("unknown");
            tracing::info!(
                session_id = %session.id,
                payment_status = %status,
                user_id = %user_id,
                "Session not paid, skipping reading generation"
            );
            return ProcessingResult::failure(format!("Payment status is {}, not paid", status));
        }

        let metadata = build_reading_metadata(session);

        let start = Instant::now();
        match self.invoker.invoke(&user_id, &metadata).await {
            Ok(reading_id) => {
                self.metrics.count("ReadingGenerationSuccess", 1.0, &[]).await;
                self.metrics
                    .seconds("ReadingGenerationTime", start.elapsed().as_secs_f64())
                    .await;
                ProcessingResult::success(reading_id)
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session.id,
                    user_id = %user_id,
                    error = %e,
                    "Error processing checkout session"
                );
                self.metrics.count("ReadingGenerationFailure", 1.0, &[]).await;
                ProcessingResult::failure(e.to_string())
            }
        }
    }
}

/// Build the metadata bag handed to the reading generator.
///
/// Always carries the session id; the optional snapshot fields are
/// included only when present and non-null. Free-form event metadata
/// is merged last and wins on key collision. Pure function: running it
/// twice on the same snapshot yields identical output.
pub fn build_reading_metadata(session: &CheckoutSession) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("sessionId".to_string(), Value::from(session.id.clone()));

    if let Some(email) = session.customer_email.as_ref().filter(|v| !v.is_empty()) {
        metadata.insert("customerEmail".to_string(), Value::from(email.clone()));
    }
    if let Some(amount) = session.amount_total {
        metadata.insert("amountTotal".to_string(), Value::from(amount));
    }
    if let Some(currency) = session.currency.as_ref().filter(|v| !v.is_empty()) {
        metadata.insert("currency".to_string(), Value::from(currency.clone()));
    }
    if let Some(intent_id) = session.payment_intent_id() {
        metadata.insert("paymentIntentId".to_string(), Value::from(intent_id));
    }

    if let Some(extra) = &session.metadata {
        for (key, value) in extra {
            metadata.insert(key.clone(), value.clone());
        }
    }

    metadata
}
