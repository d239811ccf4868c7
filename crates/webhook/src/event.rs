//! Verified webhook event types
//!
//! These types are only ever constructed by successful signature
//! verification in [`crate::client::StripeClient::construct_event`];
//! untrusted input never becomes a `WebhookEvent` directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A signature-verified Stripe event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Globally unique event id (`evt_...`), the idempotency key
    pub id: String,
    /// Event type string, preserved verbatim for dispatch and metrics
    #[serde(rename = "type")]
    pub kind: String,
    /// Unix timestamp at which the processor created the event
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: CheckoutSession,
}

/// Snapshot of a checkout session as carried inside an event.
///
/// Stripe sends far more fields than listed here; everything the
/// processor does not consume is ignored on deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CheckoutSession {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Either the payment intent id (string) or an expanded object
    #[serde(default)]
    pub payment_intent: Option<Value>,
    /// Free-form metadata attached at checkout creation
    #[serde(default)]
    pub metadata: Option<HashMap<String, Value>>,
}

impl CheckoutSession {
    /// Resolve the paying user: `client_reference_id` first, then the
    /// `userId` metadata field.
    pub fn user_id(&self) -> Option<String> {
        if let Some(id) = self.client_reference_id.as_ref().filter(|v| !v.is_empty()) {
            return Some(id.clone());
        }
        self.metadata
            .as_ref()
            .and_then(|m| m.get("userId"))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string())
    }

    /// Payment intent id, only when the field carries the string form.
    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent.as_ref().and_then(|v| v.as_str())
    }
}

/// Transient result of processing a single event. Never persisted
/// directly; the outcome recorder derives the ledger record from it.
#[derive(Debug, Clone, Default)]
pub struct ProcessingResult {
    pub success: bool,
    pub reading_id: Option<String>,
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn success(reading_id: String) -> Self {
        Self {
            success: true,
            reading_id: Some(reading_id),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            reading_id: None,
            error: Some(error.into()),
        }
    }
}
