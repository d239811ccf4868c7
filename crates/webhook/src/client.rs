//! Stripe client and webhook signature verification
//!
//! Signature verification is done manually (HMAC-SHA256 over
//! `"{timestamp}.{payload}"` with the `whsec_`-stripped signing secret)
//! rather than through an SDK, so the event model stays under our
//! control. Every verification failure is logged with detail internally
//! but surfaced uniformly as `InvalidSignature`; the caller-facing
//! response never leaks why verification failed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{WebhookError, WebhookResult};
use crate::event::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload before it is rejected as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Thin Stripe client holding the secret API key.
#[derive(Clone)]
pub struct StripeClient {
    api_key: String,
}

impl StripeClient {
    pub fn new(api_key: String) -> Self {
        // chars, not bytes: key material is not guaranteed ASCII
        let key_prefix: String = api_key.chars().take(7).collect();
        tracing::info!(
            live_mode = api_key.starts_with("sk_live"),
            key_prefix = %key_prefix,
            "Stripe client initialized"
        );
        Self { api_key }
    }

    pub fn is_live_mode(&self) -> bool {
        self.api_key.starts_with("sk_live")
    }

    /// Verify a webhook payload against its signature header and parse
    /// the event. This is the only constructor of [`WebhookEvent`].
    pub fn construct_event(
        &self,
        payload: &str,
        signature: &str,
        signing_secret: &str,
    ) -> WebhookResult<WebhookEvent> {
        // Signature header format: t=timestamp,v1=signature[,v0=...]
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature.split(',') {
            match part.split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => v1_signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::error!("Missing timestamp in signature header");
            WebhookError::InvalidSignature
        })?;

        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::error!("Missing v1 signature in signature header");
            WebhookError::InvalidSignature
        })?;

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                diff = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(WebhookError::InvalidSignature);
        }

        let computed = compute_signature(signing_secret, timestamp, payload)?;

        if !bool::from(computed.as_bytes().ct_eq(v1_signature.as_bytes())) {
            tracing::error!(payload_len = payload.len(), "Webhook signature mismatch");
            return Err(WebhookError::InvalidSignature);
        }

        let event: WebhookEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse verified event JSON");
            WebhookError::InvalidSignature
        })?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.kind,
            created = event.created,
            "Webhook event verified"
        );

        Ok(event)
    }
}

/// Hex-encoded HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(
    signing_secret: &str,
    timestamp: i64,
    payload: &str,
) -> WebhookResult<String> {
    let secret_key = signing_secret
        .strip_prefix("whsec_")
        .unwrap_or(signing_secret);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook signing secret key");
        WebhookError::InvalidSignature
    })?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str) -> String {
        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
        let sig = compute_signature(SECRET, timestamp, payload).unwrap();
        format!("t={},v1={}", timestamp, sig)
    }

    fn event_json() -> String {
        serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": { "object": { "id": "cs_1", "payment_status": "paid" } }
        })
        .to_string()
    }

    #[test]
    fn valid_signature_yields_event() {
        let client = StripeClient::new("sk_test_123".to_string());
        let payload = event_json();
        let event = client
            .construct_event(&payload, &sign(&payload), SECRET)
            .unwrap();
        assert_eq!(event.id, "evt_1");
        assert!(!client.is_live_mode());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let client = StripeClient::new("sk_test_123".to_string());
        let payload = event_json();
        let header = sign(&payload);
        let tampered = payload.replace("cs_1", "cs_2");
        assert!(matches!(
            client.construct_event(&tampered, &header, SECRET),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let client = StripeClient::new("sk_test_123".to_string());
        let payload = event_json();
        let header = sign(&payload);
        assert!(matches!(
            client.construct_event(&payload, &header, "whsec_other"),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let client = StripeClient::new("sk_test_123".to_string());
        let payload = event_json();
        let old = time::OffsetDateTime::now_utc().unix_timestamp() - 600;
        let sig = compute_signature(SECRET, old, &payload).unwrap();
        let header = format!("t={},v1={}", old, sig);
        assert!(matches!(
            client.construct_event(&payload, &header, SECRET),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let client = StripeClient::new("sk_test_123".to_string());
        let payload = event_json();
        for header in ["", "v1=abc", "t=123", "garbage"] {
            assert!(matches!(
                client.construct_event(&payload, header, SECRET),
                Err(WebhookError::InvalidSignature)
            ));
        }
    }

    #[test]
    fn unparseable_payload_is_rejected_after_verification() {
        let client = StripeClient::new("sk_test_123".to_string());
        let payload = "not json";
        assert!(matches!(
            client.construct_event(payload, &sign(payload), SECRET),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn client_init_tolerates_multibyte_key_material() {
        // A multi-byte character straddling the logged prefix boundary
        // must not panic
        let client = StripeClient::new("sk_abcéxyz".to_string());
        assert!(!client.is_live_mode());
        StripeClient::new("é".to_string());
    }

    #[test]
    fn secret_prefix_is_optional() {
        // Same key material with and without the whsec_ prefix verifies
        let payload = event_json();
        let ts = time::OffsetDateTime::now_utc().unix_timestamp();
        let a = compute_signature("whsec_abc", ts, &payload).unwrap();
        let b = compute_signature("abc", ts, &payload).unwrap();
        assert_eq!(a, b);
    }
}
