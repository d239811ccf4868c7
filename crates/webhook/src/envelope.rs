//! Transport envelope normalization
//!
//! Webhook deliveries reach the processor in one of several transport
//! shapes depending on what sits in front of it: the raw request body,
//! a base64-encoded body, or a gateway template that wraps body and
//! headers in a JSON object. Normalization resolves all of them to the
//! exact payload bytes and signature header the verifier needs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{WebhookError, WebhookResult};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// The as-received request, constructed once per delivery.
#[derive(Debug, Clone, Default)]
pub struct InboundEnvelope {
    pub body: Option<String>,
    pub headers: HashMap<String, String>,
    pub base64_encoded: bool,
}

impl InboundEnvelope {
    pub fn new(body: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            body: Some(body.into()),
            headers,
            base64_encoded: false,
        }
    }
}

/// Tagged result of transport detection. Each variant is attempted in
/// order; a failed attempt falls through to the next.
#[derive(Debug, PartialEq, Eq)]
pub enum Transport {
    /// Gateway template: JSON wrapper with base64 `body` and `headers`
    TemplateWrapped {
        body_b64: String,
        headers: HashMap<String, String>,
    },
    /// Raw body flagged as base64-encoded
    Base64Body(String),
    /// Raw body, no further decoding
    RawBody(String),
}

/// The normalized delivery: exact payload text plus signature header.
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
    pub raw_body: String,
    pub signature: String,
}

/// Classify the transport shape of an envelope.
///
/// A body that parses as JSON but is not the gateway wrapper is the
/// webhook payload itself and must be passed through untouched, even
/// when the base64 flag is set.
pub fn detect_transport(envelope: &InboundEnvelope) -> Transport {
    let body = envelope.body.clone().unwrap_or_default();

    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(map)) => {
            let wrapped_body = map.get("body").and_then(|v| v.as_str());
            let wrapped_headers = map.get("headers").and_then(|v| v.as_object());
            if let (Some(inner), Some(headers)) = (wrapped_body, wrapped_headers) {
                let headers = headers
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect();
                return Transport::TemplateWrapped {
                    body_b64: inner.to_string(),
                    headers,
                };
            }
            Transport::RawBody(body)
        }
        Ok(_) => Transport::RawBody(body),
        Err(_) if envelope.base64_encoded => Transport::Base64Body(body),
        Err(_) => Transport::RawBody(body),
    }
}

/// Resolve an envelope to the payload and signature the verifier needs.
///
/// Fails with `MissingSignature` when no signature header is found by
/// exact or case-insensitive match, and `MissingBody` when the resolved
/// body is empty or cannot be decoded. Both are terminal 400s.
pub fn normalize(envelope: &InboundEnvelope) -> WebhookResult<NormalizedPayload> {
    let (raw_body, signature) = match detect_transport(envelope) {
        Transport::TemplateWrapped { body_b64, headers } => {
            let raw = decode_base64(&body_b64)?;
            (raw, header_lookup(&headers, SIGNATURE_HEADER))
        }
        Transport::Base64Body(body) => (
            decode_base64(&body)?,
            header_lookup(&envelope.headers, SIGNATURE_HEADER),
        ),
        Transport::RawBody(body) => (body, header_lookup(&envelope.headers, SIGNATURE_HEADER)),
    };

    let signature = signature.ok_or_else(|| {
        tracing::error!("Missing Stripe signature header");
        WebhookError::MissingSignature
    })?;

    if raw_body.is_empty() {
        tracing::error!("Missing request body");
        return Err(WebhookError::MissingBody);
    }

    Ok(NormalizedPayload {
        raw_body,
        signature,
    })
}

fn decode_base64(input: &str) -> WebhookResult<String> {
    let bytes = BASE64.decode(input).map_err(|e| {
        tracing::error!(error = %e, "Failed to base64-decode request body");
        WebhookError::MissingBody
    })?;
    String::from_utf8(bytes).map_err(|e| {
        tracing::error!(error = %e, "Request body is not valid UTF-8");
        WebhookError::MissingBody
    })
}

/// Exact lookup first, then a case-insensitive scan.
fn header_lookup(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    if let Some(value) = headers.get(name) {
        return Some(value.clone());
    }
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig_headers(name: &str) -> HashMap<String, String> {
        HashMap::from([(name.to_string(), "t=1,v1=abc".to_string())])
    }

    #[test]
    fn raw_json_body_passes_through() {
        let envelope = InboundEnvelope::new(r#"{"id":"evt_1"}"#, sig_headers("stripe-signature"));
        let payload = normalize(&envelope).unwrap();
        assert_eq!(payload.raw_body, r#"{"id":"evt_1"}"#);
        assert_eq!(payload.signature, "t=1,v1=abc");
    }

    #[test]
    fn json_body_ignores_base64_flag() {
        let mut envelope =
            InboundEnvelope::new(r#"{"id":"evt_1"}"#, sig_headers("stripe-signature"));
        envelope.base64_encoded = true;
        assert_eq!(
            detect_transport(&envelope),
            Transport::RawBody(r#"{"id":"evt_1"}"#.to_string())
        );
    }

    #[test]
    fn base64_flagged_body_is_decoded() {
        let encoded = BASE64.encode(r#"{"id":"evt_1"}"#);
        let mut envelope = InboundEnvelope::new(encoded, sig_headers("Stripe-Signature"));
        envelope.base64_encoded = true;
        let payload = normalize(&envelope).unwrap();
        assert_eq!(payload.raw_body, r#"{"id":"evt_1"}"#);
    }

    #[test]
    fn template_wrapper_decodes_body_and_reads_nested_headers() {
        let inner = r#"{"id":"evt_1"}"#;
        let wrapper = serde_json::json!({
            "body": BASE64.encode(inner),
            "headers": { "Stripe-Signature": "t=2,v1=def" }
        });
        let envelope = InboundEnvelope::new(wrapper.to_string(), HashMap::new());
        let payload = normalize(&envelope).unwrap();
        assert_eq!(payload.raw_body, inner);
        assert_eq!(payload.signature, "t=2,v1=def");
    }

    #[test]
    fn template_and_raw_base64_resolve_identically() {
        let inner = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let wrapper = serde_json::json!({
            "body": BASE64.encode(inner),
            "headers": { "stripe-signature": "t=3,v1=ghi" }
        });
        let wrapped = InboundEnvelope::new(wrapper.to_string(), HashMap::new());

        let mut raw = InboundEnvelope::new(BASE64.encode(inner), sig_headers("stripe-signature"));
        raw.base64_encoded = true;
        raw.headers
            .insert("stripe-signature".to_string(), "t=3,v1=ghi".to_string());

        let a = normalize(&wrapped).unwrap();
        let b = normalize(&raw).unwrap();
        assert_eq!(a.raw_body, b.raw_body);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn missing_signature_is_terminal() {
        let envelope = InboundEnvelope::new(r#"{"id":"evt_1"}"#, HashMap::new());
        assert!(matches!(
            normalize(&envelope),
            Err(WebhookError::MissingSignature)
        ));
    }

    #[test]
    fn signature_header_is_case_insensitive() {
        let envelope = InboundEnvelope::new(r#"{"id":"evt_1"}"#, sig_headers("STRIPE-SIGNATURE"));
        assert!(normalize(&envelope).is_ok());
    }

    #[test]
    fn empty_body_is_terminal() {
        let envelope = InboundEnvelope::new("", sig_headers("stripe-signature"));
        assert!(matches!(normalize(&envelope), Err(WebhookError::MissingBody)));
    }

    #[test]
    fn absent_body_is_terminal() {
        let envelope = InboundEnvelope {
            body: None,
            headers: sig_headers("stripe-signature"),
            base64_encoded: false,
        };
        assert!(matches!(normalize(&envelope), Err(WebhookError::MissingBody)));
    }
}
