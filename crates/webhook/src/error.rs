//! Error types for webhook processing

use thiserror::Error;

/// Errors that cross the webhook component boundary.
///
/// Only two categories map to non-200 responses: caller input errors
/// (missing signature/body, invalid signature) become 400s, and
/// initialization errors (secret fetch) become 500s so the sender
/// retries the whole delivery. Everything else is absorbed into a
/// 200 acknowledgment with structured success/failure fields.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Missing request body")]
    MissingBody,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Initialization failed: {0}")]
    Initialization(String),
}

pub type WebhookResult<T> = Result<T, WebhookError>;
