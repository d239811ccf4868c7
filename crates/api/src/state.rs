//! Application state

use std::sync::Arc;

use noctua_webhook::WebhookProcessor;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<WebhookProcessor>,
}

impl AppState {
    pub fn new(processor: WebhookProcessor) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }
}
