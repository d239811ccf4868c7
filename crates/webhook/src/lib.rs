// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Noctua Webhook Module
//!
//! Processes inbound payment-completion notifications from Stripe:
//! verifies signatures, enforces at-most-once processing through a
//! persisted idempotency ledger, and triggers reading generation with
//! bounded retries, while always acknowledging the sender fast and
//! idempotently.
//!
//! ## Pipeline
//!
//! - **Normalizer**: resolves raw, base64, and gateway-template
//!   transport envelopes to the exact payload and signature header
//! - **Verifier**: HMAC-SHA256 signature verification
//! - **Idempotency Guard**: fail-open ledger lookup keyed by event id
//! - **Dispatcher / Session Processor**: routes checkout session
//!   events and drives the downstream invocation
//! - **Downstream Invoker**: reading generation with capped
//!   exponential backoff and jitter
//! - **Outcome Recorder / Metric Emitter**: best-effort bookkeeping on
//!   every exit path

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handler;
pub mod invoker;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod secrets;


// Client
pub use client::StripeClient;

// Config
pub use config::WebhookConfig;

// Envelope
pub use envelope::{InboundEnvelope, NormalizedPayload, Transport};

// Error
pub use error::{WebhookError, WebhookResult};

// Event
pub use event::{CheckoutSession, ProcessingResult, WebhookEvent};

// Handler
pub use handler::{WebhookProcessor, WebhookResponse};

// Invoker
pub use invoker::{ReadingInvoker, Sleep, TokioSleep};

// Ledger
pub use ledger::{
    IdempotencyGuard, InMemoryLedger, LedgerRecord, LedgerStatus, ProcessingLedger, RedisLedger,
};

// Metrics
pub use metrics::{LogMetricsSink, Metric, MetricUnit, MetricsEmitter, MetricsSink};

// Processor
pub use processor::EventProcessor;

// Secrets
pub use secrets::{ClientCache, HttpParameterStore, SecretStore};
