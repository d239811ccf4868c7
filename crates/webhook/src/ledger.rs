//! Idempotency ledger: guard and outcome recorder
//!
//! The ledger is the only cross-request synchronization point. It has
//! no client-side locking, so at-most-once processing is a best-effort
//! property: the guard is deliberately fail-open (a lookup error lets
//! processing proceed rather than block deliveries on a ledger outage),
//! which can duplicate downstream work while the ledger is unreachable.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Terminal status of a single processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Processed,
    Failed,
    Skipped,
}

/// Write-once record keyed by event id. A second delivery of the same
/// event reads the existing record and produces no further writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub event_id: String,
    pub session_id: String,
    pub processed_at: String,
    pub status: LedgerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Key-value store backing the ledger.
#[async_trait]
pub trait ProcessingLedger: Send + Sync {
    async fn get_record(&self, event_id: &str) -> anyhow::Result<Option<LedgerRecord>>;
    async fn put_record(&self, record: &LedgerRecord) -> anyhow::Result<()>;
}

/// Redis-backed ledger. Records are stored as JSON under
/// `webhook:event:{event_id}`.
pub struct RedisLedger {
    conn: redis::aio::ConnectionManager,
}

impl RedisLedger {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn key(event_id: &str) -> String {
        format!("webhook:event:{}", event_id)
    }
}

#[async_trait]
impl ProcessingLedger for RedisLedger {
    async fn get_record(&self, event_id: &str) -> anyhow::Result<Option<LedgerRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(event_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put_record(&self, record: &LedgerRecord) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        let _: () = conn.set(Self::key(&record.event_id), json).await?;
        Ok(())
    }
}

/// In-memory ledger for tests and local development.
#[derive(Default)]
pub struct InMemoryLedger {
    records: Mutex<HashMap<String, LedgerRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessingLedger for InMemoryLedger {
    async fn get_record(&self, event_id: &str) -> anyhow::Result<Option<LedgerRecord>> {
        Ok(self.records.lock().await.get(event_id).cloned())
    }

    async fn put_record(&self, record: &LedgerRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .await
            .insert(record.event_id.clone(), record.clone());
        Ok(())
    }
}

/// Guard over the ledger. When no ledger is configured both operations
/// degrade to logged no-ops.
pub struct IdempotencyGuard {
    ledger: Option<Arc<dyn ProcessingLedger>>,
}

impl IdempotencyGuard {
    pub fn new(ledger: Option<Arc<dyn ProcessingLedger>>) -> Self {
        Self { ledger }
    }

    pub fn unconfigured() -> Self {
        Self { ledger: None }
    }

    /// True only on a definite ledger hit. A miss returns false; so
    /// does a lookup error (fail-open).
    pub async fn check_processed(&self, event_id: &str) -> bool {
        let Some(ledger) = &self.ledger else {
            tracing::warn!("Webhook ledger not configured, skipping idempotency check");
            return false;
        };

        match ledger.get_record(event_id).await {
            Ok(Some(record)) => {
                tracing::info!(
                    event_id = %event_id,
                    processed_at = %record.processed_at,
                    status = ?record.status,
                    "Event already processed"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Error checking idempotency");
                false
            }
        }
    }

    /// Best-effort terminal write. Returns whether the write succeeded
    /// so the caller can emit a failure metric; the error itself never
    /// propagates and never changes the response to the sender.
    pub async fn record_outcome(
        &self,
        event_id: &str,
        session_id: &str,
        status: LedgerStatus,
        reading_id: Option<String>,
        error: Option<String>,
    ) -> bool {
        let Some(ledger) = &self.ledger else {
            tracing::warn!("Webhook ledger not configured, skipping outcome recording");
            return true;
        };

        let processed_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());

        let record = LedgerRecord {
            event_id: event_id.to_string(),
            session_id: session_id.to_string(),
            processed_at,
            status,
            reading_id,
            error,
        };

        match ledger.put_record(&record).await {
            Ok(()) => {
                tracing::info!(
                    event_id = %event_id,
                    session_id = %session_id,
                    status = ?status,
                    reading_id = ?record.reading_id,
                    "Recorded processed event"
                );
                true
            }
            Err(e) => {
                tracing::error!(event_id = %event_id, error = %e, "Error recording processed event");
                false
            }
        }
    }
}
