//! Best-effort operational metrics
//!
//! Every exported emit call is fire-and-forget: a sink failure is
//! logged and discarded, never surfaced to webhook processing.

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
    Seconds,
}

/// A single emitted signal.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub dimensions: Vec<(String, String)>,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn emit(&self, metric: Metric) -> anyhow::Result<()>;
}

/// Sink that emits metrics as structured tracing events, picked up by
/// the log pipeline.
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn emit(&self, metric: Metric) -> anyhow::Result<()> {
        tracing::info!(
            target: "noctua_webhook::metrics",
            metric = %metric.name,
            value = metric.value,
            unit = ?metric.unit,
            dimensions = ?metric.dimensions,
            "metric"
        );
        Ok(())
    }
}

/// Emitter wrapper that tags every metric with the deployment
/// environment and swallows sink errors.
#[derive(Clone)]
pub struct MetricsEmitter {
    sink: Arc<dyn MetricsSink>,
    environment: String,
}

impl MetricsEmitter {
    pub fn new(sink: Arc<dyn MetricsSink>, environment: String) -> Self {
        Self { sink, environment }
    }

    pub async fn count(&self, name: &str, value: f64, dimensions: &[(&str, &str)]) {
        self.emit(name, value, MetricUnit::Count, dimensions).await;
    }

    pub async fn seconds(&self, name: &str, value: f64) {
        self.emit(name, value, MetricUnit::Seconds, &[]).await;
    }

    async fn emit(&self, name: &str, value: f64, unit: MetricUnit, dimensions: &[(&str, &str)]) {
        let mut all = vec![("Environment".to_string(), self.environment.clone())];
        all.extend(
            dimensions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );

        let metric = Metric {
            name: name.to_string(),
            value,
            unit,
            dimensions: all,
        };

        if let Err(e) = self.sink.emit(metric).await {
            tracing::error!(metric = %name, error = %e, "Failed to emit metric");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every emitted metric for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub emitted: Mutex<Vec<Metric>>,
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        async fn emit(&self, metric: Metric) -> anyhow::Result<()> {
            self.emitted.lock().await.push(metric);
            Ok(())
        }
    }

    /// Always fails, for verifying emit errors are swallowed.
    pub struct FailingSink;

    #[async_trait]
    impl MetricsSink for FailingSink {
        async fn emit(&self, _metric: Metric) -> anyhow::Result<()> {
            anyhow::bail!("metrics backend unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingSink, RecordingSink};
    use super::*;

    #[tokio::test]
    async fn every_metric_carries_environment_dimension() {
        let sink = Arc::new(RecordingSink::default());
        let emitter = MetricsEmitter::new(sink.clone(), "prod".to_string());

        emitter
            .count("WebhookProcessed", 1.0, &[("EventType", "checkout.session.completed")])
            .await;

        let emitted = sink.emitted.lock().await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(
            emitted[0].dimensions[0],
            ("Environment".to_string(), "prod".to_string())
        );
        assert_eq!(
            emitted[0].dimensions[1],
            (
                "EventType".to_string(),
                "checkout.session.completed".to_string()
            )
        );
    }

    #[tokio::test]
    async fn sink_failure_never_propagates() {
        let emitter = MetricsEmitter::new(Arc::new(FailingSink), "dev".to_string());
        emitter.count("WebhookError", 1.0, &[]).await;
        emitter.seconds("WebhookProcessingTime", 0.25).await;
    }
}
