//! Metrics for the PostgreSQL session store
//!
//! - Commit outcomes
//! - Rolled back write transactions, by reason
//! - Per-operation latency

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for [`PostgresStore`](crate::PostgresStore)
#[derive(Clone)]
pub struct StoreMetrics {
    registry: Arc<Registry>,

    /// Commits, labelled `success` / `error`
    pub commits_total: CounterVec,
    /// Transactions rolled back instead of committed
    pub rollbacks_total: CounterVec,
    /// Store operation duration
    pub operation_duration_seconds: HistogramVec,
}

impl StoreMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let commits_total = CounterVec::new(
            Opts::new(
                "session_store_commits_total",
                "Total number of session write transactions committed",
            ),
            &["status"],
        )?;

        let rollbacks_total = CounterVec::new(
            Opts::new(
                "session_store_rollbacks_total",
                "Total number of session write transactions rolled back",
            ),
            &["reason"],
        )?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "session_store_operation_duration_seconds",
                "Session store operation duration in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25,
            ]),
            &["operation"],
        )?;

        registry.register(Box::new(commits_total.clone()))?;
        registry.register(Box::new(rollbacks_total.clone()))?;
        registry.register(Box::new(operation_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            commits_total,
            rollbacks_total,
            operation_duration_seconds,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_commit(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.commits_total.with_label_values(&[status]).inc();
    }

    pub fn record_rollback(&self, reason: &str) {
        self.rollbacks_total.with_label_values(&[reason]).inc();
    }

    pub fn observe(&self, operation: &str, duration_secs: f64) {
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}
