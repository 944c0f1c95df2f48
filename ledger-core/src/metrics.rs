//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `chaincode_invocations_total{function,status}` - Invocations by outcome
//! - `chaincode_invocation_duration_seconds` - Histogram of invocation latencies
//! - `state_writes_total` - Keys written by committed invocations

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Invocations by function and status
    pub invocations_total: IntCounterVec,

    /// Invocation duration histogram
    pub invocation_duration: Histogram,

    /// Total keys written
    pub state_writes_total: IntCounter,

    /// Prometheus registry
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let invocations_total = IntCounterVec::new(
            Opts::new(
                "chaincode_invocations_total",
                "Chaincode invocations by function and status",
            ),
            &["function", "status"],
        )?;
        registry.register(Box::new(invocations_total.clone()))?;

        let invocation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "chaincode_invocation_duration_seconds",
                "Histogram of invocation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(invocation_duration.clone()))?;

        let state_writes_total = IntCounter::new(
            "state_writes_total",
            "Keys written by committed invocations",
        )?;
        registry.register(Box::new(state_writes_total.clone()))?;

        Ok(Self {
            invocations_total,
            invocation_duration,
            state_writes_total,
            registry,
        })
    }

    /// Record one invocation outcome
    pub fn record_invocation(&self, function: &str, status: &str, duration_seconds: f64) {
        self.invocations_total
            .with_label_values(&[function, status])
            .inc();
        self.invocation_duration.observe(duration_seconds);
    }

    /// Record committed writes
    pub fn record_writes(&self, count: usize) {
        self.state_writes_total.inc_by(count as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.state_writes_total.get(), 0);
        // Private registries never collide
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_invocation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_invocation("fundTransfer", "OK", 0.002);
        metrics.record_invocation("fundTransfer", "OK", 0.003);
        metrics.record_invocation("fundTransfer", "ERROR", 0.001);
        assert_eq!(
            metrics
                .invocations_total
                .with_label_values(&["fundTransfer", "OK"])
                .get(),
            2
        );
        assert_eq!(metrics.invocation_duration.get_sample_count(), 3);
    }

    #[test]
    fn test_record_writes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_writes(3);
        metrics.record_writes(2);
        assert_eq!(metrics.state_writes_total.get(), 5);
        assert!(!metrics.registry().gather().is_empty());
    }
}
