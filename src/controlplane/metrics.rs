//! Run Metrics
//!
//! Prometheus counters for host and operation outcomes. The CLI writes them
//! in text exposition format so a node-exporter textfile collector can pick
//! them up after each run.

use crate::controlplane::report::{HostOutcome, HostReport, Routine};
use crate::error::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for reconciliation runs
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    hosts: IntCounterVec,
    operations: IntCounterVec,
    fatal_errors: IntCounterVec,
}

impl ReconcileMetrics {
    /// Create metrics on a private registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let hosts = IntCounterVec::new(
            Opts::new("fabric_ops_hosts_total", "Hosts processed, by outcome"),
            &["routine", "outcome"],
        )?;
        let operations = IntCounterVec::new(
            Opts::new(
                "fabric_ops_operations_total",
                "Management calls made, by kind and outcome",
            ),
            &["routine", "kind", "outcome"],
        )?;
        let fatal_errors = IntCounterVec::new(
            Opts::new("fabric_ops_fatal_errors_total", "Runs aborted by a fatal error"),
            &["routine"],
        )?;

        registry.register(Box::new(hosts.clone()))?;
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(fatal_errors.clone()))?;

        Ok(Self {
            registry,
            hosts,
            operations,
            fatal_errors,
        })
    }

    /// Count a finished host report
    pub fn observe_host(&self, routine: Routine, report: &HostReport) {
        let outcome = match report.outcome {
            HostOutcome::Completed if report.failures() > 0 => "degraded",
            HostOutcome::Completed => "completed",
            HostOutcome::Skipped(_) => "skipped",
        };
        self.hosts
            .with_label_values(&[routine.as_str(), outcome])
            .inc();

        for op in &report.operations {
            self.operations
                .with_label_values(&[routine.as_str(), op.kind.as_str(), op.outcome.label()])
                .inc();
        }
    }

    /// Count a run aborted before completion
    pub fn observe_fatal(&self, routine: Routine) {
        self.fatal_errors.with_label_values(&[routine.as_str()]).inc();
    }

    pub fn host_count(&self, routine: Routine, outcome: &str) -> u64 {
        self.hosts
            .with_label_values(&[routine.as_str(), outcome])
            .get()
    }

    pub fn fatal_count(&self, routine: Routine) -> u64 {
        self.fatal_errors.with_label_values(&[routine.as_str()]).get()
    }

    /// Render all metrics in text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::error::Error::Internal(format!("metrics are not UTF-8: {}", e)))
    }
}
