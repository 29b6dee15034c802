//! Run Reports
//!
//! Every routine returns a report instead of printing status. The caller
//! decides how to surface it (human-readable lines, JSON, metrics).

use crate::domain::ports::ConnectionState;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

// =============================================================================
// Operations
// =============================================================================

/// Kind of management call made against a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ListAdapters,
    ListControllers,
    ListDatastores,
    Connect,
    Disconnect,
    Rescan,
    EnableAdapter,
    TagVmkernel,
    AddPortGroup,
    SetVlan,
    CreateVmfs,
    GrowVmfs,
    Unmount,
    Resignature,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ListAdapters => "list_adapters",
            OperationKind::ListControllers => "list_controllers",
            OperationKind::ListDatastores => "list_datastores",
            OperationKind::Connect => "connect",
            OperationKind::Disconnect => "disconnect",
            OperationKind::Rescan => "rescan",
            OperationKind::EnableAdapter => "enable_adapter",
            OperationKind::TagVmkernel => "tag_vmkernel",
            OperationKind::AddPortGroup => "add_port_group",
            OperationKind::SetVlan => "set_vlan",
            OperationKind::CreateVmfs => "create_vmfs",
            OperationKind::GrowVmfs => "grow_vmfs",
            OperationKind::Unmount => "unmount",
            OperationKind::Resignature => "resignature",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one management call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationOutcome {
    Succeeded,
    /// Desired state already present, no call made
    Unchanged,
    /// The host answered but refused the command
    Rejected,
    /// The call could not be carried out
    Failed { message: String },
}

impl OperationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            OperationOutcome::Succeeded => "succeeded",
            OperationOutcome::Unchanged => "unchanged",
            OperationOutcome::Rejected => "rejected",
            OperationOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OperationOutcome::Rejected | OperationOutcome::Failed { .. }
        )
    }
}

/// One management call and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    pub kind: OperationKind,
    /// Adapter, controller, interface, datastore... the call was about
    pub target: String,
    pub outcome: OperationOutcome,
}

// =============================================================================
// Hosts
// =============================================================================

/// Why a host was left untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NotConnected { state: ConnectionState },
    SessionUnavailable { message: String },
    FabricStorageInUse { datastores: Vec<String> },
    NotApplicable { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotConnected { state } => write!(f, "host is {}", state),
            SkipReason::SessionUnavailable { message } => {
                write!(f, "no management session: {}", message)
            }
            SkipReason::FabricStorageInUse { datastores } => write!(
                f,
                "fabric devices still back datastores: {}",
                datastores.join(", ")
            ),
            SkipReason::NotApplicable { message } => f.write_str(message),
        }
    }
}

/// Overall outcome for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostOutcome {
    Completed,
    Skipped(SkipReason),
}

/// Everything that happened on one host during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReport {
    pub host: String,
    pub outcome: HostOutcome,
    pub operations: Vec<OperationReport>,
}

impl HostReport {
    /// Start a report for a host that is being processed
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            outcome: HostOutcome::Completed,
            operations: Vec::new(),
        }
    }

    /// Report for a host that was left untouched
    pub fn skipped(host: impl Into<String>, reason: SkipReason) -> Self {
        let host = host.into();
        warn!(host = %host, "Skipping host: {}", reason);
        Self {
            host,
            outcome: HostOutcome::Skipped(reason),
            operations: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, HostOutcome::Skipped(_))
    }

    /// Record an operation outcome and log it
    pub fn record(
        &mut self,
        kind: OperationKind,
        target: impl Into<String>,
        outcome: OperationOutcome,
    ) {
        let target = target.into();
        match &outcome {
            OperationOutcome::Succeeded => {
                info!(host = %self.host, %kind, target = %target, "Operation succeeded")
            }
            OperationOutcome::Unchanged => {
                info!(host = %self.host, %kind, target = %target, "Already in desired state")
            }
            OperationOutcome::Rejected => {
                warn!(host = %self.host, %kind, target = %target, "Host rejected operation")
            }
            OperationOutcome::Failed { message } => {
                warn!(host = %self.host, %kind, target = %target, "Operation failed: {}", message)
            }
        }
        self.operations.push(OperationReport {
            kind,
            target,
            outcome,
        });
    }

    /// Record a call returning a success flag
    pub fn record_flag(
        &mut self,
        kind: OperationKind,
        target: impl Into<String>,
        result: Result<bool>,
    ) -> bool {
        let outcome = match result {
            Ok(true) => OperationOutcome::Succeeded,
            Ok(false) => OperationOutcome::Rejected,
            Err(e) => OperationOutcome::Failed {
                message: e.to_string(),
            },
        };
        let ok = outcome == OperationOutcome::Succeeded;
        self.record(kind, target, outcome);
        ok
    }

    /// Record a call returning nothing on success
    pub fn record_unit(
        &mut self,
        kind: OperationKind,
        target: impl Into<String>,
        result: Result<()>,
    ) -> bool {
        self.record_flag(kind, target, result.map(|()| true))
    }

    /// Record a failed lookup that prevented further work on the host
    pub fn record_error(&mut self, kind: OperationKind, target: impl Into<String>, error: &Error) {
        self.record(
            kind,
            target,
            OperationOutcome::Failed {
                message: error.to_string(),
            },
        );
    }

    /// Operations of one kind, in call order
    pub fn operations_of(&self, kind: OperationKind) -> impl Iterator<Item = &OperationReport> {
        self.operations.iter().filter(move |op| op.kind == kind)
    }

    pub fn failures(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| op.outcome.is_failure())
            .count()
    }

    /// One-line human summary
    pub fn message(&self) -> String {
        match &self.outcome {
            HostOutcome::Skipped(reason) => format!("skipped: {}", reason),
            HostOutcome::Completed => {
                let failures = self.failures();
                if failures == 0 {
                    format!("completed ({} operations)", self.operations.len())
                } else {
                    format!(
                        "completed with {} failed of {} operations",
                        failures,
                        self.operations.len()
                    )
                }
            }
        }
    }
}

// =============================================================================
// Runs
// =============================================================================

/// Routine a report was produced by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routine {
    FabricConnect,
    FabricDisconnect,
    EnableFabricAdapters,
    TagVmkernel,
    EnsurePortGroup,
    DatastoreCreate,
    DatastoreExpand,
    DatastoreUnmount,
    DatastoreResignature,
}

impl Routine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Routine::FabricConnect => "fabric_connect",
            Routine::FabricDisconnect => "fabric_disconnect",
            Routine::EnableFabricAdapters => "enable_fabric_adapters",
            Routine::TagVmkernel => "tag_vmkernel",
            Routine::EnsurePortGroup => "ensure_port_group",
            Routine::DatastoreCreate => "datastore_create",
            Routine::DatastoreExpand => "datastore_expand",
            Routine::DatastoreUnmount => "datastore_unmount",
            Routine::DatastoreResignature => "datastore_resignature",
        }
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counts for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub hosts: usize,
    pub completed: usize,
    pub skipped: usize,
    pub operations: usize,
    pub failed_operations: usize,
}

/// Report for one routine invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub routine: Routine,
    /// Cluster or host the routine was scoped to
    pub scope: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub hosts: Vec<HostReport>,
}

impl RunReport {
    pub fn begin(routine: Routine, scope: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            routine,
            scope: scope.into(),
            started_at: now,
            finished_at: now,
            hosts: Vec::new(),
        }
    }

    pub fn push(&mut self, host: HostReport) {
        self.hosts.push(host);
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        let summary = self.summary();
        info!(
            routine = %self.routine,
            scope = %self.scope,
            hosts = summary.hosts,
            skipped = summary.skipped,
            failed_operations = summary.failed_operations,
            "Run finished"
        );
        self
    }

    pub fn host(&self, name: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.host == name)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            hosts: self.hosts.len(),
            ..Default::default()
        };
        for host in &self.hosts {
            if host.is_skipped() {
                summary.skipped += 1;
            } else {
                summary.completed += 1;
            }
            summary.operations += host.operations.len();
            summary.failed_operations += host.failures();
        }
        summary
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} on {}", self.routine, self.scope)?;
        for host in &self.hosts {
            writeln!(f, "  {}: {}", host.host, host.message())?;
            for op in &host.operations {
                match &op.outcome {
                    OperationOutcome::Failed { message } => {
                        writeln!(f, "    {} {}: failed - {}", op.kind, op.target, message)?
                    }
                    outcome => writeln!(f, "    {} {}: {}", op.kind, op.target, outcome.label())?,
                }
            }
        }
        let s = self.summary();
        write!(
            f,
            "{} hosts: {} completed, {} skipped, {} of {} operations failed",
            s.hosts, s.completed, s.skipped, s.failed_operations, s.operations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flag_outcomes() {
        let mut report = HostReport::new("esx01");
        assert!(report.record_flag(OperationKind::Connect, "vmhba65", Ok(true)));
        assert!(!report.record_flag(OperationKind::Connect, "vmhba66", Ok(false)));
        assert!(!report.record_flag(
            OperationKind::Connect,
            "vmhba67",
            Err(Error::Internal("boom".into()))
        ));

        assert_eq!(report.operations.len(), 3);
        assert_eq!(report.operations[1].outcome, OperationOutcome::Rejected);
        assert_eq!(report.failures(), 2);
        assert_eq!(report.message(), "completed with 2 failed of 3 operations");
    }

    #[test]
    fn test_summary_and_display() {
        let mut run = RunReport::begin(Routine::FabricConnect, "C1");
        let mut h1 = HostReport::new("esx01");
        h1.record_unit(OperationKind::Rescan, "esx01", Ok(()));
        run.push(h1);
        run.push(HostReport::skipped(
            "esx02",
            SkipReason::NotConnected {
                state: ConnectionState::Disconnected,
            },
        ));
        let run = run.finish();

        let summary = run.summary();
        assert_eq!(summary.hosts, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed_operations, 0);

        let text = run.to_string();
        assert!(text.contains("esx02: skipped: host is disconnected"));
        assert!(text.contains("rescan esx01: succeeded"));
    }

    #[test]
    fn test_report_serializes() {
        let report = HostReport::skipped(
            "esx03",
            SkipReason::FabricStorageInUse {
                datastores: vec!["ds-nvme-01".into()],
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["status"], "skipped");
        assert_eq!(json["outcome"]["reason"], "fabric_storage_in_use");
    }
}
