//! Shared plumbing for all routines
//!
//! Cluster resolution, host gating and rescans behave the same in every
//! routine, so they live here rather than in each reconciler.

use crate::controlplane::metrics::ReconcileMetrics;
use crate::controlplane::report::{HostReport, OperationKind, Routine, RunReport, SkipReason};
use crate::domain::ports::{Cluster, Host, HostSession, HostShellRef, InventoryRef};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Collaborators every routine runs against
#[derive(Clone)]
pub struct OpsContext {
    pub inventory: InventoryRef,
    pub shell: HostShellRef,
    pub metrics: Option<Arc<ReconcileMetrics>>,
}

impl OpsContext {
    pub fn new(inventory: InventoryRef, shell: HostShellRef) -> Self {
        Self {
            inventory,
            shell,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve a cluster and its hosts; an unknown cluster aborts the run
    pub async fn resolve_cluster(&self, name: &str) -> Result<(Cluster, Vec<Host>)> {
        let cluster = self
            .inventory
            .find_cluster(name)
            .await?
            .ok_or_else(|| Error::not_found("Cluster", name))?;

        let hosts = self.inventory.list_hosts(&cluster).await?;
        info!(cluster = %cluster.name, hosts = hosts.len(), "Resolved cluster");

        Ok((cluster, hosts))
    }

    /// Resolve a single host that must be connected
    pub async fn resolve_connected_host(&self, name: &str) -> Result<Host> {
        let host = self
            .inventory
            .find_host(name)
            .await?
            .ok_or_else(|| Error::not_found("Host", name))?;

        if !host.is_connected() {
            return Err(Error::HostUnavailable {
                host: host.name,
                state: host.connection_state.to_string(),
            });
        }
        Ok(host)
    }

    /// Open a session on a host, or explain why the host is skipped
    ///
    /// Hosts that are not connected never get a session opened.
    pub async fn open_session(
        &self,
        host: &Host,
    ) -> std::result::Result<Box<dyn HostSession>, HostReport> {
        if !host.is_connected() {
            return Err(HostReport::skipped(
                &host.name,
                SkipReason::NotConnected {
                    state: host.connection_state,
                },
            ));
        }

        match self.shell.open_session(host).await {
            Ok(session) => {
                debug!(host = %host.name, "Opened management session");
                Ok(session)
            }
            Err(e) => Err(HostReport::skipped(
                &host.name,
                SkipReason::SessionUnavailable {
                    message: e.to_string(),
                },
            )),
        }
    }

    /// Open a session on a single-target host; failure aborts the routine
    pub async fn open_required_session(&self, host: &Host) -> Result<Box<dyn HostSession>> {
        self.shell.open_session(host).await.map_err(|e| match e {
            Error::SessionFailed { .. } => e,
            other => Error::SessionFailed {
                host: host.name.clone(),
                reason: other.to_string(),
            },
        })
    }

    /// Rescan storage on the session's host and record the outcome
    pub async fn rescan(&self, session: &dyn HostSession, report: &mut HostReport) {
        let result = session.rescan_storage().await;
        report.record_unit(OperationKind::Rescan, session.host(), result);
    }

    /// Append a host report to a run, counting it in the metrics
    pub fn finish_host(&self, run: &mut RunReport, report: HostReport) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_host(run.routine, &report);
        }
        run.push(report);
    }

    /// Count a run that stopped on a fatal error
    pub fn fail(&self, routine: Routine, error: Error) -> Error {
        if let Some(metrics) = &self.metrics {
            metrics.observe_fatal(routine);
        }
        error
    }
}
