//! Storage Adapter Configuration
//!
//! Enables the software NVMe/TCP adapter on a set of uplinks on every
//! connected host of a cluster.

use crate::controlplane::context::OpsContext;
use crate::controlplane::report::{HostReport, OperationKind, Routine, RunReport};
use crate::domain::ports::HostSession;
use crate::error::{Error, Result};
use tracing::{info, instrument};

/// Check that an uplink name looks like `vmnic<N>`
pub fn validate_nic(nic: &str) -> Result<()> {
    match nic.strip_prefix("vmnic") {
        Some(index) if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) => Ok(()),
        _ => Err(Error::Validation(format!("not an uplink name: {:?}", nic))),
    }
}

/// Creates software NVMe/TCP adapters bound to physical uplinks
pub struct FabricAdapterEnabler {
    ctx: OpsContext,
}

impl FabricAdapterEnabler {
    pub fn new(ctx: OpsContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, cluster: &str, nics: &[String]) -> Result<RunReport> {
        let routine = Routine::EnableFabricAdapters;
        if nics.is_empty() {
            return Err(self
                .ctx
                .fail(routine, Error::Validation("no uplinks given".into())));
        }
        for nic in nics {
            validate_nic(nic).map_err(|e| self.ctx.fail(routine, e))?;
        }

        let (_, hosts) = self
            .ctx
            .resolve_cluster(cluster)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;

        let mut run = RunReport::begin(routine, cluster);
        for host in &hosts {
            let report = match self.ctx.open_session(host).await {
                Ok(session) => self.enable_on_host(session.as_ref(), nics).await,
                Err(skipped) => skipped,
            };
            self.ctx.finish_host(&mut run, report);
        }

        Ok(run.finish())
    }

    async fn enable_on_host(&self, session: &dyn HostSession, nics: &[String]) -> HostReport {
        let mut report = HostReport::new(session.host());
        info!(host = %session.host(), uplinks = nics.len(), "Enabling NVMe/TCP adapters");

        for nic in nics {
            let result = session.enable_fabric_adapter(nic).await;
            report.record_flag(OperationKind::EnableAdapter, nic.as_str(), result);
        }

        // New adapters only show up after a rescan
        self.ctx.rescan(session, &mut report).await;
        report
    }
}
