//! Host Network Configuration
//!
//! Vmkernel service tagging and standard-switch port groups, applied to every
//! connected host of a cluster.

use crate::controlplane::context::OpsContext;
use crate::controlplane::report::{
    HostReport, OperationKind, OperationOutcome, Routine, RunReport, SkipReason,
};
use crate::domain::ports::{Host, HostSession, VmkernelTag};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Highest valid VLAN id (4095 trunks all VLANs on a standard switch)
pub const MAX_VLAN_ID: u16 = 4095;

/// Check that an interface name looks like `vmk<N>`
pub fn validate_vmkernel_name(interface: &str) -> Result<()> {
    match interface.strip_prefix("vmk") {
        Some(index) if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) => Ok(()),
        _ => Err(Error::Validation(format!(
            "not a vmkernel interface: {:?}",
            interface
        ))),
    }
}

// =============================================================================
// Vmkernel Tags
// =============================================================================

/// Tags a vmkernel interface for a service on every connected host
pub struct VmkernelTagger {
    ctx: OpsContext,
}

impl VmkernelTagger {
    pub fn new(ctx: OpsContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, cluster: &str, interface: &str, tag: VmkernelTag) -> Result<RunReport> {
        let routine = Routine::TagVmkernel;
        validate_vmkernel_name(interface).map_err(|e| self.ctx.fail(routine, e))?;

        let (_, hosts) = self
            .ctx
            .resolve_cluster(cluster)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;

        let mut run = RunReport::begin(routine, cluster);
        for host in &hosts {
            let report = match self.ctx.open_session(host).await {
                Ok(session) => self.tag_host(host, session.as_ref(), interface, tag).await,
                Err(skipped) => skipped,
            };
            self.ctx.finish_host(&mut run, report);
        }

        Ok(run.finish())
    }

    async fn tag_host(
        &self,
        host: &Host,
        session: &dyn HostSession,
        interface: &str,
        tag: VmkernelTag,
    ) -> HostReport {
        let interfaces = match self.ctx.inventory.list_vmkernel_interfaces(host).await {
            Ok(interfaces) => interfaces,
            Err(e) => {
                let mut report = HostReport::new(&host.name);
                report.record_error(OperationKind::TagVmkernel, interface, &e);
                return report;
            }
        };

        let Some(vmk) = interfaces.iter().find(|i| i.name == interface) else {
            return HostReport::skipped(
                &host.name,
                SkipReason::NotApplicable {
                    message: format!("no vmkernel interface {}", interface),
                },
            );
        };

        let mut report = HostReport::new(&host.name);
        if vmk.tags.iter().any(|t| t.eq_ignore_ascii_case(tag.as_str())) {
            report.record(OperationKind::TagVmkernel, interface, OperationOutcome::Unchanged);
        } else {
            let result = session.tag_vmkernel(interface, tag).await;
            report.record_unit(OperationKind::TagVmkernel, interface, result);
        }
        report
    }
}

// =============================================================================
// Port Groups
// =============================================================================

/// Desired state of a port group on a standard switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroupSpec {
    pub switch: String,
    pub name: String,
    pub vlan_id: u16,
}

impl PortGroupSpec {
    pub fn validate(&self) -> Result<()> {
        if self.switch.trim().is_empty() {
            return Err(Error::Validation("switch name is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Validation("port group name is empty".into()));
        }
        if self.vlan_id > MAX_VLAN_ID {
            return Err(Error::Validation(format!(
                "VLAN id {} out of range 0-{}",
                self.vlan_id, MAX_VLAN_ID
            )));
        }
        Ok(())
    }
}

/// Ensures a port group exists with the right VLAN on every connected host
pub struct PortGroupReconciler {
    ctx: OpsContext,
}

impl PortGroupReconciler {
    pub fn new(ctx: OpsContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self), fields(switch = %spec.switch, port_group = %spec.name))]
    pub async fn run(&self, cluster: &str, spec: &PortGroupSpec) -> Result<RunReport> {
        let routine = Routine::EnsurePortGroup;
        spec.validate().map_err(|e| self.ctx.fail(routine, e))?;

        let (_, hosts) = self
            .ctx
            .resolve_cluster(cluster)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;

        let mut run = RunReport::begin(routine, cluster);
        for host in &hosts {
            let report = match self.ctx.open_session(host).await {
                Ok(session) => self.ensure_on_host(host, session.as_ref(), spec).await,
                Err(skipped) => skipped,
            };
            self.ctx.finish_host(&mut run, report);
        }

        Ok(run.finish())
    }

    async fn ensure_on_host(
        &self,
        host: &Host,
        session: &dyn HostSession,
        spec: &PortGroupSpec,
    ) -> HostReport {
        let switches = match self.ctx.inventory.list_switches(host).await {
            Ok(switches) => switches,
            Err(e) => {
                let mut report = HostReport::new(&host.name);
                report.record_error(OperationKind::AddPortGroup, &spec.name, &e);
                return report;
            }
        };

        let Some(switch) = switches.iter().find(|s| s.name == spec.switch) else {
            return HostReport::skipped(
                &host.name,
                SkipReason::NotApplicable {
                    message: format!("no standard switch {}", spec.switch),
                },
            );
        };

        let mut report = HostReport::new(&host.name);
        match switch.port_groups.iter().find(|pg| pg.name == spec.name) {
            Some(existing) if existing.vlan_id == spec.vlan_id => {
                report.record(OperationKind::AddPortGroup, &spec.name, OperationOutcome::Unchanged);
            }
            Some(_) => {
                let result = session.set_port_group_vlan(&spec.name, spec.vlan_id).await;
                report.record_unit(OperationKind::SetVlan, &spec.name, result);
            }
            None => {
                let result = session.add_port_group(&spec.switch, &spec.name).await;
                if report.record_unit(OperationKind::AddPortGroup, &spec.name, result) {
                    let result = session.set_port_group_vlan(&spec.name, spec.vlan_id).await;
                    report.record_unit(OperationKind::SetVlan, &spec.name, result);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::platform::simulated::{ShellCall, SimulatedShell};
    use crate::controlplane::platform::static_inventory::StaticInventory;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    const SNAPSHOT: &str = r#"
clusters:
  - name: C1
    hosts:
      - name: esx01
        switches:
          - name: vSwitch1
            uplinks: [vmnic2, vmnic3]
            port_groups:
              - { name: nvme-a, vlan_id: 120 }
        vmkernel_interfaces:
          - { name: vmk1, port_group: nvme-a, tags: [NVMeTCP] }
      - name: esx02
        switches:
          - name: vSwitch1
            port_groups:
              - { name: nvme-a, vlan_id: 99 }
        vmkernel_interfaces:
          - { name: vmk1, port_group: nvme-a }
      - name: esx03
        switches:
          - name: vSwitch1
      - name: esx04
"#;

    fn context(shell: &SimulatedShell) -> OpsContext {
        let inventory = StaticInventory::from_yaml(SNAPSHOT).unwrap();
        OpsContext::new(Arc::new(inventory), Arc::new(shell.clone()))
    }

    #[test]
    fn test_validate_inputs() {
        assert!(validate_vmkernel_name("vmk0").is_ok());
        assert!(validate_vmkernel_name("vmnic0").is_err());

        let spec = PortGroupSpec {
            switch: "vSwitch1".into(),
            name: "nvme-a".into(),
            vlan_id: 4096,
        };
        assert_matches!(spec.validate(), Err(Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_tag_only_where_missing() {
        let shell = SimulatedShell::new();
        let run = VmkernelTagger::new(context(&shell))
            .run("C1", "vmk1", VmkernelTag::NvmeTcp)
            .await
            .unwrap();

        assert_eq!(
            run.host("esx01").unwrap().operations[0].outcome,
            OperationOutcome::Unchanged
        );
        assert_eq!(
            run.host("esx02").unwrap().operations[0].outcome,
            OperationOutcome::Succeeded
        );
        assert!(run.host("esx03").unwrap().is_skipped());

        let tags: Vec<_> = shell
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ShellCall::TagVmkernel { .. }))
            .collect();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].host(), "esx02");
    }

    #[tokio::test]
    async fn test_port_group_reconcile() {
        let shell = SimulatedShell::new();
        let spec = PortGroupSpec {
            switch: "vSwitch1".into(),
            name: "nvme-a".into(),
            vlan_id: 120,
        };

        let run = PortGroupReconciler::new(context(&shell))
            .run("C1", &spec)
            .await
            .unwrap();

        // esx01 already correct
        assert_eq!(
            run.host("esx01").unwrap().operations[0].outcome,
            OperationOutcome::Unchanged
        );
        // esx02 has the wrong VLAN
        assert!(shell.calls_for("esx02").contains(&ShellCall::SetPortGroupVlan {
            host: "esx02".into(),
            port_group: "nvme-a".into(),
            vlan_id: 120,
        }));
        // esx03 gets the port group created then tagged with the VLAN
        let kinds: Vec<_> = run
            .host("esx03")
            .unwrap()
            .operations
            .iter()
            .map(|op| op.kind)
            .collect();
        assert_eq!(kinds, vec![OperationKind::AddPortGroup, OperationKind::SetVlan]);
        // esx04 has no such switch
        assert!(run.host("esx04").unwrap().is_skipped());
    }

    #[tokio::test]
    async fn test_failed_add_skips_vlan() {
        let shell = SimulatedShell::new().with_failing_target("esx03", "nvme-a");
        let spec = PortGroupSpec {
            switch: "vSwitch1".into(),
            name: "nvme-a".into(),
            vlan_id: 120,
        };

        let run = PortGroupReconciler::new(context(&shell))
            .run("C1", &spec)
            .await
            .unwrap();

        let esx03 = run.host("esx03").unwrap();
        assert_eq!(esx03.operations.len(), 1);
        assert_eq!(esx03.failures(), 1);
    }
}
