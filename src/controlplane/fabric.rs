//! NVMe/TCP Fabric Reconcilers
//!
//! Connect every eligible host of a cluster to an NVMe subsystem, or tear
//! those connections down again. Hosts are processed one after another and
//! isolated from each other; within a host every adapter/controller is
//! isolated from the others.

use crate::controlplane::context::OpsContext;
use crate::controlplane::report::{HostReport, OperationKind, Routine, RunReport, SkipReason};
use crate::domain::ports::{FabricConnectRequest, FabricTarget, Host, HostSession};
use crate::domain::tuning::FabricTuning;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Device-id prefix of namespaces presented over NVMe fabrics
pub const DEFAULT_FABRIC_DEVICE_PREFIX: &str = "eui.";

// =============================================================================
// Connect
// =============================================================================

/// Connects every connected host in a cluster to one NVMe/TCP target
pub struct FabricConnectionReconciler {
    ctx: OpsContext,
}

impl FabricConnectionReconciler {
    pub fn new(ctx: OpsContext) -> Self {
        Self { ctx }
    }

    /// Connect all NVMe/TCP adapters of every connected host to `target`
    ///
    /// Fails only when the input is invalid or the cluster does not exist.
    #[instrument(
        skip(self, tuning),
        fields(address = %target.address, nqn = %target.subsystem_nqn)
    )]
    pub async fn run(
        &self,
        cluster: &str,
        target: &FabricTarget,
        tuning: FabricTuning,
    ) -> Result<RunReport> {
        let routine = Routine::FabricConnect;
        validate_target(target).map_err(|e| self.ctx.fail(routine, e))?;
        tuning.validate().map_err(|e| self.ctx.fail(routine, e))?;

        let (_, hosts) = self
            .ctx
            .resolve_cluster(cluster)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;

        let mut run = RunReport::begin(routine, cluster);
        for host in &hosts {
            let report = match self.ctx.open_session(host).await {
                Ok(session) => self.connect_host(host, session.as_ref(), target, tuning).await,
                Err(skipped) => skipped,
            };
            self.ctx.finish_host(&mut run, report);
        }

        Ok(run.finish())
    }

    async fn connect_host(
        &self,
        host: &Host,
        session: &dyn HostSession,
        target: &FabricTarget,
        tuning: FabricTuning,
    ) -> HostReport {
        let mut report = HostReport::new(&host.name);

        match self.ctx.inventory.list_adapters(host).await {
            Ok(adapters) => {
                let matching: Vec<_> = adapters.into_iter().filter(|a| a.is_nvme_tcp()).collect();
                info!(host = %host.name, adapters = matching.len(), "Connecting NVMe/TCP adapters");

                for adapter in matching {
                    let request = FabricConnectRequest {
                        adapter: adapter.name.clone(),
                        target: target.clone(),
                        tuning,
                    };
                    let result = session.connect_fabric(&request).await;
                    report.record_flag(OperationKind::Connect, adapter.name, result);
                }
            }
            Err(e) => report.record_error(OperationKind::ListAdapters, &host.name, &e),
        }

        // Always refresh the storage view, whatever happened above
        self.ctx.rescan(session, &mut report).await;
        report
    }
}

fn validate_target(target: &FabricTarget) -> Result<()> {
    if target.address.trim().is_empty() {
        return Err(Error::Validation("target address is empty".into()));
    }
    if target.subsystem_nqn.trim().is_empty() {
        return Err(Error::Validation("subsystem NQN is empty".into()));
    }
    Ok(())
}

// =============================================================================
// Disconnect
// =============================================================================

/// Options for tearing down fabric connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectOptions {
    /// Hosts with a datastore on a device id starting with this are left alone
    pub fabric_device_prefix: String,
}

impl Default for DisconnectOptions {
    fn default() -> Self {
        Self {
            fabric_device_prefix: DEFAULT_FABRIC_DEVICE_PREFIX.to_string(),
        }
    }
}

/// Disconnects every registered NVMe controller on the hosts of a cluster
pub struct FabricDisconnectionReconciler {
    ctx: OpsContext,
    options: DisconnectOptions,
}

impl FabricDisconnectionReconciler {
    pub fn new(ctx: OpsContext, options: DisconnectOptions) -> Self {
        Self { ctx, options }
    }

    /// Disconnect all controllers from `subsystem_nqn` on every eligible host
    ///
    /// The controller list is not filtered by target: every controller on a
    /// host is disconnected against the given NQN.
    #[instrument(skip(self), fields(nqn = %subsystem_nqn))]
    pub async fn run(&self, cluster: &str, subsystem_nqn: &str) -> Result<RunReport> {
        let routine = Routine::FabricDisconnect;
        if subsystem_nqn.trim().is_empty() {
            return Err(self
                .ctx
                .fail(routine, Error::Validation("subsystem NQN is empty".into())));
        }
        if self.options.fabric_device_prefix.is_empty() {
            return Err(self.ctx.fail(
                routine,
                Error::Configuration("fabric device prefix is empty".into()),
            ));
        }

        let (_, hosts) = self
            .ctx
            .resolve_cluster(cluster)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;

        let mut run = RunReport::begin(routine, cluster);
        for host in &hosts {
            let report = match self.check_fabric_storage(host).await {
                Some(report) => report,
                None => match self.ctx.open_session(host).await {
                    Ok(session) => {
                        self.disconnect_host(host, session.as_ref(), subsystem_nqn)
                            .await
                    }
                    Err(skipped) => skipped,
                },
            };
            self.ctx.finish_host(&mut run, report);
        }

        Ok(run.finish())
    }

    /// Decide from the inventory alone whether a connected host must be left alone
    ///
    /// Returns the final report for a host that gets no session.
    async fn check_fabric_storage(&self, host: &Host) -> Option<HostReport> {
        if !host.is_connected() {
            return None;
        }

        let datastores = match self.ctx.inventory.list_datastores(host).await {
            Ok(datastores) => datastores,
            Err(e) => {
                // Without the datastore list we cannot tell if storage is in use
                let mut report = HostReport::new(&host.name);
                report.record_error(OperationKind::ListDatastores, &host.name, &e);
                return Some(report);
            }
        };

        let in_use: Vec<String> = datastores
            .iter()
            .filter(|ds| ds.has_extent_with_prefix(&self.options.fabric_device_prefix))
            .map(|ds| ds.name.clone())
            .collect();
        if in_use.is_empty() {
            return None;
        }
        Some(HostReport::skipped(
            &host.name,
            SkipReason::FabricStorageInUse { datastores: in_use },
        ))
    }

    async fn disconnect_host(
        &self,
        host: &Host,
        session: &dyn HostSession,
        subsystem_nqn: &str,
    ) -> HostReport {
        let mut report = HostReport::new(&host.name);

        match session.list_controllers().await {
            Ok(controllers) => {
                info!(
                    host = %host.name,
                    controllers = controllers.len(),
                    "Disconnecting NVMe controllers"
                );
                for controller in controllers {
                    let result = session
                        .disconnect_fabric(
                            &controller.adapter,
                            controller.controller_number,
                            subsystem_nqn,
                        )
                        .await;
                    report.record_flag(
                        OperationKind::Disconnect,
                        format!("{}/{}", controller.adapter, controller.controller_number),
                        result,
                    );
                }
            }
            Err(e) => {
                warn!(host = %host.name, "Could not list controllers: {}", e);
                report.record_error(OperationKind::ListControllers, &host.name, &e);
            }
        }

        self.ctx.rescan(session, &mut report).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::metrics::ReconcileMetrics;
    use crate::controlplane::platform::simulated::{controller_key, ShellCall, SimulatedShell};
    use crate::controlplane::platform::static_inventory::{
        ClusterSpec, HostSpec, InventorySnapshot, StaticInventory,
    };
    use crate::controlplane::report::{HostOutcome, OperationOutcome};
    use crate::domain::device::DeviceId;
    use crate::domain::ports::{
        Cluster, ConnectionState, Datastore, FabricController, FilesystemType, Inventory,
        StorageAdapter, StorageDevice, VirtualSwitch, VmkernelInterface,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::Arc;

    const NQN: &str = "nqn.2010-06.com.purestorage:flasharray.5d1f0e9c2b8a";

    fn target() -> FabricTarget {
        FabricTarget {
            address: "192.0.2.50".into(),
            subsystem_nqn: NQN.into(),
        }
    }

    fn nvme_adapter(name: &str) -> StorageAdapter {
        StorageAdapter {
            name: name.into(),
            driver: "nvmetcp".into(),
            description: "VMware NVMe over TCP Storage Adapter".into(),
        }
    }

    fn other_adapter(name: &str) -> StorageAdapter {
        StorageAdapter {
            name: name.into(),
            driver: "iscsi_vmk".into(),
            description: String::new(),
        }
    }

    fn host(name: &str, state: ConnectionState, adapters: Vec<StorageAdapter>) -> HostSpec {
        HostSpec {
            connection_state: state,
            adapters,
            ..HostSpec::new(name)
        }
    }

    fn context(hosts: Vec<HostSpec>, shell: &SimulatedShell) -> OpsContext {
        let inventory = StaticInventory::new(InventorySnapshot {
            clusters: vec![ClusterSpec {
                name: "C1".into(),
                hosts,
            }],
            standalone_hosts: vec![],
        })
        .unwrap();
        OpsContext::new(Arc::new(inventory), Arc::new(shell.clone()))
    }

    fn controller(adapter: &str, number: u32) -> FabricController {
        FabricController {
            name: format!("{}#{}", NQN, adapter),
            adapter: adapter.into(),
            controller_number: number,
            transport: "TCP".into(),
        }
    }

    fn is_connect(c: &ShellCall) -> bool {
        matches!(c, ShellCall::ConnectFabric { .. })
    }

    fn is_rescan(c: &ShellCall) -> bool {
        matches!(c, ShellCall::RescanStorage { .. })
    }

    #[tokio::test]
    async fn test_connect_scenario_one_connected_host() {
        let shell = SimulatedShell::new();
        let ctx = context(
            vec![
                host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
                host("H2", ConnectionState::Disconnected, vec![nvme_adapter("vmhba65")]),
            ],
            &shell,
        );

        let run = FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        assert_eq!(shell.count(is_connect), 1);
        assert_eq!(shell.count(is_rescan), 1);
        assert!(shell.calls_for("H2").is_empty());
        assert_matches!(
            &shell.calls_for("H1")[1],
            ShellCall::ConnectFabric { adapter, address, .. }
                if adapter == "vmhba65" && address == "192.0.2.50"
        );

        let h2 = run.host("H2").unwrap();
        assert_matches!(
            &h2.outcome,
            HostOutcome::Skipped(SkipReason::NotConnected {
                state: ConnectionState::Disconnected
            })
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_cluster_is_fatal() {
        let shell = SimulatedShell::new();
        let ctx = context(
            vec![host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")])],
            &shell,
        );

        let err = FabricConnectionReconciler::new(ctx)
            .run("C9", &target(), FabricTuning::default())
            .await
            .unwrap_err();

        assert_matches!(err, Error::ResourceNotFound { ref kind, .. } if kind == "Cluster");
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_without_matching_adapters_still_rescans() {
        let shell = SimulatedShell::new();
        let ctx = context(
            vec![host("H1", ConnectionState::Connected, vec![other_adapter("vmhba64")])],
            &shell,
        );

        let run = FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        assert_eq!(shell.count(is_connect), 0);
        assert_eq!(shell.count(is_rescan), 1);
        assert_eq!(run.host("H1").unwrap().outcome, HostOutcome::Completed);
    }

    #[tokio::test]
    async fn test_connect_failure_is_isolated() {
        let shell = SimulatedShell::new()
            .with_failing_target("H1", "vmhba65")
            .with_rejected_target("H1", "vmhba66");
        let ctx = context(
            vec![
                host(
                    "H1",
                    ConnectionState::Connected,
                    vec![
                        nvme_adapter("vmhba65"),
                        nvme_adapter("vmhba66"),
                        nvme_adapter("vmhba67"),
                    ],
                ),
                host("H2", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
            ],
            &shell,
        );

        let run = FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        assert_eq!(shell.count(is_connect), 4);
        assert_eq!(shell.count(is_rescan), 2);

        let h1 = run.host("H1").unwrap();
        let outcomes: Vec<_> = h1
            .operations_of(OperationKind::Connect)
            .map(|op| op.outcome.label())
            .collect();
        assert_eq!(outcomes, vec!["failed", "rejected", "succeeded"]);
        assert_eq!(h1.failures(), 2);
        assert_eq!(run.host("H2").unwrap().failures(), 0);
    }

    #[tokio::test]
    async fn test_connect_session_failure_skips_host() {
        let shell = SimulatedShell::new().with_unreachable_host("H1");
        let ctx = context(
            vec![
                host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
                host("H2", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
            ],
            &shell,
        );

        let run = FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        assert_matches!(
            &run.host("H1").unwrap().outcome,
            HostOutcome::Skipped(SkipReason::SessionUnavailable { .. })
        );
        assert_eq!(shell.calls_for("H1").len(), 1);
        assert_eq!(shell.calls_for("H2").len(), 3);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_input() {
        let shell = SimulatedShell::new();
        let ctx = context(
            vec![host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")])],
            &shell,
        );
        let reconciler = FabricConnectionReconciler::new(ctx);

        let bad_target = FabricTarget {
            address: "192.0.2.50".into(),
            subsystem_nqn: " ".into(),
        };
        assert_matches!(
            reconciler.run("C1", &bad_target, FabricTuning::default()).await,
            Err(Error::Validation(_))
        );

        let bad_tuning = FabricTuning {
            io_queue_number: 0,
            ..Default::default()
        };
        assert_matches!(
            reconciler.run("C1", &target(), bad_tuning).await,
            Err(Error::Validation(_))
        );
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_counts_metrics() {
        let shell = SimulatedShell::new();
        let metrics = Arc::new(ReconcileMetrics::new().unwrap());
        let ctx = context(
            vec![
                host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
                host("H2", ConnectionState::NotResponding, vec![]),
            ],
            &shell,
        )
        .with_metrics(metrics.clone());

        FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        assert_eq!(metrics.host_count(Routine::FabricConnect, "completed"), 1);
        assert_eq!(metrics.host_count(Routine::FabricConnect, "skipped"), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_controllers_then_rescan() {
        let shell = SimulatedShell::new()
            .with_controllers(
                "H1",
                vec![controller("vmhba65", 256), controller("vmhba66", 257)],
            )
            .with_failing_target("H1", &controller_key("vmhba65", 256));
        let ctx = context(
            vec![host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")])],
            &shell,
        );

        let run = FabricDisconnectionReconciler::new(ctx, DisconnectOptions::default())
            .run("C1", NQN)
            .await
            .unwrap();

        let h1 = run.host("H1").unwrap();
        let disconnects: Vec<_> = h1.operations_of(OperationKind::Disconnect).collect();
        assert_eq!(disconnects.len(), 2);
        assert_matches!(disconnects[0].outcome, OperationOutcome::Failed { .. });
        assert_eq!(disconnects[1].outcome, OperationOutcome::Succeeded);
        assert_eq!(shell.count(is_rescan), 1);
        assert_eq!(shell.controllers("H1").len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_skips_host_with_fabric_datastore() {
        let shell = SimulatedShell::new()
            .with_controllers("H1", vec![controller("vmhba65", 256)])
            .with_controllers("H2", vec![controller("vmhba65", 256)]);

        let mut h1 = host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]);
        h1.datastores.push(Datastore {
            name: "nvme-ds01".into(),
            filesystem: FilesystemType::Vmfs,
            capacity_bytes: 1 << 40,
            free_bytes: 1 << 39,
            extents: vec![DeviceId::parse("eui.0025385b71b0c3a4").unwrap()],
            mounted: true,
        });
        let mut h2 = host("H2", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]);
        h2.datastores.push(Datastore {
            name: "fc-ds01".into(),
            filesystem: FilesystemType::Vmfs,
            capacity_bytes: 1 << 40,
            free_bytes: 1 << 39,
            extents: vec![DeviceId::parse("naa.600a0980383030523424457a4a695266").unwrap()],
            mounted: true,
        });
        let ctx = context(vec![h1, h2], &shell);

        let run = FabricDisconnectionReconciler::new(ctx, DisconnectOptions::default())
            .run("C1", NQN)
            .await
            .unwrap();

        assert_matches!(
            &run.host("H1").unwrap().outcome,
            HostOutcome::Skipped(SkipReason::FabricStorageInUse { datastores })
                if datastores == &vec!["nvme-ds01".to_string()]
        );
        assert!(shell.calls_for("H1").is_empty());
        assert_eq!(shell.controllers("H1").len(), 1);
        assert!(shell.controllers("H2").is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_unknown_cluster_is_fatal() {
        let shell = SimulatedShell::new();
        let ctx = context(vec![], &shell);

        let result = FabricDisconnectionReconciler::new(ctx, DisconnectOptions::default())
            .run("missing", NQN)
            .await;

        assert_matches!(result, Err(Error::ResourceNotFound { .. }));
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_disconnected_host_untouched() {
        let shell = SimulatedShell::new().with_controllers("H2", vec![controller("vmhba65", 256)]);
        let ctx = context(
            vec![host("H2", ConnectionState::Maintenance, vec![nvme_adapter("vmhba65")])],
            &shell,
        );

        let run = FabricDisconnectionReconciler::new(ctx, DisconnectOptions::default())
            .run("C1", NQN)
            .await
            .unwrap();

        assert!(run.host("H2").unwrap().is_skipped());
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_in_use_host_skipped_even_if_unreachable() {
        let shell = SimulatedShell::new().with_unreachable_host("H1");
        let mut h1 = host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]);
        h1.datastores.push(Datastore {
            name: "nvme-ds".into(),
            filesystem: FilesystemType::Vmfs,
            capacity_bytes: 1 << 40,
            free_bytes: 1 << 39,
            extents: vec![DeviceId::parse("eui.0025385b71b0c3a4").unwrap()],
            mounted: true,
        });
        let ctx = context(vec![h1], &shell);

        let run = FabricDisconnectionReconciler::new(ctx, DisconnectOptions::default())
            .run("C1", NQN)
            .await
            .unwrap();

        assert_matches!(
            &run.host("H1").unwrap().outcome,
            HostOutcome::Skipped(SkipReason::FabricStorageInUse { .. })
        );
        assert!(shell.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rescan_failure_is_recorded() {
        let shell = SimulatedShell::new().with_failing_rescan("H1");
        let ctx = context(
            vec![
                host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
                host("H2", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
            ],
            &shell,
        );

        let run = FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        let h1 = run.host("H1").unwrap();
        assert_eq!(h1.outcome, HostOutcome::Completed);
        let rescans: Vec<_> = h1.operations_of(OperationKind::Rescan).collect();
        assert_eq!(rescans.len(), 1);
        assert_matches!(rescans[0].outcome, OperationOutcome::Failed { .. });

        let h2 = run.host("H2").unwrap();
        assert_eq!(h2.failures(), 0);
        assert_eq!(shell.count(is_rescan), 2);
    }

    #[tokio::test]
    async fn test_controller_listing_failure_still_rescans() {
        let shell = SimulatedShell::new()
            .with_controllers("H1", vec![controller("vmhba65", 256)])
            .with_failing_target("H1", "controllers");
        let ctx = context(
            vec![host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")])],
            &shell,
        );

        let run = FabricDisconnectionReconciler::new(ctx, DisconnectOptions::default())
            .run("C1", NQN)
            .await
            .unwrap();

        let h1 = run.host("H1").unwrap();
        let kinds: Vec<_> = h1.operations.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::ListControllers, OperationKind::Rescan]);
        assert_matches!(h1.operations[0].outcome, OperationOutcome::Failed { .. });
        assert_eq!(shell.count(is_rescan), 1);
        assert_eq!(
            shell.count(|c| matches!(c, ShellCall::DisconnectFabric { .. })),
            0
        );
    }

    /// Inventory whose adapter listing fails for one host
    struct BrokenAdapterInventory {
        inner: StaticInventory,
        broken_host: &'static str,
    }

    #[async_trait]
    impl Inventory for BrokenAdapterInventory {
        async fn find_cluster(&self, name: &str) -> Result<Option<Cluster>> {
            self.inner.find_cluster(name).await
        }

        async fn list_hosts(&self, cluster: &Cluster) -> Result<Vec<Host>> {
            self.inner.list_hosts(cluster).await
        }

        async fn find_host(&self, name: &str) -> Result<Option<Host>> {
            self.inner.find_host(name).await
        }

        async fn list_adapters(&self, host: &Host) -> Result<Vec<StorageAdapter>> {
            if host.name == self.broken_host {
                return Err(Error::Inventory("adapter query timed out".into()));
            }
            self.inner.list_adapters(host).await
        }

        async fn list_datastores(&self, host: &Host) -> Result<Vec<Datastore>> {
            self.inner.list_datastores(host).await
        }

        async fn list_devices(&self, host: &Host) -> Result<Vec<StorageDevice>> {
            self.inner.list_devices(host).await
        }

        async fn list_switches(&self, host: &Host) -> Result<Vec<VirtualSwitch>> {
            self.inner.list_switches(host).await
        }

        async fn list_vmkernel_interfaces(&self, host: &Host) -> Result<Vec<VmkernelInterface>> {
            self.inner.list_vmkernel_interfaces(host).await
        }
    }

    #[tokio::test]
    async fn test_adapter_listing_failure_still_rescans() {
        let shell = SimulatedShell::new();
        let inner = StaticInventory::new(InventorySnapshot {
            clusters: vec![ClusterSpec {
                name: "C1".into(),
                hosts: vec![
                    host("H1", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
                    host("H2", ConnectionState::Connected, vec![nvme_adapter("vmhba65")]),
                ],
            }],
            standalone_hosts: vec![],
        })
        .unwrap();
        let inventory = BrokenAdapterInventory {
            inner,
            broken_host: "H1",
        };
        let ctx = OpsContext::new(Arc::new(inventory), Arc::new(shell.clone()));

        let run = FabricConnectionReconciler::new(ctx)
            .run("C1", &target(), FabricTuning::default())
            .await
            .unwrap();

        let h1 = run.host("H1").unwrap();
        let kinds: Vec<_> = h1.operations.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::ListAdapters, OperationKind::Rescan]);
        assert_eq!(h1.failures(), 1);
        assert!(!shell.calls_for("H1").iter().any(is_connect));
        assert_eq!(shell.calls_for("H1").iter().filter(|c| is_rescan(c)).count(), 1);
        assert_eq!(run.host("H2").unwrap().operations_of(OperationKind::Connect).count(), 1);
    }
}
