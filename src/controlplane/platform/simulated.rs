//! Simulated Host Shell
//!
//! An in-memory shell that records every call instead of touching a host.
//! Backs `--dry-run` and the test suite; faults can be injected per host or
//! per target to exercise the isolation paths.

use crate::domain::device::DeviceId;
use crate::domain::ports::{
    FabricConnectRequest, FabricController, Host, HostSession, HostShell, UnresolvedVolume,
    VmfsCreateRequest, VmfsVersion, VmkernelTag,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Call Log
// =============================================================================

/// A call observed by the simulated shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ShellCall {
    OpenSession {
        host: String,
    },
    ConnectFabric {
        host: String,
        adapter: String,
        address: String,
        subsystem_nqn: String,
    },
    ListControllers {
        host: String,
    },
    DisconnectFabric {
        host: String,
        adapter: String,
        controller_number: u32,
        subsystem_nqn: String,
    },
    RescanStorage {
        host: String,
    },
    EnableFabricAdapter {
        host: String,
        nic: String,
    },
    TagVmkernel {
        host: String,
        interface: String,
        tag: VmkernelTag,
    },
    AddPortGroup {
        host: String,
        switch: String,
        port_group: String,
    },
    SetPortGroupVlan {
        host: String,
        port_group: String,
        vlan_id: u16,
    },
    CreateVmfs {
        host: String,
        label: String,
        device: DeviceId,
        version: VmfsVersion,
        size_bytes: u64,
    },
    GrowVmfs {
        host: String,
        device: DeviceId,
    },
    UnmountFilesystem {
        host: String,
        label: String,
    },
    ListUnresolvedVolumes {
        host: String,
    },
    ResignatureVolume {
        host: String,
        label: String,
    },
}

impl ShellCall {
    pub fn host(&self) -> &str {
        match self {
            ShellCall::OpenSession { host }
            | ShellCall::ConnectFabric { host, .. }
            | ShellCall::ListControllers { host }
            | ShellCall::DisconnectFabric { host, .. }
            | ShellCall::RescanStorage { host }
            | ShellCall::EnableFabricAdapter { host, .. }
            | ShellCall::TagVmkernel { host, .. }
            | ShellCall::AddPortGroup { host, .. }
            | ShellCall::SetPortGroupVlan { host, .. }
            | ShellCall::CreateVmfs { host, .. }
            | ShellCall::GrowVmfs { host, .. }
            | ShellCall::UnmountFilesystem { host, .. }
            | ShellCall::ListUnresolvedVolumes { host }
            | ShellCall::ResignatureVolume { host, .. } => host,
        }
    }
}

/// Key used to target a controller with fault injection
pub fn controller_key(adapter: &str, controller_number: u32) -> String {
    format!("{}/{}", adapter, controller_number)
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct Faults {
    unreachable_hosts: BTreeSet<String>,
    /// (host, target) pairs whose calls return an error
    failing: BTreeSet<(String, String)>,
    /// (host, target) pairs the host refuses
    rejected: BTreeSet<(String, String)>,
    failing_rescans: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct SimState {
    calls: Mutex<Vec<ShellCall>>,
    faults: Mutex<Faults>,
    controllers: Mutex<BTreeMap<String, Vec<FabricController>>>,
    unresolved: Mutex<BTreeMap<String, Vec<UnresolvedVolume>>>,
}

impl SimState {
    fn log(&self, call: ShellCall) {
        debug!(host = %call.host(), ?call, "Simulated shell call");
        self.calls.lock().push(call);
    }

    fn check(&self, host: &str, target: &str, command: &str) -> Result<bool> {
        let faults = self.faults.lock();
        let key = (host.to_string(), target.to_string());
        if faults.failing.contains(&key) {
            return Err(Error::ShellCommand {
                host: host.to_string(),
                command: command.to_string(),
                reason: format!("simulated failure for {}", target),
            });
        }
        Ok(!faults.rejected.contains(&key))
    }

    /// Like `check`, for calls without a success flag
    fn check_unit(&self, host: &str, target: &str, command: &str) -> Result<()> {
        if self.check(host, target, command)? {
            Ok(())
        } else {
            Err(Error::ShellCommand {
                host: host.to_string(),
                command: command.to_string(),
                reason: format!("simulated rejection for {}", target),
            })
        }
    }
}

// =============================================================================
// Simulated Shell
// =============================================================================

/// Recording shell with fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedShell {
    state: Arc<SimState>,
}

impl SimulatedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions to this host fail to open
    pub fn with_unreachable_host(self, host: &str) -> Self {
        self.state
            .faults
            .lock()
            .unreachable_hosts
            .insert(host.to_string());
        self
    }

    /// Calls about `target` on `host` return an error
    pub fn with_failing_target(self, host: &str, target: &str) -> Self {
        self.state
            .faults
            .lock()
            .failing
            .insert((host.to_string(), target.to_string()));
        self
    }

    /// Calls about `target` on `host` are refused by the host
    pub fn with_rejected_target(self, host: &str, target: &str) -> Self {
        self.state
            .faults
            .lock()
            .rejected
            .insert((host.to_string(), target.to_string()));
        self
    }

    /// Storage rescans on this host fail
    pub fn with_failing_rescan(self, host: &str) -> Self {
        self.state
            .faults
            .lock()
            .failing_rescans
            .insert(host.to_string());
        self
    }

    /// Controllers already registered on a host
    pub fn with_controllers(self, host: &str, controllers: Vec<FabricController>) -> Self {
        self.state
            .controllers
            .lock()
            .insert(host.to_string(), controllers);
        self
    }

    /// Unresolved VMFS volumes a host reports
    pub fn with_unresolved_volumes(self, host: &str, volumes: Vec<UnresolvedVolume>) -> Self {
        self.state
            .unresolved
            .lock()
            .insert(host.to_string(), volumes);
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ShellCall> {
        self.state.calls.lock().clone()
    }

    /// Calls made against one host
    pub fn calls_for(&self, host: &str) -> Vec<ShellCall> {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|c| c.host() == host)
            .cloned()
            .collect()
    }

    /// Number of calls matching a predicate
    pub fn count(&self, predicate: impl Fn(&ShellCall) -> bool) -> usize {
        self.state.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Controllers currently registered on a host
    pub fn controllers(&self, host: &str) -> Vec<FabricController> {
        self.state
            .controllers
            .lock()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl HostShell for SimulatedShell {
    async fn open_session(&self, host: &Host) -> Result<Box<dyn HostSession>> {
        self.state.log(ShellCall::OpenSession {
            host: host.name.clone(),
        });

        if self
            .state
            .faults
            .lock()
            .unreachable_hosts
            .contains(&host.name)
        {
            return Err(Error::SessionFailed {
                host: host.name.clone(),
                reason: "simulated: host unreachable".into(),
            });
        }

        Ok(Box::new(SimulatedSession {
            host: host.name.clone(),
            state: self.state.clone(),
        }))
    }
}

/// Session handed out by [`SimulatedShell`]
struct SimulatedSession {
    host: String,
    state: Arc<SimState>,
}

#[async_trait]
impl HostSession for SimulatedSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect_fabric(&self, request: &FabricConnectRequest) -> Result<bool> {
        self.state.log(ShellCall::ConnectFabric {
            host: self.host.clone(),
            adapter: request.adapter.clone(),
            address: request.target.address.clone(),
            subsystem_nqn: request.target.subsystem_nqn.clone(),
        });

        let accepted = self
            .state
            .check(&self.host, &request.adapter, "nvme fabrics connect")?;
        if accepted {
            let mut controllers = self.state.controllers.lock();
            let list = controllers.entry(self.host.clone()).or_default();
            let controller_number = 256 + list.len() as u32;
            list.push(FabricController {
                name: format!(
                    "{}#{}#{}:{}",
                    request.target.subsystem_nqn,
                    request.adapter,
                    request.target.address,
                    request.tuning.port_number
                ),
                adapter: request.adapter.clone(),
                controller_number,
                transport: "TCP".into(),
            });
        }
        Ok(accepted)
    }

    async fn list_controllers(&self) -> Result<Vec<FabricController>> {
        self.state.log(ShellCall::ListControllers {
            host: self.host.clone(),
        });
        self.state
            .check_unit(&self.host, "controllers", "nvme controller list")?;
        Ok(self
            .state
            .controllers
            .lock()
            .get(&self.host)
            .cloned()
            .unwrap_or_default())
    }

    async fn disconnect_fabric(
        &self,
        adapter: &str,
        controller_number: u32,
        subsystem_nqn: &str,
    ) -> Result<bool> {
        self.state.log(ShellCall::DisconnectFabric {
            host: self.host.clone(),
            adapter: adapter.to_string(),
            controller_number,
            subsystem_nqn: subsystem_nqn.to_string(),
        });

        let accepted = self.state.check(
            &self.host,
            &controller_key(adapter, controller_number),
            "nvme fabrics disconnect",
        )?;
        if accepted {
            if let Some(list) = self.state.controllers.lock().get_mut(&self.host) {
                list.retain(|c| {
                    !(c.adapter == adapter && c.controller_number == controller_number)
                });
            }
        }
        Ok(accepted)
    }

    async fn rescan_storage(&self) -> Result<()> {
        self.state.log(ShellCall::RescanStorage {
            host: self.host.clone(),
        });
        if self.state.faults.lock().failing_rescans.contains(&self.host) {
            return Err(Error::ShellCommand {
                host: self.host.clone(),
                command: "storage core adapter rescan".into(),
                reason: "simulated rescan failure".into(),
            });
        }
        Ok(())
    }

    async fn enable_fabric_adapter(&self, nic: &str) -> Result<bool> {
        self.state.log(ShellCall::EnableFabricAdapter {
            host: self.host.clone(),
            nic: nic.to_string(),
        });
        self.state.check(&self.host, nic, "nvme fabrics enable")
    }

    async fn tag_vmkernel(&self, interface: &str, tag: VmkernelTag) -> Result<()> {
        self.state.log(ShellCall::TagVmkernel {
            host: self.host.clone(),
            interface: interface.to_string(),
            tag,
        });
        self.state
            .check_unit(&self.host, interface, "network ip interface tag add")
    }

    async fn add_port_group(&self, switch: &str, port_group: &str) -> Result<()> {
        self.state.log(ShellCall::AddPortGroup {
            host: self.host.clone(),
            switch: switch.to_string(),
            port_group: port_group.to_string(),
        });
        self.state
            .check_unit(&self.host, port_group, "network vswitch standard portgroup add")
    }

    async fn set_port_group_vlan(&self, port_group: &str, vlan_id: u16) -> Result<()> {
        self.state.log(ShellCall::SetPortGroupVlan {
            host: self.host.clone(),
            port_group: port_group.to_string(),
            vlan_id,
        });
        self.state
            .check_unit(&self.host, port_group, "network vswitch standard portgroup set")
    }

    async fn create_vmfs(&self, request: &VmfsCreateRequest) -> Result<()> {
        self.state.log(ShellCall::CreateVmfs {
            host: self.host.clone(),
            label: request.label.clone(),
            device: request.device.clone(),
            version: request.version,
            size_bytes: request.size_bytes,
        });
        self.state
            .check_unit(&self.host, request.device.as_str(), "vmkfstools -C")
    }

    async fn grow_vmfs(&self, device: &DeviceId, _device_size_bytes: u64) -> Result<()> {
        self.state.log(ShellCall::GrowVmfs {
            host: self.host.clone(),
            device: device.clone(),
        });
        self.state
            .check_unit(&self.host, device.as_str(), "vmkfstools --growfs")
    }

    async fn unmount_filesystem(&self, label: &str) -> Result<()> {
        self.state.log(ShellCall::UnmountFilesystem {
            host: self.host.clone(),
            label: label.to_string(),
        });
        self.state
            .check_unit(&self.host, label, "storage filesystem unmount")
    }

    async fn list_unresolved_volumes(&self) -> Result<Vec<UnresolvedVolume>> {
        self.state.log(ShellCall::ListUnresolvedVolumes {
            host: self.host.clone(),
        });
        Ok(self
            .state
            .unresolved
            .lock()
            .get(&self.host)
            .cloned()
            .unwrap_or_default())
    }

    async fn resignature_volume(&self, label: &str) -> Result<()> {
        self.state.log(ShellCall::ResignatureVolume {
            host: self.host.clone(),
            label: label.to_string(),
        });
        self.state
            .check_unit(&self.host, label, "storage vmfs snapshot resignature")?;
        if let Some(list) = self.state.unresolved.lock().get_mut(&self.host) {
            list.retain(|v| v.label != label);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ConnectionState, FabricTarget};
    use crate::domain::tuning::FabricTuning;
    use assert_matches::assert_matches;

    fn host(name: &str) -> Host {
        Host {
            name: name.into(),
            cluster: None,
            connection_state: ConnectionState::Connected,
        }
    }

    fn request(adapter: &str) -> FabricConnectRequest {
        FabricConnectRequest {
            adapter: adapter.into(),
            target: FabricTarget {
                address: "192.0.2.10".into(),
                subsystem_nqn: "nqn.2014-08.org.nvmexpress:uuid:1234".into(),
            },
            tuning: FabricTuning::default(),
        }
    }

    #[tokio::test]
    async fn test_connect_registers_controller() {
        let shell = SimulatedShell::new();
        let session = shell.open_session(&host("esx01")).await.unwrap();

        assert!(session.connect_fabric(&request("vmhba65")).await.unwrap());

        let controllers = session.list_controllers().await.unwrap();
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].adapter, "vmhba65");

        assert!(session
            .disconnect_fabric("vmhba65", controllers[0].controller_number, "nqn")
            .await
            .unwrap());
        assert!(shell.controllers("esx01").is_empty());
        assert_eq!(shell.calls_for("esx01").len(), 4);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let shell = SimulatedShell::new()
            .with_unreachable_host("esx02")
            .with_failing_target("esx01", "vmhba65")
            .with_rejected_target("esx01", "vmhba66");

        assert_matches!(
            shell.open_session(&host("esx02")).await.err(),
            Some(Error::SessionFailed { .. })
        );

        let session = shell.open_session(&host("esx01")).await.unwrap();
        assert_matches!(
            session.connect_fabric(&request("vmhba65")).await,
            Err(Error::ShellCommand { .. })
        );
        assert!(!session.connect_fabric(&request("vmhba66")).await.unwrap());
        assert!(shell.controllers("esx01").is_empty());
    }
}
