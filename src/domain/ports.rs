//! Domain Ports - Core trait definitions for fabric-ops
//!
//! These traits define the boundaries between the control plane routines and
//! the external management system. Adapters implement these traits to provide
//! concrete functionality (a file-backed inventory, an SSH esxcli shell, a
//! simulated shell).

use crate::domain::device::DeviceId;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Driver tag reported by software NVMe over TCP adapters
pub const NVME_TCP_DRIVER: &str = "nvmetcp";

// =============================================================================
// Inventory Types
// =============================================================================

/// A named group of hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
}

/// Host connection state as reported by the inventory service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    NotResponding,
    Maintenance,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::NotResponding => write!(f, "notResponding"),
            ConnectionState::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// A hypervisor host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Host name (FQDN or management address)
    pub name: String,
    /// Owning cluster, if any
    pub cluster: Option<String>,
    /// Connection state
    pub connection_state: ConnectionState,
}

impl Host {
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}

/// A host storage adapter (vmhba)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAdapter {
    /// Adapter name (e.g., vmhba65)
    pub name: String,
    /// Driver tag (e.g., nvmetcp)
    pub driver: String,
    #[serde(default)]
    pub description: String,
}

impl StorageAdapter {
    /// Whether this adapter is a software NVMe/TCP adapter
    pub fn is_nvme_tcp(&self) -> bool {
        self.driver.eq_ignore_ascii_case(NVME_TCP_DRIVER)
    }
}

/// Filesystem backing a datastore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemType {
    Vmfs,
    Nfs,
    Vsan,
    Other(String),
}

impl std::fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemType::Vmfs => write!(f, "VMFS"),
            FilesystemType::Nfs => write!(f, "NFS"),
            FilesystemType::Vsan => write!(f, "vsan"),
            FilesystemType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A datastore as seen from one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
    pub filesystem: FilesystemType,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
    /// Devices backing the datastore (VMFS only)
    #[serde(default)]
    pub extents: Vec<DeviceId>,
    #[serde(default = "default_true")]
    pub mounted: bool,
}

impl Datastore {
    /// Whether any extent lives on a device whose id starts with `prefix`
    pub fn has_extent_with_prefix(&self, prefix: &str) -> bool {
        self.extents.iter().any(|d| d.has_prefix(prefix))
    }
}

fn default_true() -> bool {
    true
}

/// A block device visible to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDevice {
    pub id: DeviceId,
    pub size_bytes: u64,
    #[serde(default)]
    pub is_local: bool,
}

/// An NVMe fabric target, passed through to the host unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricTarget {
    /// Target endpoint address (IP or hostname)
    pub address: String,
    /// Subsystem NQN
    pub subsystem_nqn: String,
}

/// An NVMe controller registered on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricController {
    pub name: String,
    pub adapter: String,
    pub controller_number: u32,
    #[serde(default)]
    pub transport: String,
}

/// A snapshot/replica VMFS volume the host has not mounted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedVolume {
    pub label: String,
    pub uuid: String,
    pub extents: Vec<DeviceId>,
    pub can_mount: bool,
    pub can_resignature: bool,
}

/// A standard virtual switch port group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroup {
    pub name: String,
    #[serde(default)]
    pub vlan_id: u16,
}

/// A standard virtual switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSwitch {
    pub name: String,
    #[serde(default)]
    pub uplinks: Vec<String>,
    #[serde(default)]
    pub port_groups: Vec<PortGroup>,
}

/// A vmkernel network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmkernelInterface {
    pub name: String,
    #[serde(default)]
    pub port_group: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

// =============================================================================
// Shell Requests
// =============================================================================

/// Arguments for one fabric connect call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricConnectRequest {
    pub adapter: String,
    pub target: FabricTarget,
    pub tuning: crate::domain::tuning::FabricTuning,
}

/// VMFS major version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmfsVersion {
    Vmfs5,
    #[default]
    Vmfs6,
}

impl std::fmt::Display for VmfsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmfsVersion::Vmfs5 => write!(f, "vmfs5"),
            VmfsVersion::Vmfs6 => write!(f, "vmfs6"),
        }
    }
}

/// Arguments for creating a VMFS datastore on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmfsCreateRequest {
    pub label: String,
    pub device: DeviceId,
    pub version: VmfsVersion,
    /// Partition size; whole device when equal to the device size
    pub size_bytes: u64,
}

/// Service tags that can be set on a vmkernel interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmkernelTag {
    #[serde(rename = "NVMeTCP")]
    NvmeTcp,
    VMotion,
    Management,
    #[serde(rename = "vSphereReplication")]
    Replication,
    #[serde(rename = "faultToleranceLogging")]
    FaultToleranceLogging,
}

impl VmkernelTag {
    /// Tag name as the host understands it
    pub fn as_str(&self) -> &'static str {
        match self {
            VmkernelTag::NvmeTcp => "NVMeTCP",
            VmkernelTag::VMotion => "VMotion",
            VmkernelTag::Management => "Management",
            VmkernelTag::Replication => "vSphereReplication",
            VmkernelTag::FaultToleranceLogging => "faultToleranceLogging",
        }
    }
}

impl std::fmt::Display for VmkernelTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VmkernelTag {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nvmetcp" | "nvme-tcp" => Ok(VmkernelTag::NvmeTcp),
            "vmotion" => Ok(VmkernelTag::VMotion),
            "management" => Ok(VmkernelTag::Management),
            "vspherereplication" | "replication" => Ok(VmkernelTag::Replication),
            "faulttolerancelogging" | "ft" => Ok(VmkernelTag::FaultToleranceLogging),
            _ => Err(crate::error::Error::Validation(format!(
                "unknown vmkernel tag: {}",
                s
            ))),
        }
    }
}

// =============================================================================
// Inventory Port
// =============================================================================

/// Port for the inventory/directory service
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Look up a cluster by name
    async fn find_cluster(&self, name: &str) -> Result<Option<Cluster>>;

    /// List hosts in a cluster, in service order
    async fn list_hosts(&self, cluster: &Cluster) -> Result<Vec<Host>>;

    /// Look up a host by name
    async fn find_host(&self, name: &str) -> Result<Option<Host>>;

    /// List storage adapters on a host
    async fn list_adapters(&self, host: &Host) -> Result<Vec<StorageAdapter>>;

    /// List datastores visible to a host
    async fn list_datastores(&self, host: &Host) -> Result<Vec<Datastore>>;

    /// List block devices visible to a host
    async fn list_devices(&self, host: &Host) -> Result<Vec<StorageDevice>>;

    /// List standard virtual switches on a host
    async fn list_switches(&self, host: &Host) -> Result<Vec<VirtualSwitch>>;

    /// List vmkernel interfaces on a host
    async fn list_vmkernel_interfaces(&self, host: &Host) -> Result<Vec<VmkernelInterface>>;
}

// =============================================================================
// Host Shell Ports
// =============================================================================

/// Port for opening per-host management sessions
#[async_trait]
pub trait HostShell: Send + Sync {
    /// Open a management-command session on the host
    async fn open_session(&self, host: &Host) -> Result<Box<dyn HostSession>>;
}

/// An open management-command session bound to one host
///
/// Calls returning `bool` report `false` when the host rejected the command;
/// an `Err` means the call itself could not be carried out.
#[async_trait]
pub trait HostSession: Send + Sync {
    /// Host this session is bound to
    fn host(&self) -> &str;

    /// Connect an adapter to an NVMe fabric target
    async fn connect_fabric(&self, request: &FabricConnectRequest) -> Result<bool>;

    /// List NVMe controllers registered on the host
    async fn list_controllers(&self) -> Result<Vec<FabricController>>;

    /// Disconnect a controller from a subsystem
    async fn disconnect_fabric(
        &self,
        adapter: &str,
        controller_number: u32,
        subsystem_nqn: &str,
    ) -> Result<bool>;

    /// Rescan all storage adapters
    async fn rescan_storage(&self) -> Result<()>;

    /// Enable the software NVMe/TCP adapter on an uplink
    async fn enable_fabric_adapter(&self, nic: &str) -> Result<bool>;

    /// Add a service tag to a vmkernel interface
    async fn tag_vmkernel(&self, interface: &str, tag: VmkernelTag) -> Result<()>;

    /// Add a port group to a standard switch
    async fn add_port_group(&self, switch: &str, port_group: &str) -> Result<()>;

    /// Set the VLAN of a port group
    async fn set_port_group_vlan(&self, port_group: &str, vlan_id: u16) -> Result<()>;

    /// Partition a device and format it as VMFS
    async fn create_vmfs(&self, request: &VmfsCreateRequest) -> Result<()>;

    /// Grow the VMFS partition on a device to fill the device
    async fn grow_vmfs(&self, device: &DeviceId, device_size_bytes: u64) -> Result<()>;

    /// Unmount a filesystem by volume label
    async fn unmount_filesystem(&self, label: &str) -> Result<()>;

    /// List unresolved (snapshot) VMFS volumes
    async fn list_unresolved_volumes(&self) -> Result<Vec<UnresolvedVolume>>;

    /// Resignature an unresolved VMFS volume
    async fn resignature_volume(&self, label: &str) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type InventoryRef = Arc<dyn Inventory>;
pub type HostShellRef = Arc<dyn HostShell>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_driver_match() {
        let adapter = StorageAdapter {
            name: "vmhba65".into(),
            driver: "NVMETCP".into(),
            description: String::new(),
        };
        assert!(adapter.is_nvme_tcp());

        let adapter = StorageAdapter {
            name: "vmhba0".into(),
            driver: "vmw_ahci".into(),
            description: String::new(),
        };
        assert!(!adapter.is_nvme_tcp());
    }

    #[test]
    fn test_vmkernel_tag_parse() {
        assert_eq!("NVMeTCP".parse::<VmkernelTag>().unwrap(), VmkernelTag::NvmeTcp);
        assert_eq!("vmotion".parse::<VmkernelTag>().unwrap(), VmkernelTag::VMotion);
        assert!("storage".parse::<VmkernelTag>().is_err());
        assert_eq!(VmkernelTag::Replication.to_string(), "vSphereReplication");
    }

    #[test]
    fn test_connection_state_serde() {
        let state: ConnectionState = serde_json::from_str("\"notResponding\"").unwrap();
        assert_eq!(state, ConnectionState::NotResponding);
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
