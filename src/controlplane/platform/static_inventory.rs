//! File-backed Inventory
//!
//! Serves inventory lookups from a YAML snapshot of the management plane:
//!
//! ```yaml
//! clusters:
//!   - name: C1
//!     hosts:
//!       - name: esx01.lab
//!         connection_state: connected
//!         adapters:
//!           - { name: vmhba65, driver: nvmetcp }
//!         datastores:
//!           - name: ds01
//!             filesystem: vmfs
//!             capacity_bytes: 1099511627776
//!             free_bytes: 549755813888
//!             extents: [naa.600a0980383030523424457a4a695266]
//! ```

use crate::domain::ports::{
    Cluster, ConnectionState, Datastore, Host, Inventory, StorageAdapter, StorageDevice,
    VirtualSwitch, VmkernelInterface,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

// =============================================================================
// Snapshot Format
// =============================================================================

/// Root of an inventory snapshot file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    /// Hosts not in any cluster
    #[serde(default)]
    pub standalone_hosts: Vec<HostSpec>,
}

/// A cluster and its hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<HostSpec>,
}

/// A host and everything attached to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    #[serde(default = "default_state")]
    pub connection_state: ConnectionState,
    #[serde(default)]
    pub adapters: Vec<StorageAdapter>,
    #[serde(default)]
    pub datastores: Vec<Datastore>,
    #[serde(default)]
    pub devices: Vec<StorageDevice>,
    #[serde(default)]
    pub switches: Vec<VirtualSwitch>,
    #[serde(default)]
    pub vmkernel_interfaces: Vec<VmkernelInterface>,
}

fn default_state() -> ConnectionState {
    ConnectionState::Connected
}

impl HostSpec {
    /// A connected host with nothing attached
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_state: ConnectionState::Connected,
            adapters: Vec::new(),
            datastores: Vec::new(),
            devices: Vec::new(),
            switches: Vec::new(),
            vmkernel_interfaces: Vec::new(),
        }
    }

    fn to_host(&self, cluster: Option<&str>) -> Host {
        Host {
            name: self.name.clone(),
            cluster: cluster.map(str::to_string),
            connection_state: self.connection_state,
        }
    }
}

// =============================================================================
// Static Inventory
// =============================================================================

/// Inventory backed by an in-memory snapshot
#[derive(Debug, Clone)]
pub struct StaticInventory {
    snapshot: InventorySnapshot,
}

impl StaticInventory {
    /// Build an inventory, rejecting duplicate cluster or host names
    pub fn new(snapshot: InventorySnapshot) -> Result<Self> {
        let mut clusters = BTreeSet::new();
        let mut hosts = BTreeSet::new();

        for cluster in &snapshot.clusters {
            if !clusters.insert(cluster.name.as_str()) {
                return Err(Error::Inventory(format!(
                    "duplicate cluster {}",
                    cluster.name
                )));
            }
        }
        let all_hosts = snapshot
            .clusters
            .iter()
            .flat_map(|c| c.hosts.iter())
            .chain(snapshot.standalone_hosts.iter());
        for host in all_hosts {
            if !hosts.insert(host.name.as_str()) {
                return Err(Error::Inventory(format!("duplicate host {}", host.name)));
            }
        }

        Ok(Self { snapshot })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::new(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let inventory = Self::from_yaml(&raw)?;
        info!(
            path = %path.display(),
            clusters = inventory.snapshot.clusters.len(),
            "Loaded inventory snapshot"
        );
        Ok(inventory)
    }

    fn host_spec(&self, name: &str) -> Result<&HostSpec> {
        self.snapshot
            .clusters
            .iter()
            .flat_map(|c| c.hosts.iter())
            .chain(self.snapshot.standalone_hosts.iter())
            .find(|h| h.name == name)
            .ok_or_else(|| Error::not_found("Host", name))
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn find_cluster(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self
            .snapshot
            .clusters
            .iter()
            .find(|c| c.name == name)
            .map(|c| Cluster {
                name: c.name.clone(),
            }))
    }

    async fn list_hosts(&self, cluster: &Cluster) -> Result<Vec<Host>> {
        let spec = self
            .snapshot
            .clusters
            .iter()
            .find(|c| c.name == cluster.name)
            .ok_or_else(|| Error::not_found("Cluster", &cluster.name))?;

        Ok(spec
            .hosts
            .iter()
            .map(|h| h.to_host(Some(&spec.name)))
            .collect())
    }

    async fn find_host(&self, name: &str) -> Result<Option<Host>> {
        for cluster in &self.snapshot.clusters {
            if let Some(h) = cluster.hosts.iter().find(|h| h.name == name) {
                return Ok(Some(h.to_host(Some(&cluster.name))));
            }
        }
        Ok(self
            .snapshot
            .standalone_hosts
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.to_host(None)))
    }

    async fn list_adapters(&self, host: &Host) -> Result<Vec<StorageAdapter>> {
        Ok(self.host_spec(&host.name)?.adapters.clone())
    }

    async fn list_datastores(&self, host: &Host) -> Result<Vec<Datastore>> {
        Ok(self.host_spec(&host.name)?.datastores.clone())
    }

    async fn list_devices(&self, host: &Host) -> Result<Vec<StorageDevice>> {
        Ok(self.host_spec(&host.name)?.devices.clone())
    }

    async fn list_switches(&self, host: &Host) -> Result<Vec<VirtualSwitch>> {
        Ok(self.host_spec(&host.name)?.switches.clone())
    }

    async fn list_vmkernel_interfaces(&self, host: &Host) -> Result<Vec<VmkernelInterface>> {
        Ok(self.host_spec(&host.name)?.vmkernel_interfaces.clone())
    }
}
