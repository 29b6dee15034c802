//! VMFS Datastore Lifecycle
//!
//! Create, expand, unmount and resignature datastores. Each operation checks
//! its preconditions against the inventory and then makes a single host call
//! (plus a rescan where the host's storage view changes).

use crate::controlplane::context::OpsContext;
use crate::controlplane::report::{HostReport, OperationKind, Routine, RunReport, SkipReason};
use crate::domain::device::{format_capacity, parse_capacity, DeviceId};
use crate::domain::ports::{Datastore, FilesystemType, Host, VmfsCreateRequest, VmfsVersion};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Longest datastore name the host accepts
pub const MAX_DATASTORE_NAME_LEN: usize = 42;

/// Request to create a VMFS datastore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDatastore {
    pub host: String,
    pub name: String,
    pub device: String,
    /// Capacity string (`500GB`); whole device when absent
    pub size: Option<String>,
    #[serde(default)]
    pub version: VmfsVersion,
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("datastore name is empty".into()));
    }
    if name.chars().count() > MAX_DATASTORE_NAME_LEN {
        return Err(Error::Validation(format!(
            "datastore name longer than {} characters: {}",
            MAX_DATASTORE_NAME_LEN, name
        )));
    }
    if name.contains('/') {
        return Err(Error::Validation(format!(
            "datastore name contains '/': {}",
            name
        )));
    }
    Ok(())
}

fn require_vmfs(datastore: &Datastore) -> Result<()> {
    if datastore.filesystem != FilesystemType::Vmfs {
        return Err(Error::TypeMismatch {
            kind: "Datastore".into(),
            name: datastore.name.clone(),
            expected: FilesystemType::Vmfs.to_string(),
            actual: datastore.filesystem.to_string(),
        });
    }
    Ok(())
}

/// Datastore operations
pub struct DatastoreLifecycle {
    ctx: OpsContext,
}

impl DatastoreLifecycle {
    pub fn new(ctx: OpsContext) -> Self {
        Self { ctx }
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Partition a device and format it as a new VMFS datastore
    #[instrument(skip(self), fields(host = %request.host, name = %request.name))]
    pub async fn create(&self, request: &CreateDatastore) -> Result<RunReport> {
        let routine = Routine::DatastoreCreate;
        let report = self
            .try_create(request)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;
        Ok(self.single_host(routine, report))
    }

    async fn try_create(&self, request: &CreateDatastore) -> Result<HostReport> {
        validate_name(&request.name)?;
        let device_id = DeviceId::parse(&request.device)?;
        let requested = request.size.as_deref().map(parse_capacity).transpose()?;

        let host = self.ctx.resolve_connected_host(&request.host).await?;
        let datastores = self.ctx.inventory.list_datastores(&host).await?;

        if datastores.iter().any(|ds| ds.name == request.name) {
            return Err(Error::ResourceExists {
                kind: "Datastore".into(),
                name: request.name.clone(),
            });
        }
        if let Some(owner) = datastores.iter().find(|ds| ds.extents.contains(&device_id)) {
            return Err(Error::DeviceInUse {
                device: device_id.to_string(),
                datastore: owner.name.clone(),
            });
        }

        let device = self
            .ctx
            .inventory
            .list_devices(&host)
            .await?
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::DeviceNotFound {
                device: device_id.to_string(),
            })?;

        let size_bytes = match requested {
            Some(bytes) if bytes > device.size_bytes => {
                return Err(Error::InsufficientCapacity {
                    requested: bytes,
                    available: device.size_bytes,
                })
            }
            Some(bytes) => bytes,
            None => device.size_bytes,
        };

        info!(
            device = %device_id,
            size = %format_capacity(size_bytes),
            version = %request.version,
            "Creating VMFS datastore"
        );

        let session = self.ctx.open_required_session(&host).await?;
        let mut report = HostReport::new(&host.name);
        let create = VmfsCreateRequest {
            label: request.name.clone(),
            device: device_id,
            version: request.version,
            size_bytes,
        };
        let result = session.create_vmfs(&create).await;
        if report.record_unit(OperationKind::CreateVmfs, &request.name, result) {
            self.ctx.rescan(session.as_ref(), &mut report).await;
        }
        Ok(report)
    }

    // =========================================================================
    // Expand
    // =========================================================================

    /// Grow a VMFS datastore to fill its (already enlarged) device
    #[instrument(skip(self))]
    pub async fn expand(&self, host: &str, name: &str, device: &str) -> Result<RunReport> {
        let routine = Routine::DatastoreExpand;
        let report = self
            .try_expand(host, name, device)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;
        Ok(self.single_host(routine, report))
    }

    async fn try_expand(&self, host: &str, name: &str, device: &str) -> Result<HostReport> {
        let device_id = DeviceId::parse(device)?;
        let host = self.ctx.resolve_connected_host(host).await?;

        let datastore = self.find_datastore(&host, name).await?;
        require_vmfs(&datastore)?;

        if !datastore.extents.contains(&device_id) {
            return Err(Error::Validation(format!(
                "{} is not an extent of datastore {}",
                device_id, name
            )));
        }

        let device = self
            .ctx
            .inventory
            .list_devices(&host)
            .await?
            .into_iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::DeviceNotFound {
                device: device_id.to_string(),
            })?;

        if device.size_bytes <= datastore.capacity_bytes {
            return Err(Error::Validation(format!(
                "nothing to grow: device {} is {}, datastore {} is {}",
                device_id,
                format_capacity(device.size_bytes),
                name,
                format_capacity(datastore.capacity_bytes)
            )));
        }

        info!(
            from = %format_capacity(datastore.capacity_bytes),
            to = %format_capacity(device.size_bytes),
            "Expanding VMFS datastore"
        );

        let session = self.ctx.open_required_session(&host).await?;
        let mut report = HostReport::new(&host.name);
        let result = session.grow_vmfs(&device_id, device.size_bytes).await;
        if report.record_unit(OperationKind::GrowVmfs, name, result) {
            self.ctx.rescan(session.as_ref(), &mut report).await;
        }
        Ok(report)
    }

    // =========================================================================
    // Unmount
    // =========================================================================

    /// Unmount a VMFS datastore from every connected host in a cluster
    #[instrument(skip(self))]
    pub async fn unmount(&self, cluster: &str, name: &str) -> Result<RunReport> {
        let routine = Routine::DatastoreUnmount;
        let (_, hosts) = self
            .ctx
            .resolve_cluster(cluster)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;

        // Check type and existence across the cluster before touching any host
        let mut views = Vec::with_capacity(hosts.len());
        let mut found = false;
        for host in &hosts {
            if !host.is_connected() {
                views.push(None);
                continue;
            }
            let datastores = self
                .ctx
                .inventory
                .list_datastores(host)
                .await
                .map_err(|e| self.ctx.fail(routine, e))?;
            let view = datastores.into_iter().find(|ds| ds.name == name);
            if let Some(ds) = &view {
                require_vmfs(ds).map_err(|e| self.ctx.fail(routine, e))?;
                found = true;
            }
            views.push(view);
        }
        if !found {
            return Err(self.ctx.fail(routine, Error::not_found("Datastore", name)));
        }

        let mut run = RunReport::begin(routine, cluster);
        for (host, view) in hosts.iter().zip(views) {
            let report = self.unmount_on_host(host, view, name).await;
            self.ctx.finish_host(&mut run, report);
        }

        Ok(run.finish())
    }

    async fn unmount_on_host(
        &self,
        host: &Host,
        view: Option<Datastore>,
        name: &str,
    ) -> HostReport {
        if host.is_connected() {
            match view {
                None => {
                    return HostReport::skipped(
                        &host.name,
                        SkipReason::NotApplicable {
                            message: format!("datastore {} not present", name),
                        },
                    )
                }
                Some(ds) if !ds.mounted => {
                    return HostReport::skipped(
                        &host.name,
                        SkipReason::NotApplicable {
                            message: format!("datastore {} already unmounted", name),
                        },
                    )
                }
                Some(_) => {}
            }
        }

        let session = match self.ctx.open_session(host).await {
            Ok(session) => session,
            Err(skipped) => return skipped,
        };

        let mut report = HostReport::new(&host.name);
        let result = session.unmount_filesystem(name).await;
        report.record_unit(OperationKind::Unmount, name, result);
        report
    }

    // =========================================================================
    // Resignature
    // =========================================================================

    /// Resignature the unresolved VMFS copy that lives on `device`
    #[instrument(skip(self))]
    pub async fn resignature(&self, host: &str, device: &str) -> Result<RunReport> {
        let routine = Routine::DatastoreResignature;
        let report = self
            .try_resignature(host, device)
            .await
            .map_err(|e| self.ctx.fail(routine, e))?;
        Ok(self.single_host(routine, report))
    }

    async fn try_resignature(&self, host: &str, device: &str) -> Result<HostReport> {
        let device_id = DeviceId::parse(device)?;
        let host = self.ctx.resolve_connected_host(host).await?;
        let session = self.ctx.open_required_session(&host).await?;

        let volume = session
            .list_unresolved_volumes()
            .await?
            .into_iter()
            .find(|v| v.extents.contains(&device_id))
            .ok_or_else(|| Error::not_found("UnresolvedVolume", device_id.as_str()))?;

        if !volume.can_resignature {
            return Err(Error::Validation(format!(
                "volume {} ({}) cannot be resignatured",
                volume.label, volume.uuid
            )));
        }

        info!(label = %volume.label, uuid = %volume.uuid, "Resignaturing VMFS volume");

        let mut report = HostReport::new(&host.name);
        let result = session.resignature_volume(&volume.label).await;
        if report.record_unit(OperationKind::Resignature, &volume.label, result) {
            self.ctx.rescan(session.as_ref(), &mut report).await;
        }
        Ok(report)
    }

    fn single_host(&self, routine: Routine, report: HostReport) -> RunReport {
        let mut run = RunReport::begin(routine, report.host.clone());
        self.ctx.finish_host(&mut run, report);
        run.finish()
    }

    async fn find_datastore(&self, host: &Host, name: &str) -> Result<Datastore> {
        self.ctx
            .inventory
            .list_datastores(host)
            .await?
            .into_iter()
            .find(|ds| ds.name == name)
            .ok_or_else(|| Error::not_found("Datastore", name))
    }
}
