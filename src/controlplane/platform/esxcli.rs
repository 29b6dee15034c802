//! esxcli Host Shell
//!
//! Drives hosts by running `esxcli`, `partedUtil` and `vmkfstools` over ssh.
//! List commands use `--formatter=json` and are parsed with serde.

use crate::domain::device::DeviceId;
use crate::domain::ports::{
    FabricConnectRequest, FabricController, Host, HostSession, HostShell, UnresolvedVolume,
    VmfsCreateRequest, VmkernelTag,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Sector size used for GPT partition math
const SECTOR_SIZE: u64 = 512;

/// First usable sector of the VMFS partition
const PARTITION_START_SECTOR: u64 = 2048;

/// Sectors reserved at the end of the disk for the backup GPT
const GPT_BACKUP_SECTORS: u64 = 34;

/// GPT partition type GUID for VMFS
const VMFS_PARTITION_GUID: &str = "AA31E02A400F11DB9590000C2911D1B8";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the esxcli shell
#[derive(Debug, Clone)]
pub struct EsxcliConfig {
    /// Login user on the hosts
    pub ssh_user: String,
    /// Private key passed to ssh with `-i`
    pub identity_file: Option<PathBuf>,
    /// ssh binary to execute
    pub ssh_binary: String,
    /// ssh port
    pub ssh_port: u16,
    /// ssh connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on a single remote command
    pub command_timeout: Duration,
}

impl Default for EsxcliConfig {
    fn default() -> Self {
        Self {
            ssh_user: "root".to_string(),
            identity_file: None,
            ssh_binary: "ssh".to_string(),
            ssh_port: 22,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
        }
    }
}

// =============================================================================
// Command Lines
// =============================================================================

fn esxcli(args: &[&str]) -> Vec<String> {
    std::iter::once("esxcli")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

fn esxcli_json(args: &[&str]) -> Vec<String> {
    std::iter::once("esxcli")
        .chain(std::iter::once("--formatter=json"))
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

pub(crate) fn connect_command(request: &FabricConnectRequest) -> Vec<String> {
    let t = &request.tuning;
    let mut argv = esxcli(&["nvme", "fabrics", "connect"]);
    argv.extend(
        [
            ("--adapter", request.adapter.clone()),
            ("--ip-address", request.target.address.clone()),
            ("--subsystem-nqn", request.target.subsystem_nqn.clone()),
            ("--port-number", t.port_number.to_string()),
            ("--controller-id", t.controller_id.to_string()),
            ("--io-queue-number", t.io_queue_number.to_string()),
            ("--io-queue-size", t.io_queue_size.to_string()),
            ("--keep-alive-timeout", t.keep_alive_timeout.to_string()),
            ("--admin-queue-size", t.admin_queue_size.to_string()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value]),
    );
    argv
}

pub(crate) fn disconnect_command(adapter: &str, controller_number: u32, nqn: &str) -> Vec<String> {
    let number = controller_number.to_string();
    esxcli(&[
        "nvme",
        "fabrics",
        "disconnect",
        "--adapter",
        adapter,
        "--controller-number",
        &number,
        "--subsystem-nqn",
        nqn,
    ])
}

/// Last sector of a VMFS partition of `size_bytes`, leaving room for the backup GPT
pub(crate) fn partition_end_sector(size_bytes: u64) -> Result<u64> {
    let end = (size_bytes / SECTOR_SIZE)
        .checked_sub(GPT_BACKUP_SECTORS + 1)
        .filter(|end| *end > PARTITION_START_SECTOR)
        .ok_or_else(|| {
            Error::Validation(format!("{} bytes is too small for a VMFS partition", size_bytes))
        })?;
    Ok(end)
}

pub(crate) fn partition_table_command(device: &DeviceId, end_sector: u64) -> Vec<String> {
    vec![
        "partedUtil".into(),
        "setptbl".into(),
        device.path(),
        "gpt".into(),
        format!(
            "1 {} {} {} 0",
            PARTITION_START_SECTOR, end_sector, VMFS_PARTITION_GUID
        ),
    ]
}

/// Render an argv as one remote shell command line
pub(crate) fn render_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@#,+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

// =============================================================================
// JSON Output
// =============================================================================

#[derive(Debug, Deserialize)]
struct EsxcliController {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ControllerNumber")]
    controller_number: u32,
    #[serde(rename = "Adapter")]
    adapter: String,
    #[serde(rename = "TransportType", default)]
    transport: String,
}

#[derive(Debug, Deserialize)]
struct EsxcliSnapshot {
    #[serde(rename = "VolumeName")]
    volume_name: String,
    #[serde(rename = "VMFSUUID")]
    uuid: String,
    #[serde(rename = "Canmount", default)]
    can_mount: bool,
    #[serde(rename = "Canresignature", default)]
    can_resignature: bool,
}

#[derive(Debug, Deserialize)]
struct EsxcliSnapshotExtent {
    #[serde(rename = "VMFSUUID")]
    uuid: String,
    #[serde(rename = "DeviceName")]
    device_name: String,
}

fn parse_json<T: DeserializeOwned>(command: &str, stdout: &[u8]) -> Result<T> {
    serde_json::from_slice(stdout).map_err(|e| Error::ShellOutput {
        command: command.to_string(),
        reason: format!("JSON parse error: {}", e),
    })
}

pub(crate) fn parse_controllers(stdout: &[u8]) -> Result<Vec<FabricController>> {
    let rows: Vec<EsxcliController> = parse_json("nvme controller list", stdout)?;
    Ok(rows
        .into_iter()
        .map(|row| FabricController {
            name: row.name,
            adapter: row.adapter,
            controller_number: row.controller_number,
            transport: row.transport,
        })
        .collect())
}

/// Join `snapshot list` with `snapshot extent list` on the VMFS UUID
pub(crate) fn parse_unresolved_volumes(
    volumes: &[u8],
    extents: &[u8],
) -> Result<Vec<UnresolvedVolume>> {
    let volumes: Vec<EsxcliSnapshot> = parse_json("storage vmfs snapshot list", volumes)?;
    let extents: Vec<EsxcliSnapshotExtent> =
        parse_json("storage vmfs snapshot extent list", extents)?;

    let mut by_uuid: BTreeMap<String, Vec<DeviceId>> = BTreeMap::new();
    for extent in extents {
        match DeviceId::parse(&extent.device_name) {
            Ok(id) => by_uuid.entry(extent.uuid).or_default().push(id),
            Err(e) => warn!(device = %extent.device_name, error = %e, "Skipping snapshot extent"),
        }
    }

    Ok(volumes
        .into_iter()
        .map(|v| UnresolvedVolume {
            extents: by_uuid.remove(&v.uuid).unwrap_or_default(),
            label: v.volume_name,
            uuid: v.uuid,
            can_mount: v.can_mount,
            can_resignature: v.can_resignature,
        })
        .collect())
}

// =============================================================================
// Shell
// =============================================================================

/// Host shell running esxcli over ssh
pub struct EsxcliShell {
    config: EsxcliConfig,
}

impl EsxcliShell {
    pub fn new(config: EsxcliConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HostShell for EsxcliShell {
    async fn open_session(&self, host: &Host) -> Result<Box<dyn HostSession>> {
        let session = EsxcliSession {
            host: host.name.clone(),
            config: self.config.clone(),
        };

        let probe = esxcli(&["system", "version", "get"]);
        let output = session.execute(&probe).await.map_err(|e| Error::SessionFailed {
            host: host.name.clone(),
            reason: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(Error::SessionFailed {
                host: host.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(host = %host.name, user = %self.config.ssh_user, "Opened esxcli session");
        Ok(Box::new(session))
    }
}

struct EsxcliSession {
    host: String,
    config: EsxcliConfig,
}

impl EsxcliSession {
    fn ssh_command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.config.ssh_binary);
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout.as_secs().max(1)
            ))
            .arg("-p")
            .arg(self.config.ssh_port.to_string());
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(format!("{}@{}", self.config.ssh_user, self.host))
            .arg("--")
            .arg(remote)
            .kill_on_drop(true);
        cmd
    }

    /// Run a command; only a failure to run it at all is an error
    async fn execute(&self, argv: &[String]) -> Result<Output> {
        let remote = render_command(argv);
        debug!(host = %self.host, command = %remote, "Running remote command");

        let run = self.ssh_command(&remote).output();
        let output = tokio::time::timeout(self.config.command_timeout, run)
            .await
            .map_err(|_| self.command_error(argv, "timed out".into()))?
            .map_err(|e| self.command_error(argv, e.to_string()))?;

        Ok(output)
    }

    /// Run a command whose non-zero exit is a rejection
    async fn run_flag(&self, argv: Vec<String>) -> Result<bool> {
        let output = self.execute(&argv).await?;
        if !output.status.success() {
            warn!(
                host = %self.host,
                command = %command_name(&argv),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Command rejected"
            );
        }
        Ok(output.status.success())
    }

    /// Run a command whose non-zero exit is an error
    async fn run_unit(&self, argv: Vec<String>) -> Result<Vec<u8>> {
        let output = self.execute(&argv).await?;
        if !output.status.success() {
            let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(self.command_error(&argv, reason));
        }
        Ok(output.stdout)
    }

    fn command_error(&self, argv: &[String], reason: String) -> Error {
        Error::ShellCommand {
            host: self.host.clone(),
            command: command_name(argv),
            reason,
        }
    }
}

/// Command name without its flags, for logs and errors
fn command_name(argv: &[String]) -> String {
    argv.iter()
        .filter(|a| !a.starts_with('-'))
        .take_while(|a| !a.starts_with('/'))
        .take(4)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl HostSession for EsxcliSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect_fabric(&self, request: &FabricConnectRequest) -> Result<bool> {
        self.run_flag(connect_command(request)).await
    }

    async fn list_controllers(&self) -> Result<Vec<FabricController>> {
        let stdout = self
            .run_unit(esxcli_json(&["nvme", "controller", "list"]))
            .await?;
        parse_controllers(&stdout)
    }

    async fn disconnect_fabric(
        &self,
        adapter: &str,
        controller_number: u32,
        subsystem_nqn: &str,
    ) -> Result<bool> {
        self.run_flag(disconnect_command(adapter, controller_number, subsystem_nqn))
            .await
    }

    async fn rescan_storage(&self) -> Result<()> {
        self.run_unit(esxcli(&["storage", "core", "adapter", "rescan", "--all"]))
            .await?;
        Ok(())
    }

    async fn enable_fabric_adapter(&self, nic: &str) -> Result<bool> {
        self.run_flag(esxcli(&[
            "nvme", "fabrics", "enable", "--protocol", "TCP", "--device", nic,
        ]))
        .await
    }

    async fn tag_vmkernel(&self, interface: &str, tag: VmkernelTag) -> Result<()> {
        self.run_unit(esxcli(&[
            "network",
            "ip",
            "interface",
            "tag",
            "add",
            "--interface-name",
            interface,
            "--tagname",
            tag.as_str(),
        ]))
        .await?;
        Ok(())
    }

    async fn add_port_group(&self, switch: &str, port_group: &str) -> Result<()> {
        self.run_unit(esxcli(&[
            "network",
            "vswitch",
            "standard",
            "portgroup",
            "add",
            "--portgroup-name",
            port_group,
            "--vswitch-name",
            switch,
        ]))
        .await?;
        Ok(())
    }

    async fn set_port_group_vlan(&self, port_group: &str, vlan_id: u16) -> Result<()> {
        let vlan = vlan_id.to_string();
        self.run_unit(esxcli(&[
            "network",
            "vswitch",
            "standard",
            "portgroup",
            "set",
            "--portgroup-name",
            port_group,
            "--vlan-id",
            &vlan,
        ]))
        .await?;
        Ok(())
    }

    async fn create_vmfs(&self, request: &VmfsCreateRequest) -> Result<()> {
        let end = partition_end_sector(request.size_bytes)?;
        self.run_unit(partition_table_command(&request.device, end))
            .await?;

        let argv = vec![
            "vmkfstools".to_string(),
            "-C".to_string(),
            request.version.to_string(),
            "-S".to_string(),
            request.label.clone(),
            request.device.partition_path(1),
        ];
        self.run_unit(argv).await?;
        Ok(())
    }

    async fn grow_vmfs(&self, device: &DeviceId, device_size_bytes: u64) -> Result<()> {
        let end = partition_end_sector(device_size_bytes)?;
        let resize = vec![
            "partedUtil".to_string(),
            "resize".to_string(),
            device.path(),
            "1".to_string(),
            PARTITION_START_SECTOR.to_string(),
            end.to_string(),
        ];
        self.run_unit(resize).await?;

        let partition = device.partition_path(1);
        let grow = vec![
            "vmkfstools".to_string(),
            "--growfs".to_string(),
            partition.clone(),
            partition,
        ];
        self.run_unit(grow).await?;
        Ok(())
    }

    async fn unmount_filesystem(&self, label: &str) -> Result<()> {
        self.run_unit(esxcli(&[
            "storage",
            "filesystem",
            "unmount",
            "--volume-label",
            label,
        ]))
        .await?;
        Ok(())
    }

    async fn list_unresolved_volumes(&self) -> Result<Vec<UnresolvedVolume>> {
        let volumes = self
            .run_unit(esxcli_json(&["storage", "vmfs", "snapshot", "list"]))
            .await?;
        let extents = self
            .run_unit(esxcli_json(&["storage", "vmfs", "snapshot", "extent", "list"]))
            .await?;
        parse_unresolved_volumes(&volumes, &extents)
    }

    async fn resignature_volume(&self, label: &str) -> Result<()> {
        self.run_unit(esxcli(&[
            "storage",
            "vmfs",
            "snapshot",
            "resignature",
            "--volume-label",
            label,
        ]))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::FabricTarget;
    use crate::domain::tuning::FabricTuning;
    use assert_matches::assert_matches;

    #[test]
    fn test_connect_command() {
        let request = FabricConnectRequest {
            adapter: "vmhba65".into(),
            target: FabricTarget {
                address: "192.168.10.20".into(),
                subsystem_nqn: "nqn.2014-08.org.nvmexpress:uuid:1234".into(),
            },
            tuning: FabricTuning::default(),
        };

        let rendered = render_command(&connect_command(&request));
        assert_eq!(
            rendered,
            "esxcli nvme fabrics connect --adapter vmhba65 --ip-address 192.168.10.20 \
             --subsystem-nqn nqn.2014-08.org.nvmexpress:uuid:1234 --port-number 4420 \
             --controller-id 65535 --io-queue-number 8 --io-queue-size 256 \
             --keep-alive-timeout 256 --admin-queue-size 32"
        );
    }

    #[test]
    fn test_disconnect_command() {
        let argv = disconnect_command("vmhba65", 257, "nqn.2014-08.org.example:sub1");
        assert_eq!(command_name(&argv), "esxcli nvme fabrics disconnect");
        assert!(argv.windows(2).any(|w| w[0] == "--controller-number" && w[1] == "257"));
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("vmhba65"), "vmhba65");
        assert_eq!(quote("my datastore"), "'my datastore'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_partition_geometry() {
        let tib = 1024u64 * 1024 * 1024 * 1024;
        assert_eq!(partition_end_sector(tib).unwrap(), tib / 512 - 35);
        assert_matches!(partition_end_sector(4096), Err(Error::Validation(_)));

        let device = DeviceId::parse("naa.600a0980383030523424457a4a695266").unwrap();
        let argv = partition_table_command(&device, 2_147_483_613);
        assert_eq!(argv[2], "/vmfs/devices/disks/naa.600a0980383030523424457a4a695266");
        assert_eq!(argv[4], "1 2048 2147483613 AA31E02A400F11DB9590000C2911D1B8 0");
    }

    #[test]
    fn test_parse_controllers() {
        let json = br#"[
            {"Name": "nqn.2014-08.org.example:sub1#vmhba65#192.168.10.20:4420",
             "ControllerNumber": 257, "Adapter": "vmhba65",
             "TransportType": "TCP", "IsOnline": true}
        ]"#;
        let controllers = parse_controllers(json).unwrap();
        assert_eq!(controllers.len(), 1);
        assert_eq!(controllers[0].controller_number, 257);
        assert_eq!(controllers[0].adapter, "vmhba65");

        assert_matches!(parse_controllers(b"not json"), Err(Error::ShellOutput { .. }));
    }

    #[test]
    fn test_parse_unresolved_volumes() {
        let volumes = br#"[
            {"VolumeName": "ds-prod-01", "VMFSUUID": "5f2b6c1e-8a1c3d42-11aa-0050569a0001",
             "Canmount": false, "Canresignature": true, "ExtentCount": 1}
        ]"#;
        let extents = br#"[
            {"VolumeName": "ds-prod-01", "VMFSUUID": "5f2b6c1e-8a1c3d42-11aa-0050569a0001",
             "DeviceName": "naa.600a0980383030523424457a4a695268", "Partition": 1},
            {"VolumeName": "other", "VMFSUUID": "ffff", "DeviceName": "bogus device"}
        ]"#;

        let parsed = parse_unresolved_volumes(volumes, extents).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].can_resignature);
        assert_eq!(
            parsed[0].extents[0].as_str(),
            "naa.600a0980383030523424457a4a695268"
        );
    }
}
