//! fabric-ops
//!
//! Command line front end. Each subcommand runs one routine against the
//! inventory snapshot and prints its report; logs go to stderr.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fabric_ops::controlplane::platform::{EsxcliConfig, StaticInventory};
use fabric_ops::{
    CreateDatastore, DatastoreLifecycle, DisconnectOptions, Error, FabricAdapterEnabler,
    FabricConnectionReconciler, FabricDisconnectionReconciler, FabricTarget, FabricTuning,
    OpsContext, PortGroupReconciler, PortGroupSpec, ReconcileMetrics, Result, RunReport,
    ShellConfig, ShellFactory, ShellKind, VmfsVersion, VmkernelTag, VmkernelTagger,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NVMe/TCP fabric and VMFS datastore operations for hypervisor clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Inventory snapshot (YAML)
    #[arg(long, env = "FABRIC_OPS_INVENTORY")]
    inventory: PathBuf,

    /// ssh user on the hosts
    #[arg(long, env = "FABRIC_OPS_SSH_USER", default_value = "root")]
    ssh_user: String,

    /// ssh private key
    #[arg(long, env = "FABRIC_OPS_SSH_IDENTITY")]
    ssh_identity: Option<PathBuf>,

    /// ssh connect timeout in seconds
    #[arg(long, env = "FABRIC_OPS_SSH_TIMEOUT", default_value = "10")]
    ssh_timeout_secs: u64,

    /// Record host commands instead of running them
    #[arg(long, env = "FABRIC_OPS_DRY_RUN")]
    dry_run: bool,

    /// Report format on stdout
    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Write Prometheus text-format metrics here when the run ends
    #[arg(long, env = "FABRIC_OPS_METRICS_FILE")]
    metrics_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect every NVMe/TCP adapter in a cluster to a fabric target
    Connect {
        #[arg(long)]
        cluster: String,
        /// Target IP address or hostname
        #[arg(long)]
        address: String,
        /// Subsystem NQN
        #[arg(long)]
        nqn: String,
        #[command(flatten)]
        tuning: TuningArgs,
    },
    /// Disconnect fabric controllers on hosts with no fabric-backed datastores
    Disconnect {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        nqn: String,
        /// Device id prefix that marks fabric-backed datastores
        #[arg(long, default_value = fabric_ops::controlplane::DEFAULT_FABRIC_DEVICE_PREFIX)]
        fabric_device_prefix: String,
    },
    /// Enable the software NVMe/TCP adapter on uplinks
    EnableAdapters {
        #[arg(long)]
        cluster: String,
        /// Uplinks (vmnicN), comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        nics: Vec<String>,
    },
    /// Tag a vmkernel interface for a service
    TagVmkernel {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        interface: String,
        #[arg(long, default_value = "NVMeTCP", value_parser = parse_tag)]
        tag: VmkernelTag,
    },
    /// Ensure a port group with a VLAN exists on a standard switch
    PortGroup {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        switch: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "0")]
        vlan_id: u16,
    },
    /// VMFS datastore lifecycle
    #[command(subcommand)]
    Datastore(DatastoreCommand),
}

#[derive(Subcommand, Debug)]
enum DatastoreCommand {
    /// Create a VMFS datastore on an unused device
    Create {
        #[arg(long)]
        host: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        device: String,
        /// Capacity such as 500GB; whole device when omitted
        #[arg(long)]
        size: Option<String>,
        #[arg(long, value_enum, default_value = "vmfs6")]
        vmfs_version: VersionArg,
    },
    /// Grow a datastore onto its enlarged device
    Expand {
        #[arg(long)]
        host: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        device: String,
    },
    /// Unmount a datastore from every host in a cluster
    Unmount {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        name: String,
    },
    /// Resignature a snapshot copy of a datastore
    Resignature {
        #[arg(long)]
        host: String,
        #[arg(long)]
        device: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VersionArg {
    Vmfs5,
    Vmfs6,
}

impl From<VersionArg> for VmfsVersion {
    fn from(arg: VersionArg) -> Self {
        match arg {
            VersionArg::Vmfs5 => VmfsVersion::Vmfs5,
            VersionArg::Vmfs6 => VmfsVersion::Vmfs6,
        }
    }
}

fn parse_tag(raw: &str) -> std::result::Result<VmkernelTag, String> {
    raw.parse().map_err(|e: Error| e.to_string())
}

/// Overrides for the fabric connect tuning defaults
#[derive(clap::Args, Debug)]
struct TuningArgs {
    #[arg(long)]
    admin_queue_size: Option<u32>,
    #[arg(long)]
    controller_id: Option<u32>,
    #[arg(long)]
    io_queue_number: Option<u32>,
    #[arg(long)]
    io_queue_size: Option<u32>,
    #[arg(long)]
    keep_alive_timeout: Option<u32>,
    #[arg(long)]
    port_number: Option<u16>,
}

impl TuningArgs {
    fn resolve(&self) -> FabricTuning {
        let defaults = FabricTuning::default();
        FabricTuning {
            admin_queue_size: self.admin_queue_size.unwrap_or(defaults.admin_queue_size),
            controller_id: self.controller_id.unwrap_or(defaults.controller_id),
            io_queue_number: self.io_queue_number.unwrap_or(defaults.io_queue_number),
            io_queue_size: self.io_queue_size.unwrap_or(defaults.io_queue_size),
            keep_alive_timeout: self.keep_alive_timeout.unwrap_or(defaults.keep_alive_timeout),
            port_number: self.port_number.unwrap_or(defaults.port_number),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("failed to initialise logging: {}", e);
        std::process::exit(2);
    }

    match run(args).await {
        Ok(report) if report.summary().failed_operations > 0 => std::process::exit(1),
        Ok(_) => {}
        Err(e) => {
            error!(tier = ?e.tier(), "{}", e);
            std::process::exit(2);
        }
    }
}

async fn run(args: Args) -> Result<RunReport> {
    info!("Starting {} {}", fabric_ops::NAME, fabric_ops::VERSION);

    let inventory = StaticInventory::from_file(&args.inventory)?;
    let kind = if args.dry_run {
        ShellKind::Simulated
    } else {
        ShellKind::Esxcli
    };
    let shell = ShellFactory::create(
        kind,
        ShellConfig {
            esxcli: EsxcliConfig {
                ssh_user: args.ssh_user.clone(),
                identity_file: args.ssh_identity.clone(),
                connect_timeout: Duration::from_secs(args.ssh_timeout_secs),
                ..Default::default()
            },
        },
    );
    info!(shell = ?kind, "Host shell ready");

    let metrics = Arc::new(ReconcileMetrics::new()?);
    let ctx = OpsContext::new(Arc::new(inventory), shell).with_metrics(metrics.clone());

    let result = dispatch(ctx, args.command).await;

    // Metrics are written for failed runs too
    if let Some(path) = &args.metrics_file {
        match write_metrics(&metrics, path) {
            Ok(()) => info!(path = %path.display(), "Wrote metrics"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not write metrics"),
        }
    }

    let report = result?;
    match args.output {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(report)
}

fn write_metrics(metrics: &ReconcileMetrics, path: &Path) -> Result<()> {
    std::fs::write(path, metrics.render()?)?;
    Ok(())
}

async fn dispatch(ctx: OpsContext, command: Command) -> Result<RunReport> {
    match command {
        Command::Connect {
            cluster,
            address,
            nqn,
            tuning,
        } => {
            let target = FabricTarget {
                address,
                subsystem_nqn: nqn,
            };
            FabricConnectionReconciler::new(ctx)
                .run(&cluster, &target, tuning.resolve())
                .await
        }
        Command::Disconnect {
            cluster,
            nqn,
            fabric_device_prefix,
        } => {
            let options = DisconnectOptions {
                fabric_device_prefix,
            };
            FabricDisconnectionReconciler::new(ctx, options)
                .run(&cluster, &nqn)
                .await
        }
        Command::EnableAdapters { cluster, nics } => {
            FabricAdapterEnabler::new(ctx).run(&cluster, &nics).await
        }
        Command::TagVmkernel {
            cluster,
            interface,
            tag,
        } => VmkernelTagger::new(ctx).run(&cluster, &interface, tag).await,
        Command::PortGroup {
            cluster,
            switch,
            name,
            vlan_id,
        } => {
            let spec = PortGroupSpec {
                switch,
                name,
                vlan_id,
            };
            PortGroupReconciler::new(ctx).run(&cluster, &spec).await
        }
        Command::Datastore(command) => {
            dispatch_datastore(DatastoreLifecycle::new(ctx), command).await
        }
    }
}

async fn dispatch_datastore(
    lifecycle: DatastoreLifecycle,
    command: DatastoreCommand,
) -> Result<RunReport> {
    match command {
        DatastoreCommand::Create {
            host,
            name,
            device,
            size,
            vmfs_version,
        } => {
            let request = CreateDatastore {
                host,
                name,
                device,
                size,
                version: vmfs_version.into(),
            };
            lifecycle.create(&request).await
        }
        DatastoreCommand::Expand { host, name, device } => {
            lifecycle.expand(&host, &name, &device).await
        }
        DatastoreCommand::Unmount { cluster, name } => lifecycle.unmount(&cluster, &name).await,
        DatastoreCommand::Resignature { host, device } => {
            lifecycle.resignature(&host, &device).await
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let installed = if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|e| Error::Configuration(format!("logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_metrics() {
        let metrics = ReconcileMetrics::new().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("fabric_ops.prom");
        write_metrics(&metrics, &path).unwrap();
        assert!(path.exists());

        // An unwritable path is reported, not panicked on
        let missing = dir.path().join("no-such-dir").join("fabric_ops.prom");
        assert!(write_metrics(&metrics, &missing).is_err());
    }
}
