//! fabric-ops - NVMe/TCP Fabric and Datastore Operations
//!
//! Cluster-wide storage routines for hypervisor hosts: connecting and
//! disconnecting NVMe over TCP fabric targets, enabling fabric adapters,
//! host networking for storage traffic, and VMFS datastore lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                            fabric-ops CLI                                    │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │     Fabric      │  │ Adapters/Network│  │      Datastore              │  │
//! │  │ Connect/Discon. │  │ Tags/PortGroups │  │      Lifecycle              │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │                    ┌───────────┴───────────┐                                │
//! │                    │  OpsContext + Reports │                                │
//! │                    │  (metrics, host gate) │                                │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                              Ports                                           │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │        Inventory            │  │     HostShell / HostSession         │   │
//! │  │   (YAML snapshot)           │  │   (esxcli over ssh, simulated)      │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Routines, reports, metrics and platform adapters
//! - [`domain`]: Core domain types, tuning and ports
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod domain;
pub mod error;

// Re-export commonly used types
pub use controlplane::{
    CreateDatastore, DatastoreLifecycle, DisconnectOptions, FabricAdapterEnabler,
    FabricConnectionReconciler, FabricDisconnectionReconciler, HostOutcome, HostReport,
    OperationKind, OperationOutcome, OpsContext, PortGroupReconciler, PortGroupSpec,
    ReconcileMetrics, RunReport, ShellConfig, ShellFactory, ShellKind, SkipReason, VmkernelTagger,
};

pub use domain::{
    DeviceId, FabricTarget, FabricTuning, HostSession, HostShell, Inventory, VmfsVersion,
    VmkernelTag,
};

pub use error::{Error, ErrorTier, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
