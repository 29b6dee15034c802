//! Platform Adapters
//!
//! Implementations of the inventory and host shell ports:
//! - YAML inventory snapshots
//! - esxcli over ssh
//! - In-memory simulated shell for dry runs

pub mod esxcli;
pub mod simulated;
pub mod static_inventory;

pub use esxcli::*;
pub use simulated::*;
pub use static_inventory::*;

use crate::domain::ports::HostShellRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which host shell to drive hosts with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Esxcli,
    Simulated,
}

/// Factory for creating host shells
pub struct ShellFactory;

impl ShellFactory {
    /// Create a host shell of the given kind
    pub fn create(kind: ShellKind, config: ShellConfig) -> HostShellRef {
        match kind {
            ShellKind::Esxcli => Arc::new(EsxcliShell::new(config.esxcli)),
            ShellKind::Simulated => Arc::new(SimulatedShell::new()),
        }
    }
}

/// Combined shell configuration
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    pub esxcli: EsxcliConfig,
}
