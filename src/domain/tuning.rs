//! NVMe/TCP connection tuning parameters

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Tuning parameters passed to every fabric connect call
///
/// The defaults match what the host itself uses when a parameter is omitted:
///
/// | parameter            | default |
/// |----------------------|---------|
/// | `admin_queue_size`   | 32      |
/// | `controller_id`      | 65535 (dynamic controller) |
/// | `io_queue_number`    | 8       |
/// | `io_queue_size`      | 256     |
/// | `keep_alive_timeout` | 256 (seconds) |
/// | `port_number`        | 4420    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricTuning {
    pub admin_queue_size: u32,
    pub controller_id: u32,
    pub io_queue_number: u32,
    pub io_queue_size: u32,
    pub keep_alive_timeout: u32,
    pub port_number: u16,
}

impl Default for FabricTuning {
    fn default() -> Self {
        Self {
            admin_queue_size: 32,
            controller_id: 65535,
            io_queue_number: 8,
            io_queue_size: 256,
            keep_alive_timeout: 256,
            port_number: 4420,
        }
    }
}

impl FabricTuning {
    /// Reject values the host would refuse outright
    pub fn validate(&self) -> Result<()> {
        if self.admin_queue_size == 0 {
            return Err(Error::Validation("admin queue size must be > 0".into()));
        }
        if self.controller_id > u32::from(u16::MAX) {
            return Err(Error::Validation(format!(
                "controller id {} exceeds 65535",
                self.controller_id
            )));
        }
        if self.io_queue_number == 0 {
            return Err(Error::Validation("I/O queue number must be > 0".into()));
        }
        if self.io_queue_size == 0 {
            return Err(Error::Validation("I/O queue size must be > 0".into()));
        }
        if self.port_number == 0 {
            return Err(Error::Validation("port number must be > 0".into()));
        }
        Ok(())
    }
}
