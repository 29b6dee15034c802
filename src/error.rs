//! Error types for fabric-ops
//!
//! Every failure is classified into one of three tiers so the control plane
//! can decide whether to abort the run, skip a host or just record a failed
//! operation and move on.

use thiserror::Error;

/// Unified error type for fabric-ops
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Inventory Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("{kind}/{name} has type {actual}, expected {expected}")]
    TypeMismatch {
        kind: String,
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Inventory error: {0}")]
    Inventory(String),

    // =========================================================================
    // Host Errors
    // =========================================================================
    #[error("Host {host} is not available (state: {state})")]
    HostUnavailable { host: String, state: String },

    #[error("Failed to open management session on {host}: {reason}")]
    SessionFailed { host: String, reason: String },

    #[error("Command failed on {host}: {command} - {reason}")]
    ShellCommand {
        host: String,
        command: String,
        reason: String,
    },

    #[error("Unexpected output from {command}: {reason}")]
    ShellOutput { command: String, reason: String },

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Device {device} already backs datastore {datastore}")]
    DeviceInUse { device: String, datastore: String },

    #[error("Insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Invalid device identifier: {0}")]
    InvalidDeviceId(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How far a failure propagates through a cluster run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTier {
    /// Abort the whole routine
    Fatal,
    /// Skip the current host, continue with the others
    HostRecoverable,
    /// Record the failed operation, continue with the next adapter/controller
    OperationRecoverable,
}

impl Error {
    /// Determine how this error propagates
    pub fn tier(&self) -> ErrorTier {
        match self {
            Error::HostUnavailable { .. } | Error::SessionFailed { .. } => {
                ErrorTier::HostRecoverable
            }

            Error::ShellCommand { .. } | Error::ShellOutput { .. } => {
                ErrorTier::OperationRecoverable
            }

            // Missing resources, bad input, config and IO problems abort the run
            _ => ErrorTier::Fatal,
        }
    }

    /// Check if this error aborts the routine
    pub fn is_fatal(&self) -> bool {
        self.tier() == ErrorTier::Fatal
    }

    pub(crate) fn not_found(kind: &str, name: &str) -> Self {
        Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
}

/// Result type alias for fabric-ops
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_tiers() {
        let err = Error::not_found("Cluster", "C1");
        assert_eq!(err.tier(), ErrorTier::Fatal);
        assert_eq!(err.to_string(), "Resource not found: Cluster/C1");

        let err = Error::SessionFailed {
            host: "esx01".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.tier(), ErrorTier::HostRecoverable);
        assert!(!err.is_fatal());

        let err = Error::ShellCommand {
            host: "esx01".into(),
            command: "nvme fabrics connect".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.tier(), ErrorTier::OperationRecoverable);
    }

    #[test]
    fn test_input_errors_are_fatal() {
        assert!(Error::CapacityParse("12XB".into()).is_fatal());
        assert!(Error::Validation("empty NQN".into()).is_fatal());
        assert!(Error::InsufficientCapacity {
            requested: 1000,
            available: 500,
        }
        .is_fatal());
    }
}
