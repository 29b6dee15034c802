//! Domain layer - Inventory types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod device;
pub mod ports;
pub mod tuning;

pub use device::*;
pub use ports::*;
pub use tuning::*;
