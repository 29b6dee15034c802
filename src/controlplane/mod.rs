//! Control Plane Module
//!
//! Cluster-wide routines that drive hosts through the inventory and host
//! shell ports, and the reports they produce.

pub mod adapters;
pub mod context;
pub mod datastore;
pub mod fabric;
pub mod metrics;
pub mod network;
pub mod platform;
pub mod report;

pub use adapters::*;
pub use context::*;
pub use datastore::*;
pub use fabric::*;
pub use metrics::*;
pub use network::*;
pub use platform::*;
pub use report::*;
