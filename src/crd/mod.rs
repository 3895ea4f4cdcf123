//! Custom Resource Definitions for the upgrade operator.
//!
//! - `Cluster`: upstream description of a downstream cluster (management API)
//! - `Plan`: downstream upgrade directive consumed by the system-upgrade-controller

mod cluster;
mod plan;

pub use cluster::*;
pub use plan::*;
