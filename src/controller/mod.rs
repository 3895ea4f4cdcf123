//! Controller for downstream cluster upgrades.
//!
//! Watches upstream `Cluster` resources and converges each downstream
//! cluster's upgrade plans and `Upgraded` condition.

pub mod conditions;
pub mod context;
pub mod error;
pub mod plans;
pub mod reconciler;
pub mod requeue;
