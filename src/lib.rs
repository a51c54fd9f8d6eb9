//! Containership Upgrade Controller: a two-tier control plane for rolling
//! Kubernetes node upgrades, coupled only through the `ClusterUpgrade`
//! custom resource and a node annotation — no direct RPC between tiers.

pub mod agent;
pub mod cloud;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod host;
pub mod model;
pub mod telemetry;

pub use crate::error::{Error, Result};
