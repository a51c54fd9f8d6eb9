//! Shared data model and selectors coupling the coordinator and the agent.
//!
//! Neither tier ever talks to the other directly: everything in this module
//! is serialized into the API server (as the `ClusterUpgrade` resource or a
//! `Node` annotation) and re-read by whichever side needs it next.

mod annotation;
mod cluster_upgrade;
mod selector;

pub use annotation::{parse_annotation, NodeUpgradeAnnotation, NODE_UPGRADE_ANNOTATION_KEY};
pub use cluster_upgrade::{
    ClusterStatus, ClusterUpgrade, ClusterUpgradeSpec, ClusterUpgradeStatus, ClusterUpgradeType,
    NodeStatus,
};
pub use selector::{
    is_containership_managed, selector_matches, CONTAINERSHIP_MANAGED_LABEL_KEY,
    CONTAINERSHIP_MANAGED_LABEL_VALUE,
};

/// Namespace all `ClusterUpgrade` objects live in. The resource is
/// conceptually cluster-scoped (there is never more than one organization's
/// worth of upgrades in play) but is implemented as namespaced, pinned to
/// this single reserved namespace, mirroring the upstream client.
pub const CONTAINERSHIP_NAMESPACE: &str = "containership";
