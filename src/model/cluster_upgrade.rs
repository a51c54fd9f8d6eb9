//! The `ClusterUpgrade` custom resource.
//!
//! `group = provision.containership.io, version = v3`. This is the single
//! source of truth for an in-flight or completed upgrade; see the invariants
//! in the top-level design notes. Status is written only by the coordinator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Upgrade kinds this controller understands. Only `Kubernetes` is ever
/// acted on; other values are accepted by the schema but ignored by both
/// reconcilers (see `coordinator::reconciler`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ClusterUpgradeType {
    #[default]
    Kubernetes,
}

/// Terminal/non-terminal status of a whole `ClusterUpgrade`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ClusterStatus {
    InProgress,
    Success,
    Failed,
}

impl ClusterStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClusterStatus::Success | ClusterStatus::Failed)
    }
}

/// Status of a single node's progress through the current upgrade. Shared
/// between `ClusterUpgradeStatus::node_statuses` and the node annotation;
/// both are monotone in the same sense (any -> InProgress -> terminal).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum NodeStatus {
    InProgress,
    Success,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failed)
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "provision.containership.io",
    version = "v3",
    kind = "ClusterUpgrade",
    namespaced,
    status = "ClusterUpgradeStatus",
    shortname = "cup",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.clusterStatus"}"#,
    printcolumn = r#"{"name":"TargetVersion","type":"string","jsonPath":".spec.targetVersion"}"#,
    printcolumn = r#"{"name":"CurrentNode","type":"string","jsonPath":".status.currentNode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUpgradeSpec {
    /// Opaque identifier assigned by the external system that created this
    /// upgrade. Carried through to the node annotation and the host script
    /// filename but never interpreted by either reconciler.
    pub id: String,

    #[serde(rename = "type", default)]
    pub type_: ClusterUpgradeType,

    /// Semantic-version string nodes must converge on for this upgrade to
    /// be considered complete for them.
    pub target_version: String,

    /// Nodes eligible for this upgrade. `None` means all nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub label_selector: Option<LabelSelector>,

    /// How long the coordinator waits for a selected node to converge
    /// before marking it Failed.
    pub node_timeout_seconds: i64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUpgradeStatus {
    /// Unset until the coordinator's first reconcile; terminal once
    /// Success or Failed and never mutated again past that point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_status: Option<ClusterStatus>,

    /// Name of the node currently selected, or empty if none is selected.
    #[serde(default)]
    pub current_node: String,

    /// Set by the coordinator's own clock at selection time; cleared when
    /// the selected node reaches a terminal state. Never read from the
    /// agent's annotation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_start_time: Option<DateTime<Utc>>,

    /// Per-node status, append-only and monotone: a node is inserted once
    /// (as InProgress) and transitions at most once more, to a terminal
    /// status.
    #[serde(default)]
    pub node_statuses: BTreeMap<String, NodeStatus>,
}

impl ClusterUpgradeStatus {
    /// Invariant 2 of the data model, checked directly rather than assumed:
    /// `current_node` set, `current_start_time` set, and the per-node
    /// status recorded as InProgress must all agree.
    pub fn current_node_is_consistent(&self) -> bool {
        if self.current_node.is_empty() {
            return self.current_start_time.is_none();
        }
        self.current_start_time.is_some()
            && self.node_statuses.get(&self.current_node) == Some(&NodeStatus::InProgress)
    }
}
