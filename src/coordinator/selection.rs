//! Pure decision logic for the coordinator's reconcile algorithm (§4.1).
//!
//! Kept free of any `kube`/async dependency so the properties in §8 can be
//! asserted directly against plain data, the way `reconciler_test.rs`
//! exercises the node reconciler in this codebase without a live cluster.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::{
    selector_matches, ClusterUpgradeSpec, ClusterUpgradeStatus, NodeStatus, NodeUpgradeAnnotation,
};

/// Everything the coordinator needs to know about one `Node`, abstracted
/// away from the `k8s_openapi` type so the logic below can be exercised
/// with plain fixtures.
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub kubelet_version: String,
    pub annotation: Option<NodeUpgradeAnnotation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeCategory {
    Done,
    Failed,
    Pending,
}

/// Step 3: classify one eligible node as done, failed, or pending.
fn categorize_node(
    spec: &ClusterUpgradeSpec,
    status: &ClusterUpgradeStatus,
    node: &NodeSnapshot,
) -> NodeCategory {
    let version_match = node.kubelet_version == spec.target_version;
    let recorded = status.node_statuses.get(&node.name).copied();

    if version_match && (recorded == Some(NodeStatus::Success) || node.annotation.is_none()) {
        return NodeCategory::Done;
    }
    if recorded == Some(NodeStatus::Failed) {
        return NodeCategory::Failed;
    }
    NodeCategory::Pending
}

/// Step 3/4 summary: the lexicographically sorted set of still-pending
/// eligible nodes, and whether any eligible node is terminally failed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EligibleSummary {
    pub pending: Vec<String>,
    pub any_failed: bool,
}

pub fn summarize_eligible_nodes(
    spec: &ClusterUpgradeSpec,
    status: &ClusterUpgradeStatus,
    nodes: &[NodeSnapshot],
) -> EligibleSummary {
    let mut summary = EligibleSummary::default();

    for node in nodes {
        if !selector_matches(spec.label_selector.as_ref(), &node.labels) {
            continue;
        }
        match categorize_node(spec, status, node) {
            NodeCategory::Pending => summary.pending.push(node.name.clone()),
            NodeCategory::Failed => summary.any_failed = true,
            NodeCategory::Done => {}
        }
    }

    summary.pending.sort();
    summary
}

/// Step 6: deterministic selection among pending nodes.
pub fn select_next(pending: &[String]) -> Option<&str> {
    pending.first().map(String::as_str)
}

/// Step 4: what the whole `ClusterUpgrade` becomes once no pending nodes
/// remain.
pub fn terminal_status(any_failed: bool) -> crate::model::ClusterStatus {
    if any_failed {
        crate::model::ClusterStatus::Failed
    } else {
        crate::model::ClusterStatus::Success
    }
}

/// Step 5 outcome for the currently-selected node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InFlightOutcome {
    /// Still converging; re-requeue no later than the returned deadline.
    StillWaiting { timeout_at: DateTime<Utc> },
    /// Annotation reports success and the kubelet has reached target.
    Converged,
    Failed(FailReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailReason {
    AnnotationFailed,
    Timeout,
    /// The selected node is no longer present in the informer cache.
    NodeMissing,
}

/// Evaluate the in-flight node against the annotation it has (if any) and
/// the coordinator's own clock. `current_node` is `None` when the node has
/// disappeared from the cache.
pub fn evaluate_in_flight(
    spec: &ClusterUpgradeSpec,
    current_start_time: DateTime<Utc>,
    now: DateTime<Utc>,
    current_node: Option<&NodeSnapshot>,
) -> InFlightOutcome {
    let Some(node) = current_node else {
        return InFlightOutcome::Failed(FailReason::NodeMissing);
    };

    let version_match = node.kubelet_version == spec.target_version;
    if let Some(annotation) = &node.annotation {
        match annotation.status {
            NodeStatus::Success if version_match => return InFlightOutcome::Converged,
            NodeStatus::Failed => return InFlightOutcome::Failed(FailReason::AnnotationFailed),
            _ => {}
        }
    }

    let elapsed = now.signed_duration_since(current_start_time);
    if elapsed > Duration::seconds(spec.node_timeout_seconds) {
        return InFlightOutcome::Failed(FailReason::Timeout);
    }

    InFlightOutcome::StillWaiting {
        timeout_at: current_start_time + Duration::seconds(spec.node_timeout_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn spec(target: &str, timeout: i64, selector: Option<LabelSelector>) -> ClusterUpgradeSpec {
        ClusterUpgradeSpec {
            id: "a".to_string(),
            type_: Default::default(),
            target_version: target.to_string(),
            label_selector: selector,
            node_timeout_seconds: timeout,
        }
    }

    fn node(name: &str, version: &str, labels: &[(&str, &str)]) -> NodeSnapshot {
        NodeSnapshot {
            name: name.to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            kubelet_version: version.to_string(),
            annotation: None,
        }
    }

    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn scenario_happy_path_selects_in_lexicographic_order() {
        let spec = spec("v1.10.2", 60, None);
        let status = ClusterUpgradeStatus::default();
        let nodes = vec![
            node("node-c", "v1.10.1", &[]),
            node("node-a", "v1.10.1", &[]),
            node("node-b", "v1.10.1", &[]),
        ];

        let summary = summarize_eligible_nodes(&spec, &status, &nodes);
        assert_eq!(summary.pending, vec!["node-a", "node-b", "node-c"]);
        assert_eq!(select_next(&summary.pending), Some("node-a"));
    }

    #[test]
    fn scenario_nothing_to_do_when_all_nodes_already_at_target() {
        let spec = spec("v1.10.2", 60, None);
        let status = ClusterUpgradeStatus::default();
        let nodes = vec![
            node("node-a", "v1.10.2", &[]),
            node("node-b", "v1.10.2", &[]),
        ];

        let summary = summarize_eligible_nodes(&spec, &status, &nodes);
        assert!(summary.pending.is_empty());
        assert!(!summary.any_failed);
        assert_eq!(terminal_status(summary.any_failed), crate::model::ClusterStatus::Success);
    }

    #[test]
    fn scenario_label_selector_scopes_eligible_nodes() {
        let selector = LabelSelector {
            match_labels: Some([("role".to_string(), "worker".to_string())].into()),
            match_expressions: None,
        };
        let spec = spec("v1.10.2", 60, Some(selector));
        let status = ClusterUpgradeStatus::default();
        let nodes = vec![
            node("worker-a", "v1.10.1", &[("role", "worker")]),
            node("worker-b", "v1.10.1", &[("role", "worker")]),
            node("control-plane-a", "v1.10.1", &[("role", "control-plane")]),
        ];

        let summary = summarize_eligible_nodes(&spec, &status, &nodes);
        assert_eq!(summary.pending, vec!["worker-a", "worker-b"]);
    }

    #[test]
    fn a_node_already_recorded_success_at_target_version_is_done_not_pending() {
        let spec = spec("v1.10.2", 60, None);
        let mut status = ClusterUpgradeStatus::default();
        status.node_statuses.insert("node-a".to_string(), NodeStatus::Success);
        let nodes = vec![node("node-a", "v1.10.2", &[])];

        let summary = summarize_eligible_nodes(&spec, &status, &nodes);
        assert!(summary.pending.is_empty());
        assert!(!summary.any_failed);
    }

    #[test]
    fn a_node_recorded_failed_keeps_cluster_from_succeeding() {
        let spec = spec("v1.10.2", 60, None);
        let mut status = ClusterUpgradeStatus::default();
        status.node_statuses.insert("node-b".to_string(), NodeStatus::Failed);
        let nodes = vec![node("node-b", "v1.10.1", &[])];

        let summary = summarize_eligible_nodes(&spec, &status, &nodes);
        assert!(summary.pending.is_empty());
        assert!(summary.any_failed);
        assert_eq!(terminal_status(summary.any_failed), crate::model::ClusterStatus::Failed);
    }

    #[test]
    fn in_flight_converges_on_success_annotation_and_version_match() {
        let spec = spec("v1.10.2", 60, None);
        let mut n = node("node-a", "v1.10.2", &[]);
        n.annotation = Some(NodeUpgradeAnnotation {
            cluster_version: "v1.10.2".to_string(),
            status: NodeStatus::Success,
            start_time: t("2024-01-01T00:00:00Z"),
        });

        let outcome = evaluate_in_flight(&spec, t("2024-01-01T00:00:00Z"), t("2024-01-01T00:00:10Z"), Some(&n));
        assert_eq!(outcome, InFlightOutcome::Converged);
    }

    #[test]
    fn in_flight_fails_fast_on_failed_annotation() {
        let spec = spec("v1.10.2", 60, None);
        let mut n = node("node-b", "v1.10.1", &[]);
        n.annotation = Some(NodeUpgradeAnnotation {
            cluster_version: "v1.10.2".to_string(),
            status: NodeStatus::Failed,
            start_time: t("2024-01-01T00:00:00Z"),
        });

        let outcome = evaluate_in_flight(&spec, t("2024-01-01T00:00:00Z"), t("2024-01-01T00:00:10Z"), Some(&n));
        assert_eq!(outcome, InFlightOutcome::Failed(FailReason::AnnotationFailed));
    }

    #[test]
    fn scenario_timeout_fires_past_the_deadline() {
        let spec = spec("v1.10.2", 60, None);
        let n = node("node-b", "v1.10.1", &[]);

        let still_waiting = evaluate_in_flight(&spec, t("2024-01-01T00:00:00Z"), t("2024-01-01T00:00:59Z"), Some(&n));
        assert!(matches!(still_waiting, InFlightOutcome::StillWaiting { .. }));

        let timed_out = evaluate_in_flight(&spec, t("2024-01-01T00:00:00Z"), t("2024-01-01T00:01:01Z"), Some(&n));
        assert_eq!(timed_out, InFlightOutcome::Failed(FailReason::Timeout));
    }

    #[test]
    fn in_flight_node_disappearance_fails_the_node() {
        let spec = spec("v1.10.2", 60, None);
        let outcome = evaluate_in_flight(&spec, t("2024-01-01T00:00:00Z"), t("2024-01-01T00:00:10Z"), None);
        assert_eq!(outcome, InFlightOutcome::Failed(FailReason::NodeMissing));
    }

    #[test]
    fn operator_seeded_upgrade_with_no_annotation_counts_as_done() {
        // Node was upgraded out-of-band; no agent ever ran on it.
        let spec = spec("v1.10.2", 60, None);
        let status = ClusterUpgradeStatus::default();
        let nodes = vec![node("node-z", "v1.10.2", &[])];

        let summary = summarize_eligible_nodes(&spec, &status, &nodes);
        assert!(summary.pending.is_empty());
        assert!(!summary.any_failed);
    }
}
