//! The node upgrade annotation: the only channel through which the agent
//! reports progress back to the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cluster_upgrade::NodeStatus;

/// Well-known annotation key written by the agent and read by the
/// coordinator. Never written by the coordinator.
pub const NODE_UPGRADE_ANNOTATION_KEY: &str = "provision.containership.io/node-upgrade";

/// JSON body of the node upgrade annotation.
///
/// `status` is monotone the same way `ClusterUpgradeStatus::node_statuses`
/// is: once written `InProgress` it only ever moves to `Success` or
/// `Failed`, never back.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpgradeAnnotation {
    pub cluster_version: String,
    pub status: NodeStatus,
    pub start_time: DateTime<Utc>,
}

impl NodeUpgradeAnnotation {
    pub fn in_progress(cluster_version: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            cluster_version: cluster_version.into(),
            status: NodeStatus::InProgress,
            start_time,
        }
    }

    /// Produce the terminal annotation for this attempt, preserving the
    /// original `start_time` as the spec requires.
    pub fn with_status(&self, status: NodeStatus) -> Self {
        Self {
            cluster_version: self.cluster_version.clone(),
            status,
            start_time: self.start_time,
        }
    }
}

/// Parse the annotation off a node's annotation map.
///
/// A missing key is not an error (the annotation is simply absent). A
/// present-but-malformed value is logged by the caller and treated as
/// absent per the permanent-resource-parse-error policy: we never fail the
/// reconcile over it, we just let the next write replace it.
pub fn parse_annotation(
    annotations: &std::collections::BTreeMap<String, String>,
) -> Result<Option<NodeUpgradeAnnotation>, serde_json::Error> {
    match annotations.get(NODE_UPGRADE_ANNOTATION_KEY) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_annotation_parses_to_none() {
        let annotations = std::collections::BTreeMap::new();
        assert_eq!(parse_annotation(&annotations).unwrap(), None);
    }

    #[test]
    fn roundtrips_through_json() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let annot = NodeUpgradeAnnotation::in_progress("v1.10.2", start);
        let raw = serde_json::to_string(&annot).unwrap();

        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(NODE_UPGRADE_ANNOTATION_KEY.to_string(), raw);

        assert_eq!(parse_annotation(&annotations).unwrap(), Some(annot));
    }

    #[test]
    fn malformed_annotation_is_a_parse_error_not_a_panic() {
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(NODE_UPGRADE_ANNOTATION_KEY.to_string(), "{not json".to_string());
        assert!(parse_annotation(&annotations).is_err());
    }

    #[test]
    fn with_status_preserves_start_time() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let annot = NodeUpgradeAnnotation::in_progress("v1.10.2", start);
        let finished = annot.with_status(NodeStatus::Success);

        assert_eq!(finished.start_time, start);
        assert_eq!(finished.status, NodeStatus::Success);
        assert_eq!(finished.cluster_version, "v1.10.2");
    }
}
