//! Pure dispatch-table logic for the agent's reconcile algorithm (§4.2).
//!
//! Kept free of `kube`/async so the dispatch table itself can be asserted
//! directly against plain fixtures, the same way `coordinator::selection`
//! is tested.

use crate::model::{NodeStatus, NodeUpgradeAnnotation};

/// What the agent should do this reconcile, given the annotation currently
/// on the node and whether the kubelet has already reached the target
/// version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeAction {
    /// Nothing to do: already converged, or a prior attempt already
    /// reached a terminal state.
    NoOp,
    /// An attempt is in progress but the kubelet hasn't moved yet; the
    /// host-side executor is still working.
    Heartbeat,
    /// No attempt recorded and the kubelet isn't at target: fetch the
    /// script and begin one.
    Start,
    /// An attempt is in progress and the kubelet has reached target:
    /// record success.
    FinishSuccess,
}

/// The table from §4.2: `(annotation, kubelet == target?) -> action`.
pub fn decide(annotation: Option<&NodeUpgradeAnnotation>, version_match: bool) -> NodeAction {
    match annotation {
        None if version_match => NodeAction::NoOp,
        None => NodeAction::Start,
        Some(a) if a.status.is_terminal() => NodeAction::NoOp,
        // Only NodeStatus::InProgress is non-terminal, so this is it.
        Some(_) if version_match => NodeAction::FinishSuccess,
        Some(_) => NodeAction::Heartbeat,
    }
}

pub fn version_match(kubelet_version: &str, target_version: &str) -> bool {
    kubelet_version == target_version
}
