//! The coordinator's reconciler: drives a single `ClusterUpgrade` through
//! the algorithm in the system design (§4.1) using the pure decision
//! functions in `selection`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher::Config,
    },
    Client, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::model::{
    is_containership_managed, parse_annotation, ClusterStatus, ClusterUpgrade, NodeStatus,
    CONTAINERSHIP_MANAGED_LABEL_KEY, CONTAINERSHIP_MANAGED_LABEL_VALUE, CONTAINERSHIP_NAMESPACE,
};

use super::selection::{
    evaluate_in_flight, select_next, summarize_eligible_nodes, terminal_status, InFlightOutcome,
    NodeSnapshot,
};

const FIELD_MANAGER: &str = "upgrade-coordinator";

/// Query string selecting only `ClusterUpgrade`s (or `Node`s) carrying the
/// managed label (§6): unlabeled objects of the same kind are not
/// considered by either reconciler.
fn managed_label_selector() -> String {
    format!("{CONTAINERSHIP_MANAGED_LABEL_KEY}={CONTAINERSHIP_MANAGED_LABEL_VALUE}")
}

/// Shared state handed to every reconcile call.
pub struct ControllerState {
    pub client: Client,
}

/// Start the coordinator's control loop. Runs until the process receives a
/// shutdown signal.
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let upgrades: Api<ClusterUpgrade> = Api::namespaced(client.clone(), CONTAINERSHIP_NAMESPACE);
    let nodes: Api<Node> = Api::all(client.clone());

    info!("Starting Cluster Upgrade Coordinator");

    let controller = Controller::new(upgrades, Config::default().labels(&managed_label_selector()));
    // Node events don't carry an upgrade key of their own; re-derive it by
    // looking at whichever ClusterUpgrade(s) the coordinator's own cache
    // currently believes are InProgress.
    let upgrade_store = controller.store();

    controller
        .watches(nodes, Config::default(), move |_node: Node| {
            upgrade_store
                .state()
                .iter()
                .filter(|cu| {
                    cu.status
                        .as_ref()
                        .and_then(|s| s.cluster_status)
                        == Some(ClusterStatus::InProgress)
                })
                .map(|cu| ObjectRef::from_obj(cu.as_ref()))
                .collect::<Vec<_>>()
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("reconciled {:?}", obj),
                Err(e) => error!("reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

#[instrument(skip(ctx), fields(name = %upgrade.name_any()))]
async fn reconcile(upgrade: Arc<ClusterUpgrade>, ctx: Arc<ControllerState>) -> Result<Action> {
    let client = ctx.client.clone();
    let api: Api<ClusterUpgrade> = Api::namespaced(client.clone(), CONTAINERSHIP_NAMESPACE);
    let name = upgrade.name_any();
    let resource_version = upgrade.resource_version();

    if !is_containership_managed(upgrade.labels()) {
        return Ok(Action::await_change());
    }

    let status = upgrade.status.clone().unwrap_or_default();

    // Step 1: terminal short-circuit.
    if let Some(cluster_status) = status.cluster_status {
        if cluster_status.is_terminal() {
            return Ok(Action::await_change());
        }
    }

    // Step 2: initialization. Invariant (1)/P1: at most one managed
    // ClusterUpgrade may be InProgress at a time. Refuse rather than guess
    // a different intent when another one already is.
    if status.cluster_status.is_none() {
        let managed = api
            .list(&ListParams::default().labels(&managed_label_selector()))
            .await?;
        let other_in_progress = managed.items.iter().any(|cu| {
            cu.name_any() != name
                && cu.status.as_ref().and_then(|s| s.cluster_status) == Some(ClusterStatus::InProgress)
        });
        if other_in_progress {
            return Err(Error::InvariantViolation(format!(
                "refusing to start ClusterUpgrade {name}: another ClusterUpgrade is already InProgress"
            )));
        }

        info!("initializing ClusterUpgrade {name}");
        patch_status(
            &api,
            &name,
            resource_version,
            serde_json::json!({
                "clusterStatus": "InProgress",
                "nodeStatuses": {},
            }),
        )
        .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let nodes_api: Api<Node> = Api::all(client.clone());
    let node_list = nodes_api.list(&ListParams::default()).await?;
    let snapshots: Vec<NodeSnapshot> = node_list
        .items
        .iter()
        .map(|node| build_snapshot(&name, node))
        .collect();

    let summary = summarize_eligible_nodes(&upgrade.spec, &status, &snapshots);

    // Step 4: cluster-termination check.
    if summary.pending.is_empty() {
        let final_status = terminal_status(summary.any_failed);
        info!("ClusterUpgrade {name} complete: {final_status:?}");
        patch_status(
            &api,
            &name,
            resource_version,
            serde_json::json!({
                "clusterStatus": final_status,
                "currentNode": "",
                "currentStartTime": serde_json::Value::Null,
            }),
        )
        .await?;
        return Ok(Action::await_change());
    }

    // Step 5: in-flight check.
    if !status.current_node.is_empty() {
        let current = snapshots.iter().find(|n| n.name == status.current_node);
        let current_start_time = status.current_start_time.ok_or_else(|| {
            Error::InvariantViolation(format!(
                "ClusterUpgrade {name} has CurrentNode set but no CurrentStartTime"
            ))
        })?;

        let outcome = evaluate_in_flight(&upgrade.spec, current_start_time, Utc::now(), current);

        return match outcome {
            InFlightOutcome::Converged => {
                info!("node {} converged on ClusterUpgrade {name}", status.current_node);
                patch_status(
                    &api,
                    &name,
                    resource_version,
                    serde_json::json!({
                        "currentNode": "",
                        "currentStartTime": serde_json::Value::Null,
                        "nodeStatuses": { status.current_node.clone(): NodeStatus::Success },
                    }),
                )
                .await?;
                Ok(Action::requeue(Duration::from_secs(1)))
            }
            InFlightOutcome::Failed(reason) => {
                warn!(
                    "node {} failed on ClusterUpgrade {name}: {reason:?}",
                    status.current_node
                );
                patch_status(
                    &api,
                    &name,
                    resource_version,
                    serde_json::json!({
                        "clusterStatus": "Failed",
                        "currentNode": "",
                        "currentStartTime": serde_json::Value::Null,
                        "nodeStatuses": { status.current_node.clone(): NodeStatus::Failed },
                    }),
                )
                .await?;
                Ok(Action::await_change())
            }
            InFlightOutcome::StillWaiting { timeout_at } => {
                let remaining = (timeout_at - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(1));
                Ok(Action::requeue(remaining.max(Duration::from_secs(1))))
            }
        };
    }

    // Step 6: selection.
    let chosen = select_next(&summary.pending)
        .expect("pending is non-empty, checked above")
        .to_string();
    info!("selecting node {chosen} for ClusterUpgrade {name}");
    patch_status(
        &api,
        &name,
        resource_version,
        serde_json::json!({
            "currentNode": chosen,
            "currentStartTime": Utc::now(),
            "nodeStatuses": { chosen.clone(): NodeStatus::InProgress },
        }),
    )
    .await?;

    Ok(Action::requeue(Duration::from_secs(1)))
}

fn build_snapshot(upgrade_name: &str, node: &Node) -> NodeSnapshot {
    let name = node.name_any();
    let labels: BTreeMap<String, String> = node.metadata.labels.clone().unwrap_or_default();
    let kubelet_version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.clone())
        .unwrap_or_default();

    let annotations = node.metadata.annotations.clone().unwrap_or_default();
    let annotation = match parse_annotation(&annotations) {
        Ok(annotation) => annotation,
        Err(e) => {
            warn!(
                "ClusterUpgrade {upgrade_name}: malformed upgrade annotation on node {name}: {e}; treating as absent"
            );
            None
        }
    };

    NodeSnapshot {
        name,
        labels,
        kubelet_version,
        annotation,
    }
}

/// Patch `ClusterUpgrade.status`, pinning `metadata.resourceVersion` to the
/// value observed at read time so a stale write surfaces as a 409 conflict
/// (retried by `error_policy`) instead of silently clobbering a concurrent
/// update from the other coordinator worker.
async fn patch_status(
    api: &Api<ClusterUpgrade>,
    name: &str,
    resource_version: Option<String>,
    status: serde_json::Value,
) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    });
    api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

/// Error policy: short backoff for likely-transient errors (API
/// conflicts, timeouts), longer for anything else.
fn error_policy(upgrade: Arc<ClusterUpgrade>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "reconcile error for ClusterUpgrade {}: {error:?}",
        upgrade.name_any()
    );
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(2)
    } else {
        Duration::from_secs(30)
    };
    Action::requeue(retry_duration)
}

#[path = "reconciler_test.rs"]
#[cfg(test)]
mod reconciler_test;
