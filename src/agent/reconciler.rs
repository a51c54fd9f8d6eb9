//! The agent's reconciler: drives this node through a single upgrade
//! attempt using the dispatch table in `decision`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
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

use crate::cloud::CloudClient;
use crate::error::{Error, Result};
use crate::host::HostPaths;
use crate::model::{
    is_containership_managed, parse_annotation, ClusterStatus, ClusterUpgrade,
    NodeUpgradeAnnotation, NodeStatus, CONTAINERSHIP_MANAGED_LABEL_KEY,
    CONTAINERSHIP_MANAGED_LABEL_VALUE, CONTAINERSHIP_NAMESPACE, NODE_UPGRADE_ANNOTATION_KEY,
};

use super::decision::{decide, version_match, NodeAction};

const FIELD_MANAGER: &str = "upgrade-agent";

/// Query string selecting only `ClusterUpgrade`s carrying the managed
/// label (§6): unlabeled objects of the same kind are not considered.
fn managed_label_selector() -> String {
    format!("{CONTAINERSHIP_MANAGED_LABEL_KEY}={CONTAINERSHIP_MANAGED_LABEL_VALUE}")
}

/// Matches the bounded-retry policy of the system this is grounded on: a
/// handful of attempts at exponential backoff before giving up and
/// recording a terminal failure, rather than retrying forever.
const MAX_UPGRADE_RETRIES: u32 = 5;

/// Shared state handed to every reconcile call.
pub struct AgentState {
    pub client: Client,
    pub cloud: CloudClient,
    pub host: HostPaths,
    pub node_name: String,
    pub organization_id: String,
    pub cluster_id: String,
    /// In-memory, per-target-version attempt counter. Deliberately not
    /// persisted: a process restart re-derives everything from the
    /// annotation and the host `current` marker, and simply gets a fresh
    /// retry budget, matching the upstream work-queue's own ephemeral
    /// retry count.
    retry_counts: Mutex<HashMap<String, u32>>,
}

impl AgentState {
    pub fn new(
        client: Client,
        cloud: CloudClient,
        host: HostPaths,
        node_name: impl Into<String>,
        organization_id: impl Into<String>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cloud,
            host,
            node_name: node_name.into(),
            organization_id: organization_id.into(),
            cluster_id: cluster_id.into(),
            retry_counts: Mutex::new(HashMap::new()),
        }
    }

    fn note_retry(&self, target_version: &str) -> u32 {
        let mut counts = self.retry_counts.lock().expect("retry_counts poisoned");
        let entry = counts.entry(target_version.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn reset_retries(&self, target_version: &str) {
        self.retry_counts
            .lock()
            .expect("retry_counts poisoned")
            .remove(target_version);
    }
}

/// Start the agent's control loop, scoped to a single node, for its
/// process lifetime.
pub async fn run_controller(state: Arc<AgentState>) -> Result<()> {
    let client = state.client.clone();
    let node_name = state.node_name.clone();

    let nodes: Api<Node> = Api::all(client.clone());
    let node_watch_config = Config::default().fields(&format!("metadata.name={node_name}"));

    let upgrades: Api<ClusterUpgrade> = Api::namespaced(client.clone(), CONTAINERSHIP_NAMESPACE);

    info!("Starting Node Upgrade Agent for node {node_name}");

    let local_node_ref = ObjectRef::new(&node_name);

    let upgrade_watch_config = Config::default().labels(&managed_label_selector());

    Controller::new(nodes, node_watch_config)
        .watches(upgrades, upgrade_watch_config, move |_cu: ClusterUpgrade| {
            // Any change to any ClusterUpgrade might concern this node; the
            // reconciler itself is cheap and idempotent, so we simply
            // re-enqueue our one node rather than re-deriving targeting
            // here in the mapper.
            Some(local_node_ref.clone())
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

#[instrument(skip(ctx), fields(node = %ctx.node_name))]
async fn reconcile(node: Arc<Node>, ctx: Arc<AgentState>) -> Result<Action> {
    let client = ctx.client.clone();
    let upgrades: Api<ClusterUpgrade> = Api::namespaced(client.clone(), CONTAINERSHIP_NAMESPACE);
    let nodes: Api<Node> = Api::all(client.clone());

    let upgrade_list = upgrades
        .list(&ListParams::default().labels(&managed_label_selector()))
        .await?;
    let Some(upgrade) = upgrade_list.items.into_iter().find(|cu| {
        is_containership_managed(cu.labels())
            && cu.status.as_ref().and_then(|s| s.cluster_status) == Some(ClusterStatus::InProgress)
    }) else {
        return Ok(Action::await_change());
    };

    let target_version = upgrade.spec.target_version.clone();
    let kubelet_version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.clone())
        .unwrap_or_default();
    let matches_target = version_match(&kubelet_version, &target_version);

    let annotations = node.metadata.annotations.clone().unwrap_or_default();
    let annotation = parse_annotation(&annotations).unwrap_or_else(|e| {
        warn!("malformed upgrade annotation on this node: {e}; treating as absent");
        None
    });

    match decide(annotation.as_ref(), matches_target) {
        NodeAction::NoOp => Ok(Action::await_change()),
        NodeAction::Heartbeat => {
            if ctx.host.current_exists() {
                return Ok(Action::requeue(Duration::from_secs(30)));
            }
            warn!(
                "InProgress annotation on this node but no host `current` marker; \
                 re-running the host write for {target_version}"
            );
            match resume_host_write(&ctx, &upgrade.spec.id, &target_version).await {
                Ok(()) => {
                    ctx.reset_retries(&target_version);
                    Ok(Action::requeue(Duration::from_secs(5)))
                }
                Err(e) if e.is_retriable() => Err(e),
                Err(e) => {
                    let attempts = ctx.note_retry(&target_version);
                    if attempts >= MAX_UPGRADE_RETRIES {
                        warn!(
                            "giving up resuming upgrade to {target_version} after {attempts} attempts: {e}"
                        );
                        let failed = annotation
                            .expect("Heartbeat only returned when an annotation is present")
                            .with_status(NodeStatus::Failed);
                        write_annotation(&nodes, &node, &failed).await?;
                        Ok(Action::await_change())
                    } else {
                        Err(e)
                    }
                }
            }
        }
        NodeAction::Start => {
            match start_upgrade(&ctx, &nodes, &node, &upgrade.spec.id, &target_version).await {
                Ok(()) => {
                    ctx.reset_retries(&target_version);
                    Ok(Action::requeue(Duration::from_secs(5)))
                }
                Err(e) if e.is_retriable() => Err(e),
                Err(e) => {
                    let attempts = ctx.note_retry(&target_version);
                    if attempts >= MAX_UPGRADE_RETRIES {
                        warn!(
                            "giving up starting upgrade to {target_version} after {attempts} attempts: {e}"
                        );
                        let failed = NodeUpgradeAnnotation::in_progress(&target_version, Utc::now())
                            .with_status(NodeStatus::Failed);
                        write_annotation(&nodes, &node, &failed).await?;
                        Ok(Action::await_change())
                    } else {
                        Err(e)
                    }
                }
            }
        }
        NodeAction::FinishSuccess => {
            info!("node reached target version {target_version}; finishing upgrade attempt");
            ctx.host.remove_current()?;
            let finished = annotation
                .expect("FinishSuccess only returned when an annotation is present")
                .with_status(NodeStatus::Success);
            write_annotation(&nodes, &node, &finished).await?;
            ctx.reset_retries(&target_version);
            Ok(Action::await_change())
        }
    }
}

/// Start a single upgrade attempt: download the script, write the
/// annotation, then write the host-side script and commit marker, in that
/// order, so a crash between the two leaves nothing for the host executor
/// to act on.
async fn start_upgrade(
    ctx: &AgentState,
    nodes: &Api<Node>,
    node: &Node,
    upgrade_id: &str,
    target_version: &str,
) -> Result<()> {
    let script = ctx
        .cloud
        .download_upgrade_script(&ctx.organization_id, &ctx.cluster_id, &ctx.node_name)
        .await?;

    let annotation = NodeUpgradeAnnotation::in_progress(target_version, Utc::now());
    write_annotation(nodes, node, &annotation).await?;

    ctx.host.write_script(target_version, upgrade_id, &script)?;
    Ok(())
}

/// Re-run the host-side half of "Start" for an attempt whose annotation is
/// already `InProgress` but whose `current` marker is missing — a crash
/// between the two writes, or between `write_script`'s two internal
/// writes. The annotation is left untouched; only the script and the
/// commit marker are rewritten.
async fn resume_host_write(ctx: &AgentState, upgrade_id: &str, target_version: &str) -> Result<()> {
    let script = ctx
        .cloud
        .download_upgrade_script(&ctx.organization_id, &ctx.cluster_id, &ctx.node_name)
        .await?;
    ctx.host.write_script(target_version, upgrade_id, &script)?;
    Ok(())
}

/// Patch this node's upgrade annotation, pinning `metadata.resourceVersion`
/// to the value observed at read time. A conflict here means the cache was
/// stale; the item is re-queued and the whole dispatch is re-derived from
/// scratch on the next attempt, per the no-durable-retry-state policy.
async fn write_annotation(
    nodes: &Api<Node>,
    node: &Node,
    annotation: &NodeUpgradeAnnotation,
) -> Result<()> {
    let raw = serde_json::to_string(annotation)?;
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": node.resource_version(),
            "annotations": { NODE_UPGRADE_ANNOTATION_KEY: raw },
        },
    });
    nodes
        .patch(&node.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

/// Error policy: short backoff for likely-transient errors, longer for
/// anything else.
fn error_policy(node: Arc<Node>, error: &Error, _ctx: Arc<AgentState>) -> Action {
    error!("reconcile error for node {}: {error:?}", node.name_any());
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
