use super::super::reconciler::*;
use k8s_openapi::api::core::v1::Node;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::Client;
use std::sync::Arc;

use crate::cloud::CloudClient;
use crate::error::Error;
use crate::host::HostPaths;

fn test_node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn test_state(client: Client) -> Arc<AgentState> {
    let tmp = tempfile::tempdir().unwrap();
    Arc::new(AgentState::new(
        client,
        CloudClient::new("https://cloud.example.test", "secret").unwrap(),
        HostPaths::new(tmp.path()),
        "node-a",
        "org-1",
        "cluster-1",
    ))
}

#[tokio::test]
#[ignore = "requires a kubeconfig; exercises the retry counter's logic only"]
async fn retry_counter_tracks_attempts_per_target_version() {
    let client = Client::try_default()
        .await
        .unwrap_or_else(|_| panic!("no kubeconfig available in this environment"));
    let state = test_state(client);

    assert_eq!(state.note_retry("v1.10.2"), 1);
    assert_eq!(state.note_retry("v1.10.2"), 2);
    assert_eq!(state.note_retry("v1.11.0"), 1);

    state.reset_retries("v1.10.2");
    assert_eq!(state.note_retry("v1.10.2"), 1);
}

#[tokio::test]
#[ignore = "requires a kubeconfig; exercises error_policy's decision logic only"]
async fn error_policy_requeues_faster_for_retriable_errors() {
    let node = Arc::new(test_node("node-a"));
    let client = Client::try_default()
        .await
        .unwrap_or_else(|_| panic!("no kubeconfig available in this environment"));
    let state = test_state(client);

    let retriable = Error::ScriptDownload("timed out".to_string());
    let _action: Action = error_policy(node.clone(), &retriable, state.clone());

    let non_retriable = Error::HostIo {
        path: "/etc/containership/scripts/upgrade/current".into(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    };
    let _action: Action = error_policy(node, &non_retriable, state);
}
