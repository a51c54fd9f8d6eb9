//! Entry point for the per-node upgrade agent.

use std::sync::Arc;

use clap::Parser;
use containership_upgrade::agent::{self, AgentState};
use containership_upgrade::cloud::CloudClient;
use containership_upgrade::config::AgentConfig;
use containership_upgrade::host::HostPaths;
use containership_upgrade::{telemetry, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let config = AgentConfig::parse();
    info!("Starting Node Upgrade Agent: {config}");

    if let Some(kubeconfig) = &config.kubeconfig {
        std::env::set_var("KUBECONFIG", kubeconfig);
    }
    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let cloud = CloudClient::new(config.cloud_api_base_url.clone(), config.cloud_api_key.clone())?;
    let host = HostPaths::new(config.host_mount_root.clone());

    let state = Arc::new(AgentState::new(
        client,
        cloud,
        host,
        config.node_name.clone(),
        config.organization_id.clone(),
        config.cluster_id.clone(),
    ));

    agent::run_controller(state).await
}
