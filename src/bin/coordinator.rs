//! Entry point for the cluster-wide upgrade coordinator.

use std::sync::Arc;

use clap::Parser;
use containership_upgrade::config::CoordinatorConfig;
use containership_upgrade::coordinator::{self, ControllerState};
use containership_upgrade::{telemetry, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let config = CoordinatorConfig::parse();
    info!(
        "Starting Cluster Upgrade Coordinator for organization {} cluster {}",
        config.organization_id, config.cluster_id
    );

    if let Some(kubeconfig) = &config.kubeconfig {
        std::env::set_var("KUBECONFIG", kubeconfig);
    }
    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let state = Arc::new(ControllerState { client });
    coordinator::run_controller(state).await
}
