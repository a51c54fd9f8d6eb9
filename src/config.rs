//! Typed, environment-driven configuration for both binaries.
//!
//! Neither binary takes positional arguments; every setting is read from
//! the environment variables named in the system design, via `clap`'s
//! `env` feature rather than scattered `std::env::var` calls.

use clap::Parser;

/// Configuration for the `coordinator` binary.
///
/// `organization_id`/`cluster_id` are carried only for log fields and
/// parity with the agent's configuration; the coordinator never calls the
/// cloud API.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Cluster-wide upgrade coordinator", long_about = None)]
pub struct CoordinatorConfig {
    #[arg(long, env = "ORGANIZATION_ID")]
    pub organization_id: String,

    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    /// Falls back to in-cluster config when unset.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,
}

/// Configuration for the `agent` binary, which runs once per node.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Per-node upgrade agent", long_about = None)]
pub struct AgentConfig {
    #[arg(long, env = "ORGANIZATION_ID")]
    pub organization_id: String,

    #[arg(long, env = "CLUSTER_ID")]
    pub cluster_id: String,

    #[arg(long, env = "NODE_NAME")]
    pub node_name: String,

    #[arg(long, env = "CLOUD_API_BASE_URL")]
    pub cloud_api_base_url: String,

    /// Never logged.
    #[arg(long, env = "CLOUD_API_KEY")]
    pub cloud_api_key: String,

    /// Falls back to in-cluster config when unset.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Root of the bind-mounted host path the upgrade script is written
    /// under. Defaults to the contract's `/etc/containership`.
    #[arg(long, env = "HOST_MOUNT_ROOT", default_value = "/etc/containership")]
    pub host_mount_root: std::path::PathBuf,
}

impl std::fmt::Display for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AgentConfig {{ organization_id: {}, cluster_id: {}, node_name: {}, cloud_api_base_url: {}, cloud_api_key: <redacted>, host_mount_root: {} }}",
            self.organization_id,
            self.cluster_id,
            self.node_name,
            self.cloud_api_base_url,
            self.host_mount_root.display()
        )
    }
}
