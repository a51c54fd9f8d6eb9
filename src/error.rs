//! Error types shared across the coordinator, the agent, and the pure
//! model/selector logic they both depend on.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// API-server call failed. Conflicts and timeouts are retriable;
    /// everything else is surfaced to the caller's error policy.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Cloud API call for the upgrade script failed.
    #[error("cloud API request failed: {0}")]
    Cloud(#[from] reqwest::Error),

    /// The node annotation or a cloud response body could not be decoded.
    #[error("failed to parse JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing the upgrade script or the `current` marker to the host
    /// mount failed.
    #[error("host filesystem error at {path}: {source}")]
    HostIo {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The coordinator observed its own cache in a state that cannot be
    /// acted on safely (e.g. two `InProgress` upgrades). We log and
    /// refuse rather than fabricate a choice.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The cloud API responded successfully but with a body that could not
    /// be used (truncated, non-2xx).
    #[error("upgrade script download failed: {0}")]
    ScriptDownload(String),

    /// Required configuration was missing or invalid at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the caller's error policy should retry quickly (a
    /// likely-transient condition) or back off for longer.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(e)) => e.code == 409 || e.code == 429 || e.code >= 500,
            Error::Kube(_) => true,
            Error::Cloud(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Serialization(_) => false,
            Error::HostIo { .. } => false,
            Error::InvariantViolation(_) => false,
            Error::ScriptDownload(_) => true,
            Error::Config(_) => false,
        }
    }
}
