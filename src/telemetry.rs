//! Tracing initialization shared by both binaries.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a `tracing` subscriber that logs to stdout, honoring `RUST_LOG`
/// and defaulting to `info`.
pub fn init() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();
}
