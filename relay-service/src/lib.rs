// Licensed under the Mozilla Public License (MPL), v. 2.0. See LICENSE.md.

//! Ambient stack for the relay binaries: JSON + CLI configuration, process
//! setup (tracing, `RLIMIT_NOFILE`), and a shared graceful-shutdown signal.
//! The entry-point glue around the `relay-crypto`/`relay-protocol`/
//! `relay-net` core.

pub mod config;
pub mod process;

use std::sync::Arc;

pub use config::Settings;

/// Waits for Ctrl-C, then fires `shutdown` once. A `tokio::sync::Notify`-
/// based signal exposed as a spawnable background task rather than
/// blocking the caller inline, so both binaries can race it against their
/// accept loop.
pub async fn wait_for_shutdown_signal(shutdown: Arc<tokio::sync::Notify>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("received Ctrl-C, shutting down");
    }
    shutdown.notify_one();
}
