// src/shutdown.rs

//! SIGINT / SIGTERM handling.

use tracing::{info, warn};

use crate::engine::SchedulerHandle;

/// Spawn a task that asks the scheduler to stop on SIGINT or SIGTERM.
///
/// The loop finishes the cycle in progress before exiting.
pub fn install_shutdown_handler(handle: SchedulerHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        handle.stop();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler; only Ctrl+C stops the loop");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, stopping after the current cycle"),
        _ = ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received SIGINT, stopping after the current cycle"),
        Err(e) => {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
