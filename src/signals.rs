//! OS signal routing.
//!
//! - SIGINT, SIGTERM, SIGQUIT and Ctrl-C request a stop through the
//!   [`Lifecycle`]. The executor itself never sees signals.
//! - SIGUSR2 logs the resident memory of the process and keeps running.

use tracing::{debug, info, warn};

use crate::core::lifecycle::Lifecycle;

/// Completes on the first termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = tokio::signal::ctrl_c() => "Ctrl-C",
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

/// Waits for a termination signal, then requests a stop.
///
/// If the handlers cannot be installed the process keeps running without
/// them; a stop can still come from the failure budget.
pub async fn route_shutdown(lifecycle: Lifecycle) {
    match wait_for_shutdown_signal().await {
        Ok(name) => {
            info!("Received {}, initiating graceful shutdown...", name);
            lifecycle.request_stop();
        }
        Err(e) => warn!("Failed to install shutdown signal handlers: {}", e),
    }
}

/// Logs memory statistics on every SIGUSR2 until a stop is requested.
#[cfg(unix)]
pub async fn route_diagnostics(lifecycle: Lifecycle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigusr2 = match signal(SignalKind::user_defined2()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGUSR2 handler: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = lifecycle.cancelled() => break,
            received = sigusr2.recv() => {
                if received.is_none() {
                    break;
                }
                info!("Received SIGUSR2, dumping memory statistics");
                log_memory_stats().await;
            }
        }
    }
    debug!("Diagnostics listener stopped");
}

#[cfg(not(unix))]
pub async fn route_diagnostics(_lifecycle: Lifecycle) {}

/// Resident memory from `/proc/self/statm`, in bytes.
pub fn parse_statm_resident(content: &str, page_size: u64) -> Option<u64> {
    content
        .split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * page_size)
}

/// Logs current resident and virtual memory usage.
pub async fn log_memory_stats() {
    const PAGE_SIZE: u64 = 4096;

    match tokio::fs::read_to_string("/proc/self/statm").await {
        Ok(content) => match parse_statm_resident(&content, PAGE_SIZE) {
            Some(resident) => {
                let virtual_bytes = content
                    .split_whitespace()
                    .next()
                    .and_then(|p| p.parse::<u64>().ok())
                    .map(|p| p * PAGE_SIZE)
                    .unwrap_or_default();
                info!(
                    "Resident memory: {} KiB, virtual: {} KiB",
                    resident / 1024,
                    virtual_bytes / 1024
                );
            }
            None => debug!("Invalid format in /proc/self/statm"),
        },
        Err(e) => warn!("Memory statistics unavailable: {}", e),
    }
}
