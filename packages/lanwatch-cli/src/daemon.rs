//! Foreground monitor mode for continuous reachability tracking
//!
//! This module runs the device monitor until the process is told to stop:
//! - Optionally scans the configured range first so there is something to watch
//! - Logs a status summary once per monitor interval
//! - Handles graceful shutdown via SIGTERM/SIGINT
//!
//! Proper daemonization is left to systemd or another supervisor.

use anyhow::Result;
use lanwatch_core::config::Config;
use lanwatch_core::scanner::{DiscoveryEngine, SystemPinger};
use lanwatch_core::store::{SqliteStore, StatusStore};
use lanwatch_core::{DeviceMonitor, ScanService};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};

/// Run the monitor until SIGINT, SIGTERM or Ctrl+C.
pub async fn run_monitor(config: &Config, store: Arc<SqliteStore>, scan_first: bool) -> Result<()> {
    let shutdown = Arc::new(Notify::new());
    setup_signal_handlers(shutdown.clone());

    let engine = Arc::new(DiscoveryEngine::detect(config.scan_probe_timeout).await);

    if scan_first {
        tracing::info!("Running initial scan of {}...", config.scan_range);
        let service = ScanService::new(engine.clone(), store.clone());
        match service.run_scan(&config.scan_range, config.scan_strategy).await {
            Ok(outcome) => tracing::info!(
                "Initial scan complete: {} devices found in {:.1}s",
                outcome.report.count,
                outcome.report.duration.as_secs_f64()
            ),
            Err(e) => tracing::error!("Initial scan failed: {}", e),
        }
    }

    let known = store.list_devices().await?.len();
    if known == 0 {
        tracing::warn!("No known devices yet. Run 'lanwatch scan' or pass --scan-first.");
    }

    tracing::info!(
        "Starting monitor: {} devices every {}s, database {}",
        known,
        config.monitor.interval.as_secs(),
        store.path().display()
    );

    // The monitor only records reachability, so skip reverse lookups.
    let prober = Arc::new(SystemPinger::without_name_resolution());
    let monitor = DeviceMonitor::new(store, prober, config.monitor.clone());
    monitor.start().await;

    let mut report_interval = interval(config.monitor.interval);
    report_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick; nothing has run yet
    report_interval.tick().await;

    loop {
        tokio::select! {
            _ = report_interval.tick() => {
                let status = monitor.status();
                match &status.last_error {
                    Some(error) => tracing::warn!(
                        "Monitor: {} cycles, last cycle failed: {}",
                        status.cycles_completed,
                        error
                    ),
                    None => tracing::info!(
                        "Monitor: {} cycles, {}/{} devices online",
                        status.cycles_completed,
                        status.devices_online,
                        status.devices_probed
                    ),
                }
            }
            _ = shutdown.notified() => {
                tracing::info!("Shutdown requested, stopping monitor");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    monitor.stop().await;
    tracing::info!("Monitor stopped");
    Ok(())
}

/// Set up SIGTERM and SIGINT handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<Notify>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        tracing::info!("Received {}", name);
                        shutdown.notify_one();
                    });
                }
                Err(e) => tracing::warn!("Failed to register {} handler: {}", name, e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On non-Unix platforms, rely on tokio::signal::ctrl_c() in the main loop
        let _ = shutdown;
    }
}
