//! Background reachability monitoring.
//!
//! [`DeviceMonitor`] owns at most one background task. Each cycle lists the
//! known devices, re-probes them with bounded concurrency and appends one
//! status per device, then sleeps for the configured interval. A cycle that
//! cannot list devices backs off for the shorter retry delay instead.

use crate::scanner::{DeviceStatus, MAX_CONCURRENT_PROBES, Prober};
use crate::store::{StatusStore, StoreError};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MONITOR_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on how long `stop` waits for the task to wind down.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub retry_delay: Duration,
    pub probe_timeout: Duration,
    /// Clamped to `1..=MAX_CONCURRENT_PROBES`
    pub concurrency: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MONITOR_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            probe_timeout: DEFAULT_MONITOR_PROBE_TIMEOUT,
            concurrency: MAX_CONCURRENT_PROBES,
        }
    }
}

impl MonitorSettings {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENT_PROBES)
    }
}

/// Snapshot of the monitor's state for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub cycles_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub devices_probed: usize,
    pub devices_online: usize,
    pub last_error: Option<String>,
}

/// Counts from one monitor cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub probed: usize,
    pub online: usize,
    pub offline: usize,
    pub errors: usize,
    /// Status writes the store rejected
    pub write_failures: usize,
}

impl CycleSummary {
    fn add(&mut self, outcome: Option<DeviceStatus>) {
        self.probed += 1;
        match outcome {
            Some(DeviceStatus::Online) => self.online += 1,
            Some(DeviceStatus::Offline) => self.offline += 1,
            Some(DeviceStatus::Error) => self.errors += 1,
            None => self.write_failures += 1,
        }
    }
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the monitor handle and its background task.
#[derive(Clone)]
struct MonitorContext {
    store: Arc<dyn StatusStore>,
    prober: Arc<dyn Prober>,
    settings: MonitorSettings,
    status: Arc<Mutex<MonitorStatus>>,
}

impl MonitorContext {
    fn status(&self) -> MutexGuard<'_, MonitorStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run(self, token: CancellationToken) {
        loop {
            let delay = match self.cycle(&token).await {
                Ok(summary) => {
                    if !token.is_cancelled() {
                        self.record_cycle(&summary);
                    }
                    self.settings.interval
                }
                Err(e) => {
                    tracing::error!(
                        "Monitor cycle failed: {}. Retrying in {}s",
                        e,
                        self.settings.retry_delay.as_secs()
                    );
                    self.status().last_error = Some(e.to_string());
                    self.settings.retry_delay
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!("Monitor task exiting");
    }

    /// Probe every known device once. Devices not yet started when `token`
    /// is cancelled are skipped; in-flight probes run to completion.
    async fn cycle(&self, token: &CancellationToken) -> Result<CycleSummary, StoreError> {
        let devices = self.store.list_devices().await?;
        if devices.is_empty() {
            tracing::debug!("No known devices to monitor");
            return Ok(CycleSummary::default());
        }

        tracing::debug!("Checking {} devices", devices.len());
        let timeout = self.settings.probe_timeout;

        let outcomes: Vec<Option<DeviceStatus>> = stream::iter(devices)
            .take_until(token.cancelled())
            .map(|device| {
                let prober = Arc::clone(&self.prober);
                let store = Arc::clone(&self.store);
                async move {
                    let probe = prober.probe(device.address, timeout).await;
                    let status = probe.status();
                    match store.record_status(device.id, status, probe.latency).await {
                        Ok(_) => {
                            tracing::debug!("{} is {}", device.address, status);
                            Some(status)
                        }
                        Err(e) => {
                            tracing::warn!("Failed to record status for {}: {}", device.address, e);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.settings.effective_concurrency())
            .collect()
            .await;

        let mut summary = CycleSummary::default();
        for outcome in outcomes {
            summary.add(outcome);
        }
        Ok(summary)
    }

    fn record_cycle(&self, summary: &CycleSummary) {
        tracing::info!(
            "Monitor cycle complete: {}/{} devices online",
            summary.online,
            summary.probed
        );

        let mut status = self.status();
        status.cycles_completed += 1;
        status.last_cycle_at = Some(Utc::now());
        status.devices_probed = summary.probed;
        status.devices_online = summary.online;
        status.last_error = None;
    }
}

/// Periodic re-probe of every known device.
pub struct DeviceMonitor {
    ctx: MonitorContext,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl DeviceMonitor {
    pub fn new(
        store: Arc<dyn StatusStore>,
        prober: Arc<dyn Prober>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            ctx: MonitorContext {
                store,
                prober,
                settings,
                status: Arc::new(Mutex::new(MonitorStatus::default())),
            },
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.ctx.settings
    }

    /// Start the background task. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            tracing::debug!("Device monitor already running");
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(self.ctx.clone().run(token.clone()));
        *worker = Some(Worker { token, handle });
        self.ctx.status().running = true;

        tracing::info!(
            "Device monitoring started (interval {}s, concurrency {})",
            self.ctx.settings.interval.as_secs(),
            self.ctx.settings.effective_concurrency()
        );
        true
    }

    /// Cancel the background task and wait up to [`STOP_JOIN_TIMEOUT`] for it.
    ///
    /// The worker slot stays locked until the old task is gone, so a
    /// concurrent `start` waits instead of spawning a second loop.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        let Some(Worker { token, mut handle }) = worker.take() else {
            return;
        };

        token.cancel();
        match tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => tracing::info!("Device monitoring stopped"),
            Ok(Err(e)) => tracing::warn!("Monitor task ended abnormally: {}", e),
            Err(_) => {
                tracing::warn!(
                    "Monitor task did not finish within {}s, abandoning it",
                    STOP_JOIN_TIMEOUT.as_secs()
                );
                handle.abort();
            }
        }

        self.ctx.status().running = false;
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn status(&self) -> MonitorStatus {
        self.ctx.status().clone()
    }

    /// Run a single cycle in the caller's task.
    pub async fn run_cycle(&self) -> Result<CycleSummary, StoreError> {
        let summary = self.ctx.cycle(&CancellationToken::new()).await?;
        self.ctx.record_cycle(&summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{DeviceObservation, ProbeResult, ScanReport};
    use crate::store::{Device, DeviceId, MemoryStore, ScanRecord, StatusRecord};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct SwitchProber {
        online: Mutex<HashSet<Ipv4Addr>>,
        broken: HashSet<Ipv4Addr>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SwitchProber {
        fn new(online: &[Ipv4Addr]) -> Self {
            Self {
                online: Mutex::new(online.iter().copied().collect()),
                broken: HashSet::new(),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        fn with_delay(online: &[Ipv4Addr], delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(online)
            }
        }

        fn set_offline(&self, address: Ipv4Addr) {
            self.online.lock().unwrap().remove(&address);
        }
    }

    #[async_trait]
    impl Prober for SwitchProber {
        async fn probe(&self, address: Ipv4Addr, _timeout: Duration) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let result = if self.broken.contains(&address) {
                ProbeResult::failed(address, "ping: command not found")
            } else if self.online.lock().unwrap().contains(&address) {
                ProbeResult::reachable(address, Duration::from_millis(4), None)
            } else {
                ProbeResult::unreachable(address)
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Wraps a [`MemoryStore`], recording status writes and optionally
    /// failing `list_devices`.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        fail_listing: AtomicBool,
        list_calls: AtomicUsize,
        writes: Mutex<Vec<(DeviceId, DeviceStatus, Option<Duration>)>>,
    }

    #[async_trait]
    impl StatusStore for RecordingStore {
        async fn record_device(&self, observation: &DeviceObservation) -> Result<DeviceId, StoreError> {
            self.inner.record_device(observation).await
        }

        async fn record_status(
            &self,
            device_id: DeviceId,
            status: DeviceStatus,
            latency: Option<Duration>,
        ) -> Result<StatusRecord, StoreError> {
            self.writes.lock().unwrap().push((device_id, status, latency));
            self.inner.record_status(device_id, status, latency).await
        }

        async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("database is locked".to_string()));
            }
            self.inner.list_devices().await
        }

        async fn latest_status(&self, device_id: DeviceId) -> Result<Option<StatusRecord>, StoreError> {
            self.inner.latest_status(device_id).await
        }

        async fn device_by_address(&self, address: Ipv4Addr) -> Result<Option<Device>, StoreError> {
            self.inner.device_by_address(address).await
        }

        async fn status_history(
            &self,
            device_id: DeviceId,
            limit: usize,
        ) -> Result<Vec<StatusRecord>, StoreError> {
            self.inner.status_history(device_id, limit).await
        }

        async fn record_scan(&self, report: &ScanReport) -> Result<ScanRecord, StoreError> {
            self.inner.record_scan(report).await
        }
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    async fn seed(store: &RecordingStore, addresses: &[Ipv4Addr]) -> Vec<DeviceId> {
        let mut ids = Vec::new();
        for address in addresses {
            let probe = ProbeResult::reachable(*address, Duration::from_millis(1), None);
            let obs = DeviceObservation::from_probe(probe, Utc::now());
            ids.push(store.record_device(&obs).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn test_device_going_offline_is_recorded() {
        let store = Arc::new(RecordingStore::default());
        let ids = seed(&store, &[ip(10)]).await;
        let prober = Arc::new(SwitchProber::new(&[ip(10)]));
        let monitor = DeviceMonitor::new(store.clone(), prober.clone(), MonitorSettings::default());

        let first = monitor.run_cycle().await.unwrap();
        assert_eq!(first.online, 1);

        prober.set_offline(ip(10));
        let second = monitor.run_cycle().await.unwrap();
        assert_eq!(second.offline, 1);

        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1, DeviceStatus::Online);
        assert!(writes[0].2.is_some());
        assert_eq!(writes[1], (ids[0], DeviceStatus::Offline, None));

        let device = store.device_by_address(ip(10)).await.unwrap().unwrap();
        assert!(!device.is_active);
        assert_eq!(monitor.status().cycles_completed, 2);
        assert_eq!(monitor.status().devices_online, 0);
    }

    #[tokio::test]
    async fn test_probe_execution_failure_records_error() {
        let store = Arc::new(RecordingStore::default());
        let ids = seed(&store, &[ip(1), ip(2)]).await;
        let mut prober = SwitchProber::new(&[ip(1)]);
        prober.broken.insert(ip(2));
        let monitor = DeviceMonitor::new(store.clone(), Arc::new(prober), MonitorSettings::default());

        let summary = monitor.run_cycle().await.unwrap();
        assert_eq!(summary.probed, 2);
        assert_eq!(summary.online, 1);
        assert_eq!(summary.errors, 1);

        let latest = store.latest_status(ids[1]).await.unwrap().unwrap();
        assert_eq!(latest.status, DeviceStatus::Error);
        assert_eq!(latest.latency_ms, None);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let store = Arc::new(RecordingStore::default());
        let monitor = DeviceMonitor::new(
            store,
            Arc::new(SwitchProber::new(&[])),
            MonitorSettings::default(),
        );

        assert!(monitor.start().await);
        assert!(!monitor.start().await);
        assert!(monitor.is_running().await);
        assert!(monitor.status().running);

        monitor.stop().await;
        assert!(!monitor.is_running().await);
        assert!(!monitor.status().running);

        // stop on a stopped monitor is a no-op
        monitor.stop().await;
        assert!(monitor.start().await);
        monitor.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_backs_off_then_resumes_interval() {
        let store = Arc::new(RecordingStore::default());
        seed(&store, &[ip(3)]).await;
        store.fail_listing.store(true, Ordering::SeqCst);

        let monitor = DeviceMonitor::new(
            store.clone(),
            Arc::new(SwitchProber::new(&[ip(3)])),
            MonitorSettings::default(),
        );
        monitor.start().await;

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
        assert!(monitor.status().last_error.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 2);

        store.fail_listing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(monitor.status().cycles_completed, 1);
        assert!(monitor.status().last_error.is_none());

        tokio::time::sleep(Duration::from_secs(298)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 3);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 4);

        monitor.stop().await;
        assert_eq!(store.writes.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_skips_devices_not_yet_probed() {
        let store = Arc::new(RecordingStore::default());
        seed(&store, &[ip(1), ip(2), ip(3)]).await;

        let prober = SwitchProber::with_delay(&[ip(1), ip(2), ip(3)], Duration::from_secs(2));
        let settings = MonitorSettings {
            concurrency: 1,
            ..MonitorSettings::default()
        };
        let monitor = DeviceMonitor::new(store.clone(), Arc::new(prober), settings);

        monitor.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop().await;

        // The in-flight probe finished and was recorded; the rest were skipped.
        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(monitor.status().cycles_completed, 0);
        assert!(!monitor.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_stop_waits_for_old_loop() {
        let store = Arc::new(RecordingStore::default());
        seed(&store, &[ip(1)]).await;
        let prober = Arc::new(SwitchProber::with_delay(&[ip(1)], Duration::from_secs(2)));
        let settings = MonitorSettings {
            concurrency: 1,
            ..MonitorSettings::default()
        };
        let monitor = DeviceMonitor::new(store.clone(), prober.clone(), settings);

        assert!(monitor.start().await);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(prober.in_flight.load(Ordering::SeqCst), 1);

        let ((), restarted) = tokio::join!(monitor.stop(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            monitor.start().await
        });

        // The restart only went ahead once the first loop had finished.
        assert!(restarted);
        assert!(monitor.is_running().await);
        tokio::time::sleep(Duration::from_secs(3)).await;
        monitor.stop().await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes.lock().unwrap().len(), 2);
    }

    async fn seed_many(store: &RecordingStore, count: u8) -> Vec<Ipv4Addr> {
        let addresses: Vec<Ipv4Addr> = (1..=count).map(ip).collect();
        seed(store, &addresses).await;
        addresses
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_never_exceeds_probe_ceiling() {
        let store = Arc::new(RecordingStore::default());
        let addresses = seed_many(&store, 120).await;

        for requested in [MAX_CONCURRENT_PROBES, 500] {
            let prober = Arc::new(SwitchProber::with_delay(&addresses, Duration::from_millis(20)));
            let settings = MonitorSettings {
                concurrency: requested,
                ..MonitorSettings::default()
            };
            let monitor = DeviceMonitor::new(store.clone(), prober.clone(), settings);

            let summary = monitor.run_cycle().await.unwrap();

            assert_eq!(summary.probed, 120);
            assert_eq!(summary.online, 120);
            assert_eq!(prober.calls.load(Ordering::SeqCst), 120);
            assert_eq!(prober.peak.load(Ordering::SeqCst), MAX_CONCURRENT_PROBES);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_honours_lower_concurrency() {
        let store = Arc::new(RecordingStore::default());
        let addresses = seed_many(&store, 120).await;
        let prober = Arc::new(SwitchProber::with_delay(&addresses, Duration::from_millis(20)));
        let settings = MonitorSettings {
            concurrency: 7,
            ..MonitorSettings::default()
        };
        let monitor = DeviceMonitor::new(store.clone(), prober.clone(), settings);

        let summary = monitor.run_cycle().await.unwrap();

        assert_eq!(summary.probed, 120);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_concurrency_is_clamped() {
        let mut settings = MonitorSettings::default();
        settings.concurrency = 500;
        assert_eq!(settings.effective_concurrency(), MAX_CONCURRENT_PROBES);
        settings.concurrency = 0;
        assert_eq!(settings.effective_concurrency(), 1);
    }
}
