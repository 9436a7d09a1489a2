//! Host discovery across an address range.
//!
//! Every candidate address is probed concurrently (at most
//! [`MAX_CONCURRENT_PROBES`] in flight) and results are collected in
//! completion order. Reachable hosts become [`DeviceObservation`]s; silent
//! hosts are left out of the report entirely.

use super::range::{RangeDescriptor, RangeError, candidate_hosts, parse_network, usable_host_count};
use super::{
    ArpResolver, DEFAULT_PROBE_TIMEOUT, DeviceObservation, MAX_CONCURRENT_PROBES, ProbeResult,
    Prober, ScanReport, ScanStrategy, SystemPinger, network, privileges,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Upper bound on one hardware resolution pass before the run falls back
/// to lightweight.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hardware address and vendor for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    pub hardware_address: String,
    pub vendor: Option<String>,
}

/// Mechanism behind the rich strategy.
///
/// An `Err` from [`resolve`](HardwareResolver::resolve) means the mechanism
/// itself failed; addresses it simply has no data for are left out of the map.
#[async_trait]
pub trait HardwareResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        addresses: &[Ipv4Addr],
    ) -> anyhow::Result<HashMap<Ipv4Addr, HardwareInfo>>;
}

/// Runs discovery scans with a shared prober.
pub struct DiscoveryEngine {
    prober: Arc<dyn Prober>,
    /// `None` when the rich mechanism was unavailable at construction
    hardware: Option<Arc<dyn HardwareResolver>>,
    local_network: Ipv4Network,
    probe_timeout: Duration,
    resolve_timeout: Duration,
    max_in_flight: usize,
}

impl DiscoveryEngine {
    pub fn new(prober: Arc<dyn Prober>, local_network: Ipv4Network) -> Self {
        Self {
            prober,
            hardware: None,
            local_network,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            max_in_flight: MAX_CONCURRENT_PROBES,
        }
    }

    pub fn with_hardware_resolver(mut self, resolver: Arc<dyn HardwareResolver>) -> Self {
        self.hardware = Some(resolver);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Build an engine for this machine: system ping, the inferred local
    /// network, and the ARP resolver if the ARP table is readable.
    pub async fn detect(probe_timeout: Duration) -> Self {
        let (capabilities, local_network) =
            tokio::join!(privileges::detect_capabilities(), network::infer_local_network());

        if let Some(ref warning) = capabilities.warning {
            tracing::warn!("{}", warning);
        }

        let engine = Self::new(Arc::new(SystemPinger::new()), local_network)
            .with_probe_timeout(probe_timeout);

        if capabilities.can_read_arp {
            engine.with_hardware_resolver(Arc::new(ArpResolver::new()))
        } else {
            tracing::warn!("Rich scans unavailable, all scans will run lightweight");
            engine
        }
    }

    pub fn local_network(&self) -> Ipv4Network {
        self.local_network
    }

    pub fn rich_available(&self) -> bool {
        self.hardware.is_some()
    }

    pub fn prober(&self) -> Arc<dyn Prober> {
        Arc::clone(&self.prober)
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    fn resolve_range(&self, range: &RangeDescriptor) -> Result<Ipv4Network, RangeError> {
        match range {
            RangeDescriptor::LocalNetwork => Ok(self.local_network),
            RangeDescriptor::Explicit(text) => parse_network(text),
        }
    }

    /// Probe a range and report the reachable hosts.
    ///
    /// Never fails: a range that cannot be parsed produces an empty report,
    /// and a failing rich mechanism downgrades the run to lightweight.
    pub async fn discover(&self, range: &RangeDescriptor, strategy: ScanStrategy) -> ScanReport {
        let network = match self.resolve_range(range) {
            Ok(network) => network,
            Err(e) => {
                tracing::warn!("Skipping scan: {}", e);
                return ScanReport::empty(range.to_string(), strategy);
            }
        };

        let range_descriptor = match range {
            RangeDescriptor::Explicit(text) => text.trim().to_string(),
            RangeDescriptor::LocalNetwork => network.to_string(),
        };

        let started_at = Utc::now();
        let scan_start = Instant::now();

        let candidates = candidate_hosts(&network);
        let usable = usable_host_count(&network);
        if usable > candidates.len() as u64 {
            tracing::info!(
                "Range {} has {} hosts, probing the first {}",
                range_descriptor,
                usable,
                candidates.len()
            );
        }

        tracing::info!(
            "Starting {} scan of {} ({} hosts)",
            strategy,
            range_descriptor,
            candidates.len()
        );

        let mut observations: Vec<DeviceObservation> = self
            .probe_all(candidates)
            .await
            .into_iter()
            .filter(|(probe, _)| probe.reachable)
            .map(|(probe, observed_at)| DeviceObservation::from_probe(probe, observed_at))
            .collect();

        for obs in &observations {
            tracing::info!(
                "Found device: {} ({})",
                obs.address,
                obs.resolved_name.as_deref().unwrap_or("-")
            );
        }

        let strategy_used = match strategy {
            ScanStrategy::Lightweight => ScanStrategy::Lightweight,
            ScanStrategy::Rich => self.enrich(&mut observations).await,
        };

        let duration = scan_start.elapsed();
        tracing::info!(
            "{} scan completed in {:.2}s. Found {} devices.",
            strategy_used,
            duration.as_secs_f64(),
            observations.len()
        );

        ScanReport {
            count: observations.len(),
            observations,
            strategy_used,
            range_descriptor,
            started_at,
            duration,
        }
    }

    /// Probe one address and return its observation whatever the outcome.
    pub async fn check_host(&self, address: Ipv4Addr, strategy: ScanStrategy) -> DeviceObservation {
        let probe = self.prober.probe(address, self.probe_timeout).await;
        let mut observation = DeviceObservation::from_probe(probe, Utc::now());

        if observation.status == super::DeviceStatus::Online && strategy == ScanStrategy::Rich {
            self.enrich(std::slice::from_mut(&mut observation)).await;
        }

        observation
    }

    /// Probe every candidate with bounded concurrency, in completion order.
    async fn probe_all(&self, candidates: Vec<Ipv4Addr>) -> Vec<(ProbeResult, DateTime<Utc>)> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for address in candidates {
            let semaphore = Arc::clone(&semaphore);
            let prober = Arc::clone(&self.prober);
            let timeout = self.probe_timeout;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return ProbeResult::unreachable(address),
                };
                prober.probe(address, timeout).await
            });
        }

        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(probe) => results.push((probe, Utc::now())),
                Err(e) => tracing::debug!("Probe task failed: {}", e),
            }
        }

        results
    }

    /// Attach hardware details to the observations, returning the strategy
    /// that ended up being used.
    async fn enrich(&self, observations: &mut [DeviceObservation]) -> ScanStrategy {
        let Some(resolver) = self.hardware.as_ref() else {
            tracing::warn!("Rich scan requested but unavailable, falling back to lightweight");
            return ScanStrategy::Lightweight;
        };

        let addresses: Vec<Ipv4Addr> = observations.iter().map(|o| o.address).collect();

        let lookup = tokio::time::timeout(self.resolve_timeout, resolver.resolve(&addresses));
        let resolved = match lookup.await {
            Ok(Ok(resolved)) => resolved,
            Ok(Err(e)) => {
                tracing::warn!(
                    "{} resolution failed, falling back to lightweight: {:#}",
                    resolver.name(),
                    e
                );
                return ScanStrategy::Lightweight;
            }
            Err(_) => {
                tracing::warn!(
                    "{} resolution timed out after {}s, falling back to lightweight",
                    resolver.name(),
                    self.resolve_timeout.as_secs()
                );
                return ScanStrategy::Lightweight;
            }
        };

        let mut found = 0;
        for obs in observations.iter_mut() {
            if let Some(info) = resolved.get(&obs.address) {
                obs.hardware_address = Some(info.hardware_address.clone());
                obs.vendor = info.vendor.clone();
                found += 1;
            }
        }

        tracing::info!(
            "Hardware enrichment via {}: {}/{} hosts resolved",
            resolver.name(),
            found,
            observations.len()
        );

        ScanStrategy::Rich
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{DeviceStatus, DeviceType};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers for a fixed set of addresses, tracking peak concurrency.
    struct FakeProber {
        reachable: HashMap<Ipv4Addr, Option<String>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeProber {
        fn new(reachable: impl IntoIterator<Item = (Ipv4Addr, Option<&'static str>)>) -> Self {
            Self {
                reachable: reachable
                    .into_iter()
                    .map(|(ip, name)| (ip, name.map(String::from)))
                    .collect(),
                delay: Duration::from_millis(5),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, address: Ipv4Addr, _timeout: Duration) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.reachable.get(&address) {
                Some(name) => ProbeResult::reachable(address, Duration::from_millis(2), name.clone()),
                None => ProbeResult::unreachable(address),
            }
        }
    }

    struct FixedResolver(HashMap<Ipv4Addr, HardwareInfo>);

    #[async_trait]
    impl HardwareResolver for FixedResolver {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn resolve(
            &self,
            addresses: &[Ipv4Addr],
        ) -> anyhow::Result<HashMap<Ipv4Addr, HardwareInfo>> {
            Ok(addresses
                .iter()
                .filter_map(|ip| self.0.get(ip).map(|info| (*ip, info.clone())))
                .collect())
        }
    }

    struct BrokenResolver {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl HardwareResolver for BrokenResolver {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn resolve(
            &self,
            _addresses: &[Ipv4Addr],
        ) -> anyhow::Result<HashMap<Ipv4Addr, HardwareInfo>> {
            *self.calls.lock().unwrap() += 1;
            Err(anyhow::anyhow!("arp: command not found"))
        }
    }

    /// Never answers, like an `arp` process that hangs.
    struct StalledResolver;

    #[async_trait]
    impl HardwareResolver for StalledResolver {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn resolve(
            &self,
            _addresses: &[Ipv4Addr],
        ) -> anyhow::Result<HashMap<Ipv4Addr, HardwareInfo>> {
            std::future::pending().await
        }
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn engine(prober: Arc<FakeProber>) -> DiscoveryEngine {
        DiscoveryEngine::new(prober, "10.0.0.0/24".parse().unwrap())
    }

    fn explicit(range: &str) -> RangeDescriptor {
        RangeDescriptor::Explicit(range.to_string())
    }

    /// Observations with timing stripped, sorted by address.
    fn comparable(report: &ScanReport) -> Vec<(Ipv4Addr, Option<String>, Option<String>, DeviceType)> {
        let mut rows: Vec<_> = report
            .observations
            .iter()
            .map(|o| (o.address, o.resolved_name.clone(), o.hardware_address.clone(), o.device_type))
            .collect();
        rows.sort_by_key(|r| r.0);
        rows
    }

    #[tokio::test]
    async fn test_two_host_range_end_to_end() {
        let prober = Arc::new(FakeProber::new([
            (ip(1), Some("HP-OfficeJet-printer")),
            (ip(2), None),
        ]));
        let report = engine(prober).discover(&explicit("10.0.0.0/30"), ScanStrategy::Lightweight).await;

        assert_eq!(report.count, 2);
        assert_eq!(report.observations.len(), 2);
        assert_eq!(report.range_descriptor, "10.0.0.0/30");
        assert_eq!(report.strategy_used, ScanStrategy::Lightweight);

        for obs in &report.observations {
            assert_eq!(obs.status, DeviceStatus::Online);
            assert!(obs.latency.is_some());
            assert!(obs.hardware_address.is_none());
        }

        let printer = report
            .observations
            .iter()
            .find(|o| o.resolved_name.as_deref() == Some("HP-OfficeJet-printer"))
            .unwrap();
        assert_eq!(printer.device_type, DeviceType::Printer);
        assert_eq!(printer.address, ip(1));
    }

    #[tokio::test]
    async fn test_silent_hosts_are_omitted() {
        let prober = Arc::new(FakeProber::new([(ip(5), None)]));
        let report = engine(prober.clone()).discover(&explicit("10.0.0.0/29"), ScanStrategy::Lightweight).await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.count, 1);
        assert_eq!(report.observations[0].address, ip(5));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded_and_range_is_capped() {
        // A /23 has 510 usable hosts; only the first 254 may be probed.
        let reachable: Vec<(Ipv4Addr, Option<&'static str>)> = (0u32..300)
            .filter(|n| n % 3 == 0)
            .map(|n| (Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 9, 0, 1)) + n), None))
            .collect();
        let prober = Arc::new(FakeProber::new(reachable.clone()));

        let report = engine(prober.clone()).discover(&explicit("10.9.0.0/23"), ScanStrategy::Lightweight).await;

        let first_254: HashSet<Ipv4Addr> = (0u32..254)
            .map(|n| Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 9, 0, 1)) + n))
            .collect();
        let expected = reachable.iter().filter(|(ip, _)| first_254.contains(ip)).count();

        assert_eq!(prober.calls.load(Ordering::SeqCst), 254);
        assert!(prober.peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_PROBES);
        assert!(prober.peak.load(Ordering::SeqCst) > 1);
        assert_eq!(report.count, expected);
        assert!(report.observations.iter().all(|o| first_254.contains(&o.address)));
    }

    #[tokio::test]
    async fn test_invalid_range_yields_empty_report() {
        let prober = Arc::new(FakeProber::new([(ip(1), None)]));
        let report = engine(prober.clone()).discover(&explicit("10.0.0.0/99"), ScanStrategy::Rich).await;

        assert_eq!(report.count, 0);
        assert!(report.observations.is_empty());
        assert_eq!(report.range_descriptor, "10.0.0.0/99");
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_network_range_uses_inferred_network() {
        let prober = Arc::new(FakeProber::new([(ip(7), None)]));
        let engine = DiscoveryEngine::new(prober, "10.0.0.0/29".parse().unwrap());
        let report = engine.discover(&RangeDescriptor::LocalNetwork, ScanStrategy::Lightweight).await;

        assert_eq!(report.range_descriptor, "10.0.0.0/29");
        assert_eq!(report.count, 0);
        // .7 is the broadcast address of the /29
    }

    #[tokio::test]
    async fn test_rich_scan_attaches_hardware_details() {
        let prober = Arc::new(FakeProber::new([(ip(1), Some("gateway")), (ip(2), None)]));
        let resolver = FixedResolver(HashMap::from([(
            ip(1),
            HardwareInfo {
                hardware_address: "3c:84:6a:11:22:33".to_string(),
                vendor: Some("TP-LINK TECHNOLOGIES CO.,LTD.".to_string()),
            },
        )]));
        let engine = engine(prober).with_hardware_resolver(Arc::new(resolver));

        let report = engine.discover(&explicit("10.0.0.0/30"), ScanStrategy::Rich).await;

        assert_eq!(report.strategy_used, ScanStrategy::Rich);
        let router = report.observations.iter().find(|o| o.address == ip(1)).unwrap();
        assert_eq!(router.hardware_address.as_deref(), Some("3c:84:6a:11:22:33"));
        assert_eq!(router.device_type, DeviceType::Router);
        let other = report.observations.iter().find(|o| o.address == ip(2)).unwrap();
        assert!(other.hardware_address.is_none());
        assert!(other.vendor.is_none());
    }

    #[tokio::test]
    async fn test_failing_rich_mechanism_matches_lightweight() {
        let hosts = [(ip(1), Some("HP-OfficeJet-printer")), (ip(2), Some("nest-hub")), (ip(3), None)];
        let resolver = Arc::new(BrokenResolver { calls: Mutex::new(0) });

        let rich_engine = engine(Arc::new(FakeProber::new(hosts))).with_hardware_resolver(resolver.clone());
        let rich = rich_engine.discover(&explicit("10.0.0.0/29"), ScanStrategy::Rich).await;

        let light = engine(Arc::new(FakeProber::new(hosts)))
            .discover(&explicit("10.0.0.0/29"), ScanStrategy::Lightweight)
            .await;

        assert_eq!(*resolver.calls.lock().unwrap(), 1);
        assert_eq!(rich.strategy_used, ScanStrategy::Lightweight);
        assert_eq!(rich.count, light.count);
        assert_eq!(rich.range_descriptor, light.range_descriptor);
        assert_eq!(comparable(&rich), comparable(&light));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_rich_mechanism_times_out_to_lightweight() {
        let hosts = [(ip(1), Some("gateway")), (ip(2), None)];
        let engine = engine(Arc::new(FakeProber::new(hosts)))
            .with_hardware_resolver(Arc::new(StalledResolver))
            .with_resolve_timeout(Duration::from_secs(3));

        let started = tokio::time::Instant::now();
        let report = engine.discover(&explicit("10.0.0.0/30"), ScanStrategy::Rich).await;
        assert!(started.elapsed() >= Duration::from_secs(3));

        assert_eq!(report.strategy_used, ScanStrategy::Lightweight);
        assert_eq!(report.count, 2);
        assert!(report.observations.iter().all(|o| o.hardware_address.is_none()));
    }

    #[tokio::test]
    async fn test_rich_requested_without_capability_falls_back() {
        let prober = Arc::new(FakeProber::new([(ip(1), None)]));
        let engine = engine(prober);
        assert!(!engine.rich_available());

        let report = engine.discover(&explicit("10.0.0.0/30"), ScanStrategy::Rich).await;
        assert_eq!(report.strategy_used, ScanStrategy::Lightweight);
        assert_eq!(report.count, 1);
    }

    #[tokio::test]
    async fn test_check_host_reports_offline() {
        let prober = Arc::new(FakeProber::new([(ip(1), Some("laptop-01"))]));
        let engine = engine(prober);

        let online = engine.check_host(ip(1), ScanStrategy::Lightweight).await;
        assert_eq!(online.status, DeviceStatus::Online);
        assert_eq!(online.device_type, DeviceType::Computer);

        let offline = engine.check_host(ip(9), ScanStrategy::Rich).await;
        assert_eq!(offline.status, DeviceStatus::Offline);
        assert!(offline.latency.is_none());
    }
}
