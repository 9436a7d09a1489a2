//! End-to-end flow: discover a fake network, persist it, then let the
//! monitor track hosts going away. Runs against both store backends.

use anyhow::anyhow;
use async_trait::async_trait;
use lanwatch_core::scanner::{
    DeviceType, HardwareInfo, HardwareResolver, ProbeResult, Prober, RangeDescriptor,
};
use lanwatch_core::store::{MemoryStore, SqliteStore};
use lanwatch_core::{
    DeviceMonitor, DeviceStatus, DiscoveryEngine, MonitorSettings, ScanService, ScanStrategy,
    StatusStore,
};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 1);
const PRINTER: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 2);
const LAPTOP: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 5);

/// Hosts that answer, keyed by address, with their reverse names.
struct FakeNetwork {
    hosts: Mutex<HashMap<Ipv4Addr, &'static str>>,
}

impl FakeNetwork {
    fn new(hosts: &[(Ipv4Addr, &'static str)]) -> Self {
        Self {
            hosts: Mutex::new(hosts.iter().copied().collect()),
        }
    }

    fn unplug(&self, address: Ipv4Addr) {
        self.hosts.lock().unwrap().remove(&address);
    }
}

#[async_trait]
impl Prober for FakeNetwork {
    async fn probe(&self, address: Ipv4Addr, _timeout: Duration) -> ProbeResult {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let name = self.hosts.lock().unwrap().get(&address).copied();
        match name {
            Some(name) => {
                ProbeResult::reachable(address, Duration::from_millis(3), Some(name.to_string()))
            }
            None => ProbeResult::unreachable(address),
        }
    }
}

struct StaticNeighbors {
    broken: bool,
}

#[async_trait]
impl HardwareResolver for StaticNeighbors {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn resolve(
        &self,
        addresses: &[Ipv4Addr],
    ) -> anyhow::Result<HashMap<Ipv4Addr, HardwareInfo>> {
        if self.broken {
            return Err(anyhow!("neighbor table unreadable"));
        }
        Ok(addresses
            .iter()
            .filter(|a| **a == PRINTER)
            .map(|a| {
                (
                    *a,
                    HardwareInfo {
                        hardware_address: "3c:2a:f4:00:00:01".to_string(),
                        vendor: Some("Brother".to_string()),
                    },
                )
            })
            .collect())
    }
}

fn network() -> Arc<FakeNetwork> {
    Arc::new(FakeNetwork::new(&[
        (GATEWAY, "gateway.lan"),
        (PRINTER, "brother-printer"),
        (LAPTOP, "laptop-ana"),
    ]))
}

fn engine(network: Arc<FakeNetwork>, broken_resolver: bool) -> Arc<DiscoveryEngine> {
    Arc::new(
        DiscoveryEngine::new(network, "192.168.50.0/29".parse().unwrap())
            .with_hardware_resolver(Arc::new(StaticNeighbors {
                broken: broken_resolver,
            }))
            .with_probe_timeout(Duration::from_millis(100)),
    )
}

fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        interval: Duration::from_secs(300),
        retry_delay: Duration::from_secs(30),
        probe_timeout: Duration::from_millis(100),
        concurrency: 4,
    }
}

async fn scan_then_monitor(store: Arc<dyn StatusStore>) {
    let network = network();
    let engine = engine(network.clone(), false);
    let service = ScanService::new(engine.clone(), store.clone());

    let outcome = service
        .run_scan(&RangeDescriptor::LocalNetwork, ScanStrategy::Rich)
        .await
        .unwrap();
    assert_eq!(outcome.report.count, 3);
    assert_eq!(outcome.report.strategy_used, ScanStrategy::Rich);
    assert_eq!(outcome.report.range_descriptor, "192.168.50.0/29");
    assert_eq!(outcome.record.count, 3);

    let printer = store.device_by_address(PRINTER).await.unwrap().unwrap();
    assert_eq!(printer.device_type, DeviceType::Printer);
    assert_eq!(printer.vendor.as_deref(), Some("Brother"));
    assert_eq!(printer.hardware_address.as_deref(), Some("3c:2a:f4:00:00:01"));

    let gateway = store.device_by_address(GATEWAY).await.unwrap().unwrap();
    assert_eq!(gateway.device_type, DeviceType::Router);
    assert_eq!(gateway.vendor, None);

    // The laptop leaves; the next monitor cycle notices.
    network.unplug(LAPTOP);
    let monitor = DeviceMonitor::new(store.clone(), engine.prober(), fast_settings());
    let summary = monitor.run_cycle().await.unwrap();
    assert_eq!(summary.probed, 3);
    assert_eq!(summary.online, 2);
    assert_eq!(summary.offline, 1);
    assert_eq!(summary.write_failures, 0);

    let laptop = store.device_by_address(LAPTOP).await.unwrap().unwrap();
    assert_eq!(laptop.device_type, DeviceType::Computer);
    assert!(!laptop.is_active);

    let history = store.status_history(laptop.id, 10).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|r| (r.status, r.latency_ms)).collect();
    assert_eq!(
        statuses,
        vec![
            (DeviceStatus::Offline, None),
            (DeviceStatus::Online, Some(3.0)),
        ]
    );
    assert!(history[0].observed_at > history[1].observed_at);

    // A later scan no longer sees the laptop but the store still knows it.
    let rescan = service
        .run_scan(&RangeDescriptor::LocalNetwork, ScanStrategy::Rich)
        .await
        .unwrap();
    assert_eq!(rescan.report.count, 2);
    assert_eq!(store.list_devices().await.unwrap().len(), 3);

    // Metadata gathered earlier survives a lightweight rescan.
    service
        .run_scan(&RangeDescriptor::Explicit("192.168.50.2".into()), ScanStrategy::Lightweight)
        .await
        .unwrap();
    let printer = store.device_by_address(PRINTER).await.unwrap().unwrap();
    assert_eq!(printer.vendor.as_deref(), Some("Brother"));
}

#[tokio::test]
async fn test_scan_then_monitor_memory_store() {
    scan_then_monitor(Arc::new(MemoryStore::new())).await;
}

#[tokio::test]
async fn test_scan_then_monitor_sqlite_store() {
    scan_then_monitor(Arc::new(SqliteStore::in_memory().unwrap())).await;
}

#[tokio::test]
async fn test_rich_scan_falls_back_when_resolver_fails() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let service = ScanService::new(engine(network(), true), store.clone());

    let outcome = service
        .run_scan(&RangeDescriptor::Explicit("192.168.50.0/29".into()), ScanStrategy::Rich)
        .await
        .unwrap();

    assert_eq!(outcome.report.strategy_used, ScanStrategy::Lightweight);
    assert_eq!(outcome.record.strategy, ScanStrategy::Lightweight);
    assert_eq!(outcome.report.count, 3);
    assert!(outcome.report.observations.iter().all(|o| o.vendor.is_none()));

    let scans = store.recent_scans(5).await.unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].strategy, ScanStrategy::Lightweight);
}

#[tokio::test]
async fn test_background_monitor_runs_and_stops() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let engine = engine(network(), false);
    ScanService::new(engine.clone(), store.clone())
        .run_scan(&RangeDescriptor::LocalNetwork, ScanStrategy::Lightweight)
        .await
        .unwrap();

    let monitor = DeviceMonitor::new(store.clone(), engine.prober(), fast_settings());
    assert!(monitor.start().await);
    assert!(!monitor.start().await);

    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.status().cycles_completed == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "monitor never completed a cycle");

    let status = monitor.status();
    assert!(status.running);
    assert_eq!(status.devices_probed, 3);
    assert_eq!(status.devices_online, 3);

    monitor.stop().await;
    assert!(!monitor.is_running().await);
    assert!(!monitor.status().running);

    let stats = store.statistics().await.unwrap();
    assert_eq!(stats.total_devices, 3);
    assert_eq!(stats.active_devices, 3);
}
