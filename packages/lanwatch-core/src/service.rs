//! Scan orchestration: single-flight discovery runs persisted into a store.

use crate::scanner::{
    DeviceObservation, DeviceStatus, DiscoveryEngine, RangeDescriptor, ScanReport, ScanStrategy,
};
use crate::store::{Device, DeviceId, ScanRecord, StatusRecord, StatusStore, StoreError};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already in progress")]
    AlreadyRunning,

    #[error("no known device at {0}")]
    DeviceNotFound(Ipv4Addr),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Explicit idle/running flag; at most one holder of [`ScanGuard`] at a time.
#[derive(Debug, Default)]
pub struct ScanGate {
    running: AtomicBool,
}

impl ScanGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<ScanGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanGuard { gate: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Returns the gate to idle when dropped.
#[derive(Debug)]
pub struct ScanGuard<'a> {
    gate: &'a ScanGate,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.gate.running.store(false, Ordering::Release);
    }
}

/// A persisted discovery run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub record: ScanRecord,
    pub device_ids: Vec<DeviceId>,
}

/// Result of re-checking one known device.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub device: Device,
    pub observation: DeviceObservation,
    pub record: StatusRecord,
}

/// A device together with its current status, if any has been recorded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub device: Device,
    pub latest: Option<StatusRecord>,
}

/// Pair each device with its latest recorded status, keeping input order.
pub async fn snapshot_devices(
    store: &dyn StatusStore,
    devices: Vec<Device>,
) -> Result<Vec<DeviceSnapshot>, StoreError> {
    let mut snapshots = Vec::with_capacity(devices.len());
    for device in devices {
        let latest = store.latest_status(device.id).await?;
        snapshots.push(DeviceSnapshot { device, latest });
    }
    Ok(snapshots)
}

pub struct ScanService {
    engine: Arc<DiscoveryEngine>,
    store: Arc<dyn StatusStore>,
    gate: ScanGate,
}

impl ScanService {
    pub fn new(engine: Arc<DiscoveryEngine>, store: Arc<dyn StatusStore>) -> Self {
        Self {
            engine,
            store,
            gate: ScanGate::new(),
        }
    }

    pub fn engine(&self) -> &Arc<DiscoveryEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    pub fn is_scanning(&self) -> bool {
        self.gate.is_running()
    }

    /// Discover `range` and persist every observation plus a scan record.
    ///
    /// Rejects the call with [`ScanError::AlreadyRunning`] while another scan
    /// through this service is in progress.
    pub async fn run_scan(
        &self,
        range: &RangeDescriptor,
        strategy: ScanStrategy,
    ) -> Result<ScanOutcome, ScanError> {
        let _guard = self.gate.try_acquire().ok_or(ScanError::AlreadyRunning)?;

        let report = self.engine.discover(range, strategy).await;

        let mut device_ids = Vec::with_capacity(report.observations.len());
        for observation in &report.observations {
            let id = self.store.record_device(observation).await?;
            self.store
                .record_status(id, observation.status, observation.latency)
                .await?;
            device_ids.push(id);
        }

        let record = self.store.record_scan(&report).await?;
        tracing::info!(
            "Scan of {} saved: {} devices ({} strategy)",
            record.range,
            record.count,
            record.strategy
        );

        Ok(ScanOutcome {
            report,
            record,
            device_ids,
        })
    }

    /// Probe one known device now and record its status.
    pub async fn check_device(
        &self,
        address: Ipv4Addr,
        strategy: ScanStrategy,
    ) -> Result<CheckOutcome, ScanError> {
        if self.store.device_by_address(address).await?.is_none() {
            return Err(ScanError::DeviceNotFound(address));
        }

        let observation = self.engine.check_host(address, strategy).await;

        // Reachable hosts may have picked up a name or hardware details.
        let id = if observation.status == DeviceStatus::Online {
            self.store.record_device(&observation).await?
        } else {
            self.require_device(address).await?.id
        };

        let record = self
            .store
            .record_status(id, observation.status, observation.latency)
            .await?;
        let device = self.require_device(address).await?;

        Ok(CheckOutcome {
            device,
            observation,
            record,
        })
    }

    /// Every known device with its latest status.
    pub async fn device_snapshots(&self) -> Result<Vec<DeviceSnapshot>, ScanError> {
        let devices = self.store.list_devices().await?;
        Ok(snapshot_devices(self.store.as_ref(), devices).await?)
    }

    /// Status history for the device at `address`, newest first.
    pub async fn device_history(
        &self,
        address: Ipv4Addr,
        limit: usize,
    ) -> Result<(Device, Vec<StatusRecord>), ScanError> {
        let device = self.require_device(address).await?;
        let history = self.store.status_history(device.id, limit).await?;
        Ok((device, history))
    }

    async fn require_device(&self, address: Ipv4Addr) -> Result<Device, ScanError> {
        self.store
            .device_by_address(address)
            .await?
            .ok_or(ScanError::DeviceNotFound(address))
    }
}
