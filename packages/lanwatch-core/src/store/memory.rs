//! In-process status store.

use super::{
    Device, DeviceId, ObservationClock, ScanRecord, StatusRecord, StatusStore, StoreError,
    known_type, stored_latency,
};
use crate::scanner::{DeviceObservation, DeviceStatus, ScanReport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Id of the implicit `Default` group new devices join.
const DEFAULT_GROUP_ID: i64 = 1;

#[derive(Debug, Default)]
struct MemoryState {
    devices: HashMap<DeviceId, Device>,
    by_address: HashMap<Ipv4Addr, DeviceId>,
    statuses: Vec<StatusRecord>,
    scans: Vec<ScanRecord>,
    next_device_id: i64,
}

/// [`StatusStore`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    clock: ObservationClock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Recorded scans, oldest first.
    pub fn scans(&self) -> Result<Vec<ScanRecord>, StoreError> {
        Ok(self.lock()?.scans.clone())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn record_device(&self, observation: &DeviceObservation) -> Result<DeviceId, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let is_active = observation.status == DeviceStatus::Online;

        if let Some(id) = state.by_address.get(&observation.address).copied() {
            let device = state
                .devices
                .get_mut(&id)
                .ok_or(StoreError::DeviceNotFound(id))?;

            if observation.resolved_name.is_some() {
                device.resolved_name = observation.resolved_name.clone();
            }
            if observation.hardware_address.is_some() {
                device.hardware_address = observation.hardware_address.clone();
            }
            if observation.vendor.is_some() {
                device.vendor = observation.vendor.clone();
            }
            if let Some(device_type) = known_type(observation.device_type) {
                device.device_type = device_type;
            }
            device.last_seen = now;
            device.is_active = is_active;
            return Ok(id);
        }

        state.next_device_id += 1;
        let id = DeviceId(state.next_device_id);
        state.devices.insert(
            id,
            Device {
                id,
                address: observation.address,
                resolved_name: observation.resolved_name.clone(),
                hardware_address: observation.hardware_address.clone(),
                vendor: observation.vendor.clone(),
                device_type: observation.device_type,
                custom_name: None,
                notes: None,
                group_id: Some(DEFAULT_GROUP_ID),
                first_seen: now,
                last_seen: now,
                is_active,
            },
        );
        state.by_address.insert(observation.address, id);
        Ok(id)
    }

    async fn record_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
        latency: Option<Duration>,
    ) -> Result<StatusRecord, StoreError> {
        let observed_at = self.clock.now();
        let mut state = self.lock()?;

        let device = state
            .devices
            .get_mut(&device_id)
            .ok_or(StoreError::DeviceNotFound(device_id))?;

        device.is_active = status == DeviceStatus::Online;
        if status == DeviceStatus::Online {
            device.last_seen = observed_at;
        }

        let record = StatusRecord {
            id: state.statuses.len() as i64 + 1,
            device_id,
            status,
            latency_ms: stored_latency(status, latency),
            observed_at,
        };
        state.statuses.push(record.clone());
        Ok(record)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let state = self.lock()?;
        let mut devices: Vec<Device> = state.devices.values().cloned().collect();
        devices.sort_by_key(|d| d.address);
        Ok(devices)
    }

    async fn latest_status(&self, device_id: DeviceId) -> Result<Option<StatusRecord>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .statuses
            .iter()
            .filter(|r| r.device_id == device_id)
            .max_by_key(|r| (r.observed_at, r.id))
            .cloned())
    }

    async fn device_by_address(&self, address: Ipv4Addr) -> Result<Option<Device>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .by_address
            .get(&address)
            .and_then(|id| state.devices.get(id))
            .cloned())
    }

    async fn status_history(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        let state = self.lock()?;
        let mut history: Vec<StatusRecord> = state
            .statuses
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| (b.observed_at, b.id).cmp(&(a.observed_at, a.id)));
        history.truncate(limit);
        Ok(history)
    }

    async fn record_scan(&self, report: &ScanReport) -> Result<ScanRecord, StoreError> {
        let recorded_at = self.clock.now();
        let mut state = self.lock()?;
        let record = ScanRecord {
            id: state.scans.len() as i64 + 1,
            strategy: report.strategy_used,
            range: report.range_descriptor.clone(),
            count: report.count,
            duration_secs: report.duration.as_secs_f64(),
            recorded_at,
        };
        state.scans.push(record.clone());
        Ok(record)
    }
}
