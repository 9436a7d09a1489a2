//! Status store contract and its implementations.
//!
//! Discovery and monitoring both persist through [`StatusStore`]. Current
//! status is always the record with the greatest `observed_at`, so stores
//! stamp records from a monotonic [`ObservationClock`] at write time.

pub mod memory;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::scanner::{DeviceObservation, DeviceStatus, DeviceType, ScanReport, ScanStrategy};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Name of the group every new device joins.
pub const DEFAULT_GROUP_NAME: &str = "Default";
pub const DEFAULT_GROUP_COLOR: &str = "#6c757d";
/// Color given to user-created groups when none is provided.
pub const NEW_GROUP_COLOR: &str = "#007bff";

/// Store-assigned device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A known host, unique per address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    pub address: Ipv4Addr,
    pub resolved_name: Option<String>,
    pub hardware_address: Option<String>,
    pub vendor: Option<String>,
    pub device_type: DeviceType,
    pub custom_name: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

impl Device {
    /// Custom name, else resolved name, else the address.
    pub fn display_name(&self) -> String {
        self.custom_name
            .clone()
            .or_else(|| self.resolved_name.clone())
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// One appended status row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub id: i64,
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub latency_ms: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// Summary of one persisted scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: i64,
    pub strategy: ScanStrategy,
    pub range: String,
    pub count: usize,
    pub duration_secs: f64,
    pub recorded_at: DateTime<Utc>,
}

/// User-editable device fields; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdate {
    pub custom_name: Option<String>,
    pub notes: Option<String>,
    pub group_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCount {
    pub name: String,
    pub color: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub address: Ipv4Addr,
    pub resolved_name: Option<String>,
    pub custom_name: Option<String>,
    pub status: DeviceStatus,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatistics {
    pub total_devices: usize,
    pub active_devices: usize,
    pub offline_devices: usize,
    pub devices_by_group: Vec<GroupCount>,
    pub recent_changes: Vec<StatusChange>,
}

/// Latency as stored: milliseconds, and only for online records.
pub(crate) fn stored_latency(status: DeviceStatus, latency: Option<Duration>) -> Option<f64> {
    match status {
        DeviceStatus::Online => latency.map(|d| d.as_secs_f64() * 1000.0),
        DeviceStatus::Offline | DeviceStatus::Error => None,
    }
}

/// `Unknown` carries no information and never overwrites a stored type.
pub(crate) fn known_type(device_type: DeviceType) -> Option<DeviceType> {
    device_type.is_known().then_some(device_type)
}

/// Strictly increasing UTC timestamps at microsecond precision.
#[derive(Debug)]
pub struct ObservationClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl ObservationClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let next = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

impl Default for ObservationClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence contract shared by the discovery path and the monitor loop.
///
/// Implementations must tolerate interleaved writers; every error is
/// retryable from the caller's point of view.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Upsert by address, keeping stored values where the observation has none.
    async fn record_device(&self, observation: &DeviceObservation) -> Result<DeviceId, StoreError>;

    /// Append a status row and update the device's activity flag.
    async fn record_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
        latency: Option<Duration>,
    ) -> Result<StatusRecord, StoreError>;

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    async fn latest_status(&self, device_id: DeviceId) -> Result<Option<StatusRecord>, StoreError>;

    async fn device_by_address(&self, address: Ipv4Addr) -> Result<Option<Device>, StoreError>;

    /// Newest first.
    async fn status_history(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<StatusRecord>, StoreError>;

    async fn record_scan(&self, report: &ScanReport) -> Result<ScanRecord, StoreError>;
}
