//! SQLite-backed status store.
//!
//! A single connection behind `Arc<Mutex<_>>`; every query runs on the
//! blocking pool so async callers never stall the runtime. Timestamps are
//! stored as fixed-width RFC 3339 strings with microsecond precision, which
//! keeps lexical and chronological order identical.

use super::schema;
use super::{
    DEFAULT_GROUP_NAME, Device, DeviceGroup, DeviceId, DeviceUpdate, GroupCount, NEW_GROUP_COLOR,
    NetworkStatistics, ObservationClock, ScanRecord, StatusChange, StatusRecord, StatusStore,
    StoreError, known_type, stored_latency,
};
use crate::scanner::{DeviceObservation, DeviceStatus, DeviceType, ScanReport, ScanStrategy};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEVICE_COLUMNS: &str = "id, address, resolved_name, hardware_address, vendor, device_type, \
                              custom_name, notes, group_id, first_seen, last_seen, is_active";

const STATUS_COLUMNS: &str = "id, device_id, status, latency_ms, observed_at";

/// How many status changes the statistics view carries.
const RECENT_CHANGES: i64 = 10;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

fn to_sql_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn address_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Ipv4Addr> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DeviceStatus> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| conversion_error(idx, e))
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: DeviceId(row.get(0)?),
        address: address_column(row, 1)?,
        resolved_name: row.get(2)?,
        hardware_address: row.get(3)?,
        vendor: row.get(4)?,
        device_type: row
            .get::<_, Option<String>>(5)?
            .map(|label| DeviceType::from_label(&label))
            .unwrap_or_default(),
        custom_name: row.get(6)?,
        notes: row.get(7)?,
        group_id: row.get(8)?,
        first_seen: time_column(row, 9)?,
        last_seen: time_column(row, 10)?,
        is_active: row.get(11)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<StatusRecord> {
    Ok(StatusRecord {
        id: row.get(0)?,
        device_id: DeviceId(row.get(1)?),
        status: status_column(row, 2)?,
        latency_ms: row.get(3)?,
        observed_at: time_column(row, 4)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceGroup> {
    Ok(DeviceGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        created_at: time_column(row, 4)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    let strategy: String = row.get(1)?;
    let count: i64 = row.get(3)?;
    Ok(ScanRecord {
        id: row.get(0)?,
        strategy: strategy
            .parse::<ScanStrategy>()
            .map_err(|e| conversion_error(1, e))?,
        range: row.get(2)?,
        count: count.max(0) as usize,
        duration_secs: row.get(4)?,
        recorded_at: time_column(row, 5)?,
    })
}

fn query_device(conn: &Connection, id: DeviceId) -> rusqlite::Result<Option<Device>> {
    conn.query_row(
        &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
        params![id.0],
        device_from_row,
    )
    .optional()
}

/// [`StatusStore`] persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    clock: Arc<ObservationClock>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(&path)
            .map_err(|e| StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e)))?;
        conn.busy_timeout(Duration::from_secs(5))?;

        let store = Self::initialize(conn, path)?;
        tracing::debug!("Opened status database at {}", store.path.display());
        Ok(store)
    }

    /// Fresh database that lives as long as the store.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, PathBuf::from(":memory:"))
    }

    fn initialize(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        let clock = ObservationClock::new();
        schema::create_tables(&conn, &to_sql_time(&clock.now()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            clock: Arc::new(clock),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Platform data directory location, e.g. `~/.local/share/lanwatch/lanwatch.db`.
    pub fn default_path() -> PathBuf {
        crate::config::default_database_path()
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("database connection lock poisoned".to_string()))?;
            op(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("database task failed: {}", e)))?
    }

    pub async fn device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        self.with_conn(move |conn| Ok(query_device(conn, id)?)).await
    }

    pub async fn add_group(
        &self,
        name: &str,
        description: Option<&str>,
        color: Option<&str>,
    ) -> Result<DeviceGroup, StoreError> {
        let name = name.trim().to_string();
        let description = description.map(str::to_string);
        let color = color.unwrap_or(NEW_GROUP_COLOR).to_string();
        let created_at = self.clock.now();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO device_groups (name, description, color, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, description, color, to_sql_time(&created_at)],
            )?;
            Ok(DeviceGroup {
                id: conn.last_insert_rowid(),
                name,
                description,
                color,
                created_at,
            })
        })
        .await
    }

    pub async fn list_groups(&self) -> Result<Vec<DeviceGroup>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, color, created_at FROM device_groups ORDER BY name",
            )?;
            let groups = stmt
                .query_map([], group_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(groups)
        })
        .await
    }

    /// Apply user edits; fields left `None` keep their stored value.
    pub async fn update_device(
        &self,
        id: DeviceId,
        update: DeviceUpdate,
    ) -> Result<Device, StoreError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                r#"
                UPDATE devices SET
                    custom_name = COALESCE(?2, custom_name),
                    notes = COALESCE(?3, notes),
                    group_id = COALESCE(?4, group_id)
                WHERE id = ?1
                "#,
                params![id.0, update.custom_name, update.notes, update.group_id],
            )?;
            if changed == 0 {
                return Err(StoreError::DeviceNotFound(id));
            }
            query_device(conn, id)?.ok_or(StoreError::DeviceNotFound(id))
        })
        .await
    }

    /// Substring search over address, resolved name and custom name.
    pub async fn search_devices(&self, query: &str) -> Result<Vec<Device>, StoreError> {
        let pattern = format!("%{}%", query.trim());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM devices \
                 WHERE address LIKE ?1 OR resolved_name LIKE ?1 OR custom_name LIKE ?1",
                DEVICE_COLUMNS
            ))?;
            let mut devices = stmt
                .query_map(params![pattern], device_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            devices.sort_by_key(|d| d.address);
            Ok(devices)
        })
        .await
    }

    pub async fn statistics(&self) -> Result<NetworkStatistics, StoreError> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
            let active: i64 = conn.query_row(
                "SELECT COUNT(*) FROM devices WHERE is_active = 1",
                [],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                r#"
                SELECT g.name, g.color, COUNT(d.id) AS device_count
                FROM device_groups g
                LEFT JOIN devices d ON g.id = d.group_id
                GROUP BY g.id, g.name, g.color
                ORDER BY device_count DESC, g.name
                "#,
            )?;
            let devices_by_group = stmt
                .query_map([], |row| {
                    let count: i64 = row.get(2)?;
                    Ok(GroupCount {
                        name: row.get(0)?,
                        color: row.get(1)?,
                        count: count.max(0) as usize,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = conn.prepare(
                r#"
                SELECT d.address, d.resolved_name, d.custom_name, s.status, s.observed_at
                FROM status_logs s
                JOIN devices d ON s.device_id = d.id
                ORDER BY s.observed_at DESC, s.id DESC
                LIMIT ?1
                "#,
            )?;
            let recent_changes = stmt
                .query_map(params![RECENT_CHANGES], |row| {
                    Ok(StatusChange {
                        address: address_column(row, 0)?,
                        resolved_name: row.get(1)?,
                        custom_name: row.get(2)?,
                        status: status_column(row, 3)?,
                        observed_at: time_column(row, 4)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let total = total.max(0) as usize;
            let active = active.max(0) as usize;
            Ok(NetworkStatistics {
                total_devices: total,
                active_devices: active,
                offline_devices: total.saturating_sub(active),
                devices_by_group,
                recent_changes,
            })
        })
        .await
    }

    /// Most recent scans first.
    pub async fn recent_scans(&self, limit: usize) -> Result<Vec<ScanRecord>, StoreError> {
        let limit = limit as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, strategy, network_range, devices_found, duration_secs, recorded_at
                FROM scan_history
                ORDER BY recorded_at DESC, id DESC
                LIMIT ?1
                "#,
            )?;
            let scans = stmt
                .query_map(params![limit], scan_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(scans)
        })
        .await
    }

    /// Delete status rows older than `days`, always keeping each device's
    /// newest row. Returns the number of rows removed.
    pub async fn cleanup_old_logs(&self, days: u32) -> Result<usize, StoreError> {
        let cutoff = to_sql_time(&(Utc::now() - chrono::Duration::days(i64::from(days))));
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    r#"
                    DELETE FROM status_logs
                    WHERE observed_at < ?1
                      AND id NOT IN (
                          SELECT (
                              SELECT latest.id FROM status_logs latest
                              WHERE latest.device_id = logs.device_id
                              ORDER BY latest.observed_at DESC, latest.id DESC
                              LIMIT 1
                          )
                          FROM status_logs logs
                          GROUP BY logs.device_id
                      )
                    "#,
                    params![cutoff],
                )?)
            })
            .await?;

        tracing::info!("Removed {} status records older than {} days", removed, days);
        Ok(removed)
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn record_device(&self, observation: &DeviceObservation) -> Result<DeviceId, StoreError> {
        let now = to_sql_time(&self.clock.now());
        let address = observation.address.to_string();
        let resolved_name = observation.resolved_name.clone();
        let hardware_address = observation.hardware_address.clone();
        let vendor = observation.vendor.clone();
        let device_type = known_type(observation.device_type).map(|t| t.label());
        let is_active = observation.status == DeviceStatus::Online;

        self.with_conn(move |conn| {
            let id: i64 = conn.query_row(
                r#"
                INSERT INTO devices (
                    address, resolved_name, hardware_address, vendor, device_type,
                    group_id, first_seen, last_seen, is_active
                ) VALUES (
                    ?1, ?2, ?3, ?4, ?5,
                    (SELECT id FROM device_groups WHERE name = ?8), ?6, ?6, ?7
                )
                ON CONFLICT(address) DO UPDATE SET
                    resolved_name = COALESCE(excluded.resolved_name, resolved_name),
                    hardware_address = COALESCE(excluded.hardware_address, hardware_address),
                    vendor = COALESCE(excluded.vendor, vendor),
                    device_type = COALESCE(excluded.device_type, device_type),
                    last_seen = excluded.last_seen,
                    is_active = excluded.is_active
                RETURNING id
                "#,
                params![
                    address,
                    resolved_name,
                    hardware_address,
                    vendor,
                    device_type,
                    now,
                    is_active,
                    DEFAULT_GROUP_NAME,
                ],
                |row| row.get(0),
            )?;
            Ok(DeviceId(id))
        })
        .await
    }

    async fn record_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
        latency: Option<Duration>,
    ) -> Result<StatusRecord, StoreError> {
        let observed_at = self.clock.now();
        let latency_ms = stored_latency(status, latency);

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM devices WHERE id = ?1",
                    params![device_id.0],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::DeviceNotFound(device_id));
            }

            let stamp = to_sql_time(&observed_at);
            tx.execute(
                "INSERT INTO status_logs (device_id, status, latency_ms, observed_at) VALUES (?1, ?2, ?3, ?4)",
                params![device_id.0, status.as_str(), latency_ms, stamp],
            )?;
            let id = tx.last_insert_rowid();

            if status == DeviceStatus::Online {
                tx.execute(
                    "UPDATE devices SET is_active = 1, last_seen = ?2 WHERE id = ?1",
                    params![device_id.0, stamp],
                )?;
            } else {
                tx.execute(
                    "UPDATE devices SET is_active = 0 WHERE id = ?1",
                    params![device_id.0],
                )?;
            }

            tx.commit()?;

            Ok(StatusRecord {
                id,
                device_id,
                status,
                latency_ms,
                observed_at,
            })
        })
        .await
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM devices", DEVICE_COLUMNS))?;
            let mut devices = stmt
                .query_map([], device_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            devices.sort_by_key(|d| d.address);
            Ok(devices)
        })
        .await
    }

    async fn latest_status(&self, device_id: DeviceId) -> Result<Option<StatusRecord>, StoreError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM status_logs WHERE device_id = ?1 \
                         ORDER BY observed_at DESC, id DESC LIMIT 1",
                        STATUS_COLUMNS
                    ),
                    params![device_id.0],
                    status_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn device_by_address(&self, address: Ipv4Addr) -> Result<Option<Device>, StoreError> {
        let address = address.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM devices WHERE address = ?1", DEVICE_COLUMNS),
                    params![address],
                    device_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn status_history(
        &self,
        device_id: DeviceId,
        limit: usize,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        let limit = limit as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM status_logs WHERE device_id = ?1 \
                 ORDER BY observed_at DESC, id DESC LIMIT ?2",
                STATUS_COLUMNS
            ))?;
            let history = stmt
                .query_map(params![device_id.0, limit], status_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(history)
        })
        .await
    }

    async fn record_scan(&self, report: &ScanReport) -> Result<ScanRecord, StoreError> {
        let recorded_at = self.clock.now();
        let strategy = report.strategy_used;
        let range = report.range_descriptor.clone();
        let count = report.count;
        let duration_secs = report.duration.as_secs_f64();

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT INTO scan_history (strategy, network_range, devices_found, duration_secs, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    strategy.as_str(),
                    range,
                    count as i64,
                    duration_secs,
                    to_sql_time(&recorded_at)
                ],
            )?;
            Ok(ScanRecord {
                id: conn.last_insert_rowid(),
                strategy,
                range,
                count,
                duration_secs,
                recorded_at,
            })
        })
        .await
    }
}
