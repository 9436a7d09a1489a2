//! SQLite schema for the status store.

use super::{DEFAULT_GROUP_COLOR, DEFAULT_GROUP_NAME};
use rusqlite::{Connection, params};

/// Create all tables and seed the `Default` group.
pub(super) fn create_tables(conn: &Connection, now: &str) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        -- Device groups: user-defined buckets, 'Default' always present
        CREATE TABLE IF NOT EXISTS device_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT,
            color TEXT NOT NULL DEFAULT '#007bff',
            created_at TEXT NOT NULL
        );

        -- Devices: one row per address
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT UNIQUE NOT NULL,
            resolved_name TEXT,
            hardware_address TEXT,
            vendor TEXT,
            device_type TEXT,
            custom_name TEXT,
            notes TEXT,
            group_id INTEGER,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY (group_id) REFERENCES device_groups(id)
        );

        -- Status logs: append-only reachability history
        CREATE TABLE IF NOT EXISTS status_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            latency_ms REAL,
            observed_at TEXT NOT NULL,
            FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
        );

        -- Scan history: one row per persisted discovery run
        CREATE TABLE IF NOT EXISTS scan_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            strategy TEXT NOT NULL,
            network_range TEXT NOT NULL,
            devices_found INTEGER NOT NULL DEFAULT 0,
            duration_secs REAL NOT NULL DEFAULT 0,
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_status_logs_device_time
            ON status_logs(device_id, observed_at);
        CREATE INDEX IF NOT EXISTS idx_status_logs_time ON status_logs(observed_at);
        "#,
    )?;

    conn.execute(
        r#"
        INSERT OR IGNORE INTO device_groups (name, description, color, created_at)
        VALUES (?1, 'Default group for uncategorized devices', ?2, ?3)
        "#,
        params![DEFAULT_GROUP_NAME, DEFAULT_GROUP_COLOR, now],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn, "2026-01-01T00:00:00.000000Z").unwrap();
        create_tables(&conn, "2026-01-02T00:00:00.000000Z").unwrap();

        let groups: i64 = conn
            .query_row("SELECT COUNT(*) FROM device_groups", [], |row| row.get(0))
            .unwrap();
        assert_eq!(groups, 1);
    }
}
