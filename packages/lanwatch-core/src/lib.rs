//! lanwatch Core Library
//!
//! This crate provides host discovery and reachability monitoring for a
//! local network:
//! - Network scanning (ping sweep, reverse hostname resolution, ARP/OUI enrichment)
//! - Hostname-based device classification
//! - A background monitor that keeps per-device status current
//! - A status store contract with SQLite and in-memory implementations
//!
//! # Features
//!
//! - `sqlite` (default): SQLite-backed [`store::SqliteStore`]
//!
//! # Example
//!
//! ```no_run
//! use lanwatch_core::scanner::{DiscoveryEngine, RangeDescriptor, ScanStrategy};
//! use lanwatch_core::store::MemoryStore;
//! use lanwatch_core::{DeviceMonitor, MonitorSettings, ScanService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(DiscoveryEngine::detect(Duration::from_secs(2)).await);
//!     let store = Arc::new(MemoryStore::new());
//!
//!     // Discover and persist the local network
//!     let service = ScanService::new(engine.clone(), store.clone());
//!     let outcome = service
//!         .run_scan(&RangeDescriptor::LocalNetwork, ScanStrategy::Rich)
//!         .await?;
//!     println!("Found {} devices", outcome.report.count);
//!
//!     // Keep their status current in the background
//!     let monitor = DeviceMonitor::new(store, engine.prober(), MonitorSettings::default());
//!     monitor.start().await;
//!     tokio::signal::ctrl_c().await?;
//!     monitor.stop().await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod monitor;
pub mod scanner;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use config::{Config, ConfigError, ConfigSource, load_config};
pub use monitor::{DeviceMonitor, MonitorSettings, MonitorStatus};
pub use scanner::{
    DeviceObservation, DeviceStatus, DeviceType, DiscoveryEngine, RangeDescriptor, ScanReport,
    ScanStrategy,
};
pub use service::{ScanError, ScanService};
pub use store::{Device, DeviceId, StatusRecord, StatusStore, StoreError};
