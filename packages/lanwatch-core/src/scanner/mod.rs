//! Network scanning module.
//!
//! Provides host discovery and reachability probing using:
//! - ICMP echo through the system ping command
//! - DNS/mDNS reverse hostname resolution
//! - ARP table reading and MAC OUI vendor lookup (rich strategy)
//! - Hostname-based device classification

mod arp;
pub mod classify;
pub mod discovery;
mod hostname;
pub mod network;
pub mod oui;
pub mod ping;
pub mod privileges;
pub mod range;

// Re-export the types callers need at module level for a cleaner public API
pub use arp::ArpResolver;
pub use classify::{DeviceType, classify};
pub use discovery::{DiscoveryEngine, HardwareInfo, HardwareResolver};
pub use network::NetworkInfo;
pub use ping::{Prober, SystemPinger};
pub use privileges::ScanCapabilities;
pub use range::{RangeDescriptor, RangeError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::process::Command;
use std::time::Duration;

/// Upper bound on the number of candidate hosts probed by one discovery run.
pub const MAX_SCAN_HOSTS: usize = 254;

/// Upper bound on simultaneous in-flight probes, shared by discovery and monitoring.
pub const MAX_CONCURRENT_PROBES: usize = 50;

/// Per-host probe timeout used by discovery unless configured otherwise.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
pub(crate) fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Outcome of a single liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub address: Ipv4Addr,
    pub reachable: bool,
    pub latency: Option<Duration>,
    pub resolved_name: Option<String>,
    /// Set when the probe could not be executed at all
    pub failure: Option<String>,
}

impl ProbeResult {
    pub fn reachable(address: Ipv4Addr, latency: Duration, resolved_name: Option<String>) -> Self {
        Self {
            address,
            reachable: true,
            latency: Some(latency),
            resolved_name,
            failure: None,
        }
    }

    pub fn unreachable(address: Ipv4Addr) -> Self {
        Self {
            address,
            reachable: false,
            latency: None,
            resolved_name: None,
            failure: None,
        }
    }

    pub fn failed(address: Ipv4Addr, reason: impl Into<String>) -> Self {
        Self {
            address,
            reachable: false,
            latency: None,
            resolved_name: None,
            failure: Some(reason.into()),
        }
    }

    /// Status this probe outcome maps to.
    pub fn status(&self) -> DeviceStatus {
        if self.reachable {
            DeviceStatus::Online
        } else if self.failure.is_some() {
            DeviceStatus::Error
        } else {
            DeviceStatus::Offline
        }
    }
}

/// Reachability status of a device at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    /// The probe itself failed to execute
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(DeviceStatus::Online),
            "offline" => Ok(DeviceStatus::Offline),
            "error" => Ok(DeviceStatus::Error),
            other => Err(format!("unknown device status '{}'", other)),
        }
    }
}

/// Discovery mode, both as requested and as actually used by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    /// Probe and reverse name resolution only
    #[default]
    Lightweight,
    /// Additionally resolve hardware address and vendor
    Rich,
}

impl ScanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStrategy::Lightweight => "lightweight",
            ScanStrategy::Rich => "rich",
        }
    }
}

impl std::fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lightweight" | "ping" => Ok(ScanStrategy::Lightweight),
            "rich" | "arp" => Ok(ScanStrategy::Rich),
            other => Err(format!("unknown scan strategy '{}'", other)),
        }
    }
}

/// Self-contained record of one probe outcome plus resolved metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceObservation {
    pub address: Ipv4Addr,
    pub resolved_name: Option<String>,
    pub hardware_address: Option<String>,
    pub vendor: Option<String>,
    pub device_type: DeviceType,
    pub status: DeviceStatus,
    /// Present only when `status` is online
    pub latency: Option<Duration>,
    pub observed_at: DateTime<Utc>,
}

impl DeviceObservation {
    /// Fold a probe result into an observation, classifying by resolved name.
    pub fn from_probe(probe: ProbeResult, observed_at: DateTime<Utc>) -> Self {
        let status = probe.status();
        let device_type = classify(probe.resolved_name.as_deref());
        Self {
            address: probe.address,
            latency: if status == DeviceStatus::Online {
                probe.latency
            } else {
                None
            },
            resolved_name: probe.resolved_name,
            hardware_address: None,
            vendor: None,
            device_type,
            status,
            observed_at,
        }
    }

    /// Latency in milliseconds, for display and storage.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency.map(|d| d.as_secs_f64() * 1000.0)
    }
}

/// Result of one discovery invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Completion order, not address order
    pub observations: Vec<DeviceObservation>,
    pub strategy_used: ScanStrategy,
    pub range_descriptor: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub count: usize,
}

impl ScanReport {
    /// Well-formed report with no observations.
    pub fn empty(range_descriptor: impl Into<String>, strategy: ScanStrategy) -> Self {
        Self {
            observations: Vec::new(),
            strategy_used: strategy,
            range_descriptor: range_descriptor.into(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            count: 0,
        }
    }
}
