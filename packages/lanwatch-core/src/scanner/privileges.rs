//! Capability detection for network scanning
//!
//! Different platforms have different requirements:
//! - Windows: ICMP ping works without admin, ARP table reading via `arp -a`
//! - Linux: system ping usually has setuid or CAP_NET_RAW; ARP via /proc/net/arp
//! - macOS: ICMP ping works without root for most operations
//!
//! Capabilities are resolved once, when the discovery engine is built, and
//! decide whether the rich strategy is available at all.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scan mode indicating the level of access available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Full access - all scan features available
    Full,
    /// Limited access - some features may be restricted
    Limited,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Full => write!(f, "full"),
            ScanMode::Limited => write!(f, "limited"),
        }
    }
}

/// Information about scan capabilities based on current privileges
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanCapabilities {
    pub mode: ScanMode,
    pub can_ping: bool,
    pub can_read_arp: bool,
    pub warning: Option<String>,
}

impl Default for ScanCapabilities {
    fn default() -> Self {
        Self {
            mode: ScanMode::Full,
            can_ping: true,
            can_read_arp: true,
            warning: None,
        }
    }
}

/// Test if the system ping works against the loopback address
pub async fn test_ping_capability() -> bool {
    tokio::task::spawn_blocking(|| {
        super::ping::ping_command(std::net::Ipv4Addr::LOCALHOST, Duration::from_secs(1))
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

/// Test if the ARP table can be read
pub async fn test_arp_capability() -> bool {
    match tokio::task::spawn_blocking(super::arp::read_arp_table).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!("ARP table unavailable: {:#}", e);
            false
        }
        Err(_) => false,
    }
}

/// Detect scan capabilities based on current privileges
pub async fn detect_capabilities() -> ScanCapabilities {
    let (can_ping, can_read_arp) = tokio::join!(test_ping_capability(), test_arp_capability());

    let mode = if can_ping && can_read_arp {
        ScanMode::Full
    } else {
        ScanMode::Limited
    };

    let warning = match (can_ping, can_read_arp) {
        (true, true) => None,
        (false, _) => Some(
            "System ping is not usable. Hosts will be reported unreachable until it is."
                .to_string(),
        ),
        (true, false) => Some(
            "ARP table is not readable. Rich scans will fall back to lightweight scans."
                .to_string(),
        ),
    };

    ScanCapabilities {
        mode,
        can_ping,
        can_read_arp,
        warning,
    }
}

/// Get platform-specific instructions for running with elevated privileges
pub fn get_elevation_instructions() -> String {
    #[cfg(target_os = "windows")]
    {
        "To run with full scan capabilities on Windows:\n\
         1. Open a terminal with 'Run as administrator'\n\
         2. Run lanwatch from that terminal\n\
         \n\
         Note: Most scan features work without admin rights on Windows."
            .to_string()
    }

    #[cfg(target_os = "linux")]
    {
        "To run with full scan capabilities on Linux:\n\
         \n\
         Option 1 - Ensure the system ping has setuid or CAP_NET_RAW (usually default):\n\
         $ ls -la /bin/ping  # Should show '-rwsr-xr-x' or cap_net_raw\n\
         \n\
         Option 2 - Install the iproute2/net-tools packages for ip and arp.\n\
         \n\
         Option 3 - Run as root (not recommended for regular use):\n\
         $ sudo lanwatch scan"
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "To run with full scan capabilities on macOS:\n\
         \n\
         Option 1 - Run as root (not recommended for regular use):\n\
         $ sudo lanwatch scan\n\
         \n\
         Note: Most scan features work without root on macOS."
            .to_string()
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "Elevated privileges may be required for full scan capabilities.\n\
         Please consult your operating system documentation."
            .to_string()
    }
}

/// Format a user-friendly message about current scan capabilities
pub fn format_capabilities_message(caps: &ScanCapabilities) -> String {
    if caps.mode == ScanMode::Full {
        return "Scanning with full capabilities".to_string();
    }

    let mut msg = String::from("Scanning with limited capabilities:\n");

    if !caps.can_ping {
        msg.push_str("  - Ping unavailable (hosts will appear unreachable)\n");
    }
    if !caps.can_read_arp {
        msg.push_str("  - ARP table unavailable (no hardware address or vendor)\n");
    }

    msg.push_str("\nTo enable full scanning:\n");
    msg.push_str(&get_elevation_instructions());
    msg
}
