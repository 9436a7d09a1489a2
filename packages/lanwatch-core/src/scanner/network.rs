//! Local network detection.
//!
//! Determines the primary interface, its subnet and the default gateway so a
//! discovery run can default to "the network this host is on".

use super::hidden_command;
use super::range::{DEFAULT_RANGE, parse_network};
use anyhow::{Context, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

/// Network information including interface, subnet, and gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub interface: String,
    pub subnet: String,
    pub gateway_ip: Option<String>,
    pub local_ip: Option<String>,
}

/// Detect the primary network of this host.
pub async fn detect_network_info() -> Result<NetworkInfo> {
    tokio::task::spawn_blocking(detect_blocking)
        .await
        .context("Network detection task panicked")?
}

/// Infer the local scan range, falling back to [`DEFAULT_RANGE`].
pub async fn infer_local_network() -> Ipv4Network {
    let inferred = match detect_network_info().await {
        Ok(info) => {
            tracing::info!(
                "Network: {} on {} (gateway: {:?})",
                info.subnet,
                info.interface,
                info.gateway_ip
            );
            parse_network(&info.subnet).ok()
        }
        Err(e) => {
            tracing::warn!("Could not detect local network: {:#}", e);
            None
        }
    };

    inferred.unwrap_or_else(default_network)
}

pub(crate) fn default_network() -> Ipv4Network {
    match parse_network(DEFAULT_RANGE) {
        Ok(net) => net,
        Err(_) => Ipv4Network::from(std::net::Ipv4Addr::new(192, 168, 1, 0)),
    }
}

#[cfg(target_os = "linux")]
fn detect_blocking() -> Result<NetworkInfo> {
    let route_output = hidden_command("ip")
        .args(["route", "show", "default"])
        .output()
        .context("Failed to run ip route command")?;

    let route_str = String::from_utf8_lossy(&route_output.stdout);
    let (gateway_ip, interface) = parse_linux_default_route(&route_str);

    let addr_output = hidden_command("ip")
        .args(["-4", "addr", "show", &interface])
        .output()
        .context("Failed to run ip addr command")?;

    let addr_str = String::from_utf8_lossy(&addr_output.stdout);
    let (local_ip, subnet) = parse_inet_cidr(&addr_str)
        .with_context(|| format!("No IPv4 address on interface {}", interface))?;

    Ok(NetworkInfo {
        interface,
        subnet,
        gateway_ip,
        local_ip: Some(local_ip),
    })
}

#[cfg(target_os = "macos")]
fn detect_blocking() -> Result<NetworkInfo> {
    let route_output = hidden_command("route")
        .args(["-n", "get", "default"])
        .output()
        .context("Failed to run route command")?;

    let route_str = String::from_utf8_lossy(&route_output.stdout);

    let gateway_ip = route_str
        .lines()
        .find(|line| line.contains("gateway:"))
        .and_then(|line| line.split(':').nth(1))
        .map(|s| s.trim().to_string());

    let interface = route_str
        .lines()
        .find(|line| line.contains("interface:"))
        .and_then(|line| line.split(':').nth(1))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "en0".to_string());

    let ifconfig_output = hidden_command("ifconfig")
        .arg(&interface)
        .output()
        .context("Failed to run ifconfig command")?;

    let ifconfig_str = String::from_utf8_lossy(&ifconfig_output.stdout);
    let (local_ip, subnet) = parse_ifconfig_hex_mask(&ifconfig_str)
        .with_context(|| format!("No IPv4 address on interface {}", interface))?;

    Ok(NetworkInfo {
        interface,
        subnet,
        gateway_ip,
        local_ip: Some(local_ip),
    })
}

#[cfg(target_os = "windows")]
fn detect_blocking() -> Result<NetworkInfo> {
    let output = hidden_command("ipconfig")
        .output()
        .context("Failed to run ipconfig")?;

    let output_str = String::from_utf8_lossy(&output.stdout);
    parse_ipconfig(&output_str).context("No usable adapter in ipconfig output")
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn detect_blocking() -> Result<NetworkInfo> {
    Err(anyhow::anyhow!("Unsupported platform"))
}

/// Gateway and interface from `ip route show default`.
#[allow(dead_code)]
fn parse_linux_default_route(route_str: &str) -> (Option<String>, String) {
    let gateway_ip = route_str
        .split_whitespace()
        .skip_while(|&s| s != "via")
        .nth(1)
        .map(|s| s.to_string());

    let interface = route_str
        .split_whitespace()
        .skip_while(|&s| s != "dev")
        .nth(1)
        .unwrap_or("eth0")
        .to_string();

    (gateway_ip, interface)
}

/// First non-loopback `inet a.b.c.d/nn` line: (local ip, network cidr).
#[allow(dead_code)]
fn parse_inet_cidr(addr_str: &str) -> Option<(String, String)> {
    addr_str.lines().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with("inet ") || trimmed.contains("127.0.0.1") {
            return None;
        }
        let cidr = trimmed.split_whitespace().nth(1)?;
        let network = cidr.parse::<Ipv4Network>().ok()?;
        Some((
            network.ip().to_string(),
            format!("{}/{}", network.network(), network.prefix()),
        ))
    })
}

/// First non-loopback `inet a.b.c.d netmask 0xffffff00` line from ifconfig.
#[allow(dead_code)]
fn parse_ifconfig_hex_mask(ifconfig_str: &str) -> Option<(String, String)> {
    ifconfig_str.lines().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with("inet ") || trimmed.contains("127.0.0.1") {
            return None;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        let ip: std::net::Ipv4Addr = parts.get(1)?.parse().ok()?;
        let mask = u32::from_str_radix(parts.get(3)?.trim_start_matches("0x"), 16).ok()?;
        let network = std::net::Ipv4Addr::from(u32::from(ip) & mask);
        Some((ip.to_string(), format!("{}/{}", network, mask.count_ones())))
    })
}

/// Pick the first physical adapter with an address (preferring one with a gateway).
#[allow(dead_code)]
fn parse_ipconfig(output_str: &str) -> Option<NetworkInfo> {
    const VIRTUAL_PATTERNS: [&str; 8] = [
        "vEthernet",
        "WSL",
        "Hyper-V",
        "VirtualBox",
        "VMware",
        "Docker",
        "Loopback",
        "Tailscale",
    ];

    #[derive(Default)]
    struct AdapterInfo {
        name: String,
        ip: Option<String>,
        mask: Option<String>,
        gateway: Option<String>,
        is_virtual: bool,
    }

    fn value_after_colon(line: &str) -> Option<String> {
        line.split_once(':')
            .map(|(_, v)| v.trim().trim_start_matches(". ").trim().to_string())
            .filter(|v| !v.is_empty())
    }

    let mut adapters: Vec<AdapterInfo> = Vec::new();
    let mut current = AdapterInfo::default();

    for line in output_str.lines() {
        let trimmed = line.trim();

        if line.starts_with("Ethernet adapter") || line.starts_with("Wireless LAN adapter") {
            if current.ip.is_some() {
                adapters.push(current);
            }
            let name = line.trim_end_matches(':').to_string();
            let is_virtual = VIRTUAL_PATTERNS.iter().any(|p| name.contains(p));
            current = AdapterInfo {
                name,
                is_virtual,
                ..Default::default()
            };
        } else if trimmed.starts_with("IPv4 Address") || trimmed.starts_with("IP Address") {
            if let Some(ip) = value_after_colon(trimmed) {
                let ip = ip.trim_end_matches("(Preferred)").to_string();
                if !ip.starts_with("127.") && !ip.starts_with("169.254.") {
                    current.ip = Some(ip);
                }
            }
        } else if trimmed.starts_with("Subnet Mask") {
            current.mask = value_after_colon(trimmed);
        } else if trimmed.starts_with("Default Gateway") {
            current.gateway = value_after_colon(trimmed);
        }
    }

    if current.ip.is_some() {
        adapters.push(current);
    }

    let adapter = adapters
        .iter()
        .find(|a| !a.is_virtual && a.ip.is_some() && a.gateway.is_some())
        .or_else(|| adapters.iter().find(|a| !a.is_virtual && a.ip.is_some()))?;

    let ip: std::net::Ipv4Addr = adapter.ip.as_ref()?.parse().ok()?;
    let mask: std::net::Ipv4Addr = adapter.mask.as_ref()?.parse().ok()?;
    let mask_u32 = u32::from(mask);
    let network = std::net::Ipv4Addr::from(u32::from(ip) & mask_u32);

    Some(NetworkInfo {
        interface: adapter.name.clone(),
        subnet: format!("{}/{}", network, mask_u32.count_ones()),
        gateway_ip: adapter.gateway.clone(),
        local_ip: adapter.ip.clone(),
    })
}
