//! ARP table reading using system commands
//!
//! Backs the rich discovery strategy: after a probe sweep has populated the
//! kernel neighbour cache, the table maps each responding address to its
//! hardware address, which is then resolved to a vendor.

use super::discovery::{HardwareInfo, HardwareResolver};
use super::{hidden_command, oui};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Hardware resolver reading the operating system's ARP cache.
#[derive(Debug, Clone, Default)]
pub struct ArpResolver;

impl ArpResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HardwareResolver for ArpResolver {
    fn name(&self) -> &'static str {
        "arp"
    }

    async fn resolve(&self, addresses: &[Ipv4Addr]) -> Result<HashMap<Ipv4Addr, HardwareInfo>> {
        let table = tokio::task::spawn_blocking(read_arp_table)
            .await
            .context("ARP reader task panicked")??;

        tracing::debug!("ARP table holds {} entries", table.len());

        let resolved = addresses
            .iter()
            .filter_map(|ip| {
                let mac = table.get(ip)?;
                Some((*ip, hardware_info(ip, mac)))
            })
            .collect();

        Ok(resolved)
    }
}

/// Build hardware details for one ARP entry, looking up the vendor.
fn hardware_info(ip: &Ipv4Addr, mac: &str) -> HardwareInfo {
    let vendor = match oui::lookup_vendor(mac) {
        Some(vendor) => Some(vendor),
        None if oui::is_virtual_machine_mac(mac) => Some(oui::VIRTUAL_MACHINE_VENDOR.to_string()),
        None => {
            tracing::debug!("OUI: {} ({}) -> NOT FOUND", ip, mac);
            None
        }
    };

    HardwareInfo {
        hardware_address: mac.to_string(),
        vendor,
    }
}

/// Read the ARP table into an address -> MAC map.
pub(crate) fn read_arp_table() -> Result<HashMap<Ipv4Addr, String>> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = std::fs::read_to_string("/proc/net/arp") {
            return Ok(parse_proc_net_arp(&content).into_iter().collect());
        }
        let output = run_arp(&["-n"])?;
        Ok(parse_arp_linux(&output).into_iter().collect())
    }

    #[cfg(target_os = "macos")]
    {
        let output = run_arp(&["-a", "-n"])?;
        Ok(parse_arp_macos(&output).into_iter().collect())
    }

    #[cfg(target_os = "windows")]
    {
        let output = run_arp(&["-a"])?;
        Ok(parse_arp_windows(&output).into_iter().collect())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(anyhow::anyhow!("ARP table reading is not supported on this platform"))
    }
}

#[cfg_attr(
    not(any(target_os = "linux", target_os = "macos", target_os = "windows")),
    allow(dead_code)
)]
fn run_arp(args: &[&str]) -> Result<String> {
    let output = hidden_command("arp")
        .args(args)
        .output()
        .context("Failed to run arp command")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "arp exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn is_usable_mac(mac: &str) -> bool {
    mac != "(incomplete)" && mac != "00:00:00:00:00:00"
}

/// Parse `/proc/net/arp`.
#[allow(dead_code)]
fn parse_proc_net_arp(content: &str) -> Vec<(Ipv4Addr, String)> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let ip = parts[0].parse::<Ipv4Addr>().ok()?;
            let mac = parts[3].to_lowercase();
            // Flags 0x0 marks an incomplete entry
            if parts[2] == "0x0" || !is_usable_mac(&mac) {
                return None;
            }
            Some((ip, mac))
        })
        .collect()
}

/// Parse `arp -n` output (Linux net-tools).
#[allow(dead_code)]
fn parse_arp_linux(output: &str) -> Vec<(Ipv4Addr, String)> {
    let mut devices = Vec::new();

    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 3 {
            let mac = parts[2];
            if let Ok(ip) = parts[0].parse::<Ipv4Addr>() {
                if mac.contains(':') && mac.len() == 17 && is_usable_mac(mac) {
                    devices.push((ip, mac.to_lowercase()));
                }
            }
        }
    }

    devices
}

/// Parse `arp -a -n` output (macOS/BSD).
#[allow(dead_code)]
fn parse_arp_macos(output: &str) -> Vec<(Ipv4Addr, String)> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        let (Some(ip_start), Some(ip_end)) = (line.find('('), line.find(')')) else {
            continue;
        };
        if ip_end <= ip_start {
            continue;
        }
        let Ok(ip) = line[ip_start + 1..ip_end].parse::<Ipv4Addr>() else {
            continue;
        };
        let Some(at_pos) = line.find(" at ") else {
            continue;
        };

        let mac = line[at_pos + 4..].split_whitespace().next().unwrap_or("");
        if mac.contains(':') && is_usable_mac(mac) {
            if let Some(mac) = pad_bsd_mac(mac) {
                devices.push((ip, mac));
            }
        }
    }

    devices
}

/// BSD `arp` drops leading zeros (`0:1a:2b:3:4:5`); restore them.
fn pad_bsd_mac(mac: &str) -> Option<String> {
    let octets: Vec<&str> = mac.split(':').collect();
    if octets.len() != 6 || octets.iter().any(|o| o.is_empty() || o.len() > 2) {
        return None;
    }
    Some(
        octets
            .iter()
            .map(|o| format!("{:0>2}", o.to_lowercase()))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Parse `arp -a` output (Windows).
#[allow(dead_code)]
fn parse_arp_windows(output: &str) -> Vec<(Ipv4Addr, String)> {
    let mut devices_by_ip: HashMap<Ipv4Addr, String> = HashMap::new();

    for line in output.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with("Interface") || line.contains("Internet Address") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            let Ok(ip) = parts[0].parse::<Ipv4Addr>() else {
                continue;
            };
            if ip.is_multicast() || ip.is_broadcast() || ip.octets()[3] == 255 {
                continue;
            }

            let mac = parts[1];
            if mac.contains('-') && mac.len() == 17 {
                devices_by_ip
                    .entry(ip)
                    .or_insert_with(|| mac.replace('-', ":").to_lowercase());
            }
        }
    }

    devices_by_ip.into_iter().collect()
}
