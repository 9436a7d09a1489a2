//! Reverse hostname resolution using system resolver tools

use super::hidden_command;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Resolve a hostname for an address, giving up after `timeout`.
///
/// Every failure (tool missing, no PTR record, timeout) yields `None`.
pub(crate) async fn resolve_hostname(address: Ipv4Addr, timeout: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || lookup_blocking(&address.to_string()));

    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(hostname)) => hostname,
        Ok(Err(_)) => None,
        Err(_) => {
            tracing::debug!("Hostname lookup for {} timed out", address);
            None
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn lookup_blocking(ip: &str) -> Option<String> {
    // Method 1: getent hosts
    if let Ok(output) = hidden_command("getent").args(["hosts", ip]).output() {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout);
            if let Some(hostname) = parse_getent(&out) {
                return Some(hostname);
            }
        }
    }

    // Method 2: host command
    if let Ok(output) = hidden_command("host").arg(ip).output() {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout);
            if let Some(hostname) = parse_host_pointer(&out) {
                return Some(hostname);
            }
        }
    }

    // Method 3: avahi-resolve on Linux
    #[cfg(target_os = "linux")]
    if let Ok(output) = hidden_command("avahi-resolve").args(["-a", ip]).output() {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout);
            if let Some(hostname) = parse_getent(&out) {
                return Some(hostname);
            }
        }
    }

    None
}

#[cfg(target_os = "windows")]
fn lookup_blocking(ip: &str) -> Option<String> {
    // Method 1: PowerShell Resolve-DnsName
    if let Ok(output) = hidden_command("powershell")
        .args([
            "-NoProfile",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            &format!(
                "try {{ (Resolve-DnsName -Name '{}' -Type PTR -ErrorAction Stop).NameHost }} catch {{ }}",
                ip
            ),
        ])
        .output()
    {
        if output.status.success() {
            let out = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !out.is_empty() && !out.contains("error") && !out.contains(ip) {
                return Some(out);
            }
        }
    }

    // Method 2: nbtstat for NetBIOS names
    if let Ok(output) = hidden_command("nbtstat").args(["-A", ip]).output() {
        let out = String::from_utf8_lossy(&output.stdout);
        for line in out.lines() {
            let trimmed = line.trim();
            if trimmed.contains("<00>") && trimmed.contains("UNIQUE") {
                if let Some(name) = trimmed.split_whitespace().next() {
                    if !name.is_empty() {
                        return Some(name.to_string());
                    }
                }
            }
        }
    }

    None
}

#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
fn lookup_blocking(_ip: &str) -> Option<String> {
    None
}

/// Second column of `getent hosts` / `avahi-resolve -a` output.
#[cfg_attr(target_os = "windows", allow(dead_code))]
fn parse_getent(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .nth(1)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('.').to_string())
}

/// Name after "domain name pointer" in `host` output.
#[cfg_attr(target_os = "windows", allow(dead_code))]
fn parse_host_pointer(output: &str) -> Option<String> {
    output
        .split("pointer")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(|s| s.trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
}
