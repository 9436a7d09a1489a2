//! Scan range parsing and candidate host enumeration.

use super::MAX_SCAN_HOSTS;
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Fallback range when the local network cannot be inferred.
pub const DEFAULT_RANGE: &str = "192.168.1.0/24";

/// Which addresses a discovery run should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RangeDescriptor {
    /// The network inferred from the host's own address at startup
    #[default]
    LocalNetwork,
    /// A CIDR block (`10.0.0.0/24`) or a single address
    Explicit(String),
}

impl RangeDescriptor {
    /// Explicit range if given, otherwise infer from the local network.
    pub fn from_option(range: Option<String>) -> Self {
        match range.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()) {
            Some(r) => RangeDescriptor::Explicit(r),
            None => RangeDescriptor::LocalNetwork,
        }
    }
}

impl std::fmt::Display for RangeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeDescriptor::LocalNetwork => write!(f, "local network"),
            RangeDescriptor::Explicit(range) => write!(f, "{}", range),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("empty scan range")]
    Empty,

    #[error("invalid scan range '{0}'")]
    Invalid(String),

    #[error("IPv6 range '{0}' is not supported")]
    Unsupported(String),
}

/// Parse a CIDR block or single IPv4 address into a network.
///
/// Host bits are allowed (`10.0.0.7/24` means `10.0.0.0/24`).
pub fn parse_network(text: &str) -> Result<Ipv4Network, RangeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RangeError::Empty);
    }

    if text.contains('/') {
        return match text.parse::<IpNetwork>() {
            Ok(IpNetwork::V4(net)) => Ok(net),
            Ok(IpNetwork::V6(_)) => Err(RangeError::Unsupported(text.to_string())),
            Err(_) => Err(RangeError::Invalid(text.to_string())),
        };
    }

    match text.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            Ipv4Network::new(ip, 32).map_err(|_| RangeError::Invalid(text.to_string()))
        }
        Ok(IpAddr::V6(_)) => Err(RangeError::Unsupported(text.to_string())),
        Err(_) => Err(RangeError::Invalid(text.to_string())),
    }
}

/// Enumerate probe candidates in address order, capped at [`MAX_SCAN_HOSTS`].
///
/// Network and broadcast addresses are skipped for prefixes up to /30;
/// /31 and /32 blocks have no such addresses and use every address.
pub fn candidate_hosts(network: &Ipv4Network) -> Vec<Ipv4Addr> {
    candidate_hosts_with_limit(network, MAX_SCAN_HOSTS)
}

pub(crate) fn candidate_hosts_with_limit(network: &Ipv4Network, limit: usize) -> Vec<Ipv4Addr> {
    if network.prefix() >= 31 {
        return network.iter().take(limit).collect();
    }

    let network_addr = network.network();
    let broadcast = network.broadcast();
    network
        .iter()
        .filter(|ip| *ip != network_addr && *ip != broadcast)
        .take(limit)
        .collect()
}

/// Number of usable hosts in the block before any cap is applied.
pub fn usable_host_count(network: &Ipv4Network) -> u64 {
    let size = 1u64 << (32 - u32::from(network.prefix()));
    if network.prefix() >= 31 { size } else { size - 2 }
}
