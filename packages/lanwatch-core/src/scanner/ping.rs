//! Reachability probing using the system ping command

use super::{ProbeResult, hidden_command, hostname};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::process::Command;
use std::time::{Duration, Instant};

/// Extra time allowed for the ping process to start and exit on its own.
const COMMAND_GRACE: Duration = Duration::from_millis(500);

/// Issues a single liveness probe against one address.
///
/// Implementations never fail: every problem is folded into the returned
/// [`ProbeResult`] so a probe can never abort its caller.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: Ipv4Addr, timeout: Duration) -> ProbeResult;
}

/// Prober backed by the platform `ping` binary, with reverse name lookup
/// for hosts that answer.
#[derive(Debug, Clone)]
pub struct SystemPinger {
    resolve_names: bool,
}

impl SystemPinger {
    pub fn new() -> Self {
        Self {
            resolve_names: true,
        }
    }

    /// Skip reverse name lookup for callers that discard names, such as the
    /// monitor.
    pub fn without_name_resolution() -> Self {
        Self {
            resolve_names: false,
        }
    }
}

impl Default for SystemPinger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for SystemPinger {
    async fn probe(&self, address: Ipv4Addr, timeout: Duration) -> ProbeResult {
        let outcome = match tokio::time::timeout(timeout + COMMAND_GRACE, run_ping(address, timeout))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => PingOutcome::NoReply,
        };

        match outcome {
            PingOutcome::Reply(latency) => {
                let resolved_name = if self.resolve_names {
                    hostname::resolve_hostname(address, timeout).await
                } else {
                    None
                };
                ProbeResult::reachable(address, latency, resolved_name)
            }
            PingOutcome::NoReply => ProbeResult::unreachable(address),
            PingOutcome::Failed(reason) => {
                tracing::debug!("Probe of {} could not run: {}", address, reason);
                ProbeResult::failed(address, reason)
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum PingOutcome {
    Reply(Duration),
    NoReply,
    Failed(String),
}

/// Build the platform ping command for one echo request.
pub(crate) fn ping_command(address: Ipv4Addr, timeout: Duration) -> Command {
    let ip = address.to_string();
    let mut cmd = hidden_command("ping");

    #[cfg(target_os = "windows")]
    {
        let millis = timeout.as_millis().max(1).to_string();
        cmd.args(["-n", "1", "-w", &millis, &ip]);
    }

    #[cfg(target_os = "macos")]
    {
        let secs = timeout_secs(timeout).to_string();
        cmd.args(["-c", "1", "-t", &secs, &ip]);
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let secs = timeout_secs(timeout).to_string();
        cmd.args(["-c", "1", "-W", &secs, &ip]);
    }

    cmd
}

/// Whole seconds for tools that only accept second granularity, at least 1.
#[cfg_attr(target_os = "windows", allow(dead_code))]
fn timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs_f64().ceil().max(1.0) as u64
}

async fn run_ping(address: Ipv4Addr, timeout: Duration) -> PingOutcome {
    let result = tokio::task::spawn_blocking(move || {
        let start = Instant::now();

        let output = match ping_command(address, timeout).output() {
            Ok(output) => output,
            Err(e) => return PingOutcome::Failed(format!("failed to execute ping: {}", e)),
        };

        let elapsed = start.elapsed();
        let output_str = String::from_utf8_lossy(&output.stdout);

        if !reply_received(output.status.success(), &output_str) {
            return PingOutcome::NoReply;
        }

        let latency = parse_ping_time(&output_str)
            .and_then(latency_from_millis)
            .unwrap_or(elapsed);
        PingOutcome::Reply(latency)
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(e) => PingOutcome::Failed(format!("ping task panicked: {}", e)),
    }
}

/// Decide whether the ping output reports an echo reply.
fn reply_received(exit_success: bool, output: &str) -> bool {
    #[cfg(target_os = "windows")]
    {
        let output_lower = output.to_lowercase();
        if output_lower.contains("request timed out")
            || output_lower.contains("destination host unreachable")
            || output_lower.contains("transmit failed")
            || output_lower.contains("general failure")
        {
            return false;
        }
        exit_success && output_lower.contains("reply from")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let _ = output;
        exit_success
    }
}

/// Parse ping response time in milliseconds from command output
fn parse_ping_time(output: &str) -> Option<f64> {
    for word in output.split_whitespace() {
        if word.starts_with("time=") || word.starts_with("time<") {
            let time_str = word
                .trim_start_matches("time=")
                .trim_start_matches("time<")
                .trim_end_matches("ms");

            if let Ok(time) = time_str.parse::<f64>() {
                return Some(time);
            }
        }
    }
    None
}

/// `None` for values no real reply carries (negative, NaN, infinite).
fn latency_from_millis(ms: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_time_unix() {
        let output = "64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=0.431 ms";
        assert_eq!(parse_ping_time(output), Some(0.431));
    }

    #[test]
    fn test_parse_ping_time_windows() {
        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_ping_time(output), Some(1.0));
        let output = "Reply from 192.168.1.1: bytes=32 time=14ms TTL=64";
        assert_eq!(parse_ping_time(output), Some(14.0));
    }

    #[test]
    fn test_parse_ping_time_missing() {
        assert_eq!(parse_ping_time("Request timed out."), None);
    }

    #[test]
    fn test_malformed_ping_time_is_not_a_latency() {
        assert_eq!(latency_from_millis(500.0), Some(Duration::from_millis(500)));
        assert_eq!(latency_from_millis(0.0), Some(Duration::ZERO));

        let nan = parse_ping_time("64 bytes from 10.0.0.1: time=nan ms").unwrap();
        assert_eq!(latency_from_millis(nan), None);
        let inf = parse_ping_time("64 bytes from 10.0.0.1: time=inf ms").unwrap();
        assert_eq!(latency_from_millis(inf), None);
        assert_eq!(latency_from_millis(-3.5), None);
    }

    #[test]
    fn test_timeout_secs_rounds_up() {
        assert_eq!(timeout_secs(Duration::from_millis(200)), 1);
        assert_eq!(timeout_secs(Duration::from_millis(2500)), 3);
        assert_eq!(timeout_secs(Duration::from_secs(2)), 2);
    }

    #[test]
    fn test_name_resolution_is_opt_out() {
        assert!(SystemPinger::new().resolve_names);
        assert!(SystemPinger::default().resolve_names);
        assert!(!SystemPinger::without_name_resolution().resolve_names);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_reply_follows_exit_status() {
        assert!(reply_received(true, ""));
        assert!(!reply_received(false, "1 packets transmitted, 0 received"));
    }
}
