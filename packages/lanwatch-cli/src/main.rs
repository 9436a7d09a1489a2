//! lanwatch CLI - host discovery and reachability monitoring for the local network
//!
//! This binary can:
//! - Scan an address range and remember every responding host
//! - Re-check a single known host on demand
//! - Show devices, status history and network statistics
//! - Run the monitor loop in the foreground (for systemd integration)

mod daemon;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lanwatch_core::config::{self, Config};
use lanwatch_core::scanner::{DiscoveryEngine, RangeDescriptor, ScanStrategy, privileges};
use lanwatch_core::service::{ScanService, snapshot_devices};
use lanwatch_core::store::{DeviceId, DeviceUpdate, SqliteStore, StatusStore};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lanwatch")]
#[command(author = "lanwatch contributors")]
#[command(version)]
#[command(about = "Discover, classify and monitor hosts on the local network")]
#[command(long_about = "
lanwatch finds the hosts on your network, guesses what they are from
their names, and keeps a history of when each one was reachable.

Quick start:
  1. Find devices:      lanwatch scan
  2. List them:         lanwatch devices
  3. Watch them:        lanwatch monitor

For systemd integration, see: lanwatch monitor --help
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file to use instead of ~/.config/lanwatch/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan an address range and save the responding hosts
    Scan {
        /// CIDR block or single address (default: configured or local network)
        #[arg(short, long)]
        range: Option<String>,

        /// lightweight or rich
        #[arg(short, long)]
        strategy: Option<ScanStrategy>,
    },

    /// Probe one known device now and record its status
    Check {
        address: Ipv4Addr,
    },

    /// List known devices with their current status
    Devices {
        /// Filter by address, hostname or custom name
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show status history for a device, newest first
    History {
        address: Ipv4Addr,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show network statistics
    #[command(alias = "statistics")]
    Stats,

    /// List device groups
    Groups,

    /// Create a device group
    GroupAdd {
        name: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Hex color used by dashboards, e.g. "#ff8800"
        #[arg(short, long)]
        color: Option<String>,
    },

    /// Set a device's custom name, notes or group
    Update {
        /// Device id as shown by `lanwatch devices`
        id: i64,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Group id as shown by `lanwatch groups`
        #[arg(short, long)]
        group: Option<i64>,
    },

    /// Delete status history older than the given number of days
    Cleanup {
        #[arg(short, long, default_value = "30")]
        days: u32,
    },

    /// Run the monitor loop in the foreground until SIGINT/SIGTERM
    #[command(alias = "daemon")]
    Monitor {
        /// Scan the configured range before monitoring starts
        #[arg(long)]
        scan_first: bool,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lanwatch={},lanwatch_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Config => cmd_config(&cli, &config),
        Commands::Scan { range, strategy } => cmd_scan(&cli, &config, range.clone(), *strategy).await,
        Commands::Check { address } => cmd_check(&cli, &config, *address).await,
        Commands::Devices { search } => cmd_devices(&cli, &config, search.as_deref()).await,
        Commands::History { address, limit } => cmd_history(&cli, &config, *address, *limit).await,
        Commands::Stats => cmd_stats(&cli, &config).await,
        Commands::Groups => cmd_groups(&cli, &config).await,
        Commands::GroupAdd {
            name,
            description,
            color,
        } => cmd_group_add(&cli, &config, name, description.as_deref(), color.as_deref()).await,
        Commands::Update {
            id,
            name,
            notes,
            group,
        } => {
            let update = DeviceUpdate {
                custom_name: name.clone(),
                notes: notes.clone(),
                group_id: *group,
            };
            cmd_update(&cli, &config, DeviceId(*id), update).await
        }
        Commands::Cleanup { days } => cmd_cleanup(&cli, &config, *days).await,
        Commands::Monitor { scan_first } => {
            let store = open_store(&config)?;
            daemon::run_monitor(&config, store, *scan_first).await
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database_path).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;
    Ok(Arc::new(store))
}

/// Engine and service for commands that probe the network.
async fn scan_service(config: &Config, store: Arc<SqliteStore>) -> ScanService {
    let engine = DiscoveryEngine::detect(config.scan_probe_timeout).await;
    ScanService::new(Arc::new(engine), store)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_latency(latency_ms: Option<f64>) -> String {
    latency_ms
        .map(|t| format!("{:.1}ms", t))
        .unwrap_or_else(|| "-".to_string())
}

async fn cmd_scan(
    cli: &Cli,
    config: &Config,
    range: Option<String>,
    strategy: Option<ScanStrategy>,
) -> Result<()> {
    let store = open_store(config)?;
    let range = match range {
        Some(range) => RangeDescriptor::from_option(Some(range)),
        None => config.scan_range.clone(),
    };
    let strategy = strategy.unwrap_or(config.scan_strategy);

    if let OutputFormat::Text = cli.format {
        println!("Scanning {} ({})...", range, strategy);
    }

    let service = scan_service(config, store).await;
    if strategy == ScanStrategy::Rich && !service.engine().rich_available() {
        let caps = privileges::detect_capabilities().await;
        tracing::warn!("{}", privileges::format_capabilities_message(&caps));
    }

    let outcome = service.run_scan(&range, strategy).await?;

    match cli.format {
        OutputFormat::Text => {
            let report = &outcome.report;
            println!();
            println!(
                "Found {} devices in {} ({} scan, {:.1}s):",
                report.count,
                report.range_descriptor,
                report.strategy_used,
                report.duration.as_secs_f64()
            );
            println!();

            let mut observations = report.observations.clone();
            observations.sort_by_key(|o| o.address);
            for obs in &observations {
                let hostname = obs.resolved_name.as_deref().unwrap_or("-");
                let time_str = format_latency(obs.latency_ms());
                match obs.vendor.as_deref() {
                    Some(vendor) => println!(
                        "  {:15} {:>8}  {:14} {} ({})",
                        obs.address.to_string(),
                        time_str,
                        obs.device_type.label(),
                        hostname,
                        vendor
                    ),
                    None => println!(
                        "  {:15} {:>8}  {:14} {}",
                        obs.address.to_string(),
                        time_str,
                        obs.device_type.label(),
                        hostname
                    ),
                }
            }
        }
        OutputFormat::Json => print_json(&outcome)?,
    }

    Ok(())
}

async fn cmd_check(cli: &Cli, config: &Config, address: Ipv4Addr) -> Result<()> {
    let store = open_store(config)?;
    let service = scan_service(config, store).await;
    let outcome = service.check_device(address, config.scan_strategy).await?;

    match cli.format {
        OutputFormat::Text => {
            println!(
                "{} ({}): {} {}",
                outcome.device.address,
                outcome.device.display_name(),
                outcome.record.status,
                format_latency(outcome.record.latency_ms)
            );
        }
        OutputFormat::Json => print_json(&outcome)?,
    }

    Ok(())
}

async fn cmd_devices(cli: &Cli, config: &Config, search: Option<&str>) -> Result<()> {
    let store = open_store(config)?;

    let devices = match search {
        Some(query) => store.search_devices(query).await?,
        None => store.list_devices().await?,
    };

    let snapshots = snapshot_devices(store.as_ref(), devices).await?;

    match cli.format {
        OutputFormat::Text => {
            if snapshots.is_empty() {
                println!("No devices found. Run 'lanwatch scan' first.");
                return Ok(());
            }

            println!(
                "{:>4}  {:15} {:8} {:>8}  {:14} {}",
                "ID", "ADDRESS", "STATUS", "LATENCY", "TYPE", "NAME"
            );
            for snapshot in &snapshots {
                let device = &snapshot.device;
                let status = snapshot
                    .latest
                    .as_ref()
                    .map(|r| r.status.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let latency = format_latency(snapshot.latest.as_ref().and_then(|r| r.latency_ms));
                let vendor = device
                    .vendor
                    .as_deref()
                    .map(|v| format!(" ({})", v))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {:15} {:8} {:>8}  {:14} {}{}",
                    device.id.0,
                    device.address.to_string(),
                    status,
                    latency,
                    device.device_type.label(),
                    device.display_name(),
                    vendor
                );
            }
        }
        OutputFormat::Json => print_json(&snapshots)?,
    }

    Ok(())
}

async fn cmd_history(cli: &Cli, config: &Config, address: Ipv4Addr, limit: usize) -> Result<()> {
    let store = open_store(config)?;
    let device = store
        .device_by_address(address)
        .await?
        .with_context(|| format!("No known device at {}", address))?;
    let history = store.status_history(device.id, limit).await?;

    match cli.format {
        OutputFormat::Text => {
            println!("{} ({})", device.address, device.display_name());
            println!();
            if history.is_empty() {
                println!("  No status recorded yet.");
            }
            for record in &history {
                println!(
                    "  {}  {:8} {:>8}",
                    record.observed_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                    record.status.to_string(),
                    format_latency(record.latency_ms)
                );
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "device": device,
                    "history": history,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_stats(cli: &Cli, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.statistics().await?;
    let recent_scans = store.recent_scans(5).await?;

    match cli.format {
        OutputFormat::Text => {
            println!(
                "Devices:  {} total, {} active, {} offline",
                stats.total_devices, stats.active_devices, stats.offline_devices
            );
            println!();
            println!("By group:");
            for group in &stats.devices_by_group {
                println!("  {:20} {:>4}", group.name, group.count);
            }
            println!();
            println!("Recent status changes:");
            for change in &stats.recent_changes {
                let name = change
                    .custom_name
                    .as_deref()
                    .or(change.resolved_name.as_deref())
                    .unwrap_or("-");
                println!(
                    "  {}  {:15} {:8} {}",
                    change.observed_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                    change.address.to_string(),
                    change.status.to_string(),
                    name
                );
            }
            println!();
            println!("Recent scans:");
            for scan in &recent_scans {
                println!(
                    "  {}  {:18} {:11} {:>4} devices  {:.1}s",
                    scan.recorded_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                    scan.range,
                    scan.strategy.to_string(),
                    scan.count,
                    scan.duration_secs
                );
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "statistics": stats,
                    "recent_scans": recent_scans,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_groups(cli: &Cli, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let groups = store.list_groups().await?;

    match cli.format {
        OutputFormat::Text => {
            for group in &groups {
                println!(
                    "{:>4}  {:20} {:8} {}",
                    group.id,
                    group.name,
                    group.color,
                    group.description.as_deref().unwrap_or("")
                );
            }
        }
        OutputFormat::Json => print_json(&groups)?,
    }

    Ok(())
}

async fn cmd_group_add(
    cli: &Cli,
    config: &Config,
    name: &str,
    description: Option<&str>,
    color: Option<&str>,
) -> Result<()> {
    let store = open_store(config)?;
    let group = store
        .add_group(name, description, color)
        .await
        .with_context(|| format!("Failed to add group '{}'", name))?;

    match cli.format {
        OutputFormat::Text => println!("Added group '{}' (id {})", group.name, group.id),
        OutputFormat::Json => print_json(&group)?,
    }

    Ok(())
}

async fn cmd_update(cli: &Cli, config: &Config, id: DeviceId, update: DeviceUpdate) -> Result<()> {
    let store = open_store(config)?;
    let device = store.update_device(id, update).await?;

    match cli.format {
        OutputFormat::Text => println!("Updated device {} ({})", device.id, device.display_name()),
        OutputFormat::Json => print_json(&device)?,
    }

    Ok(())
}

async fn cmd_cleanup(cli: &Cli, config: &Config, days: u32) -> Result<()> {
    let store = open_store(config)?;
    let removed = store.cleanup_old_logs(days).await?;

    match cli.format {
        OutputFormat::Text => println!("Removed {} status records older than {} days", removed, days),
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "removed": removed,
                    "days": days,
                })
            );
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, config: &Config) -> Result<()> {
    let config_path = config
        .file_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(config::get_config_file_path_string);

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:       {}", config_path);
            println!("Source:            {}", config.source);
            println!("Scan range:        {}", config.scan_range);
            println!("Scan strategy:     {}", config.scan_strategy);
            println!("Probe timeout:     {}s", config.scan_probe_timeout.as_secs());
            println!("Monitor interval:  {}s", config.monitor.interval.as_secs());
            println!("Monitor retry:     {}s", config.monitor.retry_delay.as_secs());
            println!("Monitor timeout:   {}s", config.monitor.probe_timeout.as_secs());
            println!("Concurrency:       {}", config.monitor.effective_concurrency());
            println!("Database:          {}", config.database_path.display());
            println!();
            println!("Environment variables:");
            println!("  {} - Override scan range", config::ENV_RANGE);
            println!("  {} - Override database path", config::ENV_DB);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": config.source,
                    "scan_range": config.scan_range.to_string(),
                    "scan_strategy": config.scan_strategy,
                    "scan_probe_timeout_secs": config.scan_probe_timeout.as_secs(),
                    "monitor": {
                        "interval_secs": config.monitor.interval.as_secs(),
                        "retry_secs": config.monitor.retry_delay.as_secs(),
                        "probe_timeout_secs": config.monitor.probe_timeout.as_secs(),
                        "concurrency": config.monitor.effective_concurrency(),
                    },
                    "database_path": config.database_path,
                })
            );
        }
    }

    Ok(())
}
