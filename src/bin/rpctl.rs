//! rpctl: inspect and drive the console registry from a terminal
//!
//! ```text
//! rpctl discover              Scan the LAN and store what answers
//! rpctl list                  Show known consoles
//! rpctl status <ip>           One lightweight state check
//! rpctl wake <ip>             Send one wake datagram
//! rpctl remove <host-id>      Forget a console and its registration
//! rpctl track --seconds 30    Run the background tracker for a while
//! rpctl gen-config            Dump the default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rpconnect::clock::SystemClock;
use rpconnect::config::AppConfig;
use rpconnect::console::ConsoleKind;
use rpconnect::discovery::{Discovery, UdpProbeTransport, UdpWakeTransport, WakeEmitter};
use rpconnect::registry::ConsoleRegistry;
use rpconnect::tracker::StateTracker;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rpctl", about = "PlayStation remote play console tool", version)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rpctl.toml")]
    config: PathBuf,

    /// Data directory (overrides config).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Broadcast a search and store every console that answers.
    Discover {
        /// Scan duration in milliseconds (overrides config).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List known consoles.
    List,
    /// Check whether a console is awake.
    Status {
        ip: String,
        /// Console family when the console is not in the registry.
        #[arg(long, default_value = "ps5")]
        kind: String,
    },
    /// Send one wake datagram using the stored registration.
    Wake { ip: String },
    /// Remove a console and its registration.
    Remove { host_id: String },
    /// Run the background tracker and print its statistics.
    Track {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
    /// Print the default configuration and exit.
    GenConfig,
}

fn parse_kind(kind: &str) -> ConsoleKind {
    match kind.to_ascii_lowercase().as_str() {
        "ps4" => ConsoleKind::Ps4,
        "ps4pro" | "ps4-pro" => ConsoleKind::Ps4Pro,
        "ps5digital" | "ps5-digital" => ConsoleKind::Ps5Digital,
        _ => ConsoleKind::Ps5,
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        println!("{}", AppConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = AppConfig::load(&cli.config);
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = Some(dir);
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!("rpctl v{}", env!("CARGO_PKG_VERSION"));

    let clock = SystemClock::shared();
    let paths = config.data_paths().context("resolving data directory")?;
    let registry = Arc::new(ConsoleRegistry::open(paths, clock.clone()).context("opening console registry")?);
    let probe = Arc::new(UdpProbeTransport::new());

    match cli.command {
        Command::Discover { timeout_ms } => {
            let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.discovery.scan_timeout_ms));
            let discovery = Discovery::new(probe, clock);
            let summary = discovery.scan_into(&registry, config.psn_account(), timeout)?;
            println!(
                "found {} console(s): {} new, {} updated, {} rejected",
                summary.found, summary.added, summary.updated, summary.rejected
            );
        }
        Command::List => {
            let consoles = registry.consoles()?;
            if consoles.is_empty() {
                println!("no known consoles");
            }
            for c in consoles {
                println!(
                    "{:<16} {:<14} {:<12} {:<8} {}{}",
                    c.ip,
                    c.host_id,
                    c.kind.label(),
                    c.discovery_state.to_string(),
                    c.display_name,
                    if registry.is_registered(&c.ip) { "  [registered]" } else { "" }
                );
            }
        }
        Command::Status { ip, kind } => {
            let kind = registry.find_by_ip(&ip).map(|r| r.kind).unwrap_or_else(|_| parse_kind(&kind));
            let discovery = Discovery::new(probe, clock);
            let timeout = Duration::from_millis(config.discovery.probe_timeout_ms);
            match discovery.check_state(&ip, kind, timeout) {
                Ok(state) => println!("{ip}: {state}"),
                Err(e) => println!("{ip}: no answer ({e})"),
            }
            println!("registered: {}", registry.is_registered(&ip));
        }
        Command::Wake { ip } => {
            WakeEmitter::new(Arc::new(UdpWakeTransport)).wake(&registry, &ip)?;
            println!("wake sent to {ip}");
        }
        Command::Remove { host_id } => {
            let removed = registry.remove(&host_id)?;
            println!("removed {} ({})", removed.host_id, removed.ip);
        }
        Command::Track { seconds } => {
            let mut tracker = StateTracker::start(registry.clone(), probe, clock, config.tracker.clone())?;
            std::thread::sleep(Duration::from_secs(seconds));
            tracker.stop();
            let stats = tracker.stats();
            println!(
                "cycles={} probes={} state_changes={} failures={} saves={}",
                stats.cycles, stats.probes, stats.state_changes, stats.failures, stats.saves
            );
        }
        Command::GenConfig => {}
    }

    registry.shutdown();
    Ok(())
}
