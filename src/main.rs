//! Deferred CLI
//!
//! Runs a simulated API call through a chain of handlers on a virtual-time
//! event loop and prints what each handler saw.

use anyhow::{anyhow, Context};
use clap::Parser;
use deferred::demo::{self, FakeBackend, Transcript};
use deferred::{EventLoop, EventLoopConfig, VERSION};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deferred")]
#[command(author, version, about = "Deferred values on a virtual-time event loop", long_about = None)]
struct Cli {
    /// Seed for the fake backend; random when omitted
    #[arg(short, long)]
    seed: Option<u64>,

    /// Probability that the simulated API call fails
    #[arg(short, long, default_value_t = demo::DEFAULT_FAILURE_RATE)]
    failure_rate: f64,

    /// Simulated network latency in milliseconds of virtual time
    #[arg(short, long, default_value_t = demo::DEFAULT_LATENCY_MS)]
    latency_ms: u64,

    /// Event loop configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print run statistics as JSON
    #[arg(long)]
    stats: bool,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    tracing::debug!(version = VERSION, "starting");

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EventLoopConfig::default(),
    };
    let event_loop = EventLoop::with_config(config).map_err(|e| anyhow!("{}", e))?;

    let backend = match cli.seed {
        Some(seed) => FakeBackend::seeded(seed, cli.failure_rate),
        None => FakeBackend::new(cli.failure_rate),
    };
    let call = demo::make_api_call(&event_loop, Rc::new(RefCell::new(backend)), cli.latency_ms);

    let transcript = Transcript::new();
    demo::profile_chain(&call, &transcript);

    let result = event_loop.run_to_completion();
    for line in transcript.lines() {
        println!("{}", line);
    }

    for rejection in event_loop.drain_unhandled_rejections() {
        eprintln!(
            "Unhandled rejection (deferred #{}): {}",
            rejection.deferred_id, rejection.reason
        );
    }

    if cli.stats {
        let report = serde_json::json!({
            "run": result,
            "stats": event_loop.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise the verbosity count picks the level.
fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<EventLoopConfig> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    EventLoopConfig::from_json(&source)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("invalid config {}", path.display()))
}
