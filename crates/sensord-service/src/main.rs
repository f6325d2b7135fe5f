//! sensord - background sensor event collector.
//!
//! Run with: `cargo run -p sensord-service`

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use sensord_core::WorkerExit;
use sensord_service::{Collector, Config};

/// sensord - background sensor event collector.
#[derive(Parser, Debug)]
#[command(name = "sensord")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Event output file (overrides config).
    #[arg(short, long, global = true)]
    sink: Option<PathBuf>,

    /// Truncate the event output on start instead of appending.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Do not scan for BLE devices.
    #[arg(long, global = true)]
    no_scan: bool,

    /// Do not hold a kernel wake-lock.
    #[arg(long, global = true)]
    no_wake_lock: bool,

    /// Enable debug logging for the collector.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the collector in the foreground until interrupted (default).
    Run,

    /// Load and validate the configuration, then print it.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig) => check_config(&args),
        Some(Command::Run) | None => run(args).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(sink) = &args.sink {
        config.sink.path = sink.clone();
    }
    if args.overwrite {
        config.collector.overwrite = true;
    }
    if args.no_scan {
        config.collector.scan_enabled = false;
    }
    if args.no_wake_lock {
        config.wake_lock.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn check_config(args: &Args) -> anyhow::Result<()> {
    let config = load_config(args)?;
    println!("Configuration is valid\n");
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let core_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensord=info".parse()?)
                .add_directive("sensord_service=info".parse()?)
                .add_directive(format!("sensord_core={core_level}").parse()?),
        )
        .init();

    let config = load_config(&args)?;
    info!("Writing events to {:?}", config.sink.path);

    let collector = Collector::from_config(&config)?;
    let report = collector.start().await?;
    info!(scan = %report.scan, overwrite = report.overwrite, "Collecting; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping");

    let report = collector.stop().await?;
    match report.exit {
        WorkerExit::Clean(summary) => info!(
            submitted = summary.submitted,
            rejected = summary.rejected,
            sink_failures = summary.sink_failures,
            "Collected for {:?}",
            report.uptime
        ),
        exit => info!(?exit, "Collected for {:?}", report.uptime),
    }

    Ok(())
}
