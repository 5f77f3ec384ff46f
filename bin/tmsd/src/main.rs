//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "binary"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Binary entrypoint for the TMS daemon."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tms_common::config::AppConfig;
use tms_common::logging::init_tracing;
use tms_core::{SchedulerHandle, SimulationScheduler};
use tms_sim::{
    AlertLog, AlertSink, Animator, FanoutAlertSink, SimulationClock, TracingAlertSink,
    TracingGaugeRenderer, ValueInterpolator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("TMS ", env!("CARGO_PKG_VERSION")),
    about = "Fuel tank monitoring simulation daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, env = "TMS_SPEED", help = "Override the initial simulation speed")]
    speed: Option<u32>,

    #[arg(
        long,
        help = "Read new speed values from stdin, one integer per line, while running"
    )]
    interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulation until ctrl-c")]
    Run,
    #[command(about = "Validate the configuration and print the effective values")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/tmsd.toml"));
    candidates.push(PathBuf::from("configs/tmsd.example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(speed) = cli.speed {
        config.clock.speed = speed;
        config.validate()?;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("tmsd", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(config = %path.display(), "configuration loaded"),
                None => info!("no configuration file found; using built-in defaults"),
            }
            run_daemon(config, cli.interactive).await?
        }
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).with_context(|| "failed to render configuration")?;
            match &loaded.source {
                Some(path) => println!("# source: {}", path.display()),
                None => println!("# source: built-in defaults"),
            }
            println!("{}", rendered);
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, interactive: bool) -> Result<()> {
    let clock = SimulationClock::from_config(&config)
        .with_context(|| "failed to open simulation datasets")?;
    let animator = Arc::new(Animator::new(ValueInterpolator::new(
        config.animation.frame_count,
    )));
    let alert_log = Arc::new(AlertLog::default());
    let alerts: Arc<dyn AlertSink> = Arc::new(
        FanoutAlertSink::new()
            .with(Arc::new(TracingAlertSink))
            .with(alert_log.clone()),
    );

    let handle = SimulationScheduler::from_config(&config)
        .start(clock, animator, alerts, Arc::new(TracingGaugeRenderer))
        .await?;

    info!(
        tanks = config.fleet.len(),
        speed = handle.speed(),
        "daemon running; waiting for termination signal"
    );
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("ctrl-c received; shutting down");
        }
        failure = handle.failure() => {
            if let Some(err) = failure {
                warn!(error = %err, "simulation halted; shutting down");
            }
        }
        _ = read_speed_changes(&handle), if interactive => {
            info!("stdin closed; shutting down");
        }
    }

    let status = serde_json::to_string(&handle.status())?;
    info!(status = %status, alerts = alert_log.len(), "final simulation status");
    handle.stop().await
}

/// Apply one speed value per stdin line until stdin closes.
async fn read_speed_changes(handle: &SchedulerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.parse::<u32>() {
                    Ok(speed) => match handle.set_speed(speed) {
                        Ok(()) => info!(speed, interval_ms = handle.interval().as_millis() as u64, "speed updated"),
                        Err(err) => warn!(error = %err, "speed change rejected"),
                    },
                    Err(_) => warn!(input = line, "expected an integer speed"),
                }
            }
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "failed to read stdin");
                return;
            }
        }
    }
}
