//! contextd
//!
//! Loads a context-engine configuration and either replays recorded sensor
//! readings against it or runs live, reading JSON-lines readings from stdin.
//!
//! ```text
//! contextd --config contextd.yaml --input readings.jsonl
//! ```

mod daemon;
mod replay;

use anyhow::{Context, Result};
use clap::Parser;
use ctx_config::Settings;
use ctx_core::{ManualClock, SystemClock, Timestamp};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};
use tracing::{info, warn};

use crate::daemon::ContextDaemon;

#[derive(Debug, Parser)]
#[command(name = "contextd", version, about = "Context expression engine")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines readings to replay; reads stdin live when absent
    #[arg(short, long)]
    input: Option<PathBuf>,
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => {
            warn!("No configuration given; starting without expressions");
            Settings::default()
        }
    };

    match &args.input {
        Some(path) => run_replay(&settings, path),
        None => run_live(&settings).await,
    }
}

fn run_replay(settings: &Settings, path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let readings = replay::read_readings(BufReader::new(file))?;
    info!(readings = readings.len(), input = %path.display(), "Replaying readings");

    let start = readings.first().map(|r| r.at()).unwrap_or_else(Timestamp::now);
    let clock = ManualClock::at(start);
    let daemon = ContextDaemon::new(settings, Arc::new(clock.clone()))?;

    let summary = replay::replay(&daemon, &clock, readings);
    info!(
        readings = summary.readings,
        evaluations = summary.evaluations,
        "Replay finished"
    );

    for id in daemon.engine.registered_ids() {
        if let Some(stats) = daemon.engine.stats(&id) {
            info!(
                expression_id = %id,
                evaluations = stats.evaluations,
                changes = stats.changes,
                errors = stats.errors,
                mean_eval_us = stats.mean_eval_time().as_micros() as u64,
                "Expression statistics"
            );
        }
    }
    Ok(())
}

async fn run_live(settings: &Settings) -> Result<()> {
    let daemon = ContextDaemon::new(settings, Arc::new(SystemClock))?;
    let listener = daemon.engine.attach_bus(&daemon.bus);
    let worker = daemon.engine.start();

    info!("contextd is running; reading sensor readings from stdin");

    let mut lines = AsyncBufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match replay::parse_line(&line) {
                    Ok(Some(reading)) => {
                        let sensor = reading.sensor.clone();
                        daemon.sensors.record(&sensor, reading.into_value());
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Skipping malformed reading"),
                },
                None => {
                    info!("Input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    daemon.engine.stop();
    if let Some(worker) = worker {
        worker.await?;
    }
    listener.await?;
    Ok(())
}
