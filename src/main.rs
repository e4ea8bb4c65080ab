//! ISBN fusion scanner - barcode-first ISBN capture with OCR fallback
//!
//! Module structure:
//! - `domain/` - Identifiers, scan results, ISBN normalization, errors
//! - `io/` - Frames, recognizer capabilities, replay scripts, Prometheus
//! - `services/` - Session, scheduler, analysis worker, controller
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::{Parser, Subcommand};
use isbn_fusion::domain::{normalize, ScanHit};
use isbn_fusion::infra::{Config, Metrics};
use isbn_fusion::io::replay::{scripted_frame, CountingReleaser};
use isbn_fusion::io::ReplayScript;
use isbn_fusion::services::{SessionController, SessionEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// ISBN fusion scanner - barcode and OCR recognition with exactly-once acceptance
#[derive(Parser, Debug)]
#[command(name = "isbn-fusion", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical ISBN-13 found in each argument
    Normalize {
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Replay a JSONL script of recognizer outputs through the full pipeline
    Replay {
        script: PathBuf,
        /// Frames pushed per second
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-frame decisions
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    init_logging(config.log_json());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        "isbn_fusion_starting"
    );
    info!(
        config_file = %config.config_file(),
        device_id = %config.device_id(),
        ocr_every_n_frames = %config.ocr_every_n_frames(),
        max_in_flight = %config.max_in_flight(),
        max_consecutive_release_failures = %config.max_consecutive_release_failures(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    match args.command {
        Command::Normalize { texts } => {
            for text in &texts {
                let result = normalize(text)
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "NOT_FOUND".to_string());
                println!("{}\t{}", text, result);
            }
            Ok(())
        }
        Command::Replay { script, fps } => run_replay(&config, &script, fps).await,
    }
}

async fn run_replay(config: &Config, path: &Path, fps: u32) -> anyhow::Result<()> {
    let script = ReplayScript::from_file(path)?;
    let metrics = Arc::new(Metrics::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let device_id = config.device_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = isbn_fusion::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                device_id,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => {
                    if *reporter_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    let controller = SessionController::new(config, script.recognizers(), metrics.clone());
    let mut events = controller.take_events().context("session event receiver already taken")?;
    controller.start();

    let feed = controller.frame_sink();
    let releaser = Arc::new(CountingReleaser::default());
    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut ticker = tokio::time::interval(frame_interval);
    let mut accepted: Option<ScanHit> = None;

    info!(frames = %script.len(), fps = %fps, "replay_started");

    for id in script.frame_ids() {
        ticker.tick().await;
        feed.push(scripted_frame(id, releaser.clone()));
        drain_events(&mut events, &mut accepted);
        if accepted.is_some() {
            break;
        }
    }

    // in-flight frames may still complete
    if accepted.is_none() {
        let grace = script.max_delay() * 2 + frame_interval * 2;
        let _ = tokio::time::timeout(grace, wait_for_accept(&mut events, &mut accepted)).await;
    }

    controller.shutdown().await;
    let _ = shutdown_tx.send(true);
    drain_events(&mut events, &mut accepted);

    let summary = metrics.report();
    summary.log();
    info!(
        frames_submitted = %summary.frames_submitted,
        frames_released = %releaser.released(),
        accepted = %accepted.is_some(),
        "replay_finished"
    );

    println!("{}", serde_json::to_string(&accepted)?);
    Ok(())
}

fn drain_events(events: &mut mpsc::Receiver<SessionEvent>, accepted: &mut Option<ScanHit>) {
    while let Ok(event) = events.try_recv() {
        record_event(event, accepted);
    }
}

async fn wait_for_accept(events: &mut mpsc::Receiver<SessionEvent>, accepted: &mut Option<ScanHit>) {
    while let Some(event) = events.recv().await {
        record_event(event, accepted);
        if accepted.is_some() {
            return;
        }
    }
}

fn record_event(event: SessionEvent, accepted: &mut Option<ScanHit>) {
    match event {
        SessionEvent::Accepted(hit) => {
            if accepted.is_none() {
                *accepted = Some(hit);
            }
        }
        SessionEvent::PipelineFailure { consecutive_failures } => {
            warn!(consecutive_failures = %consecutive_failures, "replay_pipeline_failure");
        }
    }
}
