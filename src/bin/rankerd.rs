//! rankerd - live frame classification with smoothed ranking
//!
//! This daemon:
//! 1. Loads config (RANKER_CONFIG file + RANKER_* env overrides + flags)
//! 2. Opens the camera, preferring the back-facing one unless `--front`
//! 3. Samples a still every interval and posts it to the prediction endpoint
//! 4. Renders the smoothed top-3 after every successful cycle
//! 5. Runs until Ctrl-C, or for `--seconds` when given

use anyhow::Result;
use clap::Parser;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use frame_ranker::config::RankerdConfig;
use frame_ranker::presenter::PresenterKind;
use frame_ranker::CaptureSession;

const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Prefer the user-facing (front) camera.
    #[arg(long)]
    front: bool,
    /// Prediction endpoint URL (http(s)://.../predict or stub://...).
    #[arg(long)]
    endpoint: Option<String>,
    /// Device source (stub://... or v4l2).
    #[arg(long)]
    device: Option<String>,
    /// Presenter: console, json or html.
    #[arg(long)]
    presenter: Option<String>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = RankerdConfig::load()?;
    apply_args(&mut config, &args)?;

    let mut session = CaptureSession::from_config(&config)?;
    let acquisition = session.start_camera(config.device.prefer_back)?;
    if acquisition.fell_back() {
        log::info!(
            "running on fallback camera {} instead of {}",
            acquisition.description,
            acquisition.requested
        );
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    log::info!("rankerd running; waiting for shutdown signal (Ctrl-C)...");
    loop {
        let wait = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    log::info!("run time elapsed");
                    break;
                }
                remaining.min(HEALTH_INTERVAL)
            }
            None => HEALTH_INTERVAL,
        };
        match rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => log_health(&session),
        }
    }

    log_health(&session);
    session.stop()?;
    log::info!("rankerd stopped");
    Ok(())
}

fn apply_args(config: &mut RankerdConfig, args: &Args) -> Result<()> {
    if args.front {
        config.device.prefer_back = false;
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint.url = endpoint.clone();
    }
    if let Some(device) = &args.device {
        config.device.source = device.clone();
    }
    if let Some(presenter) = &args.presenter {
        config.presenter.kind = PresenterKind::parse(presenter)?;
    }
    config.validate()
}

fn log_health(session: &CaptureSession) {
    let stats = session.stats();
    let fill = session.history_len().unwrap_or(0);
    let window = session.window().unwrap_or(0);
    log::info!(
        "health: cycles={} ingested={} rejected={} failed={} skipped={} stale={} window={}/{}",
        stats.cycles,
        stats.ingested,
        stats.rejected,
        stats.failed,
        stats.skipped,
        stats.stale,
        fill,
        window
    );
}
