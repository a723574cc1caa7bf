pub mod capture;
pub mod config;
pub mod db;
pub mod detector;
pub mod device;
pub mod session;
mod utils;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use capture::JpegFrameSink;
use config::AppConfig;
use db::Database;
use detector::{Detector, HttpDetector, NullDetector};
use session::SessionController;

/// Shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub db: Database,
    /// Applied when a turn-on request does not name a duration.
    pub default_duration: Duration,
}

#[derive(Debug, Parser)]
#[command(name = "camwatch", version, about = "Timed camera capture sessions over HTTP")]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long, env = "CAMWATCH_CONFIG", default_value = "camwatch.json")]
    pub config: PathBuf,

    /// Overrides `bind_addr` from the config file
    #[arg(long)]
    pub bind: Option<String>,
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)?;
    config.validate()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    info!("camwatch starting up...");

    let database = Database::new(config.database_path.clone())?;
    let frames = JpegFrameSink::new(config.frames_dir.clone())?;
    info!(
        "Session history in {}, frames in {}",
        database.path().display(),
        frames.dir().display()
    );

    let detector: Arc<dyn Detector> = match &config.detector_url {
        Some(url) => {
            let detector = HttpDetector::new(url.clone(), config.detector_timeout())?;
            info!("Sending frames to detector at {}", detector.url());
            Arc::new(detector)
        }
        None => {
            warn!("No detector_url configured; frames will be captured without detection");
            Arc::new(NullDetector)
        }
    };

    let devices = device::provider_for(config.camera)?;
    info!("Capturing from the {:?} camera backend", config.camera);

    let controller = SessionController::new(
        config.session_config(),
        devices,
        detector,
        Arc::new(frames),
        Arc::new(database.clone()),
    );

    let state = AppState {
        controller: controller.clone(),
        db: database,
        default_duration: config.default_duration(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, session::commands::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Whatever was running gets the same flush as a manual stop.
    let outcome = controller.turn_off().await;
    if !outcome.already_off {
        info!("Stopped active session on shutdown");
    }
    info!("camwatch shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
