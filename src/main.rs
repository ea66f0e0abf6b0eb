//! stereocam capture daemon

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use stereocam::{query, CapturePipeline, Config, Variant, View};

/// How often the daemon reports pipeline status
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stereocam=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("stereocam launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    stereocam::CONFIG.store(Arc::new(config.clone()));

    let pipeline = match config.capture.variant {
        Variant::Simulation => CapturePipeline::simulation(config),
        Variant::Hardware => {
            return Err(eyre!(
                "no device driver linked into this binary; set capture.variant = \"simulation\" \
                 or build a pipeline with CapturePipeline::hardware"
            ))
        }
    };

    let handle = pipeline.spawn()?;
    let camera = handle.camera();

    let _status_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        loop {
            ticker.tick().await;
            let metrics = camera.metrics();
            match camera.latest_frame() {
                Some(frame) => info!(
                    state = ?camera.state(),
                    timestamp = frame.timestamp,
                    width = frame.left.width,
                    height = frame.left.height,
                    left_bytes = camera.latest_view(View::Left).map_or(0, |b| b.len()),
                    published = metrics.frames_published,
                    capture_failures = metrics.capture_failures,
                    "Pipeline status"
                ),
                None => warn!(state = ?camera.state(), setup_failures = metrics.setup_failures, "No frames yet"),
            }
            if let Ok(depth) = camera.get_depth(0, 0) {
                info!(depth, uncertainty = query::depth_uncertainty_mm(depth), "Depth at origin");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.shutdown().await?;

    info!("stereocam shutting down");
    Ok(())
}
