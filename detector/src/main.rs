mod command;
mod detector;
mod diff;
mod dispatch;
mod event_log;
mod notify;
mod processor;
mod recorder;
mod supervisor;
mod trigger;
mod watcher;
mod window;

#[cfg(test)]
mod test_support;

use detector::Detector;
use frame_sentry_common::config::Config;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        stream = config.stream.url,
        sample_fps = config.stream.sample_fps,
        frame_dir = config.frames.dir.display().to_string(),
        min_diff = config.detection.min_diff,
        max_diff = config.effective_max_diff(),
        testing = config.testing,
        event_log = config.logging.event_log.display().to_string(),
        "starting frame-sentry detector"
    );

    command::check_ffmpeg_available(&config.producer.ffmpeg).await;

    let mut detector = match Detector::from_config(&config) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to set up notifier");
            std::process::exit(1);
        }
    };

    detector.announce(&config.notify.startup_message).await;
    detector.run(shutdown_signal()).await;
    info!("detector stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for interrupt, running until killed");
        std::future::pending::<()>().await;
    }
}
