mod app_state;
mod camera;
mod config;
mod core;
mod web;

use std::sync::Arc;

use app_state::AppState;
use camera::{
    ffmpeg_backend::{FfmpegDevice, FfmpegEncoder},
    formats,
    service::CameraService,
    test_pattern::TestPatternDevice,
    traits::{CameraDevice, EncoderFactory, VideoEncoder},
};
use config::AppConfig;
use serde_json::json;
use tracing::{info, warn};
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    if std::env::args().any(|arg| arg == "--list-formats") {
        let listing = json!({ "formats": formats::supported() });
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all(&config.log_dir).await?;
    let file_appender = rolling::daily(&config.log_dir, "livecam.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::INFO)
        .init();

    tokio::fs::create_dir_all(&config.static_dir).await?;
    tokio::fs::create_dir_all(&config.recordings_dir).await?;

    let device: Box<dyn CameraDevice> = if config.uses_test_device() {
        info!("using synthetic test pattern device");
        Box::new(TestPatternDevice::new())
    } else {
        Box::new(FfmpegDevice::new(config.camera_device.clone()))
    };
    let encoders: EncoderFactory =
        Arc::new(|| Box::new(FfmpegEncoder::new()) as Box<dyn VideoEncoder>);
    let camera = CameraService::new(device, encoders, config.camera_settings());

    let state = Arc::new(AppState::new(config.clone(), camera));
    let app = web::routes::build_router(state.clone());

    info!(
        "{} listening on {} (device: {}, {} {}x{} @ {} fps)",
        config.app_name,
        config.bind_addr,
        config.camera_device,
        config.stream_format,
        config.stream_width,
        config.stream_height,
        config.stream_fps
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    info!("{} stopped", config.app_name);
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM, then stops the camera so open MJPEG streams
/// end and the server can drain.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    state.camera.shutdown().await;
}
