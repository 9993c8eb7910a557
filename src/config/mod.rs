use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

use crate::camera::{
    formats::StreamFormat,
    service::{CameraSettings, RetryPolicy},
};

/// Device name that selects the synthetic test pattern instead of hardware.
pub const TEST_DEVICE: &str = "test";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: SocketAddr,
    pub camera_device: String,
    pub stream_width: u32,
    pub stream_height: u32,
    pub stream_format: StreamFormat,
    pub stream_fps: u32,
    pub still_width: u32,
    pub still_height: u32,
    pub jpeg_quality: u8,
    pub start_attempts: u32,
    pub start_backoff: Duration,
    pub subscriber_capacity: usize,
    pub recordings_dir: PathBuf,
    pub static_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "livecam".to_owned());
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8000".to_owned())
            .parse()
            .context("BIND_ADDR is not a socket address")?;
        let camera_device = env::var("CAMERA_DEVICE").unwrap_or_else(|_| "/dev/video0".to_owned());

        let stream_format = match env::var("STREAM_FORMAT") {
            Ok(name) => name
                .parse::<StreamFormat>()
                .map_err(|err| anyhow!("STREAM_FORMAT: {err}"))?,
            Err(_) => StreamFormat::Yuv420,
        };

        let jpeg_quality = parse_or::<u32>("JPEG_QUALITY", 80)?.clamp(1, 100) as u8;
        let start_attempts = parse_or::<u32>("START_ATTEMPTS", 3)?;
        if start_attempts == 0 {
            return Err(anyhow!("START_ATTEMPTS must be at least 1"));
        }
        let stream_fps = parse_or::<u32>("STREAM_FPS", 30)?;
        if stream_fps == 0 {
            return Err(anyhow!("STREAM_FPS must be at least 1"));
        }

        let recordings_dir = env::var("RECORDINGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir().join("livecam-recordings"));

        Ok(Self {
            app_name,
            bind_addr,
            camera_device,
            stream_width: parse_or("STREAM_WIDTH", 1280)?,
            stream_height: parse_or("STREAM_HEIGHT", 720)?,
            stream_format,
            stream_fps,
            still_width: parse_or("STILL_WIDTH", 1920)?,
            still_height: parse_or("STILL_HEIGHT", 1080)?,
            jpeg_quality,
            start_attempts,
            start_backoff: Duration::from_millis(parse_or("START_BACKOFF_MS", 500)?),
            subscriber_capacity: parse_or("SUBSCRIBER_CAPACITY", 4)?,
            recordings_dir,
            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static")),
            log_dir: env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
        })
    }

    pub fn uses_test_device(&self) -> bool {
        self.camera_device.eq_ignore_ascii_case(TEST_DEVICE)
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            format: self.stream_format,
            width: self.stream_width,
            height: self.stream_height,
            fps: self.stream_fps,
            still_width: self.still_width,
            still_height: self.still_height,
            jpeg_quality: self.jpeg_quality,
            retry: RetryPolicy::new(self.start_attempts, self.start_backoff),
            subscriber_capacity: self.subscriber_capacity,
            recordings_dir: self.recordings_dir.clone(),
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {raw:?}")),
        _ => Ok(default),
    }
}
