use std::time::Instant;

use crate::{camera::service::CameraService, config::AppConfig};

pub struct AppState {
    pub config: AppConfig,
    pub camera: CameraService,
    started: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, camera: CameraService) -> Self {
        Self {
            config,
            camera,
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
