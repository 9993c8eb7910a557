use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::camera::{filters::Filter, formats::StreamFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Faulted,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub running: bool,
    pub state: CameraState,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub format: StreamFormat,
    pub recording: bool,
    pub subscribers: usize,
    pub filter: Filter,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
