use thiserror::Error;

use super::formats::StreamFormat;

/// Errors raised by device implementations. These never leave the camera
/// module; the controller folds them into [`CameraError`].
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device busy: {0}")]
    Busy(String),

    #[error("device failed to open: {0}")]
    Open(String),

    #[error("device is not open")]
    NotOpen,

    #[error("device stream ended")]
    Disconnected,

    #[error("device timed out waiting for a frame")]
    Timeout,

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unsupported pixel format: {0}")]
    UnknownFormat(String),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("frame has zero width or height")]
    EmptyFrame,

    #[error("frame size {width}x{height} is too large")]
    Oversized { width: u32, height: u32 },

    #[error("{format} frame too short: expected {expected} bytes, got {actual}")]
    ShortFrame {
        format: StreamFormat,
        expected: usize,
        actual: usize,
    },

    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera unavailable after {attempts} attempts: {message}")]
    DeviceUnavailable { attempts: u32, message: String },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("camera is not running")]
    NotRunning,

    #[error("no active recording")]
    NoActiveRecording,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported filter: {0}")]
    UnsupportedFilter(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("encoder failed: {0}")]
    EncoderFailed(String),
}

impl CameraError {
    /// Stable machine-readable category.
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::DeviceUnavailable { .. } => "device_unavailable",
            CameraError::InvalidTransition(_) => "invalid_transition",
            CameraError::NotRunning => "not_running",
            CameraError::NoActiveRecording => "no_active_recording",
            CameraError::AlreadyRecording => "already_recording",
            CameraError::UnsupportedFormat(_) => "unsupported_format",
            CameraError::UnsupportedFilter(_) => "unsupported_filter",
            CameraError::CaptureFailed(_) => "capture_failed",
            CameraError::EncoderFailed(_) => "encoder_failed",
        }
    }
}

impl From<FrameError> for CameraError {
    fn from(value: FrameError) -> Self {
        match value {
            FrameError::UnknownFormat(name) => CameraError::UnsupportedFormat(name),
            FrameError::UnknownFilter(name) => CameraError::UnsupportedFilter(name),
            other => CameraError::CaptureFailed(other.to_string()),
        }
    }
}
