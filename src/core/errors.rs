use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::camera::error::CameraError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        let status = match &err {
            CameraError::DeviceUnavailable { .. }
            | CameraError::CaptureFailed(_)
            | CameraError::EncoderFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CameraError::NotRunning
            | CameraError::InvalidTransition(_)
            | CameraError::UnsupportedFormat(_) => StatusCode::SERVICE_UNAVAILABLE,
            CameraError::AlreadyRecording
            | CameraError::NoActiveRecording
            | CameraError::UnsupportedFilter(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(format!("{value:#}"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.message,
            "code": self.code,
        });
        (self.status, Json(body)).into_response()
    }
}
