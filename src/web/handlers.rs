use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    app_state::AppState,
    camera::{error::CameraError, filters::Filter, formats::StreamFormat},
    core::{errors::AppError, state::CameraStatus},
};

use super::mjpeg;

const RECORDING_DURATION_MS: &str = "x-recording-duration-ms";
const RECORDING_FRAMES: &str = "x-recording-frames";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct RunningResponse {
    success: bool,
    running: bool,
}

#[derive(Debug, Serialize)]
pub struct RecordingResponse {
    success: bool,
    recording: bool,
}

#[derive(Debug, Serialize)]
pub struct FormatResponse {
    success: bool,
    format: StreamFormat,
}

#[derive(Debug, Serialize)]
pub struct FormatsResponse {
    formats: &'static [StreamFormat],
    current: StreamFormat,
}

#[derive(Debug, Serialize)]
pub struct FilterResponse {
    success: bool,
    filter: Filter,
}

#[derive(Debug, Serialize)]
pub struct FiltersResponse {
    filters: &'static [Filter],
    current: Filter,
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotoQuery {
    width: Option<u32>,
    height: Option<u32>,
}

pub async fn root() -> Redirect {
    Redirect::to("/static/index.html")
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
    })
}

pub async fn start(State(state): State<Arc<AppState>>) -> Result<Json<RunningResponse>, AppError> {
    state
        .camera
        .start()
        .await
        .map_err(|err| AppError::from(err).with_status(StatusCode::INTERNAL_SERVER_ERROR))?;
    info!("camera start requested");
    Ok(Json(RunningResponse {
        success: true,
        running: true,
    }))
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<RunningResponse>, AppError> {
    state.camera.stop().await?;
    info!("camera stop requested");
    Ok(Json(RunningResponse {
        success: true,
        running: false,
    }))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<CameraStatus> {
    Json(state.camera.status())
}

pub async fn photo(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PhotoQuery>,
) -> Result<Response, AppError> {
    let size = match (query.width, query.height) {
        (Some(width), Some(height)) => Some((width, height)),
        (None, None) => None,
        _ => {
            return Err(AppError::new(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "width and height must be given together",
            ));
        }
    };

    let jpeg = state.camera.capture_still(size).await?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::OK, headers, jpeg).into_response())
}

pub async fn record_start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecordingResponse>, AppError> {
    state.camera.begin_recording().await?;
    Ok(Json(RecordingResponse {
        success: true,
        recording: true,
    }))
}

pub async fn record_stop(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let recording = state.camera.end_recording().await?;

    let filename = format!(
        "attachment; filename=\"recording-{}.mp4\"",
        recording.started_at.format("%Y%m%d-%H%M%S")
    );
    let disposition = HeaderValue::from_str(&filename)
        .map_err(|err| AppError::internal(format!("invalid content disposition: {err}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    headers.insert(
        RECORDING_DURATION_MS,
        HeaderValue::from(recording.duration.as_millis() as u64),
    );
    headers.insert(RECORDING_FRAMES, HeaderValue::from(recording.frames));
    Ok((StatusCode::OK, headers, recording.bytes).into_response())
}

pub async fn set_format(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FormatResponse>, AppError> {
    let format = name.parse::<StreamFormat>().map_err(CameraError::from)?;
    state.camera.set_format(format).await?;
    Ok(Json(FormatResponse {
        success: true,
        format,
    }))
}

pub async fn formats(State(state): State<Arc<AppState>>) -> Json<FormatsResponse> {
    let (formats, current) = state.camera.formats();
    Json(FormatsResponse { formats, current })
}

pub async fn filters(State(state): State<Arc<AppState>>) -> Json<FiltersResponse> {
    let (filters, current) = state.camera.filters();
    Json(FiltersResponse { filters, current })
}

pub async fn set_filter(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FilterResponse>, AppError> {
    let filter = name.parse::<Filter>().map_err(CameraError::from)?;
    state.camera.set_filter(filter);
    Ok(Json(FilterResponse {
        success: true,
        filter,
    }))
}

pub async fn stream(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let subscriber = state.camera.subscribe()?;
    Ok(mjpeg::stream_response(subscriber))
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

    use axum::{
        extract::{Path, Query, State},
        http::{StatusCode, header::CONTENT_TYPE},
        response::{IntoResponse, Response},
    };
    use serde_json::Value;

    use crate::{
        app_state::AppState,
        camera::{
            formats::StreamFormat,
            mock::{DeviceProbe, MockEncoder, ScriptedDevice},
            service::CameraService,
            traits::VideoEncoder,
        },
        config::AppConfig,
    };

    use super::{
        PhotoQuery, filters, formats, photo, record_start, record_stop, set_filter, set_format,
        start, status, stop, stream,
    };

    fn test_state(probe: &DeviceProbe) -> Arc<AppState> {
        let config = AppConfig {
            app_name: "livecam".to_string(),
            bind_addr: "127.0.0.1:8000"
                .parse::<SocketAddr>()
                .expect("socket addr should parse"),
            camera_device: "test".to_string(),
            stream_width: 16,
            stream_height: 12,
            stream_format: StreamFormat::Yuv420,
            stream_fps: 100,
            still_width: 32,
            still_height: 24,
            jpeg_quality: 70,
            start_attempts: 2,
            start_backoff: Duration::from_millis(1),
            subscriber_capacity: 4,
            recordings_dir: std::env::temp_dir()
                .join(format!("livecam-handlers-{}", rand::random::<u32>())),
            static_dir: PathBuf::from("static"),
            log_dir: PathBuf::from("logs"),
        };
        let camera = CameraService::new(
            Box::new(ScriptedDevice::new(probe.clone())),
            Arc::new(|| Box::new(MockEncoder::default()) as Box<dyn VideoEncoder>),
            config.camera_settings(),
        );
        Arc::new(AppState::new(config, camera))
    }

    async fn json_body(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be json")
    }

    #[tokio::test]
    async fn start_and_status_report_running() {
        let state = test_state(&DeviceProbe::default());
        let response = start(State(state.clone()))
            .await
            .expect("start should succeed")
            .into_response();
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["running"], true);

        let body = json_body(status(State(state.clone())).await.into_response()).await;
        assert_eq!(body["running"], true);
        assert_eq!(body["state"], "running");
        assert_eq!(body["format"], "YUV420");
        assert_eq!(body["recording"], false);

        let _ = stop(State(state)).await.expect("stop should succeed");
    }

    #[tokio::test]
    async fn start_failure_is_internal_error() {
        let probe = DeviceProbe::default();
        probe.fail_opens(2);
        let state = test_state(&probe);

        let err = start(State(state.clone())).await.expect_err("start should fail");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "device_unavailable");

        let body = json_body(status(State(state)).await.into_response()).await;
        assert_eq!(body["running"], false);
        assert!(body["last_error"].is_string());
    }

    #[tokio::test]
    async fn photo_while_stopped_is_service_unavailable() {
        let probe = DeviceProbe::default();
        let state = test_state(&probe);

        let err = photo(State(state), Query(PhotoQuery::default()))
            .await
            .expect_err("photo should fail");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["code"], "not_running");
        assert_eq!(probe.captures(), 0);
    }

    #[tokio::test]
    async fn photo_returns_jpeg_when_running() {
        let state = test_state(&DeviceProbe::default());
        let _ = start(State(state.clone())).await.expect("start");

        let response = photo(
            State(state.clone()),
            Query(PhotoQuery {
                width: Some(24),
                height: Some(16),
            }),
        )
        .await
        .expect("photo should succeed");
        assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..2], &[0xFF, 0xD8]);

        let _ = stop(State(state)).await.expect("stop");
    }

    #[tokio::test]
    async fn recording_endpoints_follow_session_rules() {
        let state = test_state(&DeviceProbe::default());

        let err = record_stop(State(state.clone()))
            .await
            .expect_err("nothing to stop");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let _ = start(State(state.clone())).await.expect("start");
        let mut viewer = state.camera.subscribe().expect("running");
        viewer.recv().await.expect("first frame");

        let _ = record_start(State(state.clone())).await.expect("record start");
        let err = record_start(State(state.clone()))
            .await
            .expect_err("already recording");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let response = record_stop(State(state.clone())).await.expect("record stop");
        assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
        let frames = response.headers()["x-recording-frames"]
            .to_str()
            .expect("ascii header")
            .parse::<u64>()
            .expect("frame count");
        assert!(frames >= 1);
        assert!(response.headers().contains_key("x-recording-duration-ms"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert!(!body.is_empty());

        let _ = stop(State(state)).await.expect("stop");
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let state = test_state(&DeviceProbe::default());
        let err = set_format(State(state.clone()), Path("MJPG".to_string()))
            .await
            .expect_err("unknown format");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(response).await["code"], "unsupported_format");

        let _ = set_format(State(state.clone()), Path("gray8".to_string()))
            .await
            .expect("known format");
        let body = json_body(formats(State(state)).await.into_response()).await;
        assert_eq!(body["current"], "GRAY8");
        assert_eq!(body["formats"].as_array().map(Vec::len), Some(8));
    }

    #[tokio::test]
    async fn stream_requires_running_camera() {
        let state = test_state(&DeviceProbe::default());
        let err = stream(State(state.clone())).await.expect_err("not running");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let _ = start(State(state.clone())).await.expect("start");
        let response = stream(State(state.clone())).await.expect("stream");
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );
        let _ = stop(State(state.clone())).await.expect("stop");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("stream ends after stop");
        assert!(body.starts_with(b"--frame\r\n") || body.is_empty());
    }

    #[tokio::test]
    async fn filters_can_be_listed_and_switched() {
        let state = test_state(&DeviceProbe::default());
        let body = json_body(filters(State(state.clone())).await.into_response()).await;
        assert_eq!(body["current"], "none");
        assert_eq!(body["filters"].as_array().map(Vec::len), Some(4));

        let response = set_filter(State(state.clone()), Path("Invert".to_string()))
            .await
            .expect("known filter")
            .into_response();
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["filter"], "invert");

        let body = json_body(status(State(state.clone())).await.into_response()).await;
        assert_eq!(body["filter"], "invert");

        let err = set_filter(State(state), Path("blur".to_string()))
            .await
            .expect_err("unknown filter");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "unsupported_filter");
    }
}
