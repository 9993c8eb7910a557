use std::{
    path::PathBuf,
    sync::{Arc, Mutex as StdMutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use chrono::Local;
use tokio::{
    sync::{Mutex, watch},
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::core::state::{CameraState, CameraStatus};

use super::{
    broadcaster::{FrameBroadcaster, PipelineSettings, ProducerHandle, Subscriber, spawn_producer},
    error::CameraError,
    filters::{self, ActiveFilter, Filter},
    formats::{self, StreamFormat},
    jpeg,
    recording::{Recording, RecordingSession},
    traits::{CameraDevice, DeviceConfig, DeviceMode, EncoderFactory, SharedDevice},
};

/// Largest still side accepted before the device is asked to switch modes.
pub const MAX_STILL_SIDE: u32 = 8192;

/// Bounded retry for opening the device, doubling the pause after each failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1 << attempt.saturating_sub(1).min(8))
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub format: StreamFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub still_width: u32,
    pub still_height: u32,
    pub jpeg_quality: u8,
    pub retry: RetryPolicy,
    pub subscriber_capacity: usize,
    pub recordings_dir: PathBuf,
}

/// Lock-free view of the controller, readable while an operation holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    pub state: CameraState,
    pub format: StreamFormat,
    pub recording: bool,
}

struct StatusBoard {
    published: watch::Sender<Published>,
    last_error: StdMutex<Option<String>>,
}

impl StatusBoard {
    fn snapshot(&self) -> Published {
        *self.published.borrow()
    }

    fn state(&self) -> CameraState {
        self.published.borrow().state
    }

    fn set_state(&self, state: CameraState) {
        self.published.send_modify(|p| p.state = state);
    }

    fn set_format(&self, format: StreamFormat) {
        self.published.send_modify(|p| p.format = format);
    }

    fn set_recording(&self, recording: bool) {
        self.published.send_modify(|p| p.recording = recording);
    }

    fn set_error(&self, message: Option<String>) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = message;
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Producer-side fault. Only a running camera can fault; a stop that
    /// already moved the state on wins.
    fn fault(&self, err: CameraError) {
        let faulted = self.published.send_if_modified(|p| {
            if p.state == CameraState::Running {
                p.state = CameraState::Faulted;
                true
            } else {
                false
            }
        });
        if faulted {
            error!("camera faulted: {err}");
            self.set_error(Some(err.to_string()));
        }
    }
}

struct Controller {
    format: StreamFormat,
    producer: Option<ProducerHandle>,
    session: Option<RecordingSession>,
    /// Artifact of a session that `stop` had to finalize; handed out once.
    unclaimed: Option<Recording>,
}

/// Lifecycle controller: the only writer of camera state and the only caller
/// of device mode changes. Every operation runs under one exclusive lock;
/// status reads go through the published snapshot instead.
pub struct CameraService {
    settings: CameraSettings,
    device: SharedDevice,
    hub: Arc<FrameBroadcaster>,
    encoders: EncoderFactory,
    filter: ActiveFilter,
    board: Arc<StatusBoard>,
    ops: Mutex<Controller>,
}

impl CameraService {
    pub fn new(
        device: Box<dyn CameraDevice>,
        encoders: EncoderFactory,
        settings: CameraSettings,
    ) -> Self {
        let (published, _) = watch::channel(Published {
            state: CameraState::Stopped,
            format: settings.format,
            recording: false,
        });
        Self {
            hub: Arc::new(FrameBroadcaster::new(settings.subscriber_capacity)),
            device: Arc::new(Mutex::new(device)),
            encoders,
            filter: ActiveFilter::default(),
            board: Arc::new(StatusBoard {
                published,
                last_error: StdMutex::new(None),
            }),
            ops: Mutex::new(Controller {
                format: settings.format,
                producer: None,
                session: None,
                unclaimed: None,
            }),
            settings,
        }
    }

    pub async fn start(&self) -> Result<(), CameraError> {
        let mut ctl = self.ops.lock().await;
        self.start_locked(&mut ctl).await
    }

    /// Always reaches `Stopped`; hardware close errors only show up in status.
    pub async fn stop(&self) -> Result<(), CameraError> {
        let mut ctl = self.ops.lock().await;
        self.stop_locked(&mut ctl).await;
        Ok(())
    }

    pub async fn set_format(&self, format: StreamFormat) -> Result<(), CameraError> {
        let mut ctl = self.ops.lock().await;
        if ctl.session.is_some() {
            return Err(CameraError::InvalidTransition(
                "cannot switch format while recording".into(),
            ));
        }

        match self.board.state() {
            CameraState::Stopped => {
                ctl.format = format;
                self.board.set_format(format);
                info!("pending format set to {format}");
                Ok(())
            }
            CameraState::Running if ctl.format == format => Ok(()),
            CameraState::Running => {
                info!("switching format {} -> {format}", ctl.format);
                self.stop_locked(&mut ctl).await;
                ctl.format = format;
                self.board.set_format(format);
                self.start_locked(&mut ctl).await
            }
            state => Err(CameraError::InvalidTransition(format!(
                "cannot switch format while {state:?}"
            ))),
        }
    }

    /// Switches the device to still mode for one frame, then back to preview.
    /// The producer is paused for the duration by the device lock.
    pub async fn capture_still(&self, size: Option<(u32, u32)>) -> Result<Bytes, CameraError> {
        let ctl = self.ops.lock().await;
        if self.board.state() != CameraState::Running {
            return Err(CameraError::NotRunning);
        }
        let (width, height) = size.unwrap_or((self.settings.still_width, self.settings.still_height));
        let in_range = |side: u32| (1..=MAX_STILL_SIDE).contains(&side);
        if !in_range(width) || !in_range(height) {
            return Err(CameraError::CaptureFailed(format!(
                "invalid still size {width}x{height}"
            )));
        }

        let raw = {
            let mut device = self.device.lock().await;
            let captured = match device.switch_mode(DeviceMode::Still { width, height }).await {
                Ok(()) => device.capture_raw().await,
                Err(err) => Err(err),
            };
            if let Err(err) = device.switch_mode(DeviceMode::Preview).await {
                warn!("failed to restore preview mode after still capture: {err}");
            }
            captured.map_err(|err| CameraError::CaptureFailed(err.to_string()))?
        };
        drop(ctl);

        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let quality = self.settings.jpeg_quality;
        let filter = self.filter.get();
        let jpeg = tokio::task::spawn_blocking(move || {
            let mut rgb = formats::convert(&raw)?;
            filter.apply(&mut rgb);
            jpeg::stamp_text(&mut rgb, &stamp);
            jpeg::encode_jpeg(&rgb, quality)
        })
        .await
        .map_err(|err| CameraError::CaptureFailed(format!("encode task failed: {err}")))??;

        info!("still captured at {width}x{height} ({} bytes)", jpeg.len());
        Ok(jpeg)
    }

    pub async fn begin_recording(&self) -> Result<(), CameraError> {
        let mut ctl = self.ops.lock().await;
        if self.board.state() != CameraState::Running {
            return Err(CameraError::NotRunning);
        }
        if ctl.session.is_some() {
            return Err(CameraError::AlreadyRecording);
        }

        let subscriber = self.hub.subscribe().ok_or(CameraError::NotRunning)?;
        let session = RecordingSession::begin(
            (self.encoders)(),
            subscriber,
            &self.settings.recordings_dir,
            self.settings.fps,
        )
        .await?;

        if ctl.unclaimed.take().is_some() {
            info!("discarding unclaimed recording superseded by a new session");
        }
        ctl.session = Some(session);
        self.board.set_recording(true);
        Ok(())
    }

    pub async fn end_recording(&self) -> Result<Recording, CameraError> {
        let mut ctl = self.ops.lock().await;
        if let Some(session) = ctl.session.take() {
            self.board.set_recording(false);
            return session.finish().await;
        }
        ctl.unclaimed.take().ok_or(CameraError::NoActiveRecording)
    }

    pub fn subscribe(&self) -> Result<Subscriber, CameraError> {
        if self.board.state() != CameraState::Running {
            return Err(CameraError::NotRunning);
        }
        self.hub.subscribe().ok_or(CameraError::NotRunning)
    }

    pub fn status(&self) -> CameraStatus {
        let published = self.board.snapshot();
        let running = published.state == CameraState::Running;
        CameraStatus {
            running,
            state: published.state,
            fps: if running { self.hub.fps() } else { 0.0 },
            width: self.settings.width,
            height: self.settings.height,
            format: published.format,
            recording: published.recording,
            subscribers: self.hub.subscriber_count(),
            filter: self.filter.get(),
            last_frame_at: self.hub.latest().map(|frame| frame.captured_at),
            last_error: self.board.last_error(),
        }
    }

    pub fn formats(&self) -> (&'static [StreamFormat], StreamFormat) {
        (formats::supported(), self.board.snapshot().format)
    }

    pub fn filters(&self) -> (&'static [Filter], Filter) {
        (filters::supported(), self.filter.get())
    }

    /// Takes effect from the next produced frame; the device is untouched.
    pub fn set_filter(&self, filter: Filter) {
        let previous = self.filter.get();
        self.filter.set(filter);
        if previous != filter {
            info!("filter changed {previous} -> {filter}");
        }
    }

    #[cfg(test)]
    pub fn watch(&self) -> watch::Receiver<Published> {
        self.board.published.subscribe()
    }

    /// Deterministic teardown for the hosting process.
    pub async fn shutdown(&self) {
        info!("camera service shutting down");
        let mut ctl = self.ops.lock().await;
        self.stop_locked(&mut ctl).await;
        if ctl.unclaimed.take().is_some() {
            warn!("dropping unclaimed recording at shutdown");
        }
    }

    async fn start_locked(&self, ctl: &mut Controller) -> Result<(), CameraError> {
        match self.board.state() {
            CameraState::Running => return Ok(()),
            CameraState::Faulted => {
                return Err(CameraError::InvalidTransition(
                    "camera is faulted; stop it before starting again".into(),
                ));
            }
            _ => {}
        }

        self.board.set_state(CameraState::Starting);
        let config = DeviceConfig {
            format: ctl.format,
            width: self.settings.width,
            height: self.settings.height,
            fps: self.settings.fps,
        };
        let policy = self.settings.retry;
        let mut last_failure = String::new();

        for attempt in 1..=policy.max_attempts {
            let opened = {
                let mut device = self.device.lock().await;
                match device.open(&config).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if let Err(close_err) = device.close().await {
                            debug!("releasing half-open device failed: {close_err}");
                        }
                        Err(err)
                    }
                }
            };

            match opened {
                Ok(()) => {
                    self.launch_producer(ctl);
                    self.board.set_error(None);
                    self.board.set_state(CameraState::Running);
                    info!(
                        "camera running: {} {}x{} @ {} fps (attempt {attempt})",
                        config.format, config.width, config.height, config.fps
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "camera open attempt {attempt}/{} failed: {err}",
                        policy.max_attempts
                    );
                    last_failure = err.to_string();
                    if attempt < policy.max_attempts {
                        sleep(policy.delay(attempt)).await;
                    }
                }
            }
        }

        let err = CameraError::DeviceUnavailable {
            attempts: policy.max_attempts,
            message: last_failure,
        };
        error!("{err}");
        self.board.set_error(Some(err.to_string()));
        self.board.set_state(CameraState::Faulted);
        Err(err)
    }

    fn launch_producer(&self, ctl: &mut Controller) {
        self.hub.open();
        let board = self.board.clone();
        ctl.producer = Some(spawn_producer(
            self.device.clone(),
            self.hub.clone(),
            PipelineSettings::for_fps(
                self.settings.fps,
                self.settings.jpeg_quality,
                self.filter.clone(),
            ),
            move |err| board.fault(err),
        ));
    }

    async fn stop_locked(&self, ctl: &mut Controller) {
        if self.board.state() == CameraState::Stopped {
            return;
        }
        self.board.set_state(CameraState::Stopping);

        if let Some(producer) = ctl.producer.take() {
            producer.halt().await;
        }
        self.hub.close();

        if let Some(session) = ctl.session.take() {
            self.board.set_recording(false);
            match session.finish().await {
                Ok(recording) => {
                    info!(
                        "recording force-finalized by stop ({} bytes)",
                        recording.bytes.len()
                    );
                    ctl.unclaimed = Some(recording);
                }
                Err(err) => {
                    warn!("recording could not be finalized during stop: {err}");
                    self.board.set_error(Some(err.to_string()));
                }
            }
        }

        let closed = {
            let mut device = self.device.lock().await;
            if !device.is_open() {
                debug!("device already released before stop");
            }
            device.close().await
        };
        if let Err(err) = closed {
            warn!("camera close reported an error: {err}");
            self.board.set_error(Some(format!("close failed: {err}")));
        }
        self.board.set_state(CameraState::Stopped);
        info!("camera stopped");
    }
}
