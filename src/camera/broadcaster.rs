//! Single-producer, many-subscriber distribution of encoded frames.
//!
//! One producer task owns every hardware capture while the camera runs.
//! HTTP streams and the recording writer only attach a [`Subscriber`]; each
//! subscriber has its own bounded queue and loses its oldest frames when it
//! falls behind, so a slow viewer never stalls capture or other viewers.

use std::{
    collections::VecDeque,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use super::{
    error::{CameraError, DeviceError},
    filters::{ActiveFilter, Filter},
    formats::{self, RawFrame},
    jpeg,
    traits::SharedDevice,
};

const FPS_WINDOW: usize = 30;

#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub jpeg: Bytes,
    pub captured_at: DateTime<Utc>,
}

pub struct FrameBroadcaster {
    capacity: usize,
    tx: RwLock<Option<broadcast::Sender<Frame>>>,
    latest: RwLock<Option<Frame>>,
    fps_milli: AtomicU64,
}

impl FrameBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tx: RwLock::new(None),
            latest: RwLock::new(None),
            fps_milli: AtomicU64::new(0),
        }
    }

    /// Accepts subscribers until the next [`close`](Self::close).
    pub fn open(&self) {
        let mut tx = self.tx.write().unwrap_or_else(PoisonError::into_inner);
        if tx.is_none() {
            *tx = Some(broadcast::channel(self.capacity).0);
        }
    }

    /// Ends every subscriber's stream once it has drained its queue.
    pub fn close(&self) {
        let closed = self
            .tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = closed {
            debug!("closing broadcaster with {} subscribers", tx.receiver_count());
        }
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.fps_milli.store(0, Ordering::Relaxed);
    }

    /// Returns how many subscribers the frame was queued for.
    pub fn publish(&self, frame: Frame) -> usize {
        let tx = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return 0;
        };
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(frame.clone());
        tx.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Option<Subscriber> {
        let tx = self.tx.read().unwrap_or_else(PoisonError::into_inner);
        let rx = tx.as_ref()?.subscribe();
        let pending = self.latest();
        Some(Subscriber {
            rx,
            pending,
            last_seq: 0,
            dropped: 0,
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    pub fn latest(&self) -> Option<Frame> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fps(&self) -> f64 {
        self.fps_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    fn set_fps(&self, fps: f64) {
        self.fps_milli
            .store((fps * 1000.0).round() as u64, Ordering::Relaxed);
    }
}

pub struct Subscriber {
    rx: broadcast::Receiver<Frame>,
    pending: Option<Frame>,
    last_seq: u64,
    dropped: u64,
}

impl Subscriber {
    /// Next frame in capture order, or `None` once the broadcaster closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        if let Some(frame) = self.take_pending() {
            return Some(frame);
        }

        loop {
            match self.rx.recv().await {
                Ok(frame) if frame.seq <= self.last_seq => continue,
                Ok(frame) => {
                    self.last_seq = frame.seq;
                    return Some(frame);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    debug!("subscriber lagged, dropped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The latest frame captured before this subscriber attached, if any.
    pub fn take_pending(&mut self) -> Option<Frame> {
        let frame = self.pending.take()?;
        self.last_seq = frame.seq;
        Some(frame)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub interval: Duration,
    pub jpeg_quality: u8,
    pub filter: ActiveFilter,
}

impl PipelineSettings {
    pub fn for_fps(fps: u32, jpeg_quality: u8, filter: ActiveFilter) -> Self {
        Self {
            interval: Duration::from_secs(1) / fps.max(1),
            jpeg_quality,
            filter,
        }
    }
}

pub struct ProducerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProducerHandle {
    /// Signals the loop and waits for it to exit.
    pub async fn halt(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!("frame producer task panicked: {err}");
        }
    }
}

pub fn spawn_producer<F>(
    device: SharedDevice,
    hub: Arc<FrameBroadcaster>,
    settings: PipelineSettings,
    on_fault: F,
) -> ProducerHandle
where
    F: FnOnce(CameraError) + Send + 'static,
{
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let capture_loop = tokio::spawn(run_producer(
            device.clone(),
            hub.clone(),
            settings,
            shutdown_rx,
        ));
        let fault = match capture_loop.await {
            Ok(fault) => fault,
            Err(err) if err.is_panic() => {
                error!("frame producer panicked");
                Some(CameraError::CaptureFailed("frame producer panicked".into()))
            }
            Err(err) => {
                error!("frame producer cancelled: {err}");
                Some(CameraError::CaptureFailed(format!("frame producer cancelled: {err}")))
            }
        };

        if let Some(err) = fault {
            hub.close();
            release(&device).await;
            on_fault(err);
        }
    });
    ProducerHandle { shutdown, task }
}

/// Closes the device after a fault so the hardware is not held while the
/// camera waits in `Faulted` for a stop.
async fn release(device: &SharedDevice) {
    if let Err(err) = device.lock().await.close().await {
        warn!("closing device after producer fault failed: {err}");
    }
}

/// Capture loop. Returns the error that ended it, or `None` on shutdown.
async fn run_producer(
    device: SharedDevice,
    hub: Arc<FrameBroadcaster>,
    settings: PipelineSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Option<CameraError> {
    let mut seq = 0_u64;
    let mut meter = FpsMeter::new(FPS_WINDOW);
    info!(
        "frame producer started, interval {:?}",
        settings.interval
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        let started = Instant::now();

        let raw = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            raw = capture(&device) => raw,
        };

        let encoded = match raw {
            Ok(raw) => encode(raw, settings.jpeg_quality, settings.filter.get()).await,
            Err(err) => Err(CameraError::CaptureFailed(err.to_string())),
        };
        let jpeg = match encoded {
            Ok(jpeg) => jpeg,
            Err(err) => {
                error!("frame producer stopped after {seq} frames: {err}");
                return Some(err);
            }
        };

        seq += 1;
        hub.publish(Frame {
            seq,
            jpeg,
            captured_at: Utc::now(),
        });
        meter.tick(Instant::now());
        hub.set_fps(meter.fps());

        if let Some(rest) = settings.interval.checked_sub(started.elapsed()) {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(rest) => {}
            }
        }
    }

    info!("frame producer halted after {seq} frames");
    None
}

async fn capture(device: &SharedDevice) -> Result<RawFrame, DeviceError> {
    device.lock().await.capture_raw().await
}

async fn encode(raw: RawFrame, quality: u8, filter: Filter) -> Result<Bytes, CameraError> {
    tokio::task::spawn_blocking(move || {
        let mut rgb = formats::convert(&raw)?;
        filter.apply(&mut rgb);
        jpeg::encode_jpeg(&rgb, quality)
    })
    .await
    .map_err(|err| CameraError::CaptureFailed(format!("encode task failed: {err}")))?
    .map_err(CameraError::from)
}

/// Rolling frame rate over the last `window` frames.
struct FpsMeter {
    window: usize,
    stamps: VecDeque<Instant>,
}

impl FpsMeter {
    fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            stamps: VecDeque::with_capacity(window),
        }
    }

    fn tick(&mut self, now: Instant) {
        if self.stamps.len() == self.window {
            self.stamps.pop_front();
        }
        self.stamps.push_back(now);
    }

    fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.stamps.front(), self.stamps.back()) else {
            return 0.0;
        };
        let span = last.duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return 0.0;
        }
        (self.stamps.len() - 1) as f64 / span
    }
}
