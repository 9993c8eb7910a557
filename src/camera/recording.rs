use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use super::{broadcaster::Subscriber, error::CameraError, traits::VideoEncoder};

/// How long a session stopped before its first frame waits for one.
const FIRST_FRAME_GRACE: Duration = Duration::from_secs(2);

/// Finalized recording, read back into memory.
#[derive(Debug, Clone)]
pub struct Recording {
    pub bytes: Bytes,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub frames: u64,
}

struct WriterOutcome {
    encoder: Box<dyn VideoEncoder>,
    frames: u64,
    error: Option<anyhow::Error>,
}

/// An active recording: a broadcaster subscriber feeding a video encoder
/// that writes to a transient file.
pub struct RecordingSession {
    started_at: DateTime<Utc>,
    started: Instant,
    path: PathBuf,
    stop: watch::Sender<bool>,
    writer: JoinHandle<WriterOutcome>,
}

impl RecordingSession {
    pub async fn begin(
        mut encoder: Box<dyn VideoEncoder>,
        mut subscriber: Subscriber,
        dir: &Path,
        fps: u32,
    ) -> Result<Self, CameraError> {
        tokio::fs::create_dir_all(dir).await.map_err(|err| {
            CameraError::EncoderFailed(format!(
                "cannot create recordings dir {}: {err}",
                dir.display()
            ))
        })?;

        let started_at = Utc::now();
        let path = dir.join(format!(
            "recording-{}-{:08x}.mp4",
            started_at.format("%Y%m%d-%H%M%S"),
            rand::random::<u32>()
        ));
        encoder
            .start(&path, fps)
            .await
            .map_err(|err| CameraError::EncoderFailed(format!("{err:#}")))?;

        // Seed with the frame already on screen so even an immediate stop
        // produces a playable file.
        let mut frames = 0;
        if let Some(frame) = subscriber.take_pending() {
            if let Err(err) = encoder.push_frame(&frame.jpeg).await {
                let _ = encoder.finish().await;
                remove_transient(&path).await;
                return Err(CameraError::EncoderFailed(format!("{err:#}")));
            }
            frames = 1;
        }

        let (stop, stop_rx) = watch::channel(false);
        let writer = tokio::spawn(write_frames(encoder, subscriber, stop_rx, frames));
        info!("recording started: {}", path.display());

        Ok(Self {
            started_at,
            started: Instant::now(),
            path,
            stop,
            writer,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops the writer, finalizes the encoder and returns the file contents.
    /// The transient file is removed whether or not finalization succeeds.
    pub async fn finish(self) -> Result<Recording, CameraError> {
        let duration = self.started.elapsed();
        let _ = self.stop.send(true);

        let result = match self.writer.await {
            Ok(WriterOutcome {
                mut encoder,
                frames,
                error,
            }) => {
                let finished = encoder.finish().await;
                match (error, finished) {
                    (Some(err), _) | (None, Err(err)) => {
                        Err(CameraError::EncoderFailed(format!("{err:#}")))
                    }
                    (None, Ok(())) => read_artifact(&self.path).await.map(|bytes| (bytes, frames)),
                }
            }
            Err(err) => Err(CameraError::EncoderFailed(format!(
                "recording writer task failed: {err}"
            ))),
        };
        remove_transient(&self.path).await;

        let (bytes, frames) = result?;
        info!(
            "recording finished: {} frames, {} bytes, {:.1}s",
            frames,
            bytes.len(),
            duration.as_secs_f64()
        );
        Ok(Recording {
            bytes,
            started_at: self.started_at,
            duration,
            frames,
        })
    }
}

async fn write_frames(
    mut encoder: Box<dyn VideoEncoder>,
    mut subscriber: Subscriber,
    mut stop: watch::Receiver<bool>,
    mut frames: u64,
) -> WriterOutcome {
    let mut stream_ended = false;
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.changed() => break,
            frame = subscriber.recv() => frame,
        };
        let Some(frame) = frame else {
            stream_ended = true;
            break;
        };
        if let Err(err) = encoder.push_frame(&frame.jpeg).await {
            warn!("recording writer failed after {frames} frames: {err:#}");
            return WriterOutcome {
                encoder,
                frames,
                error: Some(err),
            };
        }
        frames += 1;
    }

    if frames == 0 && !stream_ended {
        debug!("recording stopped before its first frame, waiting for one");
        if let Ok(Some(frame)) = timeout(FIRST_FRAME_GRACE, subscriber.recv()).await {
            if let Err(err) = encoder.push_frame(&frame.jpeg).await {
                return WriterOutcome {
                    encoder,
                    frames,
                    error: Some(err),
                };
            }
            frames = 1;
        }
    }

    WriterOutcome {
        encoder,
        frames,
        error: None,
    }
}

async fn read_artifact(path: &Path) -> Result<Bytes, CameraError> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        CameraError::EncoderFailed(format!("cannot read {}: {err}", path.display()))
    })?;
    if bytes.is_empty() {
        return Err(CameraError::EncoderFailed("recording is empty".into()));
    }
    Ok(Bytes::from(bytes))
}

async fn remove_transient(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {}: {err}", path.display());
        }
    }
}
