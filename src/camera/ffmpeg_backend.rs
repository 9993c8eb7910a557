use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};
use tracing::{debug, warn};

use super::{
    error::DeviceError,
    formats::RawFrame,
    traits::{CameraDevice, DeviceConfig, DeviceMode, VideoEncoder},
};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 camera read through an `ffmpeg` child emitting raw frames on stdout.
pub struct FfmpegDevice {
    device: String,
    config: Option<DeviceConfig>,
    mode: DeviceMode,
    active_size: (u32, u32),
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    primed: Option<Vec<u8>>,
}

impl FfmpegDevice {
    pub fn new(device: String) -> Self {
        Self {
            device,
            config: None,
            mode: DeviceMode::Preview,
            active_size: (0, 0),
            child: None,
            stdout: None,
            primed: None,
        }
    }

    fn capture_args(&self, config: &DeviceConfig, width: u32, height: u32) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "v4l2".into(),
            "-framerate".into(),
            config.fps.to_string(),
            "-video_size".into(),
            format!("{width}x{height}"),
            "-i".into(),
            self.device.clone(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            config.format.ffmpeg_pix_fmt().into(),
            "pipe:1".into(),
        ]
    }

    async fn launch(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        let config = self.config.ok_or(DeviceError::NotOpen)?;
        let len = frame_len(&config, width, height)?;
        let mut child = Command::new("ffmpeg")
            .args(self.capture_args(&config, width, height))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| DeviceError::Open(format!("failed to spawn ffmpeg: {err}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::Open("missing ffmpeg stdout pipe".into()))?;

        let mut first = vec![0_u8; len];
        match timeout(FIRST_FRAME_TIMEOUT, stdout.read_exact(&mut first)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                let reason = drain_stderr(&mut child).await;
                reap(&mut child).await;
                return Err(classify_failure(&self.device, reason, err));
            }
            Err(_) => {
                reap(&mut child).await;
                return Err(DeviceError::Timeout);
            }
        }

        if let Some(stderr) = child.stderr.take() {
            let device = self.device.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("ffmpeg[{device}]: {line}");
                }
            });
        }

        debug!("ffmpeg capture running on {} at {width}x{height}", self.device);
        self.child = Some(child);
        self.stdout = Some(stdout);
        self.primed = Some(first);
        self.active_size = (width, height);
        Ok(())
    }

    async fn halt(&mut self) -> Result<(), DeviceError> {
        self.stdout = None;
        self.primed = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let killed = child.kill().await;
        let waited = child.wait().await;
        killed?;
        waited?;
        Ok(())
    }

    fn mode_size(&self, config: &DeviceConfig, mode: DeviceMode) -> (u32, u32) {
        match mode {
            DeviceMode::Preview => (config.width, config.height),
            DeviceMode::Still { width, height } => (width, height),
        }
    }
}

#[async_trait]
impl CameraDevice for FfmpegDevice {
    async fn open(&mut self, config: &DeviceConfig) -> Result<(), DeviceError> {
        if self.child.is_some() {
            self.halt().await?;
        }
        self.config = Some(*config);
        self.mode = DeviceMode::Preview;
        if let Err(err) = self.launch(config.width, config.height).await {
            self.config = None;
            return Err(err);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.config = None;
        self.mode = DeviceMode::Preview;
        self.halt().await
    }

    async fn capture_raw(&mut self) -> Result<RawFrame, DeviceError> {
        let config = self.config.ok_or(DeviceError::NotOpen)?;
        let (width, height) = self.active_size;
        let data = match self.primed.take() {
            Some(frame) => frame,
            None => {
                let stdout = self.stdout.as_mut().ok_or(DeviceError::NotOpen)?;
                let mut frame = vec![0_u8; frame_len(&config, width, height)?];
                match timeout(FRAME_TIMEOUT, stdout.read_exact(&mut frame)).await {
                    Ok(Ok(_)) => frame,
                    Ok(Err(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Err(DeviceError::Disconnected);
                    }
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => return Err(DeviceError::Timeout),
                }
            }
        };

        Ok(RawFrame {
            format: config.format,
            width,
            height,
            data,
        })
    }

    async fn switch_mode(&mut self, mode: DeviceMode) -> Result<(), DeviceError> {
        let config = self.config.ok_or(DeviceError::NotOpen)?;
        let size = self.mode_size(&config, mode);
        if self.mode == mode && self.active_size == size && self.child.is_some() {
            return Ok(());
        }

        self.halt().await?;
        self.launch(size.0, size.1).await?;
        self.mode = mode;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }
}

async fn drain_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut output = String::new();
    let _ = timeout(Duration::from_secs(1), stderr.read_to_string(&mut output)).await;
    output.trim().to_owned()
}

async fn reap(child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!("ffmpeg child already gone: {err}");
    }
    let _ = child.wait().await;
}

fn classify_failure(device: &str, stderr: String, err: std::io::Error) -> DeviceError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("resource busy") || lowered.contains("device or resource busy") {
        return DeviceError::Busy(device.to_owned());
    }
    if stderr.is_empty() {
        DeviceError::Open(format!("{device}: {err}"))
    } else {
        DeviceError::Open(format!("{device}: {stderr}"))
    }
}

/// MP4 writer fed with JPEG frames over stdin. Frames are stamped with
/// wall-clock arrival time so the output duration follows real time.
#[derive(Default)]
pub struct FfmpegEncoder {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

fn encoder_args(output_path: &Path, fps: u32) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-use_wallclock_as_timestamps".into(),
        "1".into(),
        "-f".into(),
        "mjpeg".into(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-fps_mode".into(),
        "cfr".into(),
        "-r".into(),
        fps.to_string(),
        "-movflags".into(),
        "+faststart".into(),
        "-y".into(),
        output_path.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn start(&mut self, output_path: &Path, fps: u32) -> Result<()> {
        if self.child.is_some() {
            bail!("encoder already started");
        }
        let mut child = Command::new("ffmpeg")
            .args(encoder_args(output_path, fps))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffmpeg encoder process")?;
        self.stdin = Some(child.stdin.take().context("missing ffmpeg stdin pipe")?);
        self.child = Some(child);
        Ok(())
    }

    async fn push_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().context("encoder not started")?;
        stdin
            .write_all(jpeg)
            .await
            .context("failed to feed frame to ffmpeg encoder")?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.take().context("encoder not started")?;
        let status = child
            .wait()
            .await
            .context("failed to wait for ffmpeg encoder")?;
        if !status.success() {
            bail!("ffmpeg encoder exited with {status}");
        }
        Ok(())
    }
}

fn frame_len(config: &DeviceConfig, width: u32, height: u32) -> Result<usize, DeviceError> {
    config
        .format
        .frame_len(width, height)
        .ok_or_else(|| DeviceError::Open(format!("frame size {width}x{height} is too large")))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::camera::{
        error::DeviceError,
        formats::StreamFormat,
        traits::{CameraDevice, DeviceConfig, DeviceMode},
    };

    use super::{FfmpegDevice, classify_failure, encoder_args};

    fn config() -> DeviceConfig {
        DeviceConfig {
            format: StreamFormat::Nv21,
            width: 640,
            height: 480,
            fps: 15,
        }
    }

    #[test]
    fn capture_args_request_raw_frames_in_stream_format() {
        let device = FfmpegDevice::new("/dev/video2".to_string());
        let args = device.capture_args(&config(), 640, 480);
        let joined = args.join(" ");
        assert!(joined.contains("-i /dev/video2"));
        assert!(joined.contains("-video_size 640x480"));
        assert!(joined.contains("-framerate 15"));
        assert!(joined.contains("-f rawvideo -pix_fmt nv21 pipe:1"));
    }

    #[test]
    fn encoder_args_write_faststart_mp4() {
        let args = encoder_args(Path::new("/tmp/out.mp4"), 30);
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert!(args.join(" ").contains("-movflags +faststart"));
        assert!(args.join(" ").contains("-r 30"));
    }

    #[test]
    fn busy_stderr_maps_to_busy_error() {
        let err = classify_failure(
            "/dev/video0",
            "/dev/video0: Device or resource busy".to_string(),
            std::io::ErrorKind::UnexpectedEof.into(),
        );
        assert!(matches!(err, DeviceError::Busy(path) if path == "/dev/video0"));
    }

    #[tokio::test]
    async fn unopened_device_rejects_capture_and_mode_switch() {
        let mut device = FfmpegDevice::new("/dev/video0".to_string());
        assert!(matches!(
            device.capture_raw().await,
            Err(DeviceError::NotOpen)
        ));
        assert!(matches!(
            device.switch_mode(DeviceMode::Preview).await,
            Err(DeviceError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_without_open() {
        let mut device = FfmpegDevice::new("/dev/video0".to_string());
        device.close().await.expect("first close");
        device.close().await.expect("second close");
        assert!(!device.is_open());
    }
}
