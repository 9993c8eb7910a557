//! Scriptable stand-ins for the camera and the video encoder.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::{
    error::DeviceError,
    formats::RawFrame,
    test_pattern::TestPatternDevice,
    traits::{CameraDevice, DeviceConfig, DeviceMode, VideoEncoder},
};

#[derive(Debug, Default)]
struct ProbeState {
    open_failures_left: u32,
    fail_capture_after: Option<u32>,
    fail_close: bool,
    fail_still: bool,
    panic_on_capture: bool,
    opens: u32,
    open_attempts: u32,
    closes: u32,
    captures: u32,
    is_open: bool,
    modes: Vec<DeviceMode>,
    last_config: Option<DeviceConfig>,
}

/// Shared view into a [`ScriptedDevice`] for arranging failures and
/// asserting on the calls it received.
#[derive(Debug, Clone, Default)]
pub struct DeviceProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl DeviceProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().expect("probe lock poisoned")
    }

    pub fn fail_opens(&self, count: u32) {
        self.lock().open_failures_left = count;
    }

    pub fn fail_capture_after(&self, frames: u32) {
        self.lock().fail_capture_after = Some(frames);
    }

    pub fn fail_close(&self) {
        self.lock().fail_close = true;
    }

    pub fn fail_still(&self) {
        self.lock().fail_still = true;
    }

    pub fn panic_on_capture(&self) {
        self.lock().panic_on_capture = true;
    }

    pub fn open_attempts(&self) -> u32 {
        self.lock().open_attempts
    }

    pub fn opens(&self) -> u32 {
        self.lock().opens
    }

    pub fn closes(&self) -> u32 {
        self.lock().closes
    }

    pub fn captures(&self) -> u32 {
        self.lock().captures
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open
    }

    pub fn modes(&self) -> Vec<DeviceMode> {
        self.lock().modes.clone()
    }

    pub fn last_config(&self) -> Option<DeviceConfig> {
        self.lock().last_config
    }
}

pub struct ScriptedDevice {
    probe: DeviceProbe,
    frames: TestPatternDevice,
}

impl ScriptedDevice {
    pub fn new(probe: DeviceProbe) -> Self {
        Self {
            probe,
            frames: TestPatternDevice::new(),
        }
    }
}

#[async_trait]
impl CameraDevice for ScriptedDevice {
    async fn open(&mut self, config: &DeviceConfig) -> Result<(), DeviceError> {
        {
            let mut state = self.probe.lock();
            state.open_attempts += 1;
            if state.open_failures_left > 0 {
                state.open_failures_left -= 1;
                // A half-opened handle that the caller must release.
                state.is_open = true;
                return Err(DeviceError::Busy("scripted".into()));
            }
            state.opens += 1;
            state.is_open = true;
            state.last_config = Some(*config);
        }
        self.frames.open(config).await
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        let fail = {
            let mut state = self.probe.lock();
            state.closes += 1;
            state.is_open = false;
            state.fail_close
        };
        self.frames.close().await?;
        if fail {
            return Err(DeviceError::Io(std::io::Error::other("scripted close failure")));
        }
        Ok(())
    }

    async fn capture_raw(&mut self) -> Result<RawFrame, DeviceError> {
        let panics = self.probe.lock().panic_on_capture;
        if panics {
            panic!("scripted capture panic");
        }
        {
            let mut state = self.probe.lock();
            if let Some(limit) = state.fail_capture_after {
                if state.captures >= limit {
                    return Err(DeviceError::Disconnected);
                }
            }
            state.captures += 1;
        }
        self.frames.capture_raw().await
    }

    async fn switch_mode(&mut self, mode: DeviceMode) -> Result<(), DeviceError> {
        {
            let mut state = self.probe.lock();
            state.modes.push(mode);
            if state.fail_still && matches!(mode, DeviceMode::Still { .. }) {
                return Err(DeviceError::Busy("scripted still".into()));
            }
        }
        self.frames.switch_mode(mode).await
    }

    fn is_open(&self) -> bool {
        self.frames.is_open()
    }
}

/// Encoder that concatenates every pushed JPEG into the output file.
#[derive(Debug, Default)]
pub struct MockEncoder {
    fail_start: bool,
    output: Option<PathBuf>,
    buffer: Vec<u8>,
    frames: Arc<Mutex<u32>>,
}

impl MockEncoder {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn counting(frames: Arc<Mutex<u32>>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }
}

#[async_trait]
impl VideoEncoder for MockEncoder {
    async fn start(&mut self, output_path: &Path, _fps: u32) -> Result<()> {
        if self.fail_start {
            bail!("scripted encoder failure");
        }
        self.output = Some(output_path.to_path_buf());
        Ok(())
    }

    async fn push_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(jpeg);
        *self.frames.lock().expect("frame counter poisoned") += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let output = self.output.take().context("encoder not started")?;
        tokio::fs::write(&output, &self.buffer).await?;
        Ok(())
    }
}
