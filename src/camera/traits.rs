use std::{path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    error::DeviceError,
    formats::{RawFrame, StreamFormat},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub format: StreamFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Preview,
    Still { width: u32, height: u32 },
}

/// Exclusive handle to the camera hardware. Calls are never issued
/// concurrently; the controller serializes them behind its device mutex.
#[async_trait]
pub trait CameraDevice: Send {
    async fn open(&mut self, config: &DeviceConfig) -> Result<(), DeviceError>;
    /// Idempotent. The handle counts as closed afterwards even when an error is returned.
    async fn close(&mut self) -> Result<(), DeviceError>;
    async fn capture_raw(&mut self) -> Result<RawFrame, DeviceError>;
    async fn switch_mode(&mut self, mode: DeviceMode) -> Result<(), DeviceError>;
    fn is_open(&self) -> bool;
}

pub type SharedDevice = Arc<Mutex<Box<dyn CameraDevice>>>;

#[async_trait]
pub trait VideoEncoder: Send {
    async fn start(&mut self, output_path: &Path, fps: u32) -> Result<()>;
    async fn push_frame(&mut self, jpeg: &[u8]) -> Result<()>;
    /// Flushes and closes the output file.
    async fn finish(&mut self) -> Result<()>;
}

pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn VideoEncoder> + Send + Sync>;
