use async_trait::async_trait;

use super::{
    error::DeviceError,
    formats::{RawFrame, StreamFormat},
    traits::{CameraDevice, DeviceConfig, DeviceMode},
};

/// Synthetic camera producing a scrolling gradient in any supported format.
/// Selected with `CAMERA_DEVICE=test`; useful on machines without a camera.
#[derive(Debug, Default)]
pub struct TestPatternDevice {
    config: Option<DeviceConfig>,
    size: (u32, u32),
    tick: u32,
}

impl TestPatternDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CameraDevice for TestPatternDevice {
    async fn open(&mut self, config: &DeviceConfig) -> Result<(), DeviceError> {
        check_size(config.format, config.width, config.height)?;
        self.config = Some(*config);
        self.size = (config.width, config.height);
        self.tick = 0;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.config = None;
        Ok(())
    }

    async fn capture_raw(&mut self) -> Result<RawFrame, DeviceError> {
        let config = self.config.ok_or(DeviceError::NotOpen)?;
        let (width, height) = self.size;
        self.tick = self.tick.wrapping_add(1);
        Ok(RawFrame {
            format: config.format,
            width,
            height,
            data: synthesize(config.format, width, height, self.tick),
        })
    }

    async fn switch_mode(&mut self, mode: DeviceMode) -> Result<(), DeviceError> {
        let config = self.config.ok_or(DeviceError::NotOpen)?;
        let (width, height) = match mode {
            DeviceMode::Preview => (config.width, config.height),
            DeviceMode::Still { width, height } => (width, height),
        };
        check_size(config.format, width, height)?;
        self.size = (width, height);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.config.is_some()
    }
}

fn check_size(format: StreamFormat, width: u32, height: u32) -> Result<(), DeviceError> {
    match format.frame_len(width, height) {
        Some(_) => Ok(()),
        None => Err(DeviceError::Open(format!(
            "frame size {width}x{height} is too large"
        ))),
    }
}

pub fn synthesize(format: StreamFormat, width: u32, height: u32, tick: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let shade = |x: usize, y: usize| ((x + y + tick as usize) % 256) as u8;
    let len = format.frame_len(width, height).unwrap_or(0);
    let mut data = Vec::with_capacity(len);

    match format {
        StreamFormat::Rgb888 | StreamFormat::Bgr888 => {
            for y in 0..h {
                for x in 0..w {
                    let v = shade(x, y);
                    data.extend_from_slice(&[v, v.wrapping_add(85), v.wrapping_add(170)]);
                }
            }
        }
        StreamFormat::Gray8 | StreamFormat::Yuv420 | StreamFormat::Nv12 | StreamFormat::Nv21 => {
            for y in 0..h {
                for x in 0..w {
                    data.push(shade(x, y));
                }
            }
        }
        StreamFormat::Yuyv | StreamFormat::Uyvy => {
            for y in 0..h {
                for pair in 0..w.div_ceil(2) {
                    let luma = shade(pair * 2, y);
                    if format == StreamFormat::Yuyv {
                        data.extend_from_slice(&[luma, 128, luma, 128]);
                    } else {
                        data.extend_from_slice(&[128, luma, 128, luma]);
                    }
                }
            }
        }
    }

    // Neutral chroma for the planar layouts.
    data.resize(len, 128);
    data
}
