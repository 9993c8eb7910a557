//! Colour effects applied to RGB frames before JPEG encoding. The active
//! filter is switched at runtime without touching the device.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use serde::{Serialize, Serializer};

use super::{error::FrameError, formats::RgbFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    None,
    Grayscale,
    Invert,
    Sepia,
}

impl Filter {
    pub const ALL: [Filter; 4] = [
        Filter::None,
        Filter::Grayscale,
        Filter::Invert,
        Filter::Sepia,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Filter::None => "none",
            Filter::Grayscale => "grayscale",
            Filter::Invert => "invert",
            Filter::Sepia => "sepia",
        }
    }

    pub fn apply(self, frame: &mut RgbFrame) {
        match self {
            Filter::None => {}
            Filter::Invert => frame.data.iter_mut().for_each(|v| *v = 255 - *v),
            Filter::Grayscale => {
                for px in frame.data.chunks_exact_mut(3) {
                    let y = luma(px[0], px[1], px[2]);
                    px.copy_from_slice(&[y, y, y]);
                }
            }
            Filter::Sepia => {
                for px in frame.data.chunks_exact_mut(3) {
                    let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                    px[0] = ((r * 101 + g * 197 + b * 48) >> 8).min(255) as u8;
                    px[1] = ((r * 89 + g * 176 + b * 43) >> 8).min(255) as u8;
                    px[2] = ((r * 70 + g * 137 + b * 34) >> 8).min(255) as u8;
                }
            }
        }
    }

    fn index(self) -> u8 {
        match self {
            Filter::None => 0,
            Filter::Grayscale => 1,
            Filter::Invert => 2,
            Filter::Sepia => 3,
        }
    }
}

pub fn supported() -> &'static [Filter] {
    &Filter::ALL
}

// BT.601 weights, 8-bit fixed point.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8) as u8
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filter {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        Filter::ALL
            .into_iter()
            .find(|filter| filter.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FrameError::UnknownFilter(wanted.to_owned()))
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Shared handle to the filter the pipeline applies to every frame.
#[derive(Debug, Clone, Default)]
pub struct ActiveFilter(Arc<AtomicU8>);

impl ActiveFilter {
    pub fn get(&self) -> Filter {
        let index = self.0.load(Ordering::Relaxed) as usize;
        Filter::ALL.get(index).copied().unwrap_or_default()
    }

    pub fn set(&self, filter: Filter) {
        self.0.store(filter.index(), Ordering::Relaxed);
    }
}
