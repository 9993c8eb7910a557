use std::{fmt, str::FromStr};

use serde::{Serialize, Serializer};

use super::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    Yuv420,
    Bgr888,
    Rgb888,
    Nv12,
    Nv21,
    Yuyv,
    Uyvy,
    Gray8,
}

impl StreamFormat {
    pub const ALL: [StreamFormat; 8] = [
        StreamFormat::Yuv420,
        StreamFormat::Bgr888,
        StreamFormat::Rgb888,
        StreamFormat::Nv12,
        StreamFormat::Nv21,
        StreamFormat::Yuyv,
        StreamFormat::Uyvy,
        StreamFormat::Gray8,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StreamFormat::Yuv420 => "YUV420",
            StreamFormat::Bgr888 => "BGR888",
            StreamFormat::Rgb888 => "RGB888",
            StreamFormat::Nv12 => "NV12",
            StreamFormat::Nv21 => "NV21",
            StreamFormat::Yuyv => "YUYV",
            StreamFormat::Uyvy => "UYVY",
            StreamFormat::Gray8 => "GRAY8",
        }
    }

    /// Pixel format name understood by ffmpeg's `rawvideo` muxer.
    pub fn ffmpeg_pix_fmt(self) -> &'static str {
        match self {
            StreamFormat::Yuv420 => "yuv420p",
            StreamFormat::Bgr888 => "bgr24",
            StreamFormat::Rgb888 => "rgb24",
            StreamFormat::Nv12 => "nv12",
            StreamFormat::Nv21 => "nv21",
            StreamFormat::Yuyv => "yuyv422",
            StreamFormat::Uyvy => "uyvy422",
            StreamFormat::Gray8 => "gray",
        }
    }

    /// Size in bytes of one tightly packed frame, or `None` when it does not
    /// fit in `usize`.
    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let (w, h) = (width as usize, height as usize);
        let pixels = w.checked_mul(h)?;
        match self {
            StreamFormat::Yuv420 | StreamFormat::Nv12 | StreamFormat::Nv21 => {
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?;
                pixels.checked_add(chroma.checked_mul(2)?)
            }
            StreamFormat::Bgr888 | StreamFormat::Rgb888 => pixels.checked_mul(3),
            StreamFormat::Yuyv | StreamFormat::Uyvy => w.div_ceil(2).checked_mul(4)?.checked_mul(h),
            StreamFormat::Gray8 => Some(pixels),
        }
    }
}

/// Formats the registry can convert, in presentation order.
pub fn supported() -> &'static [StreamFormat] {
    &StreamFormat::ALL
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamFormat {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        StreamFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FrameError::UnknownFormat(wanted.to_owned()))
    }
}

impl Serialize for StreamFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct RawFrame {
    pub format: StreamFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Canonical interleaved RGB24 frame.
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

pub fn convert(raw: &RawFrame) -> Result<RgbFrame, FrameError> {
    if raw.width == 0 || raw.height == 0 {
        return Err(FrameError::EmptyFrame);
    }
    let oversized = FrameError::Oversized {
        width: raw.width,
        height: raw.height,
    };
    let expected = raw.format.frame_len(raw.width, raw.height);
    let rgb_len = StreamFormat::Rgb888.frame_len(raw.width, raw.height);
    let (Some(expected), Some(_)) = (expected, rgb_len) else {
        return Err(oversized);
    };
    if raw.data.len() < expected {
        return Err(FrameError::ShortFrame {
            format: raw.format,
            expected,
            actual: raw.data.len(),
        });
    }

    let (w, h) = (raw.width as usize, raw.height as usize);
    let src = &raw.data[..expected];
    let data = match raw.format {
        StreamFormat::Rgb888 => src.to_vec(),
        StreamFormat::Bgr888 => src
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        StreamFormat::Gray8 => src.iter().flat_map(|&g| [g, g, g]).collect(),
        StreamFormat::Yuv420 => {
            let cw = w.div_ceil(2);
            let chroma = cw * h.div_ceil(2);
            let (luma, rest) = src.split_at(w * h);
            let (u_plane, v_plane) = rest.split_at(chroma);
            planar_to_rgb(luma, w, h, |cx, cy| {
                (u_plane[cy * cw + cx], v_plane[cy * cw + cx])
            })
        }
        StreamFormat::Nv12 | StreamFormat::Nv21 => {
            let cw = w.div_ceil(2);
            let (luma, uv) = src.split_at(w * h);
            let swap = raw.format == StreamFormat::Nv21;
            planar_to_rgb(luma, w, h, |cx, cy| {
                let idx = (cy * cw + cx) * 2;
                if swap {
                    (uv[idx + 1], uv[idx])
                } else {
                    (uv[idx], uv[idx + 1])
                }
            })
        }
        StreamFormat::Yuyv | StreamFormat::Uyvy => {
            packed_to_rgb(src, w, h, raw.format == StreamFormat::Uyvy)
        }
    };

    Ok(RgbFrame {
        width: raw.width,
        height: raw.height,
        data,
    })
}

fn packed_row_len(width: usize) -> usize {
    width.div_ceil(2) * 4
}

fn planar_to_rgb(
    luma: &[u8],
    width: usize,
    height: usize,
    chroma_at: impl Fn(usize, usize) -> (u8, u8),
) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            let (u, v) = chroma_at(x / 2, y / 2);
            rgb.extend_from_slice(&yuv_to_rgb(luma[y * width + x], u, v));
        }
    }
    rgb
}

fn packed_to_rgb(src: &[u8], width: usize, height: usize, uyvy: bool) -> Vec<u8> {
    let row_len = packed_row_len(width);
    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in src.chunks_exact(row_len).take(height) {
        for (pair, macro_px) in row.chunks_exact(4).enumerate() {
            let (y0, u, y1, v) = if uyvy {
                (macro_px[1], macro_px[0], macro_px[3], macro_px[2])
            } else {
                (macro_px[0], macro_px[1], macro_px[2], macro_px[3])
            };
            rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
            if pair * 2 + 1 < width {
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
        }
    }
    rgb
}

// BT.601 full-range, 8.8 fixed point.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;
    [
        (y + ((v * 359) >> 8)).clamp(0, 255) as u8,
        (y - ((u * 88 + v * 183) >> 8)).clamp(0, 255) as u8,
        (y + ((u * 454) >> 8)).clamp(0, 255) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::{RawFrame, StreamFormat, convert};
    use crate::camera::error::FrameError;

    fn raw(format: StreamFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        RawFrame {
            format,
            width,
            height,
            data,
        }
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("nv21".parse::<StreamFormat>().ok(), Some(StreamFormat::Nv21));
        assert_eq!(" YUV420 ".parse::<StreamFormat>().ok(), Some(StreamFormat::Yuv420));
        assert!(matches!(
            "MJPEG".parse::<StreamFormat>(),
            Err(FrameError::UnknownFormat(name)) if name == "MJPEG"
        ));
    }

    #[test]
    fn frame_lengths_match_layouts() {
        assert_eq!(StreamFormat::Yuv420.frame_len(4, 2), Some(8 + 4));
        assert_eq!(StreamFormat::Nv12.frame_len(3, 3), Some(9 + 8));
        assert_eq!(StreamFormat::Yuyv.frame_len(4, 2), Some(16));
        assert_eq!(StreamFormat::Yuyv.frame_len(3, 1), Some(8));
        assert_eq!(StreamFormat::Bgr888.frame_len(2, 2), Some(12));
        assert_eq!(StreamFormat::Gray8.frame_len(2, 2), Some(4));
    }

    #[test]
    fn frame_length_reports_overflow() {
        assert_eq!(StreamFormat::Rgb888.frame_len(u32::MAX, u32::MAX), None);
        assert_eq!(StreamFormat::Yuv420.frame_len(u32::MAX, u32::MAX), None);
        assert_eq!(StreamFormat::Yuyv.frame_len(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let rgb = convert(&raw(StreamFormat::Bgr888, 1, 1, vec![1, 2, 3])).expect("convert");
        assert_eq!(rgb.data, vec![3, 2, 1]);
    }

    #[test]
    fn gray_expands_to_three_channels() {
        let rgb = convert(&raw(StreamFormat::Gray8, 2, 1, vec![10, 200])).expect("convert");
        assert_eq!(rgb.data, vec![10, 10, 10, 200, 200, 200]);
    }

    #[test]
    fn neutral_chroma_yields_gray_for_every_yuv_layout() {
        let cases = [
            (StreamFormat::Yuv420, vec![100, 100, 100, 100, 128, 128]),
            (StreamFormat::Nv12, vec![100, 100, 100, 100, 128, 128]),
            (StreamFormat::Nv21, vec![100, 100, 100, 100, 128, 128]),
            (StreamFormat::Yuyv, vec![100, 128, 100, 128, 100, 128, 100, 128]),
            (StreamFormat::Uyvy, vec![128, 100, 128, 100, 128, 100, 128, 100]),
        ];
        for (format, data) in cases {
            let rgb = convert(&raw(format, 2, 2, data)).expect("convert");
            assert_eq!(rgb.data.len(), 12, "{format}");
            assert!(rgb.data.iter().all(|&c| c == 100), "{format}: {:?}", rgb.data);
        }
    }

    #[test]
    fn nv21_reads_chroma_in_vu_order() {
        let nv12 = convert(&raw(StreamFormat::Nv12, 2, 2, vec![128, 128, 128, 128, 90, 240]))
            .expect("convert");
        let nv21 = convert(&raw(StreamFormat::Nv21, 2, 2, vec![128, 128, 128, 128, 240, 90]))
            .expect("convert");
        assert_eq!(nv12.data, nv21.data);
        assert!(nv12.data[0] > nv12.data[2], "strong V should push red above blue");
    }

    #[test]
    fn short_frame_is_rejected() {
        let err = convert(&raw(StreamFormat::Rgb888, 2, 2, vec![0; 5])).expect_err("too short");
        assert!(matches!(
            err,
            FrameError::ShortFrame {
                expected: 12,
                actual: 5,
                ..
            }
        ));
    }
}
