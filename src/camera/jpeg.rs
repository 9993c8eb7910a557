use bytes::Bytes;
use image::{ExtendedColorType, codecs::jpeg::JpegEncoder};

use super::{error::FrameError, formats::RgbFrame};

const GLYPH_W: usize = 3;
const GLYPH_H: usize = 5;

pub fn encode_jpeg(frame: &RgbFrame, quality: u8) -> Result<Bytes, FrameError> {
    let mut out = Vec::with_capacity(frame.data.len() / 8);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;
    Ok(Bytes::from(out))
}

/// Burns `text` into the bottom-left corner as white glyphs on a black band.
/// Only digits, `-`, `:`, `.` and space have glyphs; anything else renders blank.
pub fn stamp_text(frame: &mut RgbFrame, text: &str) {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let scale = (width / 320).max(1);
    let advance = (GLYPH_W + 1) * scale;
    let margin = 2 * scale;
    let band_h = GLYPH_H * scale + 2 * margin;
    if height < band_h || width < 2 * margin {
        return;
    }

    let band_top = height - band_h;
    let band_w = (text.chars().count() * advance + 2 * margin).min(width);
    for y in band_top..height {
        for x in 0..band_w {
            put(frame, x, y, [0, 0, 0]);
        }
    }

    for (i, ch) in text.chars().enumerate() {
        let rows = glyph(ch);
        let origin_x = margin + i * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = origin_x + col * scale + dx;
                        let y = band_top + margin + row * scale + dy;
                        if x < width {
                            put(frame, x, y, [255, 255, 255]);
                        }
                    }
                }
            }
        }
    }
}

fn put(frame: &mut RgbFrame, x: usize, y: usize, rgb: [u8; 3]) {
    let idx = (y * frame.width as usize + x) * 3;
    if let Some(px) = frame.data.get_mut(idx..idx + 3) {
        px.copy_from_slice(&rgb);
    }
}

fn glyph(ch: char) -> [u8; GLYPH_H] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => [0; GLYPH_H],
    }
}
