//! Synthetic test pattern generator
//!
//! Last-resort source: renders the wall-clock time (`HH:MM:SS`, UTC) as large
//! digits on a luma plane so the pipeline never runs dry.

use super::capturer::{CaptureError, FrameSource};
use super::frame::OverlaySnapshot;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// 3x5 glyphs for digits 0-9 and ':' (bit 2 = left column)
const GLYPHS: [[u8; 5]; 11] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
    [0b000, 0b010, 0b000, 0b010, 0b000], // :
];

const BACKGROUND: u8 = 16;
const FOREGROUND: u8 = 235;

pub struct SyntheticSource {
    width: usize,
    height: usize,
}

impl SyntheticSource {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width: width.max(8) as usize,
            height: height.max(8) as usize,
        }
    }

    /// Current UTC time as `HH:MM:SS`
    pub fn clock_text() -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            % 86_400;
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
    }

    /// Render `text` centred on a fresh luma plane
    pub fn render(&self, text: &str) -> Vec<u8> {
        let mut plane = vec![BACKGROUND; self.width * self.height];
        let glyphs: Vec<&[u8; 5]> = text.chars().filter_map(glyph_for).collect();
        if glyphs.is_empty() {
            return plane;
        }

        // 4 columns per glyph (3 + spacing), 5 rows
        let cols = glyphs.len() * 4;
        let scale = (self.width / (cols + 2)).min(self.height / 7).max(1);
        let origin_x = self.width.saturating_sub(cols * scale) / 2;
        let origin_y = self.height.saturating_sub(5 * scale) / 2;

        for (i, glyph) in glyphs.iter().enumerate() {
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..3 {
                    if bits & (0b100 >> col) == 0 {
                        continue;
                    }
                    let x0 = origin_x + (i * 4 + col) * scale;
                    let y0 = origin_y + row * scale;
                    for y in y0..(y0 + scale).min(self.height) {
                        let start = y * self.width + x0.min(self.width);
                        let end = y * self.width + (x0 + scale).min(self.width);
                        plane[start..end].fill(FOREGROUND);
                    }
                }
            }
        }
        plane
    }
}

fn glyph_for(c: char) -> Option<&'static [u8; 5]> {
    match c {
        '0'..='9' => GLYPHS.get(c as usize - '0' as usize),
        ':' => GLYPHS.get(10),
        _ => None,
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capture(&mut self, _overlay: &OverlaySnapshot) -> Result<Bytes, CaptureError> {
        Ok(Bytes::from(self.render(&Self::clock_text())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_text_format() {
        let text = SyntheticSource::clock_text();
        assert_eq!(text.len(), 8);
        assert_eq!(&text[2..3], ":");
        assert_eq!(&text[5..6], ":");
    }

    #[test]
    fn render_draws_digits() {
        let source = SyntheticSource::new(160, 120);
        let plane = source.render("12:34:56");
        assert_eq!(plane.len(), 160 * 120);
        assert!(plane.iter().any(|&p| p == FOREGROUND));
        assert!(plane.iter().any(|&p| p == BACKGROUND));
    }

    #[test]
    fn render_differs_per_text() {
        let source = SyntheticSource::new(64, 48);
        assert_ne!(source.render("00:00:00"), source.render("11:11:11"));
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let source = SyntheticSource::new(1, 1);
        let plane = source.render("23:59:59");
        assert_eq!(plane.len(), 64);
    }
}
