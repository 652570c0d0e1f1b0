//! Raw frames and annotation.
//!
//! A `Frame` is the unit handed from a capture source to the worker loop.
//! Annotation never touches shared pipeline state: callers copy the frame
//! out under the worker's lock and draw on their own copy.

use anyhow::{anyhow, Result};

use crate::geometry::BoundingBox;

/// Default JPEG quality for annotated frames and thumbnails.
pub const JPEG_QUALITY: u8 = 80;

/// Thumbnails are bounded to this size, shrinking only (aspect preserved).
pub const THUMBNAIL_MAX_WIDTH: u32 = 320;
pub const THUMBNAIL_MAX_HEIGHT: u32 = 240;

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const GLYPH_WIDTH: u32 = 8;
const GLYPH_HEIGHT: u32 = 12;

/// One RGB8 frame as produced by a capture source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number within the owning source.
    pub seq: u64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, seq: u64) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame pixel buffer size mismatch: got {}, expected {} for {}x{} RGB",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            seq,
        })
    }

    /// Solid-color frame, used by synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], seq: u64) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            pixels,
            width,
            height,
            seq,
        }
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.pixels[idx..idx + 3].copy_from_slice(&rgb);
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y * self.width + x) * 3) as usize;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    /// Fill a rectangle, clamped to the frame. Used by synthetic sources.
    pub fn fill_rect(&mut self, bbox: &BoundingBox, rgb: [u8; 3]) {
        let x1 = bbox.x1.max(0.0) as u32;
        let y1 = bbox.y1.max(0.0) as u32;
        let x2 = (bbox.x2.max(0.0) as u32).min(self.width);
        let y2 = (bbox.y2.max(0.0) as u32).min(self.height);
        for y in y1..y2 {
            for x in x1..x2 {
                self.put_pixel(x, y, rgb);
            }
        }
    }

    /// Draw a 2px box outline plus a text label above the box.
    ///
    /// The label renders with the embedded bitmap font; characters without a
    /// glyph advance the cursor without drawing.
    pub fn draw_annotation(&mut self, bbox: &BoundingBox, text: &str) {
        self.draw_box_outline(bbox, 2, BOX_COLOR);
        let x = bbox.x1.max(0.0) as u32;
        let y_box = bbox.y1.max(0.0) as u32;
        let y = y_box.saturating_sub(GLYPH_HEIGHT + 2);
        self.draw_text(x, y, text, BOX_COLOR);
    }

    fn draw_box_outline(&mut self, bbox: &BoundingBox, thickness: u32, rgb: [u8; 3]) {
        let x1 = bbox.x1.max(0.0) as u32;
        let y1 = bbox.y1.max(0.0) as u32;
        let x2 = (bbox.x2.max(0.0) as u32).min(self.width.saturating_sub(1));
        let y2 = (bbox.y2.max(0.0) as u32).min(self.height.saturating_sub(1));
        if x2 <= x1 || y2 <= y1 {
            return;
        }
        for t in 0..thickness {
            for x in x1..=x2 {
                self.put_pixel(x, y1 + t, rgb);
                self.put_pixel(x, y2.saturating_sub(t), rgb);
            }
            for y in y1..=y2 {
                self.put_pixel(x1 + t, y, rgb);
                self.put_pixel(x2.saturating_sub(t), y, rgb);
            }
        }
    }

    fn draw_text(&mut self, start_x: u32, start_y: u32, text: &str, rgb: [u8; 3]) {
        let mut x = start_x;
        for ch in text.chars() {
            if x + GLYPH_WIDTH >= self.width {
                break;
            }
            if let Some(pattern) = glyph(ch.to_ascii_lowercase()) {
                for (row, bits) in pattern.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (bits >> (7 - col)) & 1 == 1 {
                            self.put_pixel(x + col, start_y + row as u32, rgb);
                        }
                    }
                }
            }
            x += GLYPH_WIDTH;
        }
    }

    /// Encode the frame as JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let img = self.to_rgb_image()?;
        let mut out = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        img.write_with_encoder(encoder)?;
        Ok(out)
    }

    /// Encode a thumbnail bounded to 320x240, shrinking only.
    pub fn encode_thumbnail_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let img = self.to_rgb_image()?;
        let (tw, th) = thumbnail_dimensions(self.width, self.height);
        let small = image::imageops::thumbnail(&img, tw, th);
        let mut out = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        small.write_with_encoder(encoder)?;
        Ok(out)
    }

    fn to_rgb_image(&self) -> Result<image::RgbImage> {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

fn thumbnail_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= THUMBNAIL_MAX_WIDTH && height <= THUMBNAIL_MAX_HEIGHT {
        return (width.max(1), height.max(1));
    }
    let scale_w = THUMBNAIL_MAX_WIDTH as f32 / width as f32;
    let scale_h = THUMBNAIL_MAX_HEIGHT as f32 / height as f32;
    let scale = scale_w.min(scale_h);
    (
        ((width as f32 * scale) as u32).max(1),
        ((height as f32 * scale) as u32).max(1),
    )
}

/// 8x12 bitmap glyphs covering the character set of annotation labels:
/// lowercase letters, digits and the punctuation used by the label format.
fn glyph(ch: char) -> Option<[u8; 12]> {
    let pattern = match ch {
        ' ' => [0x00; 12],
        'a' => [0x00, 0x00, 0x00, 0x3C, 0x02, 0x3E, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'b' => [0x00, 0x40, 0x40, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x62, 0x5C, 0x00, 0x00],
        'c' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x40, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'd' => [0x00, 0x02, 0x02, 0x3A, 0x46, 0x42, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'e' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x7E, 0x40, 0x40, 0x42, 0x3C, 0x00, 0x00],
        'f' => [0x00, 0x0C, 0x10, 0x10, 0x7C, 0x10, 0x10, 0x10, 0x10, 0x10, 0x00, 0x00],
        'g' => [0x00, 0x00, 0x00, 0x3A, 0x46, 0x42, 0x46, 0x3A, 0x02, 0x3C, 0x00, 0x00],
        'h' => [0x00, 0x40, 0x40, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'i' => [0x00, 0x08, 0x00, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'j' => [0x00, 0x04, 0x00, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x44, 0x38, 0x00, 0x00],
        'k' => [0x00, 0x40, 0x40, 0x44, 0x48, 0x70, 0x48, 0x44, 0x42, 0x41, 0x00, 0x00],
        'l' => [0x00, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        'm' => [0x00, 0x00, 0x00, 0x76, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x00, 0x00],
        'n' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x42, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00],
        'o' => [0x00, 0x00, 0x00, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        'p' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x42, 0x62, 0x5C, 0x40, 0x40, 0x00, 0x00],
        'q' => [0x00, 0x00, 0x00, 0x3A, 0x46, 0x42, 0x46, 0x3A, 0x02, 0x02, 0x00, 0x00],
        'r' => [0x00, 0x00, 0x00, 0x5C, 0x62, 0x40, 0x40, 0x40, 0x40, 0x40, 0x00, 0x00],
        's' => [0x00, 0x00, 0x00, 0x3E, 0x40, 0x3C, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        't' => [0x00, 0x10, 0x10, 0x7C, 0x10, 0x10, 0x10, 0x10, 0x10, 0x0C, 0x00, 0x00],
        'u' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x42, 0x42, 0x46, 0x3A, 0x00, 0x00],
        'v' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x24, 0x24, 0x18, 0x18, 0x00, 0x00],
        'w' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x5A, 0x66, 0x42, 0x42, 0x00, 0x00],
        'x' => [0x00, 0x00, 0x00, 0x42, 0x24, 0x18, 0x18, 0x24, 0x42, 0x42, 0x00, 0x00],
        'y' => [0x00, 0x00, 0x00, 0x42, 0x42, 0x42, 0x26, 0x1A, 0x02, 0x3C, 0x00, 0x00],
        'z' => [0x00, 0x00, 0x00, 0x7E, 0x04, 0x08, 0x10, 0x20, 0x40, 0x7E, 0x00, 0x00],
        '0' => [0x00, 0x3C, 0x42, 0x46, 0x4A, 0x52, 0x62, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '1' => [0x00, 0x08, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x3E, 0x00, 0x00],
        '2' => [0x00, 0x3C, 0x42, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x7E, 0x00, 0x00],
        '3' => [0x00, 0x3C, 0x42, 0x02, 0x1C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '4' => [0x00, 0x04, 0x0C, 0x14, 0x24, 0x44, 0x7E, 0x04, 0x04, 0x04, 0x00, 0x00],
        '5' => [0x00, 0x7E, 0x40, 0x40, 0x7C, 0x02, 0x02, 0x02, 0x42, 0x3C, 0x00, 0x00],
        '6' => [0x00, 0x1C, 0x20, 0x40, 0x7C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '7' => [0x00, 0x7E, 0x02, 0x04, 0x08, 0x08, 0x10, 0x10, 0x20, 0x20, 0x00, 0x00],
        '8' => [0x00, 0x3C, 0x42, 0x42, 0x3C, 0x42, 0x42, 0x42, 0x42, 0x3C, 0x00, 0x00],
        '9' => [0x00, 0x3C, 0x42, 0x42, 0x42, 0x3E, 0x02, 0x04, 0x08, 0x70, 0x00, 0x00],
        ':' => [0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x18, 0x18, 0x00, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x7E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x7E, 0x00],
        _ => return None,
    };
    Some(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 640, 480, 0).is_err());
    }

    #[test]
    fn annotation_draws_box_outline() {
        let mut frame = Frame::filled(64, 64, [0, 0, 0], 0);
        frame.draw_annotation(&BoundingBox::new(20.0, 20.0, 40.0, 40.0), "person id:1 0.90");
        assert_eq!(frame.pixel(20, 20), BOX_COLOR);
        assert_eq!(frame.pixel(39, 39), BOX_COLOR);
        // Interior untouched.
        assert_eq!(frame.pixel(30, 30), [0, 0, 0]);
    }

    #[test]
    fn annotation_does_not_mutate_source_copy() {
        let frame = Frame::filled(64, 64, [10, 10, 10], 0);
        let mut copy = frame.clone();
        copy.draw_annotation(&BoundingBox::new(5.0, 20.0, 30.0, 40.0), "car id:2 0.51");
        assert_eq!(frame.pixel(5, 20), [10, 10, 10]);
    }

    #[test]
    fn jpeg_roundtrip_has_content() -> Result<()> {
        let frame = Frame::filled(32, 24, [128, 64, 32], 0);
        let jpeg = frame.encode_jpeg(JPEG_QUALITY)?;
        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn thumbnail_shrinks_large_frames_only() {
        assert_eq!(thumbnail_dimensions(640, 480), (320, 240));
        assert_eq!(thumbnail_dimensions(1920, 1080), (320, 180));
        assert_eq!(thumbnail_dimensions(160, 120), (160, 120));
    }

    #[test]
    fn label_charset_has_glyphs() {
        for ch in "abcdefghijklmnopqrstuvwxyz0123456789:. -_".chars() {
            assert!(glyph(ch).is_some(), "missing glyph for {:?}", ch);
        }
    }
}
