use anyhow::Result;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::geometry::BoundingBox;

/// Per-channel delta above which a pixel counts as changed.
const PIXEL_DELTA: u8 = 40;
/// Minimum changed-pixel count before a detection is emitted.
const MIN_CHANGED_PIXELS: u32 = 64;

/// Frame-differencing backend.
///
/// Compares each frame against the previous one and emits a single "motion"
/// detection covering the bounding box of changed pixels. No model required,
/// which makes it the default backend for synthetic cameras and demos.
/// Confidence scales with the changed-pixel fraction.
pub struct FrameDiffBackend {
    previous: Option<Frame>,
}

impl FrameDiffBackend {
    pub fn new() -> Self {
        Self { previous: None }
    }
}

impl Default for FrameDiffBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDetector for FrameDiffBackend {
    fn name(&self) -> &'static str {
        "frame-diff"
    }

    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let previous = self.previous.replace(frame.clone());
        let Some(previous) = previous else {
            return Ok(Vec::new());
        };
        if previous.width != frame.width || previous.height != frame.height {
            return Ok(Vec::new());
        }

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut changed = 0u32;

        for y in 0..frame.height {
            for x in 0..frame.width {
                let a = frame.pixel(x, y);
                let b = previous.pixel(x, y);
                let delta = a
                    .iter()
                    .zip(b.iter())
                    .map(|(p, q)| p.abs_diff(*q))
                    .max()
                    .unwrap_or(0);
                if delta >= PIXEL_DELTA {
                    changed += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if changed < MIN_CHANGED_PIXELS {
            return Ok(Vec::new());
        }

        let total = (frame.width * frame.height).max(1) as f32;
        // Saturates well below full-frame change; a moving object covering
        // a few percent of the frame should score high.
        let confidence = (changed as f32 / (total * 0.02)).min(1.0);
        if confidence < confidence_threshold {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as f32,
            min_y as f32,
            (max_x + 1) as f32,
            (max_y + 1) as f32,
        );
        Ok(vec![Detection::new(bbox, confidence, "motion")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_yields_nothing() -> Result<()> {
        let mut backend = FrameDiffBackend::new();
        let frame = Frame::filled(64, 64, [10, 10, 10], 0);
        assert!(backend.infer(&frame, 0.1)?.is_empty());
        Ok(())
    }

    #[test]
    fn moving_block_is_detected_with_tight_box() -> Result<()> {
        let mut backend = FrameDiffBackend::new();
        let base = Frame::filled(64, 64, [10, 10, 10], 0);
        backend.infer(&base, 0.1)?;

        let mut moved = base.clone();
        moved.fill_rect(&BoundingBox::new(20.0, 20.0, 36.0, 36.0), [250, 250, 250]);
        let out = backend.infer(&moved, 0.1)?;
        assert_eq!(out.len(), 1);
        let det = &out[0];
        assert_eq!(det.label, "motion");
        assert!(det.bbox.x1 >= 19.0 && det.bbox.x2 <= 37.0);
        assert!(det.bbox.y1 >= 19.0 && det.bbox.y2 <= 37.0);
        Ok(())
    }

    #[test]
    fn static_scene_yields_nothing() -> Result<()> {
        let mut backend = FrameDiffBackend::new();
        let frame = Frame::filled(64, 64, [10, 10, 10], 0);
        backend.infer(&frame, 0.1)?;
        assert!(backend.infer(&frame, 0.1)?.is_empty());
        Ok(())
    }
}
