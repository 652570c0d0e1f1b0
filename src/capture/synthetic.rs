//! Synthetic capture source for tests and demos.
//!
//! Produces deterministic RGB frames with a single bright block moving
//! horizontally across a dark background, so the frame-differencing detector
//! has something to find. Open and read failures can be scripted to exercise
//! the worker's backoff paths.

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use rand::Rng;

use crate::capture::{CaptureSource, SourceSpec};
use crate::frame::Frame;
use crate::geometry::BoundingBox;

const BLOCK_SIZE: f32 = 48.0;
const BLOCK_STEP: f32 = 4.0;
/// Sparse sensor-style noise per frame. Amplitude stays well below the
/// frame-diff backend's pixel delta, so noise alone never reads as motion.
const NOISE_PIXELS: u32 = 256;
const NOISE_AMPLITUDE: u8 = 6;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    open: bool,
    seq: u64,
    /// Remaining scripted open failures, consumed before `open` succeeds.
    open_failures: u32,
    /// Scripted read outcomes; `false` entries fail before real frames resume.
    read_script: VecDeque<bool>,
}

impl SyntheticSource {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            open: false,
            seq: 0,
            open_failures: 0,
            read_script: VecDeque::new(),
        }
    }

    pub fn from_spec(spec: &SourceSpec) -> Self {
        let name = match spec {
            SourceSpec::Uri(uri) => uri
                .strip_prefix("synthetic://")
                .unwrap_or(uri.as_str())
                .to_string(),
            SourceSpec::Device(index) => format!("device-{}", index),
        };
        Self::new(&name, 640, 480)
    }

    /// Fail the next `count` calls to `open`.
    pub fn with_open_failures(mut self, count: u32) -> Self {
        self.open_failures = count;
        self
    }

    /// Fail the next `count` calls to `read` once open.
    pub fn with_read_failures(mut self, count: u32) -> Self {
        for _ in 0..count {
            self.read_script.push_back(false);
        }
        self
    }

    /// Bounding box of the moving block at a given sequence number.
    pub fn block_at(&self, seq: u64) -> BoundingBox {
        let travel = (self.width as f32 - BLOCK_SIZE).max(1.0);
        let x = (seq as f32 * BLOCK_STEP) % travel;
        let y = (self.height as f32 - BLOCK_SIZE) / 2.0;
        BoundingBox::new(x, y, x + BLOCK_SIZE, y + BLOCK_SIZE)
    }
}

impl CaptureSource for SyntheticSource {
    fn open(&mut self) -> Result<()> {
        if self.open_failures > 0 {
            self.open_failures -= 1;
            return Err(anyhow!("synthetic source {}: open failed (scripted)", self.name));
        }
        self.open = true;
        log::info!("synthetic source {} opened ({}x{})", self.name, self.width, self.height);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("synthetic source {}: not open", self.name));
        }
        if let Some(ok) = self.read_script.pop_front() {
            if !ok {
                return Err(anyhow!("synthetic source {}: read failed (scripted)", self.name));
            }
        }
        let seq = self.seq;
        self.seq += 1;
        let mut frame = Frame::filled(self.width, self.height, [16, 16, 16], seq);
        frame.fill_rect(&self.block_at(seq), [220, 220, 220]);
        let mut rng = rand::thread_rng();
        for _ in 0..NOISE_PIXELS {
            let x = rng.gen_range(0..self.width);
            let y = rng.gen_range(0..self.height);
            let [r, g, b] = frame.pixel(x, y);
            let jitter = rng.gen_range(0..=NOISE_AMPLITUDE);
            frame.put_pixel(
                x,
                y,
                [
                    r.saturating_add(jitter),
                    g.saturating_add(jitter),
                    b.saturating_add(jitter),
                ],
            );
        }
        Ok(frame)
    }

    fn close(&mut self) {
        if self.open {
            log::info!("synthetic source {} closed after {} frames", self.name, self.seq);
        }
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_frames_once_open() -> Result<()> {
        let mut source = SyntheticSource::new("test", 320, 240);
        assert!(source.read().is_err());
        source.open()?;
        let a = source.read()?;
        let b = source.read()?;
        assert_eq!(a.seq, 0);
        assert_eq!(b.seq, 1);
        assert_ne!(a.pixels, b.pixels, "block must move between frames");
        Ok(())
    }

    #[test]
    fn scripted_failures_then_recovery() -> Result<()> {
        let mut source = SyntheticSource::new("flaky", 320, 240)
            .with_open_failures(2)
            .with_read_failures(1);
        assert!(source.open().is_err());
        assert!(source.open().is_err());
        source.open()?;
        assert!(source.read().is_err());
        assert!(source.read().is_ok());
        Ok(())
    }

    #[test]
    fn close_releases_the_source() -> Result<()> {
        let mut source = SyntheticSource::new("test", 320, 240);
        source.open()?;
        source.close();
        assert!(!source.is_open());
        assert!(source.read().is_err());
        Ok(())
    }
}
