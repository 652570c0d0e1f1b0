use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Object detector backend.
///
/// Each camera worker owns one backend instance; `infer` runs synchronously
/// inside the worker's loop and must never be called while the worker's
/// snapshot lock is held.
pub trait ObjectDetector: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations drop candidates below `confidence_threshold`; callers
    /// can rely on every returned detection clearing the threshold.
    fn infer(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook (model load, first-inference compilation).
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
