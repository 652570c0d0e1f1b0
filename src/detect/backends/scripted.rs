use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::ObjectDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Scripted backend for tests and fixtures.
///
/// Pops one pre-seeded detection list per frame; once the script is
/// exhausted it returns empty results. Threshold filtering still applies,
/// so sub-threshold script entries are dropped like real detections.
pub struct ScriptedBackend {
    script: VecDeque<Vec<Detection>>,
    /// When set, `infer` fails after the script runs out instead of
    /// returning empty results. Exercises cycle-failure handling.
    fail_when_exhausted: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self {
            script: script.into(),
            fail_when_exhausted: false,
        }
    }

    pub fn failing_when_exhausted(mut self) -> Self {
        self.fail_when_exhausted = true;
        self
    }
}

impl ObjectDetector for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        match self.script.pop_front() {
            Some(detections) => Ok(detections
                .into_iter()
                .filter(|d| d.confidence >= confidence_threshold)
                .collect()),
            None if self.fail_when_exhausted => {
                Err(anyhow!("scripted backend: script exhausted"))
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;

    #[test]
    fn threshold_filters_low_confidence() -> Result<()> {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.3, "person");
        let mut backend = ScriptedBackend::new(vec![vec![det]]);
        let frame = Frame::filled(32, 32, [0, 0, 0], 0);
        let out = backend.infer(&frame, 0.45)?;
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn exhausted_script_is_empty_unless_failing() -> Result<()> {
        let frame = Frame::filled(32, 32, [0, 0, 0], 0);
        let mut quiet = ScriptedBackend::new(vec![]);
        assert!(quiet.infer(&frame, 0.5)?.is_empty());

        let mut failing = ScriptedBackend::new(vec![]).failing_when_exhausted();
        assert!(failing.infer(&frame, 0.5).is_err());
        Ok(())
    }
}
