use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// One object found in one frame.
///
/// Detections are ephemeral: the worker owns them for a single processing
/// cycle and discards them after track association.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Confidence score in `[0, 1]`.
    pub confidence: f32,
    /// Class label, e.g. "person".
    pub label: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, label: &str) -> Self {
        Self {
            bbox,
            confidence,
            label: label.to_string(),
        }
    }
}
