//! Box geometry shared by the detector, tracker and annotation layers.

use serde::{Deserialize, Serialize};

/// Small constant guarding against division by zero for degenerate boxes.
const IOU_EPSILON: f32 = 1e-6;

/// Axis-aligned bounding box in pixel coordinates.
///
/// Invariant: `x1 < x2` and `y1 < y2` for boxes produced by the detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Geometric center, used as the tracker's summary point.
    pub fn center(&self) -> Point {
        Point {
            x: (self.x1 + self.x2) / 2.0,
            y: (self.y1 + self.y2) / 2.0,
        }
    }

    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Intersection-over-union of two boxes, in `[0, 1]`.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let xx1 = a.x1.max(b.x1);
    let yy1 = a.y1.max(b.y1);
    let xx2 = a.x2.min(b.x2);
    let yy2 = a.y2.min(b.y2);
    let w = (xx2 - xx1).max(0.0);
    let h = (yy2 - yy1).max(0.0);
    let inter = w * h;
    inter / (a.area() + b.area() - inter + IOU_EPSILON)
}

/// Tracker association metric: lower is a better match.
pub fn iou_distance(a: &BoundingBox, b: &BoundingBox) -> f32 {
    1.0 - iou(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_identical_boxes_is_one() {
        let b = BoundingBox::new(10.0, 10.0, 50.0, 50.0);
        assert!((iou(&b, &b) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn iou_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(100.0, 100.0, 110.0, 110.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn iou_degenerate_boxes_do_not_divide_by_zero() {
        let a = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        let b = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        assert!(iou(&a, &b).is_finite());
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn center_is_midpoint() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 20.0);
        let c = b.center();
        assert_eq!(c.x, 5.0);
        assert_eq!(c.y, 10.0);
    }

    #[test]
    fn distance_orders_candidates() {
        let det = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let near = BoundingBox::new(1.0, 1.0, 11.0, 11.0);
        let far = BoundingBox::new(8.0, 8.0, 18.0, 18.0);
        assert!(iou_distance(&det, &near) < iou_distance(&det, &far));
    }
}
