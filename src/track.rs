//! Multi-object tracking with IoU matching.
//!
//! The tracker turns per-frame detection sets into stable identities. It
//! only guarantees geometric continuity: the payload carried through each
//! track is an opaque index into the cycle's raw detection list, which the
//! worker uses to recover the label and confidence of the detection behind
//! the most recent match.

use crate::geometry::{iou_distance, BoundingBox};

#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Match accepted when `1 - IoU` is below this. Lower is stricter.
    pub distance_threshold: f32,
    /// Hit inertia assigned to fresh tracks; also the miss budget a track
    /// starts with.
    pub hit_inertia_min: u32,
    /// Cap on accumulated hit inertia, bounding how many consecutive misses
    /// a long-lived track survives.
    pub hit_inertia_max: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.7,
            hit_inertia_min: 3,
            hit_inertia_max: 30,
        }
    }
}

/// One detection prepared for association: geometry plus an opaque payload
/// pointing back at the cycle's raw detection list.
#[derive(Clone, Copy, Debug)]
pub struct TrackInput {
    pub bbox: BoundingBox,
    pub detection_index: usize,
}

/// A track that matched (or was seeded by) a detection in the current cycle.
#[derive(Clone, Copy, Debug)]
pub struct TrackView {
    pub track_id: u64,
    pub bbox: BoundingBox,
    /// Index into the detection list passed to this `update` call.
    pub detection_index: usize,
}

/// Result of one tracker update.
#[derive(Clone, Debug, Default)]
pub struct TrackerUpdate {
    /// Tracks re-linked to a current-cycle detection, ready for incident
    /// evaluation and annotation.
    pub matched: Vec<TrackView>,
    /// Ids of tracks destroyed this cycle. Callers evict per-track state
    /// (e.g. last-alert timestamps) with these.
    pub removed: Vec<u64>,
}

struct Track {
    id: u64,
    bbox: BoundingBox,
    hit_inertia: u32,
    /// Detection index from the current cycle, cleared at the start of each
    /// update. `None` means the track went unmatched this cycle.
    last_detection: Option<usize>,
}

/// IoU tracker with monotone track ids.
///
/// Ids are assigned from a counter and never reused while the instance
/// lives, even after the original track is destroyed.
pub struct IoUTracker {
    config: TrackerConfig,
    next_id: u64,
    tracks: Vec<Track>,
}

impl IoUTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            tracks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Associate one cycle's detections with existing tracks.
    ///
    /// Greedy best-first assignment: all (detection, track) pairs under the
    /// distance threshold are sorted by distance and consumed in order, so
    /// each detection and each track is matched at most once. Unmatched
    /// detections seed new tracks that are reported from the same cycle.
    pub fn update(&mut self, inputs: &[TrackInput]) -> TrackerUpdate {
        for track in &mut self.tracks {
            track.last_detection = None;
        }

        let mut pairs: Vec<(f32, usize, usize)> = Vec::new();
        for (input_idx, input) in inputs.iter().enumerate() {
            for (track_idx, track) in self.tracks.iter().enumerate() {
                let distance = iou_distance(&input.bbox, &track.bbox);
                if distance < self.config.distance_threshold {
                    pairs.push((distance, input_idx, track_idx));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut input_used = vec![false; inputs.len()];
        let mut track_used = vec![false; self.tracks.len()];
        for (_, input_idx, track_idx) in pairs {
            if input_used[input_idx] || track_used[track_idx] {
                continue;
            }
            input_used[input_idx] = true;
            track_used[track_idx] = true;
            let track = &mut self.tracks[track_idx];
            track.bbox = inputs[input_idx].bbox;
            track.hit_inertia = (track.hit_inertia + 1).min(self.config.hit_inertia_max);
            track.last_detection = Some(inputs[input_idx].detection_index);
        }

        // Unmatched tracks burn inertia.
        for (track_idx, track) in self.tracks.iter_mut().enumerate() {
            if !track_used[track_idx] {
                track.hit_inertia = track.hit_inertia.saturating_sub(1);
            }
        }

        // Unmatched detections seed new tracks.
        for (input_idx, input) in inputs.iter().enumerate() {
            if input_used[input_idx] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track {
                id,
                bbox: input.bbox,
                hit_inertia: self.config.hit_inertia_min,
                last_detection: Some(input.detection_index),
            });
        }

        let mut removed = Vec::new();
        self.tracks.retain(|track| {
            if track.hit_inertia == 0 {
                removed.push(track.id);
                false
            } else {
                true
            }
        });

        let matched = self
            .tracks
            .iter()
            .filter_map(|track| {
                track.last_detection.map(|detection_index| TrackView {
                    track_id: track.id,
                    bbox: track.bbox,
                    detection_index,
                })
            })
            .collect();

        TrackerUpdate { matched, removed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(bbox: BoundingBox, detection_index: usize) -> TrackInput {
        TrackInput {
            bbox,
            detection_index,
        }
    }

    #[test]
    fn overlapping_detections_keep_the_same_id() {
        let mut tracker = IoUTracker::new(TrackerConfig::default());
        let first = tracker.update(&[input(BoundingBox::new(100.0, 100.0, 200.0, 200.0), 0)]);
        assert_eq!(first.matched.len(), 1);
        let id = first.matched[0].track_id;

        // IoU ~0.9 with the previous box.
        let second = tracker.update(&[input(BoundingBox::new(103.0, 103.0, 203.0, 203.0), 0)]);
        assert_eq!(second.matched.len(), 1);
        assert_eq!(second.matched[0].track_id, id);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn disjoint_detection_seeds_a_new_track() {
        let mut tracker = IoUTracker::new(TrackerConfig::default());
        let first = tracker.update(&[input(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 0)]);
        let second = tracker.update(&[input(BoundingBox::new(400.0, 400.0, 450.0, 450.0), 0)]);
        assert_ne!(first.matched[0].track_id, second.matched[0].track_id);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn ids_are_never_reused_by_a_live_instance() {
        let mut tracker = IoUTracker::new(TrackerConfig {
            hit_inertia_min: 1,
            ..TrackerConfig::default()
        });
        let mut seen = std::collections::HashSet::new();
        for i in 0..20 {
            // Boxes far enough apart that every cycle kills the old track
            // (inertia 1) and seeds a fresh one.
            let offset = (i * 500) as f32;
            let update = tracker.update(&[input(
                BoundingBox::new(offset, 0.0, offset + 50.0, 50.0),
                0,
            )]);
            for view in &update.matched {
                assert!(seen.insert(view.track_id), "track id reused");
            }
        }
    }

    #[test]
    fn track_dies_after_inertia_is_spent_and_is_reported() {
        let config = TrackerConfig {
            hit_inertia_min: 2,
            ..TrackerConfig::default()
        };
        let mut tracker = IoUTracker::new(config);
        let seeded = tracker.update(&[input(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 0)]);
        let id = seeded.matched[0].track_id;

        let miss1 = tracker.update(&[]);
        assert!(miss1.removed.is_empty());
        assert!(miss1.matched.is_empty());

        let miss2 = tracker.update(&[]);
        assert_eq!(miss2.removed, vec![id]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn inertia_accumulates_up_to_the_cap() {
        let config = TrackerConfig {
            hit_inertia_min: 2,
            hit_inertia_max: 4,
            ..TrackerConfig::default()
        };
        let mut tracker = IoUTracker::new(config);
        let b = BoundingBox::new(10.0, 10.0, 60.0, 60.0);
        for _ in 0..10 {
            tracker.update(&[input(b, 0)]);
        }
        // Capped at 4: survives exactly 4 misses, not 10.
        for _ in 0..3 {
            assert!(tracker.update(&[]).removed.is_empty());
        }
        assert_eq!(tracker.update(&[]).removed.len(), 1);
    }

    #[test]
    fn unmatched_track_is_excluded_from_the_cycle_output() {
        let mut tracker = IoUTracker::new(TrackerConfig::default());
        tracker.update(&[input(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 0)]);

        // Different corner of the scene: old track misses, new one seeds.
        let update = tracker.update(&[input(BoundingBox::new(300.0, 300.0, 350.0, 350.0), 0)]);
        assert_eq!(update.matched.len(), 1);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn greedy_matching_assigns_each_track_once() {
        let mut tracker = IoUTracker::new(TrackerConfig::default());
        tracker.update(&[
            input(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 0),
            input(BoundingBox::new(200.0, 0.0, 300.0, 100.0), 1),
        ]);
        let update = tracker.update(&[
            input(BoundingBox::new(5.0, 0.0, 105.0, 100.0), 0),
            input(BoundingBox::new(205.0, 0.0, 305.0, 100.0), 1),
        ]);
        assert_eq!(update.matched.len(), 2);
        let ids: std::collections::HashSet<u64> =
            update.matched.iter().map(|view| view.track_id).collect();
        assert_eq!(ids.len(), 2, "two tracks must not collapse onto one");
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn detection_indices_point_into_the_current_cycle() {
        let mut tracker = IoUTracker::new(TrackerConfig::default());
        tracker.update(&[input(BoundingBox::new(0.0, 0.0, 50.0, 50.0), 0)]);
        let inputs = [
            input(BoundingBox::new(2.0, 2.0, 52.0, 52.0), 0),
            input(BoundingBox::new(300.0, 300.0, 350.0, 350.0), 1),
        ];
        let update = tracker.update(&inputs);
        for view in &update.matched {
            assert!(view.detection_index < inputs.len());
            assert_eq!(
                inputs[view.detection_index].bbox, view.bbox,
                "payload must reference the matched detection"
            );
        }
    }
}
