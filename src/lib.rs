//! SkyShield surveillance core.
//!
//! Real-time multi-camera pipeline: each camera gets a worker that reads
//! frames, runs detection, associates detections with tracks, and publishes
//! an annotated snapshot plus deduplicated incidents. A registry owns the
//! workers and a single aggregation loop forwards new incidents to a
//! notification sink.
//!
//! # Module Structure
//!
//! - `geometry`: bounding boxes and IoU
//! - `frame`: RGB frames, annotation, JPEG encoding
//! - `capture`: frame sources (synthetic, optional GStreamer RTSP)
//! - `detect`: detector backends behind the `ObjectDetector` trait
//! - `track`: IoU tracker with hit-inertia lifecycle
//! - `pipeline`: per-camera workers, the registry, incident aggregation
//! - `storage`: SQLite-backed incident store
//! - `config`: JSON config file with environment overrides

pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod pipeline;
pub mod storage;
pub mod track;

pub use capture::{open_source, CaptureSource, SourceSpec, SyntheticSource};
pub use config::SkyshieldConfig;
pub use detect::{Detection, FrameDiffBackend, ObjectDetector, ScriptedBackend};
pub use frame::Frame;
pub use geometry::{iou, BoundingBox, Point};
pub use pipeline::{
    CameraConfig, CameraWorker, ChannelSink, IncidentAggregator, IncidentEvent, LogSink,
    NotificationSink, Snapshot, WorkerHandle, WorkerRegistry,
};
pub use storage::{
    InMemoryIncidentStore, IncidentRecord, IncidentStore, NewIncident, SqliteIncidentStore,
};
pub use track::{IoUTracker, TrackerConfig, TrackerUpdate};
