//! Per-camera workers, the registry that owns them, and the incident
//! aggregation loop.

pub mod aggregator;
pub mod registry;
pub mod worker;

pub use aggregator::{
    drain_incidents, ChannelSink, IncidentAggregator, IncidentEvent, LogSink, NotificationSink,
    DEFAULT_AGGREGATION_PERIOD,
};
pub use registry::WorkerRegistry;
pub use worker::{
    Assignment, CameraConfig, CameraWorker, CycleOutcome, Snapshot, WorkerHandle,
    DEFAULT_CONF_THRESHOLD, DEFAULT_INFER_INTERVAL, DEFAULT_SUPPRESSION_WINDOW,
};
