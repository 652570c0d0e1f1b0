//! Incident aggregation loop.
//!
//! A single background thread sweeps every registered worker on a fixed
//! period, persists whatever new incidents their snapshots yield, and
//! publishes each record to a notification sink. Delivery is fire-and-forget;
//! a sink failure is logged and never blocks persistence.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::pipeline::registry::WorkerRegistry;
use crate::storage::{IncidentRecord, IncidentStore};

pub const DEFAULT_AGGREGATION_PERIOD: Duration = Duration::from_secs(1);

/// Outward-facing form of a persisted incident.
///
/// The thumbnail is a web path under `/thumbnails/`; the timestamp is
/// RFC 3339 so downstream consumers never parse a local format.
#[derive(Clone, Debug, Serialize)]
pub struct IncidentEvent {
    pub id: i64,
    pub camera_id: i64,
    pub label: String,
    pub confidence: f32,
    pub track_id: u64,
    pub thumbnail: String,
    pub timestamp: String,
}

impl IncidentEvent {
    pub fn from_record(record: &IncidentRecord) -> Self {
        let file = record
            .thumbnail_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| record.thumbnail_path.to_string_lossy().into_owned());
        Self {
            id: record.id,
            camera_id: record.camera_id,
            label: record.label.clone(),
            confidence: record.confidence,
            track_id: record.track_id,
            thumbnail: format!("/thumbnails/{}", file),
            timestamp: record.created_at.to_rfc3339(),
        }
    }
}

pub trait NotificationSink: Send {
    fn publish(&self, event: &IncidentEvent) -> Result<()>;
}

/// Sink that only logs. The daemon's default.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, event: &IncidentEvent) -> Result<()> {
        log::info!(
            "incident {}: camera {} {} track {} conf {:.2} at {}",
            event.id,
            event.camera_id,
            event.label,
            event.track_id,
            event.confidence,
            event.timestamp
        );
        Ok(())
    }
}

/// Sink backed by an mpsc channel, for tests and embedding under an API
/// layer that fans events out further.
pub struct ChannelSink {
    tx: Sender<IncidentEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<IncidentEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: &IncidentEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| anyhow!("incident channel receiver dropped"))
    }
}

/// One aggregation sweep over the registry. Returns how many events were
/// published. Workers whose snapshot has no assignments are skipped without
/// touching the store.
pub fn drain_incidents(
    registry: &WorkerRegistry,
    store: &mut dyn IncidentStore,
    sink: &dyn NotificationSink,
    thumbnail_dir: &Path,
) -> usize {
    let mut published = 0;
    for handle in registry.workers() {
        let has_assignments = handle
            .snapshot()
            .map(|snapshot| !snapshot.assignments.is_empty())
            .unwrap_or(false);
        if !has_assignments {
            continue;
        }
        match handle.poll_and_persist_incidents(store, thumbnail_dir) {
            Ok(records) => {
                for record in records {
                    let event = IncidentEvent::from_record(&record);
                    match sink.publish(&event) {
                        Ok(()) => published += 1,
                        Err(e) => {
                            log::warn!("incident {} not delivered: {:#}", record.id, e);
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!(
                    "camera {}: incident poll failed: {:#}",
                    handle.config().id,
                    e
                );
            }
        }
    }
    published
}

/// Handle to the running aggregation thread.
pub struct IncidentAggregator {
    shared: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl IncidentAggregator {
    pub fn spawn(
        registry: Arc<WorkerRegistry>,
        store: Arc<Mutex<Box<dyn IncidentStore>>>,
        sink: Box<dyn NotificationSink>,
        thumbnail_dir: PathBuf,
        period: Duration,
    ) -> Result<Self> {
        let shared = Arc::new((Mutex::new(false), Condvar::new()));
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("incident-aggregator".to_string())
            .spawn(move || {
                log::info!("incident aggregation loop started (period {:?})", period);
                loop {
                    {
                        let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
                        drain_incidents(&registry, store.as_mut(), sink.as_ref(), &thumbnail_dir);
                    }
                    let (stop, signal) = &*loop_shared;
                    let guard = stop.lock().unwrap_or_else(PoisonError::into_inner);
                    let (guard, _) = signal
                        .wait_timeout(guard, period)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *guard {
                        break;
                    }
                }
                log::info!("incident aggregation loop stopped");
            })?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    /// Signal the loop and wait for it to exit. Stop is prompt: the loop
    /// wakes from its period wait instead of sleeping it out.
    pub fn stop(mut self) -> Result<()> {
        let (stop, signal) = &*self.shared;
        *stop.lock().unwrap_or_else(PoisonError::into_inner) = true;
        signal.notify_all();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow!("incident aggregation thread panicked"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticSource;
    use crate::detect::{Detection, ScriptedBackend};
    use crate::geometry::BoundingBox;
    use crate::pipeline::worker::{CameraConfig, CameraWorker};
    use crate::storage::InMemoryIncidentStore;

    fn worker_with_snapshot(id: i64) -> CameraWorker {
        let detection = Detection::new(
            BoundingBox::new(100.0, 100.0, 180.0, 260.0),
            0.9,
            "person",
        );
        CameraWorker::new(
            CameraConfig::new(id, "cam", "synthetic://cam"),
            Box::new(SyntheticSource::new("cam", 640, 480)),
            Box::new(ScriptedBackend::new(vec![vec![detection]])),
        )
    }

    #[test]
    fn drain_publishes_one_event_per_new_incident() -> Result<()> {
        let registry = WorkerRegistry::new();
        let mut worker = worker_with_snapshot(1);
        worker.run_cycle();
        registry.insert_handle(worker.handle());

        let mut store = InMemoryIncidentStore::new();
        let (sink, rx) = ChannelSink::new();
        let published = drain_incidents(&registry, &mut store, &sink, Path::new("thumbs"));
        assert_eq!(published, 1);

        let event = rx.try_recv()?;
        assert_eq!(event.camera_id, 1);
        assert_eq!(event.label, "person");
        assert!(event.thumbnail.starts_with("/thumbnails/"));
        assert!(event.timestamp.contains('T'));

        // Same snapshot, window still open: nothing new.
        assert_eq!(drain_incidents(&registry, &mut store, &sink, Path::new("thumbs")), 0);
        Ok(())
    }

    #[test]
    fn workers_without_assignments_are_skipped() -> Result<()> {
        let registry = WorkerRegistry::new();
        let mut worker = CameraWorker::new(
            CameraConfig::new(2, "idle", "synthetic://idle"),
            Box::new(SyntheticSource::new("idle", 640, 480)),
            Box::new(ScriptedBackend::new(vec![vec![]])),
        );
        worker.run_cycle();
        registry.insert_handle(worker.handle());

        let mut store = InMemoryIncidentStore::new();
        let (sink, _rx) = ChannelSink::new();
        assert_eq!(drain_incidents(&registry, &mut store, &sink, Path::new("thumbs")), 0);
        assert!(store.incidents().is_empty());
        Ok(())
    }

    #[test]
    fn aggregation_loop_runs_and_stops_promptly() -> Result<()> {
        let registry = Arc::new(WorkerRegistry::new());
        let mut worker = worker_with_snapshot(3);
        worker.run_cycle();
        registry.insert_handle(worker.handle());

        let store: Arc<Mutex<Box<dyn IncidentStore>>> =
            Arc::new(Mutex::new(Box::new(InMemoryIncidentStore::new())));
        let (sink, rx) = ChannelSink::new();
        let aggregator = IncidentAggregator::spawn(
            Arc::clone(&registry),
            store,
            Box::new(sink),
            PathBuf::from("thumbs"),
            Duration::from_millis(10),
        )?;

        let event = rx.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(event.camera_id, 3);

        let before = std::time::Instant::now();
        aggregator.stop()?;
        assert!(before.elapsed() < Duration::from_secs(1), "stop must not sleep out a period");

        // Suppression held across ticks: exactly one event.
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
