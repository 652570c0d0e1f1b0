//! Per-camera worker.
//!
//! Each camera gets one worker owning its capture source, detector and
//! tracker. The worker publishes two things for concurrent readers: the most
//! recent raw frame and an immutable `Arc<Snapshot>` pairing a frame with the
//! track assignments computed from it. Readers never block the pipeline for
//! longer than a pointer clone under the state lock.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;

use crate::capture::CaptureSource;
use crate::detect::ObjectDetector;
use crate::frame::{Frame, JPEG_QUALITY};
use crate::geometry::BoundingBox;
use crate::storage::{IncidentRecord, IncidentStore, NewIncident};
use crate::track::{IoUTracker, TrackInput, TrackerConfig};

pub const DEFAULT_CONF_THRESHOLD: f32 = 0.45;
pub const DEFAULT_INFER_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(10);

/// Backoff after a failed source open, and while waiting to reconnect.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff after a failed read on an open source.
const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(100);
/// Slice length for interruptible sleeps, bounding stop latency.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub struct CameraConfig {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub enabled: bool,
    pub conf_threshold: f32,
    pub infer_interval: Duration,
    /// Minimum gap between two incidents for the same track id.
    pub suppression_window: Duration,
}

impl CameraConfig {
    pub fn new(id: i64, name: &str, source: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            source: source.to_string(),
            enabled: true,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            infer_interval: DEFAULT_INFER_INTERVAL,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
        }
    }
}

/// One track re-linked to a detection in the snapshot's frame.
#[derive(Clone, Debug)]
pub struct Assignment {
    pub track_id: u64,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Assignment {
    /// Annotation caption, e.g. `person id:3 0.87`.
    pub fn caption(&self) -> String {
        format!("{} id:{} {:.2}", self.label, self.track_id, self.confidence)
    }
}

/// Immutable result of one completed pipeline cycle.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub frame: Frame,
    pub assignments: Vec<Assignment>,
}

#[derive(Default)]
struct PipelineState {
    last_frame: Option<Frame>,
    snapshot: Option<Arc<Snapshot>>,
}

/// Shared half of a camera worker.
///
/// The worker thread writes through this; the registry, the aggregation loop
/// and frame readers hold clones of the `Arc`.
pub struct WorkerHandle {
    config: CameraConfig,
    state: Mutex<PipelineState>,
    /// Last-alert registry: per-track timestamp of the most recent incident.
    last_alert: Mutex<HashMap<u64, Instant>>,
    stop_requested: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PipelineState::default()),
            last_alert: Mutex::new(HashMap::new()),
            stop_requested: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    // A poisoned lock only means some holder panicked mid-read; the state is
    // plain data and stays servable.
    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn alerts(&self) -> MutexGuard<'_, HashMap<u64, Instant>> {
        self.last_alert.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest completed cycle, if any.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.state().snapshot.clone()
    }

    /// JPEG of the most recent frame with the latest assignments drawn on a
    /// private copy. `None` until the first frame arrives. Reading never
    /// mutates pipeline state, so repeated calls return the same image.
    pub fn annotated_jpeg(&self) -> Result<Option<Vec<u8>>> {
        let (frame, snapshot) = {
            let state = self.state();
            (state.last_frame.clone(), state.snapshot.clone())
        };
        let Some(mut frame) = frame else {
            return Ok(None);
        };
        if let Some(snapshot) = snapshot {
            for assignment in &snapshot.assignments {
                frame.draw_annotation(&assignment.bbox, &assignment.caption());
            }
        }
        Ok(Some(frame.encode_jpeg(JPEG_QUALITY)?))
    }

    /// Evaluate the current snapshot against the last-alert registry and
    /// persist one incident per track whose suppression window has elapsed.
    ///
    /// The window is reserved before anything is persisted: if the thumbnail
    /// or record write fails afterwards, that window's incident is forfeited
    /// rather than retried (at-most-once per window).
    pub fn poll_and_persist_incidents(
        &self,
        store: &mut dyn IncidentStore,
        thumbnail_dir: &Path,
    ) -> Result<Vec<IncidentRecord>> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(Vec::new());
        };
        let mut created = Vec::new();
        for assignment in &snapshot.assignments {
            if !self.reserve_alert_window(assignment.track_id) {
                continue;
            }
            let file = format!(
                "cam{}_track{}_{}.jpg",
                self.config.id,
                assignment.track_id,
                Utc::now().timestamp_millis()
            );
            let path = thumbnail_dir.join(file);
            let saved = match store.save_thumbnail(&snapshot.frame, &path) {
                Ok(saved) => saved,
                Err(e) => {
                    log::warn!(
                        "camera {}: thumbnail for track {} not persisted: {:#}",
                        self.config.id,
                        assignment.track_id,
                        e
                    );
                    continue;
                }
            };
            match store.create_incident(NewIncident {
                camera_id: self.config.id,
                label: &assignment.label,
                confidence: assignment.confidence,
                track_id: assignment.track_id,
                thumbnail_path: &saved,
            }) {
                Ok(record) => {
                    log::info!(
                        "camera {}: incident {} ({} track {} conf {:.2})",
                        self.config.id,
                        record.id,
                        record.label,
                        record.track_id,
                        record.confidence
                    );
                    created.push(record);
                }
                Err(e) => {
                    log::warn!(
                        "camera {}: incident for track {} not persisted: {:#}",
                        self.config.id,
                        assignment.track_id,
                        e
                    );
                }
            }
        }
        Ok(created)
    }

    /// True when the track is clear to alert; reserves the window on success.
    fn reserve_alert_window(&self, track_id: u64) -> bool {
        let now = Instant::now();
        let mut alerts = self.alerts();
        match alerts.get(&track_id) {
            Some(last) if now.duration_since(*last) < self.config.suppression_window => false,
            _ => {
                alerts.insert(track_id, now);
                true
            }
        }
    }

    fn publish_frame(&self, frame: Frame) {
        self.state().last_frame = Some(frame);
    }

    fn publish_snapshot(&self, snapshot: Snapshot) {
        self.state().snapshot = Some(Arc::new(snapshot));
    }

    fn evict_tracks(&self, track_ids: &[u64]) {
        if track_ids.is_empty() {
            return;
        }
        let mut alerts = self.alerts();
        for track_id in track_ids {
            alerts.remove(track_id);
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Request a stop and wait for the worker thread to exit.
    ///
    /// Returns only once the loop has actually finished and the capture
    /// source is closed. Safe to call more than once.
    pub fn stop(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| anyhow!("camera {} worker thread panicked", self.config.id))?;
        }
        Ok(())
    }
}

/// Outcome of one pipeline cycle, mapped to a backoff by the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Frame read, detection ran, snapshot replaced.
    Advanced,
    /// Source closed and reopen failed; long backoff.
    OpenFailed,
    /// Open source failed one read; short backoff, no reopen.
    ReadFailed,
    /// Detection failed; previous snapshot kept.
    DetectFailed,
}

/// Owning half of a camera worker: the source, detector and tracker live on
/// the worker thread and are never shared.
pub struct CameraWorker {
    handle: Arc<WorkerHandle>,
    source: Box<dyn CaptureSource>,
    detector: Box<dyn ObjectDetector>,
    tracker: IoUTracker,
}

impl CameraWorker {
    pub fn new(
        config: CameraConfig,
        source: Box<dyn CaptureSource>,
        detector: Box<dyn ObjectDetector>,
    ) -> Self {
        Self {
            handle: Arc::new(WorkerHandle::new(config)),
            source,
            detector,
            tracker: IoUTracker::new(TrackerConfig::default()),
        }
    }

    pub fn with_tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker = IoUTracker::new(config);
        self
    }

    pub fn handle(&self) -> Arc<WorkerHandle> {
        Arc::clone(&self.handle)
    }

    /// One capture → detect → track → publish cycle.
    ///
    /// Failures are never fatal: the loop translates the outcome into a
    /// backoff and tries again. A failed cycle leaves the previous snapshot
    /// untouched.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let config = &self.handle.config;
        if !self.source.is_open() {
            if let Err(e) = self.source.open() {
                log::warn!("camera {} ({}): source open failed: {:#}", config.id, config.name, e);
                return CycleOutcome::OpenFailed;
            }
            log::info!("camera {} ({}): source open", config.id, config.name);
        }
        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("camera {} ({}): frame read failed: {:#}", config.id, config.name, e);
                return CycleOutcome::ReadFailed;
            }
        };
        self.handle.publish_frame(frame.clone());

        let detections = match self.detector.infer(&frame, config.conf_threshold) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!(
                    "camera {}: {} inference failed, keeping previous snapshot: {:#}",
                    config.id,
                    self.detector.name(),
                    e
                );
                return CycleOutcome::DetectFailed;
            }
        };

        let inputs: Vec<TrackInput> = detections
            .iter()
            .enumerate()
            .map(|(detection_index, detection)| TrackInput {
                bbox: detection.bbox,
                detection_index,
            })
            .collect();
        let update = self.tracker.update(&inputs);
        self.handle.evict_tracks(&update.removed);

        let assignments = update
            .matched
            .iter()
            .map(|view| {
                let detection = &detections[view.detection_index];
                Assignment {
                    track_id: view.track_id,
                    label: detection.label.clone(),
                    confidence: detection.confidence,
                    bbox: view.bbox,
                }
            })
            .collect();
        self.handle.publish_snapshot(Snapshot { frame, assignments });
        CycleOutcome::Advanced
    }

    /// Warm the detector and start the worker thread. The returned handle's
    /// `stop` joins the thread.
    pub fn spawn(mut self) -> Result<Arc<WorkerHandle>> {
        self.detector
            .warm_up()
            .with_context(|| format!("camera {}: detector warm-up failed", self.handle.config.id))?;
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name(format!("camera-{}", handle.config.id))
            .spawn(move || self.run_loop())?;
        *handle
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(thread);
        Ok(handle)
    }

    fn run_loop(mut self) {
        let config = self.handle.config.clone();
        log::info!("camera {} ({}) worker started", config.id, config.name);
        while !self.handle.stop_requested() {
            let backoff = match self.run_cycle() {
                CycleOutcome::OpenFailed => RECONNECT_BACKOFF,
                CycleOutcome::ReadFailed => READ_FAILURE_BACKOFF,
                CycleOutcome::Advanced | CycleOutcome::DetectFailed => config.infer_interval,
            };
            self.sleep_interruptible(backoff);
        }
        self.source.close();
        log::info!("camera {} ({}) worker stopped", config.id, config.name);
    }

    fn sleep_interruptible(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.handle.stop_requested() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
    }
}
