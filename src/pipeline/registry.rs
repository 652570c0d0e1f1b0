//! Worker registry.
//!
//! One handle per camera id. The registry is the only place workers start:
//! `insert` takes the unspawned worker, stops and confirms any previous
//! worker for the id, and only then spawns and publishes the new one — all
//! under one critical section, so two loops never own the same camera.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};

use crate::pipeline::worker::{CameraWorker, WorkerHandle};

#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<i64, Arc<WorkerHandle>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<i64, Arc<WorkerHandle>>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<i64, Arc<WorkerHandle>>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a worker for its camera id, replacing any previous one.
    ///
    /// Any old worker is stopped and confirmed dead before the new worker's
    /// thread starts, so its capture source is released before the new one
    /// opens. The write lock is held across the whole handoff; if the old
    /// worker cannot be confirmed stopped, the new one is never started and
    /// the error is returned.
    pub fn insert(&self, worker: CameraWorker) -> Result<Arc<WorkerHandle>> {
        let id = worker.handle().config().id;
        let mut workers = self.write();
        if let Some(previous) = workers.remove(&id) {
            previous
                .stop()
                .with_context(|| format!("camera {}: previous worker did not stop", id))?;
            log::info!("camera {}: replaced running worker", id);
        }
        let handle = worker.spawn()?;
        let displaced = workers.insert(id, Arc::clone(&handle));
        debug_assert!(displaced.is_none(), "slot was cleared under this lock");
        Ok(handle)
    }

    /// Publish a handle without spawning, for tests that drive cycles by hand.
    #[cfg(test)]
    pub(crate) fn insert_handle(&self, handle: Arc<WorkerHandle>) {
        self.write().insert(handle.config().id, handle);
    }

    /// Stop and drop the worker for a camera id. Returns whether one existed.
    pub fn remove(&self, id: i64) -> Result<bool> {
        let removed = self.write().remove(&id);
        match removed {
            Some(handle) => {
                handle
                    .stop()
                    .with_context(|| format!("camera {}: worker did not stop on removal", id))?;
                log::info!("camera {}: worker removed", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, id: i64) -> Option<Arc<WorkerHandle>> {
        self.read().get(&id).cloned()
    }

    /// Point-in-time snapshot of all handles, ordered by camera id.
    pub fn workers(&self) -> Vec<Arc<WorkerHandle>> {
        let mut workers: Vec<_> = self.read().values().cloned().collect();
        workers.sort_by_key(|handle| handle.config().id);
        workers
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Stop every worker. Keeps going past failures and reports the first.
    pub fn stop_all(&self) -> Result<()> {
        let drained: Vec<_> = self.write().drain().collect();
        let mut first_error = None;
        for (id, handle) in drained {
            if let Err(e) = handle.stop() {
                log::warn!("camera {}: stop failed during shutdown: {:#}", id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
