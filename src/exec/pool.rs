// src/exec/pool.rs

//! Fixed-capacity worker pool shared by every pipeline run.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::errors::{HakuError, Result};

/// Bounds how many jobs run at once.
///
/// `submit` waits for a free slot, then spawns the job; the slot is released
/// when the job finishes (or panics). Jobs report their own results.
#[derive(Debug)]
pub struct WorkerPool {
    capacity: usize,
    slots: Arc<Semaphore>,
    inflight: Mutex<JoinSet<()>>,
    active: Arc<AtomicUsize>,
}

/// Held by a running job; frees the slot on drop.
struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(HakuError::ConfigError(
                "max_concurrency must be at least 1".into(),
            ));
        }
        Ok(Self {
            capacity: max_concurrency,
            slots: Arc::new(Semaphore::new(max_concurrency)),
            inflight: Mutex::new(JoinSet::new()),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Wait for a slot and run `job` on it.
    ///
    /// Fails with `PoolClosed` once `shutdown` has been called, including for
    /// callers already waiting for a slot.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| HakuError::PoolClosed)?;

        let mut inflight = self.inflight.lock().await;
        if self.slots.is_closed() {
            return Err(HakuError::PoolClosed);
        }
        reap_finished(&mut inflight);

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = SlotGuard {
            _permit: permit,
            active: Arc::clone(&self.active),
        };
        inflight.spawn(async move {
            let _guard = guard;
            job.await;
        });
        debug!(active = self.active(), capacity = self.capacity, "job submitted to pool");
        Ok(())
    }

    /// Stop accepting jobs and wait for every in-flight job to finish.
    pub async fn shutdown(&self) {
        self.slots.close();
        let mut inflight = self.inflight.lock().await;
        info!(in_flight = inflight.len(), "worker pool shutting down; draining jobs");
        while let Some(res) = inflight.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "pool job ended abnormally");
            }
        }
        info!("worker pool drained");
    }
}

fn reap_finished(set: &mut JoinSet<()>) {
    while let Some(res) = set.try_join_next() {
        if let Err(e) = res {
            error!(error = %e, "pool job ended abnormally");
        }
    }
}
