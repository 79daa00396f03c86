//! Worker pool - the registry of known workers and their status.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use quakerun_core::{WorkerHandle, WorkerId, WorkerStatus};

/// A registered worker plus the bookkeeping used for selection and probing.
struct PoolEntry {
    handle: WorkerHandle,

    /// Logical time of the last release; 0 for never used.
    last_used: u64,

    /// Consecutive failed liveness probes.
    probe_failures: u32,
}

#[derive(Default)]
struct PoolInner {
    workers: HashMap<WorkerId, PoolEntry>,
    clock: u64,
}

impl PoolInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Least-recently-used idle worker, ties broken by id.
    fn lru_idle(&self, skip: Option<&WorkerId>) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|e| e.handle.status.can_accept_tasks())
            .filter(|e| Some(&e.handle.worker_id) != skip)
            .min_by(|a, b| {
                a.last_used
                    .cmp(&b.last_used)
                    .then_with(|| a.handle.worker_id.cmp(&b.handle.worker_id))
            })
            .map(|e| e.handle.worker_id.clone())
    }

    fn take(&mut self, worker_id: &WorkerId) -> Option<WorkerHandle> {
        let entry = self.workers.get_mut(worker_id)?;
        entry.handle.status = WorkerStatus::Busy;
        Some(entry.handle.clone())
    }
}

/// Registry of worker handles.
///
/// Every mutation happens under a single write lock, so `acquire`,
/// `release` and `mark_unreachable` are atomic with respect to each other.
/// Whenever a worker becomes idle, one permit is stored in `idle_notify` so
/// that a waiting dispatcher never misses the wake-up.
pub struct WorkerPool {
    inner: RwLock<PoolInner>,
    idle_notify: Notify,
    probe_failure_threshold: u32,
}

impl WorkerPool {
    /// Create an empty pool wrapped in Arc.
    pub fn new(probe_failure_threshold: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(PoolInner::default()),
            idle_notify: Notify::new(),
            probe_failure_threshold: probe_failure_threshold.max(1),
        })
    }

    /// Notified whenever a worker transitions to `Idle`.
    pub fn idle_notify(&self) -> &Notify {
        &self.idle_notify
    }

    /// Register a worker, or refresh an existing registration.
    ///
    /// Returns true if the worker was not known before. A refresh never
    /// changes the status: a busy worker stays busy, and an unreachable one
    /// waits for a probe that finds it idle, since it may still be running
    /// an abandoned attempt.
    pub async fn register(&self, handle: WorkerHandle) -> bool {
        let worker_id = handle.worker_id.clone();
        let mut inner = self.inner.write().await;

        let is_new = match inner.workers.get_mut(&worker_id) {
            Some(entry) => {
                entry.handle.address = handle.address;
                entry.probe_failures = 0;
                debug!(
                    worker_id = %worker_id,
                    status = ?entry.handle.status,
                    "Worker registration refreshed"
                );
                false
            }
            None => {
                info!(
                    worker_id = %worker_id,
                    address = %handle.address,
                    "Worker registered"
                );
                let mut handle = handle;
                handle.status = WorkerStatus::Idle;
                inner.workers.insert(
                    worker_id.clone(),
                    PoolEntry {
                        handle,
                        last_used: 0,
                        probe_failures: 0,
                    },
                );
                true
            }
        };

        let idle = inner
            .workers
            .get(&worker_id)
            .is_some_and(|e| e.handle.status.can_accept_tasks());
        drop(inner);

        if idle {
            self.idle_notify.notify_one();
        }
        is_new
    }

    /// Remove a worker from the pool.
    pub async fn deregister(&self, worker_id: &WorkerId) -> Option<WorkerHandle> {
        let removed = self.inner.write().await.workers.remove(worker_id);
        if let Some(entry) = &removed {
            info!(
                worker_id = %worker_id,
                status = ?entry.handle.status,
                "Worker deregistered"
            );
        }
        removed.map(|e| e.handle)
    }

    /// Take the least-recently-used idle worker and mark it busy.
    pub async fn acquire(&self) -> Option<WorkerHandle> {
        let mut inner = self.inner.write().await;
        let worker_id = inner.lru_idle(None)?;
        inner.take(&worker_id)
    }

    /// Like [`acquire`](Self::acquire), but prefer any worker other than
    /// `avoid`.
    ///
    /// The avoided worker is only handed out when it is the last live worker
    /// in the pool, since waiting would then never make progress.
    pub async fn acquire_avoiding(&self, avoid: Option<&WorkerId>) -> Option<WorkerHandle> {
        let mut inner = self.inner.write().await;

        if let Some(worker_id) = inner.lru_idle(avoid) {
            return inner.take(&worker_id);
        }

        let avoid = avoid?;
        let others_live = inner
            .workers
            .values()
            .any(|e| &e.handle.worker_id != avoid && e.handle.status.is_live());
        let avoid_idle = inner
            .workers
            .get(avoid)
            .is_some_and(|e| e.handle.status.can_accept_tasks());

        if avoid_idle && !others_live {
            debug!(worker_id = %avoid, "Reusing the only live worker for a retry");
            return inner.take(avoid);
        }
        None
    }

    /// Return a busy worker to `Idle`.
    ///
    /// Returns false if the worker is unknown or not busy; an unreachable
    /// worker is only brought back by a successful probe.
    pub async fn release(&self, worker_id: &WorkerId) -> bool {
        let mut inner = self.inner.write().await;
        let now = inner.tick();

        let released = match inner.workers.get_mut(worker_id) {
            Some(entry) if entry.handle.status == WorkerStatus::Busy => {
                entry.handle.status = WorkerStatus::Idle;
                entry.last_used = now;
                true
            }
            Some(entry) => {
                debug!(
                    worker_id = %worker_id,
                    status = ?entry.handle.status,
                    "Release ignored for non-busy worker"
                );
                false
            }
            None => false,
        };
        drop(inner);

        if released {
            self.idle_notify.notify_one();
        }
        released
    }

    /// Exclude a worker from selection until a probe succeeds.
    pub async fn mark_unreachable(&self, worker_id: &WorkerId) -> bool {
        let mut inner = self.inner.write().await;
        match inner.workers.get_mut(worker_id) {
            Some(entry) => {
                if entry.handle.status != WorkerStatus::Unreachable {
                    warn!(worker_id = %worker_id, "Worker marked unreachable");
                    entry.handle.status = WorkerStatus::Unreachable;
                    entry.probe_failures = 0;
                }
                true
            }
            None => false,
        }
    }

    /// Bring an unreachable worker back after a successful probe.
    pub async fn restore(&self, worker_id: &WorkerId) -> bool {
        let mut inner = self.inner.write().await;
        let restored = match inner.workers.get_mut(worker_id) {
            Some(entry) if entry.handle.status == WorkerStatus::Unreachable => {
                entry.handle.status = WorkerStatus::Idle;
                entry.probe_failures = 0;
                true
            }
            _ => false,
        };
        drop(inner);

        if restored {
            info!(worker_id = %worker_id, "Worker restored after successful probe");
            self.idle_notify.notify_one();
        }
        restored
    }

    /// Count a failed probe; evicts the worker once the threshold is reached.
    ///
    /// Returns true if the worker was removed.
    pub async fn record_probe_failure(&self, worker_id: &WorkerId) -> bool {
        let mut inner = self.inner.write().await;
        let failures = match inner.workers.get_mut(worker_id) {
            Some(entry) => {
                entry.probe_failures += 1;
                entry.probe_failures
            }
            None => return false,
        };

        if failures >= self.probe_failure_threshold {
            inner.workers.remove(worker_id);
            warn!(
                worker_id = %worker_id,
                failures,
                "Worker evicted after consecutive probe failures"
            );
            true
        } else {
            debug!(worker_id = %worker_id, failures, "Probe failed");
            false
        }
    }

    /// Workers currently excluded from selection.
    pub async fn unreachable_workers(&self) -> Vec<WorkerHandle> {
        self.inner
            .read()
            .await
            .workers
            .values()
            .filter(|e| e.handle.status == WorkerStatus::Unreachable)
            .map(|e| e.handle.clone())
            .collect()
    }

    pub async fn get(&self, worker_id: &WorkerId) -> Option<WorkerHandle> {
        self.inner
            .read()
            .await
            .workers
            .get(worker_id)
            .map(|e| e.handle.clone())
    }

    /// All workers, sorted by id.
    pub async fn list(&self) -> Vec<WorkerHandle> {
        let mut workers: Vec<_> = self
            .inner
            .read()
            .await
            .workers
            .values()
            .map(|e| e.handle.clone())
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    pub async fn idle_count(&self) -> usize {
        self.count_where(|s| s.can_accept_tasks()).await
    }

    pub async fn busy_count(&self) -> usize {
        self.count_where(|s| s == WorkerStatus::Busy).await
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn count_where(&self, pred: impl Fn(WorkerStatus) -> bool) -> usize {
        self.inner
            .read()
            .await
            .workers
            .values()
            .filter(|e| pred(e.handle.status))
            .count()
    }
}
