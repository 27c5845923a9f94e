//! Worker pool
//!
//! Dispatched callbacks run on lightweight tokio tasks. Spawning a task for
//! every subscriber on every tick is avoided by keeping a single parked worker
//! around: a worker that finishes its job parks itself in the idle slot and
//! waits for the next job, unless another worker got there first, in which
//! case it exits.
//!
//! The slot holds at most one worker, so sequential non-overlapping
//! dispatches run on one task while overlapping (suspended) jobs each get
//! their own.

use crate::lock;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// A unit of work handed to a worker
pub(crate) type Job = BoxFuture<'static, ()>;

/// A parked worker waiting for its next job
struct ParkedWorker {
    id: u64,
    job_tx: oneshot::Sender<Job>,
}

struct PoolShared {
    /// Single-slot cache of the most recently idle worker
    idle: Mutex<Option<ParkedWorker>>,
    reuse: bool,
    next_id: AtomicU64,
    spawned: AtomicU64,
    reused: AtomicU64,
    live: AtomicUsize,
}

/// Counters describing worker usage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Workers spawned since the pool was created
    pub spawned: u64,
    /// Dispatches served by a parked worker
    pub reused: u64,
    /// Workers currently alive (running or parked)
    pub live: usize,
    /// Workers currently parked (0 or 1)
    pub idle: usize,
}

/// Single-slot pool of reusable worker tasks
#[derive(Clone)]
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
    runtime: Handle,
}

impl WorkerPool {
    /// Create a pool that spawns workers on `runtime`
    pub(crate) fn new(runtime: Handle) -> Self {
        Self::with_reuse(runtime, true)
    }

    /// Create a pool, optionally disabling worker reuse
    ///
    /// Without reuse every dispatch spawns a fresh worker that exits after
    /// its job.
    pub(crate) fn with_reuse(runtime: Handle, reuse: bool) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                idle: Mutex::new(None),
                reuse,
                next_id: AtomicU64::new(0),
                spawned: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                live: AtomicUsize::new(0),
            }),
            runtime,
        }
    }

    /// Run `job` on the parked worker if there is one, otherwise on a new worker
    pub(crate) fn dispatch(&self, job: Job) {
        let parked = lock(&self.shared.idle).take();

        let job = match parked {
            Some(worker) => match worker.job_tx.send(job) {
                Ok(()) => {
                    self.shared.reused.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(worker = worker.id, "dispatched to parked worker");
                    return;
                }
                // The parked worker is gone (runtime shutting down); start over
                Err(job) => job,
            },
            None => job,
        };

        self.spawn(job);
    }

    /// Drop the parked worker, letting its task exit
    pub(crate) fn release_idle(&self) {
        if let Some(worker) = lock(&self.shared.idle).take() {
            tracing::debug!(worker = worker.id, "released parked worker");
        }
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        WorkerStats {
            spawned: self.shared.spawned.load(Ordering::Relaxed),
            reused: self.shared.reused.load(Ordering::Relaxed),
            live: self.shared.live.load(Ordering::Acquire),
            idle: usize::from(lock(&self.shared.idle).is_some()),
        }
    }

    fn spawn(&self, job: Job) {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.spawned.fetch_add(1, Ordering::Relaxed);
        let live = LiveGuard::new(Arc::clone(&self.shared));

        tracing::trace!(worker = id, "spawning worker");
        self.runtime
            .spawn(worker_loop(id, job, Arc::clone(&self.shared), live));
    }
}

/// Keeps the live-worker count honest even if a worker is aborted or panics
struct LiveGuard(Arc<PoolShared>);

impl LiveGuard {
    fn new(shared: Arc<PoolShared>) -> Self {
        shared.live.fetch_add(1, Ordering::AcqRel);
        Self(shared)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn worker_loop(id: u64, mut job: Job, shared: Arc<PoolShared>, _live: LiveGuard) {
    loop {
        job.await;

        if !shared.reuse {
            break;
        }

        let (job_tx, job_rx) = oneshot::channel();
        {
            let mut idle = lock(&shared.idle);
            if idle.is_some() {
                // Another worker is already parked
                break;
            }
            *idle = Some(ParkedWorker { id, job_tx });
        }

        match job_rx.await {
            Ok(next) => job = next,
            Err(_) => break,
        }
    }
    tracing::trace!(worker = id, "worker exiting");
}
