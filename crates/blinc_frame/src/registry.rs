//! Per-phase subscriber bookkeeping and tick dispatch
//!
//! Each phase keeps its callbacks in insertion order together with the
//! connection to the tick source, which exists exactly while there is at
//! least one callback. Every connection gets a fresh epoch; ticks delivered
//! with an older epoch are stale and ignored.

use crate::phase::Phase;
use crate::source::Connection;
use crate::worker::WorkerPool;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Future returned by a tick callback
pub type TickFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased tick callback
pub type TickCallback = Arc<dyn Fn(f32) -> TickFuture + Send + Sync>;

/// Identity of one subscription
///
/// The sequence number increases monotonically per phase and is never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    phase: Phase,
    seq: u64,
}

impl SubscriptionId {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameScheduler/{}/{}", self.phase, self.seq)
    }
}

/// Statistics for one phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseStats {
    pub phase: Phase,
    /// Current number of subscribers
    pub listeners: usize,
    /// Whether the tick source connection is live
    pub connected: bool,
    /// Ticks accepted and dispatched
    pub ticks: u64,
    /// Callback invocations issued
    pub dispatched: u64,
    /// Callbacks that panicked or returned an error
    pub failures: u64,
    /// Ticks ignored because their connection was already torn down
    pub stale_fires: u64,
}

/// Callbacks captured for one tick
pub(crate) type TickSnapshot = SmallVec<[(SubscriptionId, TickCallback); 8]>;

/// Work captured under the registry lock, dispatched after it is released
pub(crate) struct TickBatch {
    entries: TickSnapshot,
    failures: Arc<AtomicU64>,
}

impl TickBatch {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

struct LiveConnection {
    epoch: u64,
    connection: Connection,
}

/// Subscribers and tick-source connection of one phase
pub(crate) struct PhaseRegistry {
    phase: Phase,
    entries: IndexMap<u64, TickCallback>,
    connection: Option<LiveConnection>,
    next_seq: u64,
    next_epoch: u64,
    ticks: u64,
    dispatched: u64,
    stale_fires: u64,
    /// Bumped from worker tasks, outside the registry lock
    failures: Arc<AtomicU64>,
}

impl PhaseRegistry {
    pub(crate) fn new(phase: Phase) -> Self {
        Self {
            phase,
            entries: IndexMap::new(),
            connection: None,
            next_seq: 1,
            next_epoch: 0,
            ticks: 0,
            dispatched: 0,
            stale_fires: 0,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a callback, returning its identity
    pub(crate) fn insert(&mut self, callback: TickCallback) -> SubscriptionId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(seq, callback);
        SubscriptionId {
            phase: self.phase,
            seq,
        }
    }

    /// Remove a callback; `false` if it was not registered
    pub(crate) fn remove(&mut self, seq: u64) -> bool {
        // shift_remove keeps the remaining dispatch order intact
        self.entries.shift_remove(&seq).is_some()
    }

    pub(crate) fn contains(&self, seq: u64) -> bool {
        self.entries.contains_key(&seq)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Reserve the epoch for the next connection
    pub(crate) fn next_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    pub(crate) fn attach(&mut self, epoch: u64, connection: Connection) {
        debug_assert!(self.connection.is_none(), "phase already connected");
        self.connection = Some(LiveConnection { epoch, connection });
    }

    pub(crate) fn take_connection(&mut self) -> Option<Connection> {
        self.connection.take().map(|live| live.connection)
    }

    /// Drop every callback (the connection is left to the caller)
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot the callbacks for a tick delivered by connection `epoch`
    ///
    /// Returns `None` for stale ticks.
    pub(crate) fn begin_tick(&mut self, epoch: u64) -> Option<TickBatch> {
        match &self.connection {
            Some(live) if live.epoch == epoch => {}
            _ => {
                self.stale_fires += 1;
                return None;
            }
        }

        self.ticks += 1;
        self.dispatched += self.entries.len() as u64;
        let phase = self.phase;
        let entries = self
            .entries
            .iter()
            .map(|(&seq, callback)| (SubscriptionId { phase, seq }, Arc::clone(callback)))
            .collect();

        Some(TickBatch {
            entries,
            failures: Arc::clone(&self.failures),
        })
    }

    pub(crate) fn stats(&self) -> PhaseStats {
        PhaseStats {
            phase: self.phase,
            listeners: self.entries.len(),
            connected: self.connection.is_some(),
            ticks: self.ticks,
            dispatched: self.dispatched,
            failures: self.failures.load(Ordering::Relaxed),
            stale_fires: self.stale_fires,
        }
    }
}

/// Hand every callback of `batch` to the worker pool
///
/// Dispatch is issued in subscription order and never waits on a callback.
/// A callback that panics or returns an error is logged and counted; the
/// remaining callbacks still run.
pub(crate) fn dispatch_tick(pool: &WorkerPool, batch: TickBatch, delta_time: f32) {
    let TickBatch { entries, failures } = batch;

    for (id, callback) in entries {
        let failures = Arc::clone(&failures);
        pool.dispatch(Box::pin(async move {
            let outcome = AssertUnwindSafe(async move { callback(delta_time).await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(subscription = %id, error = %err, "FrameScheduler callback error");
                }
                Err(panic) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscription = %id,
                        error = panic_message(panic.as_ref()),
                        "FrameScheduler callback panicked"
                    );
                }
            }
        }));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
