//! Frame scheduler
//!
//! The process-wide coordination point for per-frame callbacks. Subscribers
//! register against a [`Phase`]; the scheduler connects that phase to the
//! tick source when its first subscriber arrives and disconnects it when the
//! last one leaves. Every tick fans out to all current subscribers through
//! the worker pool.
//!
//! ```ignore
//! use blinc_frame::{FrameScheduler, ManualTickSource, Phase};
//!
//! let source = ManualTickSource::new();
//! let scheduler = FrameScheduler::new(Arc::new(source.clone()))?;
//!
//! let sub = scheduler.subscribe(Phase::Simulation, |dt| {
//!     println!("tick {dt}");
//! })?;
//!
//! source.fire(Phase::Simulation, 0.016);
//! sub.unsubscribe()?;
//! ```

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::lock;
use crate::phase::Phase;
use crate::registry::{
    dispatch_tick, PhaseRegistry, PhaseStats, SubscriptionId, TickCallback, TickFuture,
};
use crate::source::{TickSink, TickSource};
use crate::worker::{WorkerPool, WorkerStats};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use tokio::runtime::Handle;

// ============================================================================
// Global Frame Scheduler
// ============================================================================

/// Global scheduler for access from anywhere in the application
static GLOBAL_SCHEDULER: OnceLock<FrameScheduler> = OnceLock::new();

/// Set the global frame scheduler
///
/// This should be called once at app startup after creating the scheduler.
/// Reset it with [`FrameScheduler::cleanup_all`], not by installing another.
///
/// # Panics
///
/// Panics if called more than once.
pub fn set_global_scheduler(scheduler: FrameScheduler) {
    if GLOBAL_SCHEDULER.set(scheduler).is_err() {
        panic!("set_global_scheduler() called more than once");
    }
}

/// Get the global frame scheduler
///
/// Unrelated parts of the program subscribing through this handle share one
/// tick-source connection per phase.
///
/// # Panics
///
/// Panics if `set_global_scheduler()` has not been called.
pub fn get_scheduler() -> FrameScheduler {
    GLOBAL_SCHEDULER
        .get()
        .expect("Frame scheduler not initialized. Call set_global_scheduler() at app startup.")
        .clone()
}

/// Try to get the global scheduler (returns None if not initialized)
pub fn try_get_scheduler() -> Option<FrameScheduler> {
    GLOBAL_SCHEDULER.get().cloned()
}

/// Check if the global scheduler has been initialized
pub fn is_scheduler_initialized() -> bool {
    GLOBAL_SCHEDULER.get().is_some()
}

// ============================================================================
// Scheduler
// ============================================================================

pub(crate) struct SchedulerShared {
    registries: [Mutex<PhaseRegistry>; Phase::COUNT],
    pool: WorkerPool,
    source: Arc<dyn TickSource>,
}

impl SchedulerShared {
    fn registry(&self, phase: Phase) -> MutexGuard<'_, PhaseRegistry> {
        lock(&self.registries[phase.index()])
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let phase = id.phase();
        let mut registry = self.registry(phase);
        if !registry.remove(id.seq()) {
            return Ok(());
        }

        if registry.is_empty() {
            if let Some(connection) = registry.take_connection() {
                tracing::debug!(%phase, "last subscriber left, disconnecting tick source");
                connection
                    .disconnect()
                    .map_err(|source| SchedulerError::Disconnect { phase, source })?;
            }
        }
        Ok(())
    }

    fn on_tick(&self, phase: Phase, epoch: u64, delta_time: f32) {
        let batch = self.registry(phase).begin_tick(epoch);
        let Some(batch) = batch else {
            tracing::trace!(%phase, epoch, "ignoring stale tick");
            return;
        };

        tracing::trace!(%phase, listeners = batch.len(), delta_time, "tick");
        dispatch_tick(&self.pool, batch, delta_time);
    }
}

impl Drop for SchedulerShared {
    fn drop(&mut self) {
        for registry in &self.registries {
            let mut registry = lock(registry);
            if let Some(connection) = registry.take_connection() {
                if let Err(err) = connection.disconnect() {
                    tracing::warn!(error = %err, "failed to disconnect tick source on drop");
                }
            }
        }
    }
}

/// The frame scheduler
///
/// Cheap to clone; clones share the same registries, worker pool and tick
/// source.
#[derive(Clone)]
pub struct FrameScheduler {
    shared: Arc<SchedulerShared>,
}

impl FrameScheduler {
    /// Create a scheduler whose workers run on the current tokio runtime
    pub fn new(source: Arc<dyn TickSource>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self::with_runtime(source, runtime))
    }

    pub fn with_runtime(source: Arc<dyn TickSource>, runtime: Handle) -> Self {
        Self::with_config(source, runtime, &SchedulerConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn TickSource>,
        runtime: Handle,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                registries: Phase::ALL.map(|phase| Mutex::new(PhaseRegistry::new(phase))),
                pool: WorkerPool::with_reuse(runtime, config.pool.reuse_workers),
                source,
            }),
        }
    }

    /// Call `callback` with the frame delta (seconds) on every tick of `phase`
    ///
    /// The first subscriber of a phase connects the phase to the tick source.
    /// If the source cannot drive the phase in this context the returned
    /// subscription is inert.
    pub fn subscribe<F>(&self, phase: Phase, callback: F) -> Result<Subscription>
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        self.register(
            phase,
            Arc::new(move |dt: f32| -> TickFuture {
                let callback = Arc::clone(&callback);
                Box::pin(async move {
                    callback(dt);
                    anyhow::Ok(())
                })
            }),
        )
    }

    /// Like [`subscribe`](Self::subscribe), for callbacks that suspend
    ///
    /// A suspended callback only holds up its own worker; the rest of the
    /// tick is dispatched without waiting. Returning `Err` counts as a
    /// callback failure.
    pub fn subscribe_async<F, Fut>(&self, phase: Phase, callback: F) -> Result<Subscription>
    where
        F: Fn(f32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(
            phase,
            Arc::new(move |dt: f32| -> TickFuture { Box::pin(callback(dt)) }),
        )
    }

    fn register(&self, phase: Phase, callback: TickCallback) -> Result<Subscription> {
        if !self.shared.source.supports(phase) {
            tracing::debug!(%phase, "phase not supported by tick source, subscription is inert");
            return Ok(Subscription::inert(phase));
        }

        let mut registry = self.shared.registry(phase);
        let id = registry.insert(callback);

        if !registry.is_connected() {
            let epoch = registry.next_epoch();
            match self.shared.source.connect(phase, self.sink(phase, epoch)) {
                Ok(connection) => {
                    tracing::debug!(%phase, epoch, "first subscriber, connected tick source");
                    registry.attach(epoch, connection);
                }
                Err(source) => {
                    registry.remove(id.seq());
                    return Err(SchedulerError::Connect { phase, source });
                }
            }
        }

        Ok(Subscription {
            phase,
            id: Some(id),
            scheduler: Arc::downgrade(&self.shared),
        })
    }

    fn sink(&self, phase: Phase, epoch: u64) -> TickSink {
        let scheduler = Arc::downgrade(&self.shared);
        TickSink::new(phase, move |delta_time| {
            if let Some(shared) = scheduler.upgrade() {
                shared.on_tick(phase, epoch, delta_time);
            }
        })
    }

    /// Number of subscribers of `phase`
    pub fn listener_count(&self, phase: Phase) -> usize {
        self.shared.registry(phase).len()
    }

    /// Whether `phase` has any subscribers
    pub fn is_active(&self, phase: Phase) -> bool {
        self.listener_count(phase) > 0
    }

    /// Whether `phase` currently holds a tick-source connection
    pub fn is_connected(&self, phase: Phase) -> bool {
        self.shared.registry(phase).is_connected()
    }

    /// Drop every subscription and disconnect every phase
    ///
    /// All phases are torn down even if a disconnect fails; the first
    /// failure is returned. Ticks still in flight from old connections are
    /// ignored.
    pub fn cleanup_all(&self) -> Result<()> {
        let mut first_err = None;

        for phase in Phase::ALL {
            let mut registry = self.shared.registry(phase);
            registry.clear();
            let Some(connection) = registry.take_connection() else {
                continue;
            };

            tracing::debug!(%phase, "cleanup, disconnecting tick source");
            if let Err(source) = connection.disconnect() {
                tracing::warn!(%phase, error = %source, "failed to disconnect tick source");
                first_err.get_or_insert(SchedulerError::Disconnect { phase, source });
            }
        }

        self.shared.pool.release_idle();
        first_err.map_or(Ok(()), Err)
    }

    /// Snapshot of scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            phases: Phase::ALL
                .iter()
                .map(|&phase| self.shared.registry(phase).stats())
                .collect(),
            workers: self.shared.pool.stats(),
        }
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.shared.pool.stats()
    }
}

/// Statistics about the scheduler
#[derive(Clone, Debug)]
pub struct SchedulerStats {
    /// One entry per phase, in [`Phase::ALL`] order
    pub phases: Vec<PhaseStats>,
    pub workers: WorkerStats,
}

impl SchedulerStats {
    pub fn phase(&self, phase: Phase) -> &PhaseStats {
        &self.phases[phase.index()]
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to one registered callback
///
/// Holds only a weak reference to the scheduler. Dropping the handle does
/// not unsubscribe; use [`Subscription::into_guard`] for that.
#[derive(Clone, Debug)]
#[must_use = "a subscription stays registered until `unsubscribe` is called"]
pub struct Subscription {
    phase: Phase,
    id: Option<SubscriptionId>,
    scheduler: Weak<SchedulerShared>,
}

impl Subscription {
    fn inert(phase: Phase) -> Self {
        Self {
            phase,
            id: None,
            scheduler: Weak::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The subscription's identity, `None` for inert subscriptions
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    /// Whether the phase was unsupported and nothing was registered
    pub fn is_inert(&self) -> bool {
        self.id.is_none()
    }

    /// Whether the callback is still registered
    ///
    /// `false` once unsubscribed, after [`FrameScheduler::cleanup_all`], for
    /// inert subscriptions and when the scheduler is gone.
    pub fn is_registered(&self) -> bool {
        match (self.id, self.scheduler.upgrade()) {
            (Some(id), Some(shared)) => shared.registry(id.phase()).contains(id.seq()),
            _ => false,
        }
    }

    /// Remove the callback
    ///
    /// Calling this again, on an inert subscription, or after the scheduler
    /// is gone does nothing. A tick already dispatched may still run the
    /// callback once.
    pub fn unsubscribe(&self) -> Result<()> {
        match (self.id, self.scheduler.upgrade()) {
            (Some(id), Some(shared)) => shared.unsubscribe(id),
            _ => Ok(()),
        }
    }

    /// Unsubscribe automatically when the guard is dropped
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard(self)
    }
}

/// Unsubscribes on drop
#[derive(Debug)]
pub struct SubscriptionGuard(Subscription);

impl SubscriptionGuard {
    pub fn subscription(&self) -> &Subscription {
        &self.0
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Err(err) = self.0.unsubscribe() {
            tracing::warn!(error = %err, "failed to unsubscribe on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::source::{Connection, ManualTickSource};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn manual() -> (ManualTickSource, FrameScheduler) {
        let source = ManualTickSource::new();
        let scheduler = FrameScheduler::new(Arc::new(source.clone())).unwrap();
        (source, scheduler)
    }

    fn counter(scheduler: &FrameScheduler, phase: Phase) -> (Subscription, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let sub = scheduler
            .subscribe(phase, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        (sub, count)
    }

    /// Tick source whose connections can be made to fail
    #[derive(Default)]
    struct FlakySource {
        fail_connect: AtomicBool,
        fail_disconnect: Arc<AtomicBool>,
    }

    impl TickSource for FlakySource {
        fn supports(&self, _phase: Phase) -> bool {
            true
        }

        fn connect(&self, _phase: Phase, _sink: TickSink) -> std::result::Result<Connection, SourceError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(SourceError::Failed("no signal".into()));
            }
            let fail = Arc::clone(&self.fail_disconnect);
            Ok(Connection::from_fn(move || {
                if fail.load(Ordering::SeqCst) {
                    Err(SourceError::Failed("stuck".into()))
                } else {
                    Ok(())
                }
            }))
        }
    }

    #[test]
    fn test_new_requires_runtime() {
        let source = Arc::new(ManualTickSource::new());
        assert!(matches!(
            FrameScheduler::new(source),
            Err(SchedulerError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_lazy_connect_and_disconnect() {
        let (source, scheduler) = manual();

        for phase in Phase::ALL {
            assert!(!scheduler.is_connected(phase));
            assert!(!source.is_connected(phase));
        }

        let (a, _) = counter(&scheduler, Phase::Simulation);
        assert!(scheduler.is_connected(Phase::Simulation));
        assert!(source.is_connected(Phase::Simulation));
        assert!(!source.is_connected(Phase::PrePhysics));

        let (b, _) = counter(&scheduler, Phase::Simulation);
        assert_eq!(source.connect_count(), 1);

        assert!(a.is_registered());
        a.unsubscribe().unwrap();
        assert!(!a.is_registered());
        assert!(source.is_connected(Phase::Simulation));
        b.unsubscribe().unwrap();
        assert!(!scheduler.is_connected(Phase::Simulation));
        assert!(!source.is_connected(Phase::Simulation));
        assert_eq!(source.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_simulation_scenario() {
        let (source, scheduler) = manual();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx1 = tx.clone();
        let f1 = scheduler
            .subscribe(Phase::Simulation, move |dt| {
                let _ = tx1.send(("f1", dt));
            })
            .unwrap();
        let f2 = scheduler
            .subscribe(Phase::Simulation, move |dt| {
                let _ = tx.send(("f2", dt));
            })
            .unwrap();
        assert_eq!(scheduler.listener_count(Phase::Simulation), 2);

        assert!(source.fire(Phase::Simulation, 0.016));
        settle().await;

        let mut calls = Vec::new();
        while let Ok(call) = rx.try_recv() {
            calls.push(call);
        }
        calls.sort_by_key(|call| call.0);
        assert_eq!(calls, vec![("f1", 0.016), ("f2", 0.016)]);

        f1.unsubscribe().unwrap();
        assert_eq!(scheduler.listener_count(Phase::Simulation), 1);
        f2.unsubscribe().unwrap();
        assert_eq!(scheduler.listener_count(Phase::Simulation), 0);
        assert!(!source.is_connected(Phase::Simulation));
    }

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let (source, scheduler) = manual();
        let subs: Vec<_> = (0..10)
            .map(|_| counter(&scheduler, Phase::PrePhysics))
            .collect();

        source.fire(Phase::PrePhysics, 0.5);
        settle().await;

        assert!(subs.iter().all(|(_, c)| c.load(Ordering::SeqCst) == 1));
        let stats = scheduler.stats();
        assert_eq!(stats.phase(Phase::PrePhysics).ticks, 1);
        assert_eq!(stats.phase(Phase::PrePhysics).dispatched, 10);
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated() {
        let (source, scheduler) = manual();
        let (_a, first) = counter(&scheduler, Phase::Simulation);
        let _panics = scheduler
            .subscribe(Phase::Simulation, |_| panic!("subscriber bug"))
            .unwrap();
        let _errors = scheduler
            .subscribe_async(Phase::Simulation, |_| async {
                Err::<(), _>(anyhow::anyhow!("subscriber error"))
            })
            .unwrap();
        let (_b, last) = counter(&scheduler, Phase::Simulation);

        source.fire(Phase::Simulation, 0.016);
        settle().await;
        source.fire(Phase::Simulation, 0.016);
        settle().await;

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(last.load(Ordering::SeqCst), 2);
        assert!(scheduler.is_connected(Phase::Simulation));
        assert_eq!(scheduler.stats().phase(Phase::Simulation).failures, 4);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (source, scheduler) = manual();
        let (sub, count) = counter(&scheduler, Phase::Simulation);

        sub.unsubscribe().unwrap();
        sub.unsubscribe().unwrap();
        sub.clone().unsubscribe().unwrap();

        assert!(!source.fire(Phase::Simulation, 0.016));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(source.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_phase_yields_inert_subscription() {
        let source = ManualTickSource::headless();
        let scheduler = FrameScheduler::new(Arc::new(source.clone())).unwrap();

        let sub = scheduler.subscribe(Phase::PreRender, |_| {}).unwrap();
        assert!(sub.is_inert());
        assert_eq!(scheduler.listener_count(Phase::PreRender), 0);
        assert!(!source.is_connected(Phase::PreRender));
        sub.unsubscribe().unwrap();
        sub.unsubscribe().unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_all_resets_every_phase() {
        let (source, scheduler) = manual();
        let counts: Vec<_> = Phase::ALL
            .iter()
            .map(|&phase| counter(&scheduler, phase))
            .collect();

        scheduler.cleanup_all().unwrap();

        for phase in Phase::ALL {
            assert_eq!(scheduler.listener_count(phase), 0);
            assert!(!scheduler.is_active(phase));
            assert!(!scheduler.is_connected(phase));
            assert!(!source.fire(phase, 0.016));
        }
        settle().await;
        assert!(counts.iter().all(|(_, c)| c.load(Ordering::SeqCst) == 0));

        // Old handles are harmless after cleanup
        for (sub, _) in &counts {
            assert!(!sub.is_registered());
            sub.unsubscribe().unwrap();
        }
    }

    /// Manual source that also hands out every sink it connects
    struct CapturingSource {
        inner: ManualTickSource,
        sinks: Mutex<Vec<TickSink>>,
    }

    impl TickSource for CapturingSource {
        fn supports(&self, phase: Phase) -> bool {
            self.inner.supports(phase)
        }

        fn connect(&self, phase: Phase, sink: TickSink) -> std::result::Result<Connection, SourceError> {
            self.sinks.lock().unwrap().push(sink.clone());
            self.inner.connect(phase, sink)
        }
    }

    #[tokio::test]
    async fn test_stale_sink_fire_is_ignored() {
        let source = Arc::new(CapturingSource {
            inner: ManualTickSource::new(),
            sinks: Mutex::default(),
        });
        let scheduler = FrameScheduler::new(source.clone()).unwrap();
        let (sub, count) = counter(&scheduler, Phase::PrePhysics);
        let stale = source.sinks.lock().unwrap().pop().unwrap();

        scheduler.cleanup_all().unwrap();
        stale.fire(0.016);
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().phase(Phase::PrePhysics).stale_fires, 1);

        // A fresh connection does not revive the old sink
        let (_again, again_count) = counter(&scheduler, Phase::PrePhysics);
        stale.fire(0.016);
        source.inner.fire(Phase::PrePhysics, 0.016);
        settle().await;

        assert_eq!(again_count.load(Ordering::SeqCst), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().phase(Phase::PrePhysics).stale_fires, 2);
        sub.unsubscribe().unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_during_tick_waits_for_next_tick() {
        let (source, scheduler) = manual();
        let late_count = Arc::new(AtomicU32::new(0));
        let late_sub = Arc::new(Mutex::new(None));

        let inner = scheduler.clone();
        let lc = Arc::clone(&late_count);
        let slot = Arc::clone(&late_sub);
        let _adder = scheduler
            .subscribe(Phase::Simulation, move |_| {
                let mut slot = slot.lock().unwrap();
                if slot.is_none() {
                    let lc = Arc::clone(&lc);
                    *slot = Some(
                        inner
                            .subscribe(Phase::Simulation, move |_| {
                                lc.fetch_add(1, Ordering::SeqCst);
                            })
                            .unwrap(),
                    );
                }
            })
            .unwrap();

        source.fire(Phase::Simulation, 0.016);
        settle().await;
        assert_eq!(late_count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.listener_count(Phase::Simulation), 2);

        source.fire(Phase::Simulation, 0.016);
        settle().await;
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_suspended_callback_does_not_block_others() {
        let (source, scheduler) = manual();
        let gate = Arc::new(Semaphore::new(0));

        let g = Arc::clone(&gate);
        let _slow = scheduler
            .subscribe_async(Phase::Simulation, move |_| {
                let g = Arc::clone(&g);
                async move {
                    let _permit = g.acquire().await?;
                    anyhow::Ok(())
                }
            })
            .unwrap();
        let (_fast, count) = counter(&scheduler, Phase::Simulation);

        source.fire(Phase::Simulation, 0.016);
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.worker_stats().live, 2);

        gate.add_permits(1);
        settle().await;
        let workers = scheduler.worker_stats();
        assert_eq!(workers.idle, 1);
        assert_eq!(workers.live, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_rolls_back() {
        let source = Arc::new(FlakySource::default());
        source.fail_connect.store(true, Ordering::SeqCst);
        let scheduler = FrameScheduler::new(source.clone()).unwrap();

        let err = scheduler.subscribe(Phase::Simulation, |_| {}).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Connect {
                phase: Phase::Simulation,
                ..
            }
        ));
        assert_eq!(scheduler.listener_count(Phase::Simulation), 0);
        assert!(!scheduler.is_connected(Phase::Simulation));

        source.fail_connect.store(false, Ordering::SeqCst);
        let sub = scheduler.subscribe(Phase::Simulation, |_| {}).unwrap();
        assert_eq!(sub.id().unwrap().seq(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_failure_is_reported() {
        let source = Arc::new(FlakySource::default());
        let scheduler = FrameScheduler::new(source.clone()).unwrap();
        let sub = scheduler.subscribe(Phase::PrePhysics, |_| {}).unwrap();
        let _other = scheduler.subscribe(Phase::PreRender, |_| {}).unwrap();

        source.fail_disconnect.store(true, Ordering::SeqCst);
        let err = sub.unsubscribe().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Disconnect {
                phase: Phase::PrePhysics,
                ..
            }
        ));
        assert!(!scheduler.is_connected(Phase::PrePhysics));

        let err = scheduler.cleanup_all().unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Disconnect {
                phase: Phase::PreRender,
                ..
            }
        ));
        assert!(!scheduler.is_active(Phase::PreRender));
        assert!(!scheduler.is_connected(Phase::PreRender));
    }

    #[tokio::test]
    async fn test_guard_unsubscribes_on_drop() {
        let (source, scheduler) = manual();
        {
            let _guard = scheduler
                .subscribe(Phase::Simulation, |_| {})
                .unwrap()
                .into_guard();
            assert!(source.is_connected(Phase::Simulation));
        }
        assert!(!source.is_connected(Phase::Simulation));
        assert_eq!(scheduler.listener_count(Phase::Simulation), 0);
    }

    #[tokio::test]
    async fn test_dropping_scheduler_disconnects_source() {
        let (source, scheduler) = manual();
        let (sub, _) = counter(&scheduler, Phase::PrePhysics);
        drop(scheduler);

        assert!(!source.is_connected(Phase::PrePhysics));
        sub.unsubscribe().unwrap();
    }

    #[tokio::test]
    async fn test_sequential_ticks_reuse_workers() {
        let (source, scheduler) = manual();
        let (_sub, count) = counter(&scheduler, Phase::Simulation);

        for _ in 0..5 {
            source.fire(Phase::Simulation, 0.016);
            settle().await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 5);
        let workers = scheduler.worker_stats();
        assert_eq!(workers.spawned, 1);
        assert_eq!(workers.reused, 4);
        assert!(workers.idle <= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_shares_one_connection() {
        let (source, scheduler) = manual();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler.subscribe(Phase::Simulation, |_| {}).unwrap()
            }));
        }

        let mut subs = Vec::new();
        for task in tasks {
            subs.push(task.await.unwrap());
        }
        assert_eq!(scheduler.listener_count(Phase::Simulation), 16);
        assert_eq!(source.connect_count(), 1);

        for sub in subs {
            sub.unsubscribe().unwrap();
        }
        assert_eq!(source.disconnect_count(), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = scheduler
            .subscribe(Phase::Simulation, move |dt| {
                let _ = tx.send(dt);
            })
            .unwrap();
        source.fire(Phase::Simulation, 0.016);
        let dt = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dt, 0.016);
    }
}
