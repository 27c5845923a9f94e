//! Blinc Frame Scheduler
//!
//! Phase-based per-frame callbacks for code that has to run on every host
//! frame without owning the frame loop.
//!
//! # Features
//!
//! - **Phases**: Simulation, pre-physics and pre-render ticks, each with its own subscribers
//! - **Lazy Connections**: A phase is only wired to the tick source while someone listens
//! - **Failure Isolation**: A callback that panics or errors never disturbs the others
//! - **Worker Reuse**: Callbacks run on pooled tokio tasks with one idle worker kept warm
//! - **Motion Values**: Spring-driven values that tick only while moving
//!
//! # Example
//!
//! ```ignore
//! use blinc_frame::{set_global_scheduler, get_scheduler, FrameScheduler, IntervalTickSource, Phase};
//!
//! let source = IntervalTickSource::new(Handle::current(), TickRates::default());
//! set_global_scheduler(FrameScheduler::new(Arc::new(source))?);
//!
//! let sub = get_scheduler().subscribe(Phase::Simulation, |dt| step_world(dt))?;
//! ```

pub mod config;
pub mod error;
pub mod interval;
pub mod motion;
pub mod phase;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod spring;
pub mod worker;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{
    PoolConfig, SchedulerConfig, SourceConfig, TickRates, DEFAULT_TICK_RATE, MAX_TICK_RATE,
    MIN_TICK_RATE,
};
pub use error::{Result, SchedulerError, SourceError};
pub use interval::IntervalTickSource;
pub use motion::MotionValue;
pub use phase::Phase;
pub use registry::{PhaseStats, SubscriptionId, TickCallback, TickFuture};
pub use scheduler::{
    get_scheduler, is_scheduler_initialized, set_global_scheduler, try_get_scheduler,
    FrameScheduler, SchedulerStats, Subscription, SubscriptionGuard,
};
pub use source::{Connection, ManualTickSource, TickSink, TickSource};
pub use spring::{Spring, SpringConfig};
pub use worker::WorkerStats;

/// Lock a mutex, ignoring poisoning
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
