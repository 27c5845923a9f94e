//! Timer-driven tick source
//!
//! Fires each connected phase from its own tokio task at a fixed rate. Useful
//! for headless hosts and tools that have no platform frame loop, and as the
//! background driver of the CLI.

use crate::config::{SourceConfig, TickRates};
use crate::error::SourceError;
use crate::phase::Phase;
use crate::source::{Connection, TickSink, TickSource};
use tokio::runtime::Handle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Tick source backed by `tokio::time::interval`
pub struct IntervalTickSource {
    rates: TickRates,
    render_context: bool,
    runtime: Handle,
}

impl IntervalTickSource {
    pub fn new(runtime: Handle, rates: TickRates) -> Self {
        Self {
            rates,
            render_context: true,
            runtime,
        }
    }

    pub fn from_config(runtime: Handle, config: &SourceConfig) -> Self {
        Self::new(runtime, config.rates).with_render_context(config.render_context)
    }

    /// Enable or disable render-only phases
    pub fn with_render_context(mut self, render_context: bool) -> Self {
        self.render_context = render_context;
        self
    }

    pub fn rates(&self) -> &TickRates {
        &self.rates
    }
}

impl TickSource for IntervalTickSource {
    fn supports(&self, phase: Phase) -> bool {
        self.render_context || !phase.requires_render_context()
    }

    fn connect(&self, phase: Phase, sink: TickSink) -> Result<Connection, SourceError> {
        if !self.supports(phase) {
            return Err(SourceError::Unsupported(phase));
        }

        let period = self.rates.period(phase);
        tracing::debug!(%phase, ?period, "starting interval tick task");

        let handle = self.runtime.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            let mut last = Instant::now();

            loop {
                interval.tick().await;
                let now = Instant::now();
                let dt = (now - last).as_secs_f32();
                last = now;
                sink.fire(dt);
            }
        });

        Ok(Connection::Task(handle))
    }
}
