//! Spring-driven values
//!
//! A [`MotionValue`] animates towards its target on the scheduler's
//! [`Phase::Simulation`] ticks. It only holds a subscription while it is
//! actually moving, so settled values cost nothing per frame.
//!
//! ```ignore
//! let opacity = MotionValue::new(get_scheduler(), 1.0, SpringConfig::stiff());
//! opacity.set_target(0.0)?;
//!
//! // later, from the render path
//! let current = opacity.get();
//! ```

use crate::error::Result;
use crate::lock;
use crate::phase::Phase;
use crate::scheduler::{FrameScheduler, Subscription};
use crate::spring::{Spring, SpringConfig};
use std::sync::{Arc, Mutex, Weak};

struct MotionState {
    spring: Spring,
    /// Present while the value is animating, unless the scheduler was reset
    subscription: Option<Subscription>,
}

/// A value that follows its target with spring physics
pub struct MotionValue {
    scheduler: FrameScheduler,
    state: Arc<Mutex<MotionState>>,
}

impl MotionValue {
    pub fn new(scheduler: FrameScheduler, initial: f32, config: SpringConfig) -> Self {
        Self {
            scheduler,
            state: Arc::new(Mutex::new(MotionState {
                spring: Spring::new(config, initial),
                subscription: None,
            })),
        }
    }

    /// Current animated value
    pub fn get(&self) -> f32 {
        lock(&self.state).spring.value()
    }

    pub fn target(&self) -> f32 {
        lock(&self.state).spring.target()
    }

    pub fn velocity(&self) -> f32 {
        lock(&self.state).spring.velocity()
    }

    /// Whether the value is subscribed and moving
    pub fn is_animating(&self) -> bool {
        lock(&self.state)
            .subscription
            .as_ref()
            .is_some_and(Subscription::is_registered)
    }

    /// Animate towards `target`
    pub fn set_target(&self, target: f32) -> Result<()> {
        let mut state = lock(&self.state);
        state.spring.set_target(target);
        if state
            .subscription
            .as_ref()
            .is_some_and(Subscription::is_registered)
        {
            return Ok(());
        }
        // Dropped by `cleanup_all`
        state.subscription = None;
        if state.spring.is_settled() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.state);
        let subscription = self
            .scheduler
            .subscribe(Phase::Simulation, move |dt| step_motion(&weak, dt))?;

        if subscription.is_inert() {
            // Nothing will drive the spring here
            state.spring.snap_to(target);
        } else {
            state.subscription = Some(subscription);
        }
        Ok(())
    }

    /// Jump to `value` without animating
    pub fn snap(&self, value: f32) -> Result<()> {
        let mut state = lock(&self.state);
        state.spring.snap_to(value);
        match state.subscription.take() {
            Some(subscription) => subscription.unsubscribe(),
            None => Ok(()),
        }
    }
}

fn step_motion(state: &Weak<Mutex<MotionState>>, delta_time: f32) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = lock(&state);
    state.spring.step(delta_time);

    if state.spring.is_settled() {
        if let Some(subscription) = state.subscription.take() {
            if let Err(err) = subscription.unsubscribe() {
                tracing::warn!(error = %err, "failed to stop settled motion");
            }
        }
    }
}

impl Drop for MotionValue {
    fn drop(&mut self) {
        if let Some(subscription) = lock(&self.state).subscription.take() {
            if let Err(err) = subscription.unsubscribe() {
                tracing::warn!(error = %err, "failed to stop motion on drop");
            }
        }
    }
}
