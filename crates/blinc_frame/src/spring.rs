//! Spring physics
//!
//! RK4-integrated damped spring, stepped with whatever delta the frame
//! scheduler hands out. Long frames are split into fixed substeps so a
//! hitch never feeds the integrator one huge step.

use serde::{Deserialize, Serialize};

/// Largest step fed to the integrator in one go (seconds)
const MAX_SUBSTEP: f32 = 1.0 / 120.0;

/// Longest frame delta considered; anything beyond is clamped (seconds)
const MAX_FRAME_DELTA: f32 = 0.25;

/// Spring parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpringConfig {
    pub stiffness: f32,
    pub damping: f32,
    pub mass: f32,
}

impl SpringConfig {
    pub fn new(stiffness: f32, damping: f32, mass: f32) -> Self {
        Self {
            stiffness,
            damping,
            mass,
        }
    }

    /// Slow, soft motion
    pub fn gentle() -> Self {
        Self::new(120.0, 14.0, 1.0)
    }

    /// Visible overshoot
    pub fn wobbly() -> Self {
        Self::new(180.0, 12.0, 1.0)
    }

    /// Quick with a hint of overshoot
    pub fn stiff() -> Self {
        Self::new(400.0, 30.0, 1.0)
    }

    /// No overshoot
    pub fn molasses() -> Self {
        Self::new(100.0, 20.0, 1.0)
    }

    pub fn critical_damping(&self) -> f32 {
        2.0 * (self.stiffness * self.mass).sqrt()
    }

    /// Will the spring oscillate around its target
    pub fn is_underdamped(&self) -> bool {
        self.damping < self.critical_damping()
    }
}

impl Default for SpringConfig {
    fn default() -> Self {
        Self::stiff()
    }
}

/// A one-dimensional spring
#[derive(Clone, Copy, Debug)]
pub struct Spring {
    config: SpringConfig,
    value: f32,
    velocity: f32,
    target: f32,
    /// Distance to target below which the spring may settle
    precision: f32,
}

impl Spring {
    pub fn new(config: SpringConfig, initial: f32) -> Self {
        Self {
            config,
            value: initial,
            velocity: 0.0,
            target: initial,
            precision: 0.01,
        }
    }

    /// Override the settle precision (velocity threshold scales with it)
    pub fn with_precision(mut self, precision: f32) -> Self {
        self.precision = precision.abs().max(f32::EPSILON);
        self
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn config(&self) -> SpringConfig {
        self.config
    }

    /// Retarget without touching velocity, so motion carries over
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    /// Jump straight to `value` and stop
    pub fn snap_to(&mut self, value: f32) {
        self.value = value;
        self.target = value;
        self.velocity = 0.0;
    }

    /// Add velocity, e.g. from a fling
    pub fn impulse(&mut self, velocity: f32) {
        self.velocity += velocity;
    }

    pub fn is_settled(&self) -> bool {
        (self.value - self.target).abs() < self.precision
            && self.velocity.abs() < self.precision * 10.0
    }

    /// Advance by one frame delta (seconds)
    pub fn step(&mut self, delta_time: f32) {
        if !delta_time.is_finite() || delta_time <= 0.0 {
            return;
        }

        let mut remaining = delta_time.min(MAX_FRAME_DELTA);
        while remaining > 0.0 {
            if self.is_settled() {
                self.snap_to(self.target);
                return;
            }
            let dt = remaining.min(MAX_SUBSTEP);
            self.integrate(dt);
            remaining -= dt;
        }

        if self.is_settled() {
            self.snap_to(self.target);
        }
    }

    fn integrate(&mut self, dt: f32) {
        let (x, v) = (self.value, self.velocity);

        let a1 = self.acceleration(x, v);
        let (x2, v2) = (x + v * dt * 0.5, v + a1 * dt * 0.5);
        let a2 = self.acceleration(x2, v2);
        let (x3, v3) = (x + v2 * dt * 0.5, v + a2 * dt * 0.5);
        let a3 = self.acceleration(x3, v3);
        let (x4, v4) = (x + v3 * dt, v + a3 * dt);
        let a4 = self.acceleration(x4, v4);

        self.value = x + (v + 2.0 * v2 + 2.0 * v3 + v4) * dt / 6.0;
        self.velocity = v + (a1 + 2.0 * a2 + 2.0 * a3 + a4) * dt / 6.0;
    }

    fn acceleration(&self, x: f32, v: f32) -> f32 {
        let spring_force = -self.config.stiffness * (x - self.target);
        let damping_force = -self.config.damping * v;
        (spring_force + damping_force) / self.config.mass
    }
}
