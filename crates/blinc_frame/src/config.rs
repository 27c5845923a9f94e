//! Scheduler configuration
//!
//! Loaded from a TOML file, every field optional:
//!
//! ```toml
//! [pool]
//! reuse_workers = true
//!
//! [source]
//! render_context = true
//!
//! [source.rates]
//! simulation = 60.0
//! pre-physics = 60.0
//! pre-render = 120.0
//! ```

use crate::error::{Result, SchedulerError};
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default tick rate in Hz
pub const DEFAULT_TICK_RATE: f64 = 60.0;

/// Slowest accepted tick rate in Hz
pub const MIN_TICK_RATE: f64 = 1e-3;

/// Fastest accepted tick rate in Hz
pub const MAX_TICK_RATE: f64 = 1e6;

/// Top-level scheduler configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Keep one finished worker parked for the next dispatch
    #[serde(default = "default_true")]
    pub reuse_workers: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reuse_workers: true,
        }
    }
}

/// Tick source settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Whether render-only phases can be driven
    #[serde(default = "default_true")]
    pub render_context: bool,
    #[serde(default)]
    pub rates: TickRates,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            render_context: true,
            rates: TickRates::default(),
        }
    }
}

/// Per-phase tick rates in Hz
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TickRates {
    #[serde(default = "default_rate")]
    pub simulation: f64,
    #[serde(default = "default_rate")]
    pub pre_physics: f64,
    #[serde(default = "default_rate")]
    pub pre_render: f64,
}

fn default_true() -> bool {
    true
}

fn default_rate() -> f64 {
    DEFAULT_TICK_RATE
}

impl Default for TickRates {
    fn default() -> Self {
        Self {
            simulation: DEFAULT_TICK_RATE,
            pre_physics: DEFAULT_TICK_RATE,
            pre_render: DEFAULT_TICK_RATE,
        }
    }
}

impl TickRates {
    /// Rate for `phase` in Hz
    pub fn get(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Simulation => self.simulation,
            Phase::PrePhysics => self.pre_physics,
            Phase::PreRender => self.pre_render,
        }
    }

    /// Time between two ticks of `phase`
    ///
    /// Falls back to the default rate if the configured one is not usable.
    pub fn period(&self, phase: Phase) -> Duration {
        let hz = self.get(phase);
        let hz = if is_valid_rate(hz) { hz } else { DEFAULT_TICK_RATE };
        match Duration::try_from_secs_f64(1.0 / hz) {
            Ok(period) if !period.is_zero() => period,
            _ => Duration::from_secs_f64(1.0 / DEFAULT_TICK_RATE),
        }
    }
}

fn is_valid_rate(hz: f64) -> bool {
    (MIN_TICK_RATE..=MAX_TICK_RATE).contains(&hz)
}

impl SchedulerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SchedulerConfig =
            toml::from_str(content).map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchedulerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            SchedulerError::Config(msg) => {
                SchedulerError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        for phase in Phase::ALL {
            let hz = self.source.rates.get(phase);
            if !is_valid_rate(hz) {
                return Err(SchedulerError::Config(format!(
                    "tick rate for {phase} must be between {MIN_TICK_RATE} and {MAX_TICK_RATE} Hz, got {hz}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SchedulerError::Config(e.to_string()))
    }
}
