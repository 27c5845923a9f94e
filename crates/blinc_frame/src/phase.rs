//! Scheduling phases
//!
//! A phase names one recurring tick event of the host. The set is fixed at
//! compile time; every phase owns its own subscriber set and at most one live
//! connection to the external tick source.

use crate::error::SchedulerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A well-known frame phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Runs every frame after the physics step (the host heartbeat)
    Simulation,
    /// Runs every frame before the physics step
    PrePhysics,
    /// Runs every frame before rendering; needs a rendering context
    PreRender,
}

impl Phase {
    /// All phases in index order
    pub const ALL: [Phase; 3] = [Phase::Simulation, Phase::PrePhysics, Phase::PreRender];

    /// Number of phases
    pub const COUNT: usize = Self::ALL.len();

    /// Stable lowercase name
    pub fn name(self) -> &'static str {
        match self {
            Phase::Simulation => "simulation",
            Phase::PrePhysics => "pre-physics",
            Phase::PreRender => "pre-render",
        }
    }

    /// Dense index into per-phase tables
    pub fn index(self) -> usize {
        match self {
            Phase::Simulation => 0,
            Phase::PrePhysics => 1,
            Phase::PreRender => 2,
        }
    }

    /// Whether the phase can only be driven where frames are rendered
    pub fn requires_render_context(self) -> bool {
        matches!(self, Phase::PreRender)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Phase {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulation" | "heartbeat" => Ok(Phase::Simulation),
            "pre-physics" | "pre-simulation" | "presimulation" => Ok(Phase::PrePhysics),
            "pre-render" | "prerender" => Ok(Phase::PreRender),
            _ => Err(SchedulerError::UnknownPhase(s.to_string())),
        }
    }
}
