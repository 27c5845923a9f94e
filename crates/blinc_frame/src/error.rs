//! Frame scheduler error types

use crate::phase::Phase;
use thiserror::Error;

/// Errors raised by a tick source while connecting or disconnecting a phase
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source cannot drive this phase in the current context
    #[error("Phase not supported by tick source: {0}")]
    Unsupported(Phase),

    /// The source has already been shut down
    #[error("Tick source is closed")]
    Closed,

    /// Generic source failure
    #[error("Tick source failed: {0}")]
    Failed(String),
}

/// Frame scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A phase name that is not one of the fixed phases
    #[error("Unknown frame phase: {0:?}")]
    UnknownPhase(String),

    /// No tokio runtime available to host workers
    #[error("Frame scheduler requires a tokio runtime")]
    NoRuntime,

    /// Opening the tick-source connection for a phase failed
    #[error("Failed to connect {phase} tick source: {source}")]
    Connect {
        phase: Phase,
        #[source]
        source: SourceError,
    },

    /// Tearing down the tick-source connection for a phase failed
    #[error("Failed to disconnect {phase} tick source: {source}")]
    Disconnect {
        phase: Phase,
        #[source]
        source: SourceError,
    },

    /// Invalid or unreadable configuration
    #[error("Invalid scheduler configuration: {0}")]
    Config(String),
}

/// Result type for frame scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;
