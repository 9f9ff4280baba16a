//! Error handling module for the tunnel worker
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every variant maps onto one of the integer codes in [`crate::outcome::codes`]
//! so the C control surface never has to invent its own numbering.

use crate::outcome::codes;
use thiserror::Error;

/// Main error type for the tunnel worker
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The engine module, or the run entry point a start needs, is unavailable
    #[error("Engine not loaded: {0}")]
    EngineNotLoaded(String),

    /// The engine module, or its quit entry point, is unavailable
    #[error("Engine quit entry point unavailable: {0}")]
    QuitUnavailable(String),

    /// Caller-supplied configuration could not be read
    #[error("Bad input: {0}")]
    BadInput(String),

    /// The worker thread could not be created
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine finished during the startup grace window with a nonzero code
    #[error("Engine exited during startup with code {0}")]
    EngineExited(i32),

    /// IO errors from the upstream readiness wait (supervisor only)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

impl WorkerError {
    /// Create an engine-not-loaded error
    pub fn not_loaded(msg: impl Into<String>) -> Self {
        Self::EngineNotLoaded(msg.into())
    }

    /// Create a quit-unavailable error
    pub fn quit_unavailable(msg: impl Into<String>) -> Self {
        Self::QuitUnavailable(msg.into())
    }

    /// Create a bad input error
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Self::BadInput(msg.into())
    }

    /// Integer code reported across the C control surface.
    ///
    /// `Io` only comes from the supervisor's upstream readiness wait and never
    /// reaches the C functions; it maps to `BAD_INPUT` so the match stays total.
    pub fn code(&self) -> i32 {
        match self {
            Self::EngineNotLoaded(_) => codes::START_NOT_LOADED,
            Self::QuitUnavailable(_) => codes::STOP_NOT_LOADED,
            Self::Spawn(_) => codes::SPAWN_FAILED,
            Self::EngineExited(code) => *code,
            Self::BadInput(_) | Self::Io(_) => codes::BAD_INPUT,
        }
    }
}
