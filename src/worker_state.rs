//! Worker phase state machine
//!
//! The phase is the authoritative answer to "is an engine run active".
//! It lives in an atomic so the worker thread and any number of caller
//! threads can read it without taking the session's control lock.
//!
//! # Phase Flow
//!
//! ```text
//! Idle ──start──▶ Starting ──spawned──▶ Running ──stop──▶ Stopping
//!  ▲                 │                     │                 │
//!  │                 └── spawn failed ─────┤                 │
//!  └──────────── worker exits / join done ─┴─────────────────┘
//! ```
//!
//! There is no failed state: a rejected start never leaves `Idle`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of the worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum WorkerPhase {
    /// No run active
    #[default]
    Idle = 0,

    /// Inside `start`, worker thread being created
    Starting = 1,

    /// Worker thread alive, engine call in flight
    Running = 2,

    /// Quit requested, waiting for the worker thread to exit
    Stopping = 3,
}

impl WorkerPhase {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    /// Returns true while a run is in progress (anything but `Idle`)
    #[inline]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Lock-free holder for the current [`WorkerPhase`].
#[derive(Debug, Default)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(WorkerPhase::Idle as u8))
    }

    #[inline]
    pub fn load(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, phase: WorkerPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    /// Move from `from` to `to` only if the phase is still `from`.
    ///
    /// Returns the phase observed on failure.
    pub fn transition(&self, from: WorkerPhase, to: WorkerPhase) -> Result<(), WorkerPhase> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(WorkerPhase::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let cell = PhaseCell::new();
        assert_eq!(cell.load(), WorkerPhase::Idle);
        assert!(!cell.load().is_active());
    }

    #[test]
    fn test_active_phases() {
        assert!(WorkerPhase::Starting.is_active());
        assert!(WorkerPhase::Running.is_active());
        assert!(WorkerPhase::Stopping.is_active());
    }

    #[test]
    fn test_transition_succeeds_from_expected_phase() {
        let cell = PhaseCell::new();
        cell.store(WorkerPhase::Starting);
        assert!(cell.transition(WorkerPhase::Starting, WorkerPhase::Running).is_ok());
        assert_eq!(cell.load(), WorkerPhase::Running);
    }

    #[test]
    fn test_transition_reports_observed_phase() {
        // Worker finished before the spawner could mark it running
        let cell = PhaseCell::new();
        let observed = cell.transition(WorkerPhase::Starting, WorkerPhase::Running);
        assert_eq!(observed, Err(WorkerPhase::Idle));
        assert_eq!(cell.load(), WorkerPhase::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkerPhase::Stopping.to_string(), "stopping");
    }
}
