//! Run outcome codes
//!
//! Every result this crate reports across the control boundary is an integer.
//! Zero and positive values (and any negative value not listed here) are the
//! engine's own return codes; the reserved negatives below are written by this
//! layer when the engine could not be invoked at all.

use std::fmt;

/// Reserved integer codes.
pub mod codes {
    /// Success, already running, or not running.
    pub const OK: i32 = 0;
    /// No run has completed since the last start.
    pub const PENDING: i32 = -9999;
    /// `start`: the engine module or its run entry point is missing.
    pub const START_NOT_LOADED: i32 = -10;
    /// `start`: the worker thread could not be created.
    pub const SPAWN_FAILED: i32 = -11;
    /// `start`: the configuration could not be read.
    pub const BAD_INPUT: i32 = -12;
    /// `stop`: the engine module or its quit entry point is missing.
    pub const STOP_NOT_LOADED: i32 = -20;
    /// Worker: the run entry point was unbound when the thread started.
    pub const ENGINE_UNBOUND: i32 = -9001;
    /// Worker: the tunnel descriptor was negative.
    pub const INVALID_DESCRIPTOR: i32 = -9002;
    /// C surface: an entry point caught a panic. Returned, never recorded.
    pub const INTERNAL_ERROR: i32 = -9003;
}

/// Typed view of the last recorded return code.
///
/// An engine that happens to return one of the reserved codes is reported
/// as the matching sentinel; the raw integer is always available via
/// [`RunOutcome::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    /// Nothing recorded since the last start (or ever)
    Pending,
    /// The engine ran and returned this code
    Exited(i32),
    /// The worker started without a bound run entry point
    EngineUnbound,
    /// The worker started with a negative tunnel descriptor
    InvalidDescriptor,
    /// The start call rejected its configuration
    BadInput,
    /// The start call could not create the worker thread
    SpawnFailed,
}

impl RunOutcome {
    pub const fn from_code(code: i32) -> Self {
        match code {
            codes::PENDING => Self::Pending,
            codes::ENGINE_UNBOUND => Self::EngineUnbound,
            codes::INVALID_DESCRIPTOR => Self::InvalidDescriptor,
            codes::BAD_INPUT => Self::BadInput,
            codes::SPAWN_FAILED => Self::SpawnFailed,
            other => Self::Exited(other),
        }
    }

    pub const fn code(self) -> i32 {
        match self {
            Self::Pending => codes::PENDING,
            Self::Exited(code) => code,
            Self::EngineUnbound => codes::ENGINE_UNBOUND,
            Self::InvalidDescriptor => codes::INVALID_DESCRIPTOR,
            Self::BadInput => codes::BAD_INPUT,
            Self::SpawnFailed => codes::SPAWN_FAILED,
        }
    }

    #[inline]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// True for anything other than "still pending" or a clean engine exit.
    #[inline]
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Pending | Self::Exited(0))
    }

    /// Process exit status for a supervisor reporting this outcome.
    ///
    /// Engine codes in `0..=255` pass through unchanged. Everything else,
    /// including sentinels and codes the status byte cannot hold, is 1.
    pub fn exit_status(self) -> u8 {
        match self {
            Self::Exited(code) => u8::try_from(code).unwrap_or(1),
            _ => 1,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Exited(code) => write!(f, "engine exited with code {}", code),
            Self::EngineUnbound => write!(f, "engine run entry point unbound"),
            Self::InvalidDescriptor => write!(f, "invalid tunnel descriptor"),
            Self::BadInput => write!(f, "configuration rejected"),
            Self::SpawnFailed => write!(f, "worker thread spawn failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_map_to_variants() {
        assert_eq!(RunOutcome::from_code(-9999), RunOutcome::Pending);
        assert_eq!(RunOutcome::from_code(-9001), RunOutcome::EngineUnbound);
        assert_eq!(RunOutcome::from_code(-9002), RunOutcome::InvalidDescriptor);
        assert_eq!(RunOutcome::from_code(-12), RunOutcome::BadInput);
        assert_eq!(RunOutcome::from_code(-11), RunOutcome::SpawnFailed);
    }

    #[test]
    fn test_engine_codes_pass_through() {
        assert_eq!(RunOutcome::from_code(0), RunOutcome::Exited(0));
        assert_eq!(RunOutcome::from_code(-1), RunOutcome::Exited(-1));
        assert_eq!(RunOutcome::from_code(255).code(), 255);
    }

    #[test]
    fn test_failure_classification() {
        assert!(!RunOutcome::Pending.is_failure());
        assert!(!RunOutcome::Exited(0).is_failure());
        assert!(RunOutcome::Exited(1).is_failure());
        assert!(RunOutcome::InvalidDescriptor.is_failure());
        assert!(RunOutcome::Pending.is_pending());
    }

    #[test]
    fn test_exit_status_keeps_engine_code() {
        assert_eq!(RunOutcome::Exited(0).exit_status(), 0);
        assert_eq!(RunOutcome::Exited(3).exit_status(), 3);
        assert_eq!(RunOutcome::Exited(255).exit_status(), 255);
    }

    #[test]
    fn test_exit_status_never_reports_success_for_failures() {
        // 256 would wrap to 0 if truncated
        assert_eq!(RunOutcome::Exited(256).exit_status(), 1);
        assert_eq!(RunOutcome::Exited(-1).exit_status(), 1);
        assert_eq!(RunOutcome::InvalidDescriptor.exit_status(), 1);
        assert_eq!(RunOutcome::EngineUnbound.exit_status(), 1);
        assert_eq!(RunOutcome::Pending.exit_status(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(RunOutcome::Exited(3).to_string(), "engine exited with code 3");
        assert_eq!(RunOutcome::Pending.to_string(), "pending");
    }
}
