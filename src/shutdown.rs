//! Shutdown handling for the supervisor
//!
//! - `ShutdownSignals` collects SIGINT, SIGTERM and SIGHUP without blocking,
//!   so the supervisor can also notice the engine exiting on its own
//! - `finish_run` brings the session to idle and reports how the run ended

use crate::error::{Result, WorkerError};
use crate::outcome::RunOutcome;
use crate::session::WorkerSession;
use nix::sys::signal::Signal;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Pending termination signals for the supervisor.
pub struct ShutdownSignals {
    signals: Signals,
}

impl ShutdownSignals {
    /// Register handlers for SIGINT (Ctrl+C), SIGTERM and SIGHUP
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            signals: Signals::new([SIGINT, SIGTERM, SIGHUP])?,
        })
    }

    /// Next received signal, if any; never blocks
    pub fn poll(&mut self) -> Option<i32> {
        self.signals.pending().next()
    }
}

/// Why the supervisor stopped waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A termination signal arrived
    Signal(i32),
    /// The engine returned without being asked to
    EngineExited,
}

/// Block until a termination signal arrives or the session goes idle.
pub fn wait_for_exit(
    session: &WorkerSession,
    signals: &mut ShutdownSignals,
    poll_interval: Duration,
) -> ExitReason {
    loop {
        if let Some(sig) = signals.poll() {
            return ExitReason::Signal(sig);
        }
        if !session.is_running() {
            return ExitReason::EngineExited;
        }
        thread::sleep(poll_interval);
    }
}

/// Stop the session for `reason` and return the recorded outcome.
///
/// After a natural engine exit the stop only reaps the worker thread, so a
/// module without a quit entry point does not hide the engine's code.
///
/// # Errors
///
/// Any stop failure after a signal; after a natural exit, failures other
/// than `QuitUnavailable`.
pub fn finish_run(session: &WorkerSession, reason: ExitReason) -> Result<RunOutcome> {
    match (reason, session.stop()) {
        (_, Ok(outcome)) => debug!("finish_run: {:?} after {:?}", outcome, reason),
        (ExitReason::EngineExited, Err(WorkerError::QuitUnavailable(e))) => {
            debug!("finish_run: engine already exited, quit unavailable ({})", e);
        }
        (_, Err(e)) => return Err(e),
    }
    Ok(session.last_outcome())
}

pub fn signal_name(sig: i32) -> &'static str {
    Signal::try_from(sig).map(Signal::as_str).unwrap_or("UNKNOWN")
}
