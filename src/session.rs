//! Worker session and control operations
//!
//! A `WorkerSession` owns one engine loader and at most one worker thread.
//! `start`, `stop` and the status queries may be called from any thread.
//!
//! # Concurrency
//!
//! - Phase and last result are atomics; status queries never block
//! - `start` and `stop` serialize on the control mutex
//! - `stop` joins while holding the control mutex, so of two racing stops
//!   exactly one performs the join and the other observes "not running"
//! - The worker thread never takes the control mutex

use crate::engine::{EngineLoader, RUN_FROM_BYTES_SYMBOL, RUN_FROM_PATH_SYMBOL};
use crate::error::{Result, WorkerError};
use crate::outcome::{RunOutcome, codes};
use crate::runner::{self, StagedConfig, StagedRun, WORKER_THREAD_NAME, WorkerStatus};
use crate::worker_state::WorkerPhase;
use std::ffi::{CString, OsString};
use std::os::fd::RawFd;
use std::os::raw::c_uint;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll interval used while waiting for a startup outcome
pub const OUTCOME_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of a successful `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A worker thread was spawned
    Started,
    /// A run was already active; nothing was spawned
    AlreadyRunning,
}

/// Result of a successful `stop` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Quit was requested and the worker thread joined
    Stopped,
    /// No run was active; the engine was not contacted
    NotRunning,
}

/// Engine entry point a start goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryPoint {
    FromBytes,
    FromPath,
}

impl EntryPoint {
    fn symbol_name(self) -> String {
        let symbol = match self {
            Self::FromBytes => RUN_FROM_BYTES_SYMBOL,
            Self::FromPath => RUN_FROM_PATH_SYMBOL,
        };
        String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol)).into_owned()
    }
}

#[derive(Debug, Default)]
struct Control {
    worker: Option<JoinHandle<()>>,
}

/// Single-instance lifecycle manager for the tunnel engine.
#[derive(Debug)]
pub struct WorkerSession {
    loader: EngineLoader,
    status: Arc<WorkerStatus>,
    control: Mutex<Control>,
}

impl WorkerSession {
    pub fn new(loader: EngineLoader) -> Self {
        Self {
            loader,
            status: Arc::new(WorkerStatus::new()),
            control: Mutex::new(Control::default()),
        }
    }

    /// Session that opens `library` on first use
    pub fn with_library(library: impl Into<OsString>) -> Self {
        Self::new(EngineLoader::new(library))
    }

    pub fn loader(&self) -> &EngineLoader {
        &self.loader
    }

    /// Start the engine with in-memory configuration text.
    pub fn start(&self, config: &str, tun_fd: RawFd) -> Result<StartOutcome> {
        self.start_bytes(config.as_bytes(), tun_fd)
    }

    /// Start the engine with an uninterpreted configuration byte sequence.
    ///
    /// The bytes are copied before this returns. `tun_fd` is handed to the
    /// engine as-is and is never closed by this crate.
    ///
    /// # Errors
    ///
    /// - `EngineNotLoaded` if the module or its run-from-bytes entry point is missing
    /// - `BadInput` if the configuration is longer than the engine accepts
    /// - `Spawn` if the worker thread could not be created
    pub fn start_bytes(&self, config: &[u8], tun_fd: RawFd) -> Result<StartOutcome> {
        self.start_staged(EntryPoint::FromBytes, tun_fd, || stage_bytes(config))
    }

    /// Start the engine with a configuration file the engine reads itself.
    pub fn start_from_file(&self, path: &Path, tun_fd: RawFd) -> Result<StartOutcome> {
        self.start_staged(EntryPoint::FromPath, tun_fd, || stage_path(path))
    }

    /// Shared start sequence. `stage` runs only once the engine is known to be
    /// loaded and no run is active.
    pub(crate) fn start_staged<F>(
        &self,
        entry: EntryPoint,
        tun_fd: RawFd,
        stage: F,
    ) -> Result<StartOutcome>
    where
        F: FnOnce() -> Result<StagedConfig>,
    {
        let binding = self
            .loader
            .ensure_loaded()
            .map_err(|e| WorkerError::not_loaded(e.to_string()))?;

        let bound = match entry {
            EntryPoint::FromBytes => binding.run_from_bytes().is_some(),
            EntryPoint::FromPath => binding.run_from_path().is_some(),
        };
        if !bound {
            let symbol = entry.symbol_name();
            error!("start: engine entry point {} not bound", symbol);
            return Err(WorkerError::not_loaded(format!("{} is not bound", symbol)));
        }

        let mut control = self.lock_control();

        if self.status.phase.load().is_active() {
            info!("start: already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        reap(&mut control);

        let config = match stage() {
            Ok(config) => config,
            Err(e) => {
                error!("start: {}", e);
                self.status.record(codes::BAD_INPUT);
                return Err(e);
            }
        };
        let staged = StagedRun { config, tun_fd };

        self.status.record(codes::PENDING);
        self.status.phase.store(WorkerPhase::Starting);

        let status = Arc::clone(&self.status);
        let symbols = binding.symbols();
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || runner::run_worker(status, symbols, staged));

        match spawned {
            Ok(handle) => {
                control.worker = Some(handle);
                if let Err(observed) = self
                    .status
                    .phase
                    .transition(WorkerPhase::Starting, WorkerPhase::Running)
                {
                    debug!("start: worker already left starting phase ({})", observed);
                }
                info!("start: worker thread created tun_fd={}", tun_fd);
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.status.phase.store(WorkerPhase::Idle);
                self.status.record(codes::SPAWN_FAILED);
                error!("start: failed to create worker thread: {}", e);
                Err(WorkerError::Spawn(e))
            }
        }
    }

    /// Ask the engine to quit and wait for the worker thread to exit.
    ///
    /// Blocks for as long as the engine takes to unwind.
    ///
    /// # Errors
    ///
    /// `QuitUnavailable` if the module or its quit entry point is missing.
    pub fn stop(&self) -> Result<StopOutcome> {
        let binding = self
            .loader
            .ensure_loaded()
            .map_err(|e| WorkerError::quit_unavailable(e.to_string()))?;
        let Some(quit) = binding.request_quit() else {
            error!("stop: engine quit entry point not bound");
            return Err(WorkerError::quit_unavailable("hev_socks5_tunnel_quit is not bound"));
        };

        let mut control = self.lock_control();

        if !self.status.phase.load().is_active() {
            reap(&mut control);
            info!("stop: not running");
            return Ok(StopOutcome::NotRunning);
        }

        self.status.phase.store(WorkerPhase::Stopping);
        info!("stop: requesting engine quit");
        // SAFETY: the quit entry point takes no arguments and only signals the run loop.
        unsafe { quit() };

        match control.worker.take() {
            Some(handle) => {
                debug!("stop: joining worker thread");
                if handle.join().is_err() {
                    error!("stop: worker thread panicked");
                }
            }
            None => warn!("stop: active phase without a worker handle"),
        }

        self.status.phase.store(WorkerPhase::Idle);
        info!("stop: worker stopped, last result {}", self.status.last());
        Ok(StopOutcome::Stopped)
    }

    /// Most recent raw outcome code; never blocks.
    #[inline]
    pub fn last_result(&self) -> i32 {
        self.status.last()
    }

    #[inline]
    pub fn last_outcome(&self) -> RunOutcome {
        RunOutcome::from_code(self.last_result())
    }

    #[inline]
    pub fn phase(&self) -> WorkerPhase {
        self.status.phase.load()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.phase().is_active()
    }

    /// Poll until the outcome is no longer pending or `timeout` elapses.
    pub fn wait_for_outcome(&self, timeout: Duration) -> RunOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let outcome = self.last_outcome();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !outcome.is_pending() || remaining.is_zero() {
                return outcome;
            }
            thread::sleep(OUTCOME_POLL_INTERVAL.min(remaining));
        }
    }

    /// Give a fresh run `grace` to fail fast.
    ///
    /// An engine still running after the grace window, or one that exited
    /// cleanly inside it, counts as started.
    ///
    /// # Errors
    ///
    /// `EngineExited` carrying the recorded code for any other outcome.
    pub fn confirm_started(&self, grace: Duration) -> Result<RunOutcome> {
        let outcome = self.wait_for_outcome(grace);
        debug!("confirm_started: outcome after grace window: {}", outcome);
        if outcome.is_failure() {
            return Err(WorkerError::EngineExited(outcome.code()));
        }
        Ok(outcome)
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        if !self.is_running() {
            let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
            reap(control);
            return;
        }

        debug!("WorkerSession dropped with an active run, stopping");
        if let Err(e) = self.stop() {
            // The worker may still be executing engine code; keep it mapped.
            warn!("Could not stop worker on drop ({}), leaking engine module", e);
            if let Some(binding) = self.loader.take_binding() {
                std::mem::forget(binding);
            }
        }
    }
}

/// Join a worker that already left the active phase.
fn reap(control: &mut Control) {
    if let Some(handle) = control.worker.take() {
        debug!("Reaping finished worker thread");
        if handle.join().is_err() {
            error!("Finished worker thread had panicked");
        }
    }
}

pub(crate) fn stage_bytes(config: &[u8]) -> Result<StagedConfig> {
    if c_uint::try_from(config.len()).is_err() {
        return Err(WorkerError::bad_input(format!(
            "configuration is {} bytes, engine accepts at most {}",
            config.len(),
            c_uint::MAX
        )));
    }
    Ok(StagedConfig::Bytes(config.to_vec()))
}

fn stage_path(path: &Path) -> Result<StagedConfig> {
    CString::new(path.as_os_str().as_bytes())
        .map(StagedConfig::Path)
        .map_err(|_| WorkerError::bad_input(format!("config path {:?} contains a NUL byte", path)))
}
