//! Worker thread body
//!
//! Runs on the dedicated thread created by `WorkerSession::start`. It is the
//! only place the engine's blocking run entry points are called, and the
//! only writer of the final outcome on the normal and early-exit paths.

use crate::engine::EngineSymbols;
use crate::outcome::codes;
use crate::worker_state::{PhaseCell, WorkerPhase};
use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::raw::c_uint;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, error, info};

/// Name given to the worker thread
pub const WORKER_THREAD_NAME: &str = "hev-tunnel-worker";

/// State shared between the session and its worker thread.
#[derive(Debug)]
pub(crate) struct WorkerStatus {
    pub(crate) phase: PhaseCell,
    last_rc: AtomicI32,
}

impl WorkerStatus {
    pub(crate) fn new() -> Self {
        Self {
            phase: PhaseCell::new(),
            last_rc: AtomicI32::new(codes::PENDING),
        }
    }

    #[inline]
    pub(crate) fn record(&self, code: i32) {
        self.last_rc.store(code, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn last(&self) -> i32 {
        self.last_rc.load(Ordering::SeqCst)
    }

    /// Publish the outcome, then leave the active phase.
    fn finish(&self, code: i32) {
        self.record(code);
        self.phase.store(WorkerPhase::Idle);
    }
}

/// Configuration copied out of the caller's buffer at start time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StagedConfig {
    /// Configuration text for the run-from-bytes entry point
    Bytes(Vec<u8>),
    /// Configuration file path for the run-from-path entry point
    Path(CString),
}

/// Everything the worker thread needs for one run.
#[derive(Debug)]
pub(crate) struct StagedRun {
    pub(crate) config: StagedConfig,
    /// Owned by the caller; passed through, never closed or duplicated
    pub(crate) tun_fd: RawFd,
}

pub(crate) fn run_worker(status: Arc<WorkerStatus>, entry: EngineSymbols, staged: StagedRun) {
    info!(
        "Worker thread {:?} started tun_fd={}",
        std::thread::current().id(),
        staged.tun_fd
    );

    let rc = invoke_engine(&entry, &staged);
    status.finish(rc);

    info!("Worker thread exiting rc={}", rc);
}

fn invoke_engine(entry: &EngineSymbols, staged: &StagedRun) -> i32 {
    match &staged.config {
        StagedConfig::Bytes(config) => {
            let Some(run) = entry.run_from_bytes else {
                error!("Run-from-bytes entry point is unbound");
                return codes::ENGINE_UNBOUND;
            };
            if staged.tun_fd < 0 {
                error!("Invalid tunnel descriptor {}", staged.tun_fd);
                return codes::INVALID_DESCRIPTOR;
            }
            let Ok(len) = c_uint::try_from(config.len()) else {
                error!("Configuration of {} bytes exceeds engine limit", config.len());
                return codes::BAD_INPUT;
            };

            info!("Calling engine run len={} fd={}", len, staged.tun_fd);
            debug!("Engine config:\n{}", String::from_utf8_lossy(config));

            // SAFETY: pointer and length describe `config`, which outlives the call.
            let rc = unsafe { run(config.as_ptr(), len, staged.tun_fd) };
            info!("Engine run returned rc={}", rc);
            rc
        }
        StagedConfig::Path(path) => {
            let Some(run) = entry.run_from_path else {
                error!("Run-from-path entry point is unbound");
                return codes::ENGINE_UNBOUND;
            };
            if staged.tun_fd < 0 {
                error!("Invalid tunnel descriptor {}", staged.tun_fd);
                return codes::INVALID_DESCRIPTOR;
            }

            info!(
                "Calling engine run path={} fd={}",
                path.to_string_lossy(),
                staged.tun_fd
            );

            // SAFETY: `path` is NUL-terminated and outlives the call.
            let rc = unsafe { run(path.as_ptr(), staged.tun_fd) };
            info!("Engine run returned rc={}", rc);
            rc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::{c_char, c_int, c_uchar};

    unsafe extern "C" fn returns_len(_config: *const c_uchar, len: c_uint, _fd: c_int) -> c_int {
        len as c_int
    }

    unsafe extern "C" fn returns_fd(_path: *const c_char, fd: c_int) -> c_int {
        fd
    }

    fn bytes_run(config: &[u8], tun_fd: RawFd) -> StagedRun {
        StagedRun {
            config: StagedConfig::Bytes(config.to_vec()),
            tun_fd,
        }
    }

    #[test]
    fn test_unbound_entry_point_is_recorded() {
        let status = Arc::new(WorkerStatus::new());
        status.phase.store(WorkerPhase::Running);

        run_worker(Arc::clone(&status), EngineSymbols::default(), bytes_run(b"x", 5));

        assert_eq!(status.last(), codes::ENGINE_UNBOUND);
        assert_eq!(status.phase.load(), WorkerPhase::Idle);
    }

    #[test]
    fn test_unbound_is_checked_before_descriptor() {
        let rc = invoke_engine(&EngineSymbols::default(), &bytes_run(b"x", -1));
        assert_eq!(rc, codes::ENGINE_UNBOUND);
    }

    #[test]
    fn test_negative_descriptor_skips_engine() {
        let entry = EngineSymbols {
            run_from_bytes: Some(returns_len),
            ..Default::default()
        };
        assert_eq!(
            invoke_engine(&entry, &bytes_run(b"tunnel", -1)),
            codes::INVALID_DESCRIPTOR
        );
    }

    #[test]
    fn test_engine_return_code_is_published() {
        let status = Arc::new(WorkerStatus::new());
        status.phase.store(WorkerPhase::Running);
        let entry = EngineSymbols {
            run_from_bytes: Some(returns_len),
            ..Default::default()
        };

        run_worker(Arc::clone(&status), entry, bytes_run(b"tunnel", 7));

        assert_eq!(status.last(), 6);
        assert_eq!(status.phase.load(), WorkerPhase::Idle);
    }

    #[test]
    fn test_path_entry_point() {
        let entry = EngineSymbols {
            run_from_path: Some(returns_fd),
            ..Default::default()
        };
        let staged = StagedRun {
            config: StagedConfig::Path(CString::new("/etc/hev.yml").unwrap()),
            tun_fd: 9,
        };
        assert_eq!(invoke_engine(&entry, &staged), 9);
    }
}
