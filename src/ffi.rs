//! C control surface
//!
//! Exposes the process-wide worker session to a host application through
//! plain C functions returning integer codes from [`crate::outcome::codes`].
//!
//! ```c
//! int  hev_worker_start(const char *config, int tun_fd);
//! int  hev_worker_start_from_file(const char *path, int tun_fd);
//! int  hev_worker_stop(void);
//! int  hev_worker_last_result(void);
//! int  hev_worker_init_logging(void);
//! ```
//!
//! No panic unwinds into the host: each export catches it, logs it and
//! returns [`codes::INTERNAL_ERROR`] (0 for `hev_worker_init_logging`).
//!
//! The engine module is opened on the first start/stop. Its name comes from
//! the `HEV_TUNNEL_LIBRARY` environment variable, falling back to
//! `libhev-socks5-tunnel.so`.

use crate::engine::DEFAULT_ENGINE_LIBRARY;
use crate::error::{Result, WorkerError};
use crate::outcome::codes;
use crate::runner::StagedConfig;
use crate::session::{EntryPoint, WorkerSession, stage_bytes};
use std::ffi::CStr;
use std::any::Any;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use tracing::{debug, error};

/// Environment variable naming the engine module for the global session
pub const LIBRARY_ENV: &str = "HEV_TUNNEL_LIBRARY";

static SESSION: OnceLock<WorkerSession> = OnceLock::new();

/// The process-wide session behind the C functions. Never dropped, so the
/// engine module stays mapped for the life of the process.
pub fn global() -> &'static WorkerSession {
    SESSION.get_or_init(|| {
        let library =
            std::env::var_os(LIBRARY_ENV).unwrap_or_else(|| DEFAULT_ENGINE_LIBRARY.into());
        debug!("Global worker session uses engine module {:?}", library);
        WorkerSession::with_library(library)
    })
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Run `f`, returning `default` if it panics.
fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            error!("panic in ffi `{}`: {}", op, panic_message(payload));
            default
        }
    }
}

fn guard_code(op: &'static str, f: impl FnOnce() -> c_int) -> c_int {
    guard_with_default(op, codes::INTERNAL_ERROR, f)
}

fn to_code<T: std::fmt::Debug>(op: &str, result: Result<T>) -> c_int {
    match result {
        Ok(value) => {
            debug!("{}: {:?}", op, value);
            codes::OK
        }
        Err(e) => {
            debug!("{}: {} (code {})", op, e, e.code());
            e.code()
        }
    }
}

/// Start `session` with a NUL-terminated configuration string.
///
/// A null `config` is reported as bad input, but only after the engine
/// checks pass, matching the order of [`WorkerSession::start_bytes`].
///
/// # Safety
///
/// `config` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
pub unsafe fn start_with(session: &WorkerSession, config: *const c_char, tun_fd: c_int) -> c_int {
    let result = session.start_staged(EntryPoint::FromBytes, tun_fd, || {
        if config.is_null() {
            return Err(WorkerError::bad_input("null configuration pointer"));
        }
        // SAFETY: non-null and NUL-terminated per this function's contract.
        stage_bytes(unsafe { CStr::from_ptr(config) }.to_bytes())
    });
    to_code("start", result)
}

/// Start `session` with a NUL-terminated configuration file path.
///
/// # Safety
///
/// Same contract as [`start_with`] for `path`.
pub unsafe fn start_from_file_with(
    session: &WorkerSession,
    path: *const c_char,
    tun_fd: c_int,
) -> c_int {
    let result = session.start_staged(EntryPoint::FromPath, tun_fd, || {
        if path.is_null() {
            return Err(WorkerError::bad_input("null configuration path"));
        }
        // SAFETY: non-null and NUL-terminated per this function's contract.
        Ok(StagedConfig::Path(unsafe { CStr::from_ptr(path) }.to_owned()))
    });
    to_code("start_from_file", result)
}

pub fn stop_with(session: &WorkerSession) -> c_int {
    to_code("stop", session.stop())
}

/// # Safety
///
/// `config` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hev_worker_start(config: *const c_char, tun_fd: c_int) -> c_int {
    guard_code("hev_worker_start", || {
        // SAFETY: forwarded caller contract.
        unsafe { start_with(global(), config, tun_fd) }
    })
}

/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hev_worker_start_from_file(path: *const c_char, tun_fd: c_int) -> c_int {
    guard_code("hev_worker_start_from_file", || {
        // SAFETY: forwarded caller contract.
        unsafe { start_from_file_with(global(), path, tun_fd) }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hev_worker_stop() -> c_int {
    guard_code("hev_worker_stop", || stop_with(global()))
}

#[unsafe(no_mangle)]
pub extern "C" fn hev_worker_last_result() -> c_int {
    guard_code("hev_worker_last_result", || global().last_result())
}

/// Install the stderr tracing subscriber. Returns 1 if installed, 0 if a
/// subscriber was already present.
#[unsafe(no_mangle)]
pub extern "C" fn hev_worker_init_logging() -> c_int {
    guard_with_default("hev_worker_init_logging", 0, || {
        c_int::from(crate::logging::init_logging("info"))
    })
}
