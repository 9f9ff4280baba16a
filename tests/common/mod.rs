//! In-process stand-in for the tunnel engine module
//!
//! Mirrors the engine's C contract: a blocking run that returns once the
//! global quit entry point has been called. State is process-global, like the
//! real engine, so tests that use it hold `serial()` for their whole body.

#![allow(dead_code)]

use std::os::raw::{c_char, c_int, c_uchar, c_uint};
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use hev_tunnel_worker::{EngineBinding, EngineLoader, EngineSymbols, WorkerSession};

/// Code the blocking fake returns after a quit request
pub const CLEAN_EXIT: c_int = 0;

static SERIAL: Mutex<()> = Mutex::new(());

static QUIT_REQUESTED: Mutex<bool> = Mutex::new(false);
static QUIT_SIGNAL: Condvar = Condvar::new();

static RUN_CALLS: AtomicUsize = AtomicUsize::new(0);
static QUIT_CALLS: AtomicUsize = AtomicUsize::new(0);
static LAST_FD: AtomicI32 = AtomicI32::new(-1);
static LAST_CONFIG: Mutex<Vec<u8>> = Mutex::new(Vec::new());

/// Serialize tests that share the fake engine, and reset its state
pub fn serial() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(PoisonError::into_inner);
    reset();
    guard
}

pub fn reset() {
    *QUIT_REQUESTED.lock().unwrap_or_else(PoisonError::into_inner) = false;
    RUN_CALLS.store(0, Ordering::SeqCst);
    QUIT_CALLS.store(0, Ordering::SeqCst);
    LAST_FD.store(-1, Ordering::SeqCst);
    LAST_CONFIG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clear();
}

fn block_until_quit() {
    let mut quit = QUIT_REQUESTED.lock().unwrap_or_else(PoisonError::into_inner);
    while !*quit {
        quit = QUIT_SIGNAL
            .wait(quit)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Blocking run: records its inputs, then waits for `fake_quit`
pub unsafe extern "C" fn fake_run_blocking(config: *const c_uchar, len: c_uint, fd: c_int) -> c_int {
    // SAFETY: the session passes a pointer/length pair over its own buffer.
    let bytes = unsafe { std::slice::from_raw_parts(config, len as usize) };
    *LAST_CONFIG.lock().unwrap_or_else(PoisonError::into_inner) = bytes.to_vec();
    LAST_FD.store(fd, Ordering::SeqCst);
    RUN_CALLS.fetch_add(1, Ordering::SeqCst);

    block_until_quit();
    CLEAN_EXIT
}

/// Run that returns 42 immediately
pub unsafe extern "C" fn fake_run_immediate(_config: *const c_uchar, _len: c_uint, fd: c_int) -> c_int {
    LAST_FD.store(fd, Ordering::SeqCst);
    RUN_CALLS.fetch_add(1, Ordering::SeqCst);
    42
}

/// Blocking run from a path: records the path as the config
pub unsafe extern "C" fn fake_run_from_path(path: *const c_char, fd: c_int) -> c_int {
    // SAFETY: the session passes a NUL-terminated path it owns.
    let path = unsafe { std::ffi::CStr::from_ptr(path) };
    *LAST_CONFIG.lock().unwrap_or_else(PoisonError::into_inner) = path.to_bytes().to_vec();
    LAST_FD.store(fd, Ordering::SeqCst);
    RUN_CALLS.fetch_add(1, Ordering::SeqCst);

    block_until_quit();
    CLEAN_EXIT
}

pub unsafe extern "C" fn fake_quit() {
    QUIT_CALLS.fetch_add(1, Ordering::SeqCst);
    *QUIT_REQUESTED.lock().unwrap_or_else(PoisonError::into_inner) = true;
    QUIT_SIGNAL.notify_all();
}

/// Full engine: blocking run from bytes and from path, plus quit
pub fn blocking_engine() -> EngineSymbols {
    EngineSymbols {
        run_from_bytes: Some(fake_run_blocking),
        run_from_path: Some(fake_run_from_path),
        request_quit: Some(fake_quit),
    }
}

/// Engine whose run returns 42 without waiting for quit
pub fn immediate_engine() -> EngineSymbols {
    EngineSymbols {
        run_from_bytes: Some(fake_run_immediate),
        run_from_path: None,
        request_quit: Some(fake_quit),
    }
}

pub fn session_with(symbols: EngineSymbols) -> WorkerSession {
    WorkerSession::new(EngineLoader::with_binding(EngineBinding::from_symbols(symbols)))
}

pub fn run_calls() -> usize {
    RUN_CALLS.load(Ordering::SeqCst)
}

pub fn quit_calls() -> usize {
    QUIT_CALLS.load(Ordering::SeqCst)
}

pub fn last_fd() -> c_int {
    LAST_FD.load(Ordering::SeqCst)
}

pub fn last_config() -> Vec<u8> {
    LAST_CONFIG
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Poll `condition` every 5ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Wait for the fake engine to enter its run call
pub fn wait_for_engine_entry() {
    assert!(
        wait_until(Duration::from_secs(5), || run_calls() >= 1),
        "engine run was never entered"
    );
}
