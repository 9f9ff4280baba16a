//! Upstream SOCKS5 readiness
//!
//! The engine forwards everything to a SOCKS5 server that is usually started
//! alongside it. Starting the engine before that listener accepts connections
//! makes its first sessions fail, so the supervisor can wait for it first.

use crate::error::{Result, WorkerError};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const RETRY_INTERVAL: Duration = Duration::from_millis(120);

/// Retry TCP connects to `addr` until one succeeds or `timeout` elapses.
///
/// # Errors
///
/// `Io` with `TimedOut` kind, carrying the last connect error.
pub fn wait_for_socks(addr: SocketAddr, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let last_err = match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(_) => {
                info!("SOCKS5 upstream {} ready after {} attempt(s)", addr, attempts);
                return Ok(());
            }
            Err(e) => e,
        };
        debug!("SOCKS5 upstream {} not ready: {}", addr, last_err);

        if Instant::now() >= deadline {
            return Err(WorkerError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("SOCKS5 upstream {} not ready, last error: {}", addr, last_err),
            )));
        }
        thread::sleep(RETRY_INTERVAL);
    }
}
