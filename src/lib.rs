//! hev-tunnel-worker Library
//!
//! Lifecycle management for a SOCKS5-over-TUN engine that lives in a
//! separately shipped shared module. The library binds the engine at runtime,
//! runs it on a dedicated thread against a caller-owned TUN descriptor, and
//! stops it on demand. It is usable from Rust ([`WorkerSession`]) and from C
//! (see [`ffi`]).

pub mod cli;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod outcome;
mod runner;
pub mod session;
pub mod shutdown;
pub mod types;
pub mod upstream;
pub mod worker_state;

// Re-export main types for convenience
pub use config_file::TunnelConfig;
pub use engine::{EngineBinding, EngineCapabilities, EngineLoadError, EngineLoader, EngineSymbols};
pub use error::WorkerError;
pub use outcome::{RunOutcome, codes};
pub use runner::WORKER_THREAD_NAME;
pub use session::{StartOutcome, StopOutcome, WorkerSession};
pub use types::{LogLevel, UdpRelay};
pub use worker_state::WorkerPhase;
