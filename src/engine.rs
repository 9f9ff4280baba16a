//! Dynamic engine loader
//!
//! The tunnel engine is a prebuilt shared module that exports three C entry
//! points. This module opens it on first use, resolves each entry point
//! independently, and caches the result for the loader's lifetime.
//!
//! # Binding Rules
//!
//! - A module that fails to open is NOT cached; the next call tries again
//! - A module that opened is never re-opened and never unloaded while cached
//! - A missing symbol leaves only that entry point unset

use libloading::Library;
use std::ffi::{OsStr, OsString};
use std::os::raw::{c_char, c_int, c_uchar, c_uint};
use std::sync::{Mutex, OnceLock, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Module name used when no explicit path is configured
pub const DEFAULT_ENGINE_LIBRARY: &str = "libhev-socks5-tunnel.so";

/// `int hev_socks5_tunnel_main_from_str(const unsigned char*, unsigned int, int)`
pub const RUN_FROM_BYTES_SYMBOL: &[u8] = b"hev_socks5_tunnel_main_from_str\0";
/// `int hev_socks5_tunnel_main_from_file(const char*, int)`
pub const RUN_FROM_PATH_SYMBOL: &[u8] = b"hev_socks5_tunnel_main_from_file\0";
/// `void hev_socks5_tunnel_quit(void)`
pub const REQUEST_QUIT_SYMBOL: &[u8] = b"hev_socks5_tunnel_quit\0";

/// Blocking run with an in-memory configuration.
pub type RunFromBytesFn = unsafe extern "C" fn(*const c_uchar, c_uint, c_int) -> c_int;
/// Blocking run with a configuration file path.
pub type RunFromPathFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
/// Non-blocking request that makes an in-flight run return.
pub type QuitFn = unsafe extern "C" fn();

/// The three engine entry points, each independently optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSymbols {
    pub run_from_bytes: Option<RunFromBytesFn>,
    pub run_from_path: Option<RunFromPathFn>,
    pub request_quit: Option<QuitFn>,
}

/// Which entry points a binding provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub run_from_bytes: bool,
    pub run_from_path: bool,
    pub request_quit: bool,
}

/// Failure to open the engine module
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to open engine module {library}: {reason}")]
pub struct EngineLoadError {
    pub library: String,
    pub reason: String,
}

/// A loaded engine module and its resolved entry points.
///
/// The function pointers are only valid while `_library` is alive, which is
/// why the binding owns it.
#[derive(Debug)]
pub struct EngineBinding {
    symbols: EngineSymbols,
    _library: Option<Library>,
}

impl EngineBinding {
    /// Build a binding from entry points that are already in the process
    /// (statically linked engine, or a stand-in for tests).
    pub fn from_symbols(symbols: EngineSymbols) -> Self {
        Self {
            symbols,
            _library: None,
        }
    }

    fn load(name: &OsStr) -> Result<Self, libloading::Error> {
        let library = open_library(name)?;
        info!("Engine module {} opened", name.to_string_lossy());

        let symbols = EngineSymbols {
            run_from_bytes: resolve::<RunFromBytesFn>(&library, RUN_FROM_BYTES_SYMBOL),
            run_from_path: resolve::<RunFromPathFn>(&library, RUN_FROM_PATH_SYMBOL),
            request_quit: resolve::<QuitFn>(&library, REQUEST_QUIT_SYMBOL),
        };

        Ok(Self {
            symbols,
            _library: Some(library),
        })
    }

    #[inline]
    pub fn symbols(&self) -> EngineSymbols {
        self.symbols
    }

    #[inline]
    pub fn run_from_bytes(&self) -> Option<RunFromBytesFn> {
        self.symbols.run_from_bytes
    }

    #[inline]
    pub fn run_from_path(&self) -> Option<RunFromPathFn> {
        self.symbols.run_from_path
    }

    #[inline]
    pub fn request_quit(&self) -> Option<QuitFn> {
        self.symbols.request_quit
    }

    /// Returns true if this binding came from an opened module
    pub fn has_module(&self) -> bool {
        self._library.is_some()
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            run_from_bytes: self.symbols.run_from_bytes.is_some(),
            run_from_path: self.symbols.run_from_path.is_some(),
            request_quit: self.symbols.request_quit.is_some(),
        }
    }
}

fn open_library(name: &OsStr) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
    // SAFETY: opening a module runs its initializers; the engine module is trusted.
    unsafe { UnixLibrary::open(Some(name), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

fn resolve<T: Copy>(library: &Library, symbol: &[u8]) -> Option<T> {
    let name = String::from_utf8_lossy(symbol.strip_suffix(b"\0").unwrap_or(symbol));
    // SAFETY: T is the documented C signature of this engine export.
    match unsafe { library.get::<T>(symbol) } {
        Ok(sym) => {
            debug!("Resolved engine symbol {}", name);
            Some(*sym)
        }
        Err(e) => {
            warn!("Engine symbol {} unavailable: {}", name, e);
            None
        }
    }
}

/// Lazily opens the engine module once and hands out the cached binding.
#[derive(Debug)]
pub struct EngineLoader {
    library: Option<OsString>,
    binding: OnceLock<EngineBinding>,
    /// Serializes first loads; holds the most recent open failure
    init_lock: Mutex<Option<EngineLoadError>>,
}

impl EngineLoader {
    /// Loader that opens `library` (a path or a name for the dynamic linker) on first use
    pub fn new(library: impl Into<OsString>) -> Self {
        Self {
            library: Some(library.into()),
            binding: OnceLock::new(),
            init_lock: Mutex::new(None),
        }
    }

    /// Loader around an existing binding; never opens anything
    pub fn with_binding(binding: EngineBinding) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(binding);
        Self {
            library: None,
            binding: cell,
            init_lock: Mutex::new(None),
        }
    }

    /// The configured module name, if this loader opens one
    pub fn library(&self) -> Option<&OsStr> {
        self.library.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.binding.get().is_some()
    }

    /// The most recent open failure, cleared by a successful load
    pub fn last_error(&self) -> Option<EngineLoadError> {
        self.init_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the cached binding, opening the module first if needed.
    ///
    /// # Errors
    ///
    /// `EngineLoadError` if the module cannot be opened. Nothing is cached in
    /// that case, so a later call tries again.
    pub fn ensure_loaded(&self) -> Result<&EngineBinding, EngineLoadError> {
        if let Some(binding) = self.binding.get() {
            return Ok(binding);
        }

        let mut last_error = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(binding) = self.binding.get() {
            return Ok(binding);
        }

        let Some(name) = self.library.as_deref() else {
            return Err(EngineLoadError {
                library: "<none>".to_string(),
                reason: "no engine module configured".to_string(),
            });
        };

        info!("Opening engine module {}", name.to_string_lossy());
        match EngineBinding::load(name) {
            Ok(binding) => {
                *last_error = None;
                Ok(self.binding.get_or_init(|| binding))
            }
            Err(e) => {
                let err = EngineLoadError {
                    library: name.to_string_lossy().into_owned(),
                    reason: e.to_string(),
                };
                error!("{}", err);
                *last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Detach the cached binding. Used to leak a module that a live worker
    /// thread may still be executing.
    pub(crate) fn take_binding(&mut self) -> Option<EngineBinding> {
        self.binding.take()
    }
}

impl Default for EngineLoader {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_LIBRARY)
    }
}
