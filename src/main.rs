//! hev-tunnel-worker - Supervisor entry point
//!
//! Loads a tunnel configuration, starts the engine on an inherited TUN
//! descriptor, and stops it cleanly on SIGINT/SIGTERM/SIGHUP.

use anyhow::{Context, Result};
use nix::fcntl::{FcntlArg, fcntl};
use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use hev_tunnel_worker::cli::{Cli, Commands};
use hev_tunnel_worker::engine::{DEFAULT_ENGINE_LIBRARY, EngineLoader};
use hev_tunnel_worker::ffi::LIBRARY_ENV;
use hev_tunnel_worker::shutdown::{self, ExitReason, ShutdownSignals};
use hev_tunnel_worker::{RunOutcome, TunnelConfig, WorkerError, WorkerSession, logging, upstream};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Main application entry point
fn main() -> Result<ExitCode> {
    logging::init_logging("info");
    debug!("hev-tunnel-worker starting up");

    let cli = Cli::parse_args();
    let library = resolve_library(cli.library.map(OsString::from));

    match cli.command {
        Commands::Run {
            config,
            tun_fd,
            startup_grace_ms,
            wait_socks_ms,
        } => {
            let outcome = run_tunnel(
                library,
                &config,
                tun_fd,
                Duration::from_millis(startup_grace_ms),
                Duration::from_millis(wait_socks_ms),
            )?;
            if outcome.is_failure() {
                error!("Tunnel engine finished: {}", outcome);
            }
            return Ok(ExitCode::from(outcome.exit_status()));
        }
        Commands::Render { config } => {
            let config = load_validated(&config)?;
            print!("{}", config.render_engine_config());
        }
        Commands::Validate { config } => {
            info!("Validating tunnel configuration: {:?}", config);
            match load_validated(&config) {
                Ok(_) => println!("✓ Tunnel configuration is valid: {:?}", config),
                Err(e) => {
                    eprintln!("✗ Tunnel configuration is invalid: {:#}", e);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
            }
            TunnelConfig::default().save_to_file(&path)?;
            println!("✓ Wrote default tunnel configuration to {:?}", path);
        }
        Commands::Probe => {
            if !probe(library) {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn resolve_library(flag: Option<OsString>) -> OsString {
    flag.or_else(|| std::env::var_os(LIBRARY_ENV))
        .unwrap_or_else(|| DEFAULT_ENGINE_LIBRARY.into())
}

fn load_validated(path: &Path) -> Result<TunnelConfig> {
    let config = TunnelConfig::load_from_file(path)?;
    config.validate()?;
    Ok(config)
}

/// The descriptor is inherited, not opened here; make sure it is real
/// before handing it to the engine.
fn ensure_descriptor_open(fd: RawFd) -> Result<()> {
    fcntl(fd, FcntlArg::F_GETFD)
        .with_context(|| format!("TUN descriptor {} is not open", fd))?;
    Ok(())
}

fn run_tunnel(
    library: OsString,
    config_path: &Path,
    tun_fd: RawFd,
    startup_grace: Duration,
    wait_socks: Duration,
) -> Result<RunOutcome> {
    let config = load_validated(config_path)?;
    ensure_descriptor_open(tun_fd)?;

    if !wait_socks.is_zero() {
        let addr = config.socks_addr()?;
        info!("Waiting up to {:?} for SOCKS5 upstream {}", wait_socks, addr);
        upstream::wait_for_socks(addr, wait_socks)?;
    }

    let mut signals = ShutdownSignals::register().context("Failed to register signal handlers")?;

    // Dropping the session on an early return stops the engine
    let session = WorkerSession::with_library(library);

    session.start(&config.render_engine_config(), tun_fd)?;
    if let Err(e) = session.confirm_started(startup_grace) {
        if let WorkerError::EngineExited(code) = e {
            error!("Tunnel engine failed during startup with code {}", code);
            return Ok(RunOutcome::from_code(code));
        }
        return Err(e.into());
    }
    info!(
        "Tunnel engine running on fd {} ({} -> {}:{})",
        tun_fd, config.tunnel.name, config.socks5.address, config.socks5.port
    );

    let reason = shutdown::wait_for_exit(&session, &mut signals, EXIT_POLL_INTERVAL);
    match reason {
        ExitReason::Signal(sig) => {
            info!("Received {} signal, stopping tunnel engine", shutdown::signal_name(sig));
        }
        ExitReason::EngineExited => warn!("Tunnel engine exited without a stop request"),
    }

    let outcome = shutdown::finish_run(&session, reason)?;
    info!("Tunnel engine finished: {}", outcome);
    Ok(outcome)
}

/// Print the entry points the engine module provides. Returns false if the
/// module cannot be used for start/stop.
fn probe(library: OsString) -> bool {
    let loader = EngineLoader::new(library);
    let binding = match loader.ensure_loaded() {
        Ok(binding) => binding,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    let caps = binding.capabilities();
    println!("Engine module: {:?}", loader.library().unwrap_or_default());
    for (name, present) in [
        ("hev_socks5_tunnel_main_from_str", caps.run_from_bytes),
        ("hev_socks5_tunnel_main_from_file", caps.run_from_path),
        ("hev_socks5_tunnel_quit", caps.request_quit),
    ] {
        println!("  {} {}", if present { "✓" } else { "✗" }, name);
    }

    caps.run_from_bytes && caps.request_quit
}
