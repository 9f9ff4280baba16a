use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hev-tunnel-worker - Run a SOCKS5 tunnel engine against a TUN descriptor
#[derive(Parser)]
#[command(name = "hev-tunnel-worker")]
#[command(about = "Supervise a dynamically loaded SOCKS5-over-TUN engine")]
#[command(version)]
pub struct Cli {
    /// Engine module to load (path, or name resolved by the dynamic linker).
    ///
    /// Defaults to $HEV_TUNNEL_LIBRARY, then libhev-socks5-tunnel.so.
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine until a termination signal arrives or it exits
    Run {
        /// Path to the JSON tunnel configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Already-open TUN descriptor inherited from the parent process
        #[arg(short, long)]
        tun_fd: i32,

        /// How long a fresh run may take to fail before it counts as started
        #[arg(long, default_value_t = 1500)]
        startup_grace_ms: u64,

        /// Wait up to this long for the SOCKS5 upstream to accept connections (0 = skip)
        #[arg(long, default_value_t = 0)]
        wait_socks_ms: u64,
    },
    /// Print the engine configuration rendered from a JSON file
    Render {
        /// Path to the JSON tunnel configuration
        config: PathBuf,
    },
    /// Validate a JSON tunnel configuration
    Validate {
        /// Path to the JSON tunnel configuration
        config: PathBuf,
    },
    /// Write a default JSON tunnel configuration
    InitConfig {
        /// Destination file
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Report which engine entry points the module provides
    Probe,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
