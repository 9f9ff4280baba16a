//! Type-safe configuration values for the tunnel engine
//!
//! Enum string forms are the exact spellings the engine's config parser expects.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Engine log verbosity (`misc.log-level`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

/// How UDP is relayed to the SOCKS5 upstream (`socks5.udp`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UdpRelay {
    /// Standard SOCKS5 UDP ASSOCIATE; required by Xray-style socks inbounds
    #[default]
    Udp,
    /// UDP-in-TCP, a hev-socks5-server extension
    Tcp,
}
