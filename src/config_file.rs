//! Tunnel configuration file handling.
//!
//! The supervisor keeps its settings as JSON and renders them into the YAML
//! document the engine parses. The engine never sees the JSON; the worker
//! session never interprets the YAML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::Path;

use crate::types::{LogLevel, UdpRelay};

/// Longest interface name the kernel accepts (IFNAMSIZ - 1)
const MAX_IFNAME_LEN: usize = 15;
const MIN_MTU: u32 = 576;
const MAX_MTU: u32 = 65535;

/// Virtual interface settings (`tunnel:` section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSection {
    pub name: String,
    pub mtu: u32,
    pub multi_queue: bool,
    pub ipv4: String,
    pub ipv6: Option<String>,
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            name: "tun0".to_string(),
            mtu: 1500,
            multi_queue: false,
            ipv4: "198.18.0.1".to_string(),
            ipv6: Some("fc00::1".to_string()),
        }
    }
}

/// Upstream SOCKS5 server (`socks5:` section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Socks5Section {
    pub address: String,
    pub port: u16,
    pub udp: UdpRelay,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for Socks5Section {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 10808,
            udp: UdpRelay::Udp,
            username: None,
            password: None,
        }
    }
}

/// Engine diagnostics (`misc:` section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiscSection {
    pub log_level: LogLevel,
    pub log_file: String,
}

impl Default for MiscSection {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Debug,
            log_file: "stderr".to_string(),
        }
    }
}

/// Tunnel configuration that can be saved/loaded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub tunnel: TunnelSection,
    pub socks5: Socks5Section,
    pub misc: MiscSection,
}

impl TunnelConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize tunnel configuration to JSON")?;

        fs::write(&path, json).with_context(|| {
            format!("Failed to write tunnel configuration to {:?}", path.as_ref())
        })?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read tunnel configuration from {:?}", path.as_ref())
        })?;

        let config: Self = serde_json::from_str(&content)
            .context("Failed to parse tunnel configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let name = self.tunnel.name.trim();
        if name.is_empty() {
            anyhow::bail!("Tunnel interface name must be specified");
        }
        if name.len() > MAX_IFNAME_LEN {
            anyhow::bail!(
                "Tunnel interface name must be at most {} characters",
                MAX_IFNAME_LEN
            );
        }
        if name.contains(|c: char| c.is_whitespace() || c == '/') {
            anyhow::bail!("Tunnel interface name cannot contain whitespace or '/'");
        }

        if !(MIN_MTU..=MAX_MTU).contains(&self.tunnel.mtu) {
            anyhow::bail!("MTU must be between {} and {}", MIN_MTU, MAX_MTU);
        }

        self.tunnel
            .ipv4
            .parse::<Ipv4Addr>()
            .with_context(|| format!("Invalid tunnel IPv4 address {:?}", self.tunnel.ipv4))?;
        if let Some(ipv6) = &self.tunnel.ipv6 {
            ipv6.parse::<Ipv6Addr>()
                .with_context(|| format!("Invalid tunnel IPv6 address {:?}", ipv6))?;
        }

        let address = self.socks5.address.trim();
        if address.is_empty() {
            anyhow::bail!("SOCKS5 address must be specified");
        }
        if address.parse::<IpAddr>().is_err()
            && !address
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            anyhow::bail!("SOCKS5 address must be an IP address or hostname");
        }
        if self.socks5.port == 0 {
            anyhow::bail!("SOCKS5 port must be nonzero");
        }

        match (&self.socks5.username, &self.socks5.password) {
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("SOCKS5 username and password must be given together")
            }
            _ => {}
        }

        if self.misc.log_file.trim().is_empty() {
            anyhow::bail!("Engine log file must be specified (use \"stderr\" or \"stdout\")");
        }

        Ok(())
    }

    /// Resolve the upstream SOCKS5 endpoint
    pub fn socks_addr(&self) -> Result<SocketAddr> {
        (self.socks5.address.as_str(), self.socks5.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve SOCKS5 address {}", self.socks5.address))?
            .next()
            .with_context(|| format!("SOCKS5 address {} resolved to nothing", self.socks5.address))
    }

    /// Render the YAML document handed to the engine
    pub fn render_engine_config(&self) -> String {
        let mut out = String::new();

        // Writing into a String cannot fail
        let _ = writeln!(out, "tunnel:");
        let _ = writeln!(out, "  name: {}", yaml_quote(&self.tunnel.name));
        let _ = writeln!(out, "  mtu: {}", self.tunnel.mtu);
        let _ = writeln!(out, "  multi-queue: {}", self.tunnel.multi_queue);
        let _ = writeln!(out, "  ipv4: {}", yaml_quote(&self.tunnel.ipv4));
        if let Some(ipv6) = &self.tunnel.ipv6 {
            let _ = writeln!(out, "  ipv6: {}", yaml_quote(ipv6));
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "socks5:");
        let _ = writeln!(out, "  port: {}", self.socks5.port);
        let _ = writeln!(out, "  address: {}", yaml_quote(&self.socks5.address));
        let _ = writeln!(out, "  udp: {}", yaml_quote(&self.socks5.udp.to_string()));
        if let (Some(username), Some(password)) = (&self.socks5.username, &self.socks5.password) {
            let _ = writeln!(out, "  username: {}", yaml_quote(username));
            let _ = writeln!(out, "  password: {}", yaml_quote(password));
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "misc:");
        let _ = writeln!(out, "  log-level: {}", self.misc.log_level);
        let _ = writeln!(out, "  log-file: {}", yaml_quote(&self.misc.log_file));

        out
    }
}

/// Single-quoted YAML scalar; embedded quotes are doubled.
fn yaml_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = TunnelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tunnel.mtu, 1500);
        assert_eq!(config.socks5.port, 10808);
    }

    #[test]
    fn test_render_default() {
        let rendered = TunnelConfig::default().render_engine_config();
        let expected = "\
tunnel:
  name: 'tun0'
  mtu: 1500
  multi-queue: false
  ipv4: '198.18.0.1'
  ipv6: 'fc00::1'

socks5:
  port: 10808
  address: '127.0.0.1'
  udp: 'udp'

misc:
  log-level: debug
  log-file: 'stderr'
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_credentials_and_quotes() {
        let mut config = TunnelConfig::default();
        config.socks5.username = Some("alice".to_string());
        config.socks5.password = Some("it's".to_string());
        config.tunnel.ipv6 = None;

        let rendered = config.render_engine_config();
        assert!(rendered.contains("  username: 'alice'\n"));
        assert!(rendered.contains("  password: 'it''s'\n"));
        assert!(!rendered.contains("ipv6"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = TunnelConfig::default();
        config.tunnel.mtu = 100;
        assert!(config.validate().is_err());

        let mut config = TunnelConfig::default();
        config.tunnel.name = "a-very-long-interface".to_string();
        assert!(config.validate().is_err());

        let mut config = TunnelConfig::default();
        config.tunnel.ipv4 = "198.18.0".to_string();
        assert!(config.validate().is_err());

        let mut config = TunnelConfig::default();
        config.socks5.port = 0;
        assert!(config.validate().is_err());

        let mut config = TunnelConfig::default();
        config.socks5.username = Some("alice".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hostname_address_is_valid() {
        let mut config = TunnelConfig::default();
        config.socks5.address = "proxy.internal".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = TunnelConfig::default();
        config.tunnel.mtu = 8500;
        config.misc.log_level = LogLevel::Warn;

        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();

        let loaded = TunnelConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"socks5": {{"port": 1080, "udp": "tcp"}}}}"#).unwrap();

        let loaded = TunnelConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.socks5.port, 1080);
        assert_eq!(loaded.socks5.udp, UdpRelay::Tcp);
        assert_eq!(loaded.tunnel, TunnelSection::default());
    }

    #[test]
    fn test_load_missing_file() {
        let err = TunnelConfig::load_from_file("/nonexistent/tunnel.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read tunnel configuration"));
    }

    #[test]
    fn test_socks_addr() {
        let addr = TunnelConfig::default().socks_addr().unwrap();
        assert_eq!(addr, "127.0.0.1:10808".parse().unwrap());
    }
}
