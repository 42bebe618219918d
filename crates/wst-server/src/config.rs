//! Server configuration: TOML file + CLI overrides.

use crate::relay::{RelayConfig, RelayPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use wst_core::{AuthorizedIds, RelayError, RelayResult, UserId, DEFAULT_VERSION};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
    /// `{identifier: authorized}`; only entries set to `true` may tunnel.
    #[serde(default)]
    pub identifiers: BTreeMap<String, bool>,
    #[serde(default)]
    pub policy: PolicySection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            connect_timeout: default_connect_timeout(),
            handshake_timeout: default_handshake_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// `[protocol]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSection {
    #[serde(default = "default_version")]
    pub accepted_version: u8,
    #[serde(default)]
    pub send_response_header: bool,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            accepted_version: default_version(),
            send_response_header: false,
        }
    }
}

/// `[policy]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicySection {
    #[serde(default = "default_allowed_destinations")]
    pub allowed_destinations: Vec<String>,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            allowed_destinations: default_allowed_destinations(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_sessions() -> usize {
    1024
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_handshake_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_version() -> u8 {
    DEFAULT_VERSION
}
fn default_allowed_destinations() -> Vec<String> {
    vec!["*".to_string()]
}

/// Values given on the command line; `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub uuids: Vec<String>,
    pub max_sessions: Option<usize>,
    pub connect_timeout: Option<u64>,
    pub idle_timeout: Option<u64>,
}

/// Resolved server configuration (CLI overrides applied, identifiers parsed).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub connect_timeout: Duration,
    pub relay: RelayConfig,
    pub policy: RelayPolicy,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::from_parts(file_config, cli)
    }

    pub fn parse_file(content: &str) -> RelayResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
    }

    /// Merge a parsed file with CLI overrides.
    pub fn from_parts(file: ConfigFile, cli: &CliOverrides) -> RelayResult<Self> {
        let listen = cli.listen.clone().unwrap_or(file.server.listen);
        let ip: IpAddr = listen
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid listen address {listen:?}: {e}")))?;
        let port = cli.port.unwrap_or(file.server.port);

        let mut authorized = AuthorizedIds::new();
        for (text, allowed) in &file.identifiers {
            let id: UserId = text.parse()?;
            if *allowed {
                authorized.insert(id);
            }
        }
        for text in &cli.uuids {
            authorized.insert(text.parse()?);
        }
        if authorized.is_empty() {
            warn!("no authorized identifiers configured, every session will be refused");
        } else {
            info!(count = authorized.len(), "loaded authorized identifiers");
        }

        let idle_timeout = cli.idle_timeout.unwrap_or(file.server.idle_timeout);
        let connect_timeout = cli.connect_timeout.unwrap_or(file.server.connect_timeout);
        let handshake_timeout = file.server.handshake_timeout;
        if connect_timeout == 0 {
            return Err(RelayError::Config("connect_timeout must be at least 1 second".into()));
        }
        if handshake_timeout == 0 {
            return Err(RelayError::Config(
                "handshake_timeout must be at least 1 second".into(),
            ));
        }

        Ok(Self {
            bind_addr: SocketAddr::new(ip, port),
            connect_timeout: Duration::from_secs(connect_timeout),
            relay: RelayConfig {
                accepted_version: file.protocol.accepted_version,
                authorized,
                handshake_timeout: Duration::from_secs(handshake_timeout),
                idle_timeout: (idle_timeout > 0).then(|| Duration::from_secs(idle_timeout)),
                send_response_header: file.protocol.send_response_header,
            },
            policy: RelayPolicy {
                allowed_destinations: file.policy.allowed_destinations,
                max_sessions: cli.max_sessions.unwrap_or(file.server.max_sessions),
            },
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
