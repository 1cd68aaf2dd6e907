//! Persistent configuration for tmi-cli.
//!
//! Config file lives at `~/.config/tmi/cli.toml`. Every field is optional;
//! command-line flags win over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tmi_sdk::client::TWITCH_SERVER;

/// User configuration (persisted in cli.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server address (host:port).
    pub server: Option<String>,
    /// Login name.
    pub nick: Option<String>,
    /// OAuth access token (with or without `oauth:`).
    pub token: Option<String>,
    /// Application client id for Helix lookups.
    pub client_id: Option<String>,
    /// Channels to join on start.
    pub channels: Option<Vec<String>>,
    /// Use TLS (default true).
    pub tls: Option<bool>,
    /// Seconds between failed redials: first delay.
    pub reconnect_initial_secs: Option<u64>,
    /// Seconds between failed redials: cap.
    pub reconnect_max_secs: Option<u64>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tmi")
        .join("cli.toml")
}

impl Config {
    /// Load from `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Effective settings after merging CLI args over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub server: String,
    pub nick: String,
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub channels: Vec<String>,
    pub tls: bool,
    pub reconnect_initial_secs: u64,
    pub reconnect_max_secs: u64,
}

impl Resolved {
    pub fn merge(cli: &super::Args, config: &Config) -> Self {
        let server = cli
            .server
            .clone()
            .or_else(|| config.server.clone())
            .unwrap_or_else(|| TWITCH_SERVER.to_string());

        let nick = cli
            .nick
            .clone()
            .or_else(|| config.nick.clone())
            .unwrap_or_else(|| "justinfan12345".to_string());

        let channels = if !cli.channels.is_empty() {
            cli.channels.clone()
        } else {
            config.channels.clone().unwrap_or_default()
        };

        let tls = !cli.no_tls && config.tls.unwrap_or(true);

        Self {
            server,
            nick,
            token: cli.token.clone().or_else(|| config.token.clone()),
            client_id: cli.client_id.clone().or_else(|| config.client_id.clone()),
            channels,
            tls,
            reconnect_initial_secs: config.reconnect_initial_secs.unwrap_or(2),
            reconnect_max_secs: config.reconnect_max_secs.unwrap_or(30),
        }
    }
}
