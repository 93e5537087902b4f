//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tunecast_core::{AuthMethod, Credential, ServerConfig};

/// Configuration for the standalone server, loaded from YAML with
/// environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Share name shown to clients; also the auth realm and mDNS name.
    /// Override: `TUNECAST_NAME`
    pub name: String,

    /// Preferred TCP port (0 = ephemeral).
    /// Override: `TUNECAST_PORT`
    pub port: u16,

    /// Directory tree to share.
    /// Override: `TUNECAST_MUSIC_DIR`
    pub music_dir: PathBuf,

    /// How `/login` validates credentials.
    pub auth_method: AuthMethod,

    /// Accepted credentials for password-protected shares.
    pub credentials: Vec<Credential>,

    /// Maximum concurrent sessions (0 = unlimited).
    pub max_users: usize,

    /// Advertise the share over mDNS.
    pub publish: bool,

    /// Optional `Machine ID` TXT field.
    pub machine_id: Option<String>,

    /// Idle session expiry, seconds.
    pub session_timeout_secs: u64,

    /// Re-scan the music directory this often, seconds (0 = never).
    /// Override: `TUNECAST_RESCAN_INTERVAL`
    pub rescan_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let core = ServerConfig::default();
        Self {
            name: core.name,
            port: core.port,
            music_dir: PathBuf::from("."),
            auth_method: core.auth_method,
            credentials: core.credentials,
            max_users: core.max_users,
            publish: core.publish,
            machine_id: core.machine_id,
            session_timeout_secs: core.session_timeout_secs,
            rescan_interval_secs: 0,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TUNECAST_NAME") {
            if !val.is_empty() {
                self.name = val;
            }
        }

        if let Ok(val) = std::env::var("TUNECAST_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("TUNECAST_MUSIC_DIR") {
            if !val.is_empty() {
                self.music_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("TUNECAST_RESCAN_INTERVAL") {
            if let Ok(interval) = val.parse() {
                self.rescan_interval_secs = interval;
            }
        }
    }

    /// Converts to the core's config type.
    pub fn to_core_config(&self) -> ServerConfig {
        ServerConfig {
            name: self.name.clone(),
            port: self.port,
            auth_method: self.auth_method,
            credentials: self.credentials.clone(),
            max_users: self.max_users,
            publish: self.publish,
            machine_id: self.machine_id.clone(),
            session_timeout_secs: self.session_timeout_secs,
        }
    }
}
