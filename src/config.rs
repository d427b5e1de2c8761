//! Server configuration: environment variables with defaults and validation.

use std::path::PathBuf;

use snafu::Snafu;

use crate::constants::DEFAULT_PORT;
use crate::constants::READER_POOL_MAX;

/// A configuration value failed validation.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("invalid configuration for {key}: '{value}' ({reason})"))]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the server needs to come up.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Node name reported in logs.
    pub name: String,
    /// Version string reported by `VERSION`.
    pub version: String,
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory holding `db/sqlite.db` and its WAL siblings.
    pub data_dir: PathBuf,
    /// Shared secret; when set, clients must `AUTH` first.
    pub auth: Option<String>,
    /// Reader pool capacity.
    pub reader_pool_cap: usize,
}

impl ServerConfig {
    /// Load from `TANOAK_*` environment variables, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("TANOAK_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("TANOAK_PORT") {
            config.port = port.parse::<u16>().map_err(|err| ConfigError::InvalidValue {
                key: "TANOAK_PORT",
                value: port.clone(),
                reason: format!("must be a valid port number: {err}"),
            })?;
        }
        if let Ok(dir) = std::env::var("TANOAK_DATA_DIR") {
            config.data_dir = dir.into();
        }
        if let Ok(auth) = std::env::var("TANOAK_AUTH") {
            if !auth.is_empty() {
                config.auth = Some(auth);
            }
        }
        if let Ok(cap) = std::env::var("TANOAK_READER_POOL") {
            let parsed = cap.parse::<usize>().map_err(|err| ConfigError::InvalidValue {
                key: "TANOAK_READER_POOL",
                value: cap.clone(),
                reason: format!("must be a pool size: {err}"),
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TANOAK_READER_POOL",
                    value: cap,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.reader_pool_cap = parsed;
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tanoak-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("./data"),
            auth: None,
            reader_pool_cap: READER_POOL_MAX,
        }
    }
}
