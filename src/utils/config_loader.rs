/*
 * SHM RELAY - CONFIGURATION LOADER
 * =================================================================
 * Component Name: src/utils/config_loader.rs
 * Core Responsibility: Layer defaults, an optional TOML file and SHM_RELAY_* environment overrides.
 * Design Pattern: Layered Configuration
 * =================================================================
 */

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::info;

use crate::buffer::validate_name;
use crate::error::{RelayError, RelayResult};
use crate::transport::RelayTimeouts;

pub const ENV_PREFIX: &str = "SHM_RELAY";

// =================================================================
// Configuration schema
// =================================================================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    pub bind_addr: String,
    #[serde(default)]
    pub buffer_name: Option<String>,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub refresh_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".to_string(),
            buffer_name: None,
            lock_timeout_ms: 5_000,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 15_000,
            response_timeout_ms: 10_000,
            refresh_interval_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_name: "shm_relay.log".to_string(),
        }
    }
}

impl HostConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn bind_addr(&self) -> RelayResult<SocketAddr> {
        self.bind_addr
            .parse()
            .map_err(|e| RelayError::Config(format!("host.bind_addr '{}': {}", self.bind_addr, e)))
    }
}

impl ClientConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn timeouts(&self) -> RelayTimeouts {
        RelayTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            handshake: Duration::from_millis(self.handshake_timeout_ms),
            response: Duration::from_millis(self.response_timeout_ms),
        }
    }
}

// =================================================================
// Loading
// =================================================================

impl RelayConfig {
    /// Defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> RelayResult<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> RelayResult<Self> {
        let defaults = RelayConfig::default();
        let mut builder = Config::builder()
            .set_default("host.bind_addr", defaults.host.bind_addr.clone())
            .and_then(|b| b.set_default("host.lock_timeout_ms", defaults.host.lock_timeout_ms as i64))
            .and_then(|b| b.set_default("client.connect_timeout_ms", defaults.client.connect_timeout_ms as i64))
            .and_then(|b| b.set_default("client.handshake_timeout_ms", defaults.client.handshake_timeout_ms as i64))
            .and_then(|b| b.set_default("client.response_timeout_ms", defaults.client.response_timeout_ms as i64))
            .and_then(|b| b.set_default("client.refresh_interval_ms", defaults.client.refresh_interval_ms as i64))
            .and_then(|b| b.set_default("logging.level", defaults.logging.level.clone()))
            .and_then(|b| b.set_default("logging.file_name", defaults.logging.file_name.clone()))
            .map_err(|e| RelayError::Config(format!("Defaults Error: {}", e)))?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let settings = builder
            .add_source(env.try_parsing(true))
            .build()
            .map_err(|e| RelayError::Config(format!("Build Error: {}", e)))?;

        let config = settings
            .try_deserialize::<RelayConfig>()
            .map_err(|e| RelayError::Config(format!("Parse Error: {}", e)))?;

        config.validate()?;
        match path {
            Some(p) => info!("CONFIG: loaded {}", p.display()),
            None => info!("CONFIG: using defaults and environment"),
        }
        Ok(config)
    }

    pub fn validate(&self) -> RelayResult<()> {
        if let Some(name) = &self.host.buffer_name {
            validate_name(name).map_err(|e| RelayError::Config(format!("host.buffer_name: {}", e)))?;
        }
        self.host.bind_addr()?;

        let timeouts = [
            ("host.lock_timeout_ms", self.host.lock_timeout_ms),
            ("client.connect_timeout_ms", self.client.connect_timeout_ms),
            ("client.handshake_timeout_ms", self.client.handshake_timeout_ms),
            ("client.response_timeout_ms", self.client.response_timeout_ms),
            ("client.refresh_interval_ms", self.client.refresh_interval_ms),
        ];
        if let Some((key, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(RelayError::Config(format!("{} must be greater than zero", key)));
        }
        Ok(())
    }
}
