// crates/server/src/config.rs
//! Server configuration: optional TOML file, then environment overrides.
//! Command-line flags are applied on top by `main`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use sensorhub_core::config::{load_toml, ConfigError};
use sensorhub_core::StoreConfig;
use serde::Deserialize;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 47893;

pub const ENV_PORT: &str = "SENSORHUB_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: IpAddr,
    pub store: StoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            store: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` when given, then with `SENSORHUB_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => load_toml::<Self>(path)?,
            None => Self::default(),
        };
        config.store.validate()?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(port) = std::env::var(ENV_PORT) {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_PORT,
                value: port.clone(),
            })?;
        }
        self.store.apply_env()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}
