//! Device configuration, loaded from TOML and overridden from the command line.
//!
//! ```toml
//! listen = "0.0.0.0"
//! port = 5569
//! health_check_interval_ms = 2000
//! source_name = "ola-e133-device"
//! root_uid = "7a70:00000001"
//!
//! [[endpoints]]
//! id = 1
//! label = "Dimmer rack"
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use e133_core::framing::DEFAULT_MAX_BLOCK_SIZE;
use e133_core::{E133_PORT, Uid};
use serde::Deserialize;

use crate::registry::ROOT_ENDPOINT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("endpoint 0 is the root endpoint and can't be configured")]
    ReservedEndpoint,
    #[error("endpoint {0} is configured more than once")]
    DuplicateEndpoint(u16),
    #[error("health_check_interval_ms must be greater than zero")]
    ZeroInterval,
    #[error("max_block_size must be greater than zero")]
    ZeroBlockSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub id: u16,
    /// Defaults to the root UID with the endpoint id added to the device part.
    pub uid: Option<Uid>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    pub listen: Ipv4Addr,
    pub port: u16,
    pub health_check_interval_ms: u64,
    /// Sent in the E1.33 header of every response.
    pub source_name: String,
    pub max_block_size: usize,
    pub root_uid: Uid,
    pub root_label: String,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            listen: Ipv4Addr::UNSPECIFIED,
            port: E133_PORT,
            health_check_interval_ms: 2000,
            source_name: "ola-e133-device".to_string(),
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            root_uid: Uid::new(0x7a70, 0x0000_0001),
            root_label: "E1.33 device".to_string(),
            endpoints: Vec::new(),
        }
    }
}

impl DeviceConfig {
    /// Parse a config. Missing keys take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read and parse the config file at `path`. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Reject configs the device can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.max_block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.id == ROOT_ENDPOINT {
                return Err(ConfigError::ReservedEndpoint);
            }
            if !seen.insert(endpoint.id) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.id));
            }
        }
        Ok(())
    }

    /// The heartbeat period for the TCP connection.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// The address both sockets bind to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((self.listen, self.port))
    }

    /// The UID an endpoint's responder answers to.
    pub fn endpoint_uid(&self, endpoint: &EndpointConfig) -> Uid {
        endpoint.uid.unwrap_or_else(|| {
            Uid::new(
                self.root_uid.manufacturer(),
                self.root_uid.device().wrapping_add(u32::from(endpoint.id)),
            )
        })
    }
}
