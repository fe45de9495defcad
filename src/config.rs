//! TOML configuration for the bridge.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [connection]
//! port = 8883
//!
//! [platform]
//! scan_interval_secs = 30
//!
//! [roombas.living_room]
//! host = "192.168.1.50"
//! username = "3115850251687850"
//! password = ":1:1493319243:gOizXpQ4lcdSoD1"
//! insecure_tls = true
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use crate::mqtt::config::{MqttConfig, TlsSettings, DEFAULT_CA_FILE, DEFAULT_PORT};
use crate::roomba::DeviceIdentity;

const CONFIG_DIR: &str = ".config/roomba-switch";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    /// Parses `level` ("error" through "trace", or "off").
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        self.level.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "logging.level '{}' must be one of off, error, warn, info, debug, trace",
                self.level
            ))
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Settings shared by every device session.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub port: u16,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
    pub request_capacity: usize,
    pub ca_file: PathBuf,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            keep_alive_secs: 60,
            reconnect_delay_secs: 5,
            request_capacity: 10,
            ca_file: PathBuf::from(DEFAULT_CA_FILE),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformConfig {
    pub scan_interval_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
        }
    }
}

impl PlatformConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RoombaConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    /// Accept the robot's self-signed certificate without verification.
    #[serde(default)]
    pub insecure_tls: bool,
}

impl fmt::Debug for RoombaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoombaConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("insecure_tls", &self.insecure_tls)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    /// Keyed by device slug, which doubles as the display name.
    #[serde(default)]
    pub roombas: BTreeMap<String, RoombaConfig>,
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&content)?;
        info!(
            "Loaded {} device(s) from {}",
            config.roombas.len(),
            path.display()
        );
        Ok(config)
    }

    /// Writes [`Config::example`] to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub async fn ensure_default_config(path: &Path) -> Result<bool, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if exists {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let content = toml::to_string_pretty(&Self::example())?;
        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        warn!("Wrote example config to {}", path.display());
        Ok(true)
    }

    pub fn example() -> Self {
        let mut roombas = BTreeMap::new();
        roombas.insert(
            "living_room".to_string(),
            RoombaConfig {
                host: "192.168.1.50".to_string(),
                username: "REPLACE_WITH_ROBOT_BLID".to_string(),
                password: "REPLACE_WITH_ROBOT_PASSWORD".to_string(),
                insecure_tls: true,
            },
        );
        Self {
            roombas,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.level_filter()?;
        if self.roombas.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [roombas.<name>] entry is required".to_string(),
            ));
        }
        if self.platform.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "platform.scan_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.connection.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid(
                "connection.keep_alive_secs must be greater than zero".to_string(),
            ));
        }
        if self.connection.request_capacity == 0 {
            return Err(ConfigError::Invalid(
                "connection.request_capacity must be greater than zero".to_string(),
            ));
        }

        for (slug, roomba) in &self.roombas {
            if !is_slug(slug) {
                return Err(ConfigError::Invalid(format!(
                    "device name '{}' must contain only lowercase letters, digits and underscores",
                    slug
                )));
            }
            for (field, value) in [
                ("host", &roomba.host),
                ("username", &roomba.username),
                ("password", &roomba.password),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "roombas.{}.{} must not be empty",
                        slug, field
                    )));
                }
            }
        }
        Ok(())
    }

    /// Identity and session settings for every configured device.
    pub fn devices(&self) -> Vec<(DeviceIdentity, MqttConfig)> {
        self.roombas
            .iter()
            .map(|(slug, roomba)| {
                let identity = DeviceIdentity {
                    name: slug.clone(),
                    host: roomba.host.clone(),
                    username: roomba.username.clone(),
                    password: roomba.password.clone(),
                };
                let mut mqtt = MqttConfig::new(
                    identity.host.clone(),
                    identity.username.clone(),
                    identity.password.clone(),
                );
                mqtt.port = self.connection.port;
                mqtt.keep_alive = Duration::from_secs(self.connection.keep_alive_secs);
                mqtt.reconnect_delay = Duration::from_secs(self.connection.reconnect_delay_secs);
                mqtt.request_capacity = self.connection.request_capacity;
                mqtt.tls = TlsSettings {
                    ca_file: self.connection.ca_file.clone(),
                    verify_server: !roomba.insecure_tls,
                };
                (identity, mqtt)
            })
            .collect()
    }
}

pub fn default_config_path() -> PathBuf {
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}

fn is_slug(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
