//! Runtime configuration for the broker and its clients
//!
//! `BridgeConfig` is immutable after construction and cheap to clone. It is
//! built from defaults, optionally overlaid with a JSON file, then with
//! `CAPBRIDGE_*` environment variables, and finally validated.

use crate::constants::*;
use crate::errors::{Error, Result};
use crate::types::Uid;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Location of the persisted authorization table
    pub database_path: PathBuf,

    /// The well-known rendezvous surface
    pub surface: SurfaceSettings,

    /// Interface descriptor of the broker's own handle
    pub broker_descriptor: String,

    /// Broker-side publication behaviour
    pub publisher: PublisherSettings,

    /// Client-side handle resolution behaviour
    pub locator: LocatorSettings,

    /// Identities allowed to call administrative operations besides root and system
    pub manager_uids: Vec<Uid>,
}

/// Where and how to reach the rendezvous surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceSettings {
    pub service_name: String,
    pub descriptor: String,
    /// Four ASCII characters packed big-endian into the reserved call code
    pub tag: String,
}

/// Publication retry and escalation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub escalation_quota: u32,
    pub restart_command: Vec<String>,
}

/// Handle resolution retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorSettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            surface: SurfaceSettings::default(),
            broker_descriptor: BROKER_DESCRIPTOR.to_string(),
            publisher: PublisherSettings::default(),
            locator: LocatorSettings::default(),
            manager_uids: Vec::new(),
        }
    }
}

impl Default for SurfaceSettings {
    fn default() -> Self {
        Self {
            service_name: BRIDGE_SERVICE_NAME.to_string(),
            descriptor: BRIDGE_SERVICE_DESCRIPTOR.to_string(),
            tag: BRIDGE_TAG.to_string(),
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay_ms: 1000,
            poll_interval_ms: 1000,
            escalation_quota: 1,
            restart_command: DEFAULT_RESTART_COMMAND
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 4000,
        }
    }
}

impl SurfaceSettings {
    /// The reserved call code derived from `tag`.
    pub fn transaction_code(&self) -> Result<u32> {
        let bytes = self.tag.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(Error::configuration(format!(
                "bridge tag must be exactly 4 printable ASCII characters, got '{}'",
                self.tag
            )));
        }
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl PublisherSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl LocatorSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl BridgeConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| Error::file_system(path, "read config", e))?;
        let config: BridgeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Defaults, overlaid with `$CAPBRIDGE_CONFIG` when set, then with the
    /// individual environment overrides, then validated.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var_os(CAPBRIDGE_CONFIG_VAR) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        tracing::debug!(
            database = %config.database_path.display(),
            surface = %config.surface.service_name,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Apply `CAPBRIDGE_*` environment overrides in place.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env::var_os(CAPBRIDGE_DB_PATH_VAR) {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(surface) = env::var(CAPBRIDGE_SURFACE_VAR) {
            if !surface.trim().is_empty() {
                self.surface.service_name = surface.trim().to_string();
            }
        }
        if let Ok(uids) = env::var(CAPBRIDGE_MANAGER_UIDS_VAR) {
            self.manager_uids = uids
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.parse::<Uid>().map_err(|e| {
                        Error::configuration(format!(
                            "invalid uid '{s}' in {CAPBRIDGE_MANAGER_UIDS_VAR}: {e}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.surface.transaction_code()?;
        if self.surface.service_name.is_empty() {
            return Err(Error::configuration("surface service name is empty"));
        }
        if self.publisher.attempts == 0 {
            return Err(Error::configuration("publisher.attempts must be at least 1"));
        }
        if self.locator.attempts == 0 {
            return Err(Error::configuration("locator.attempts must be at least 1"));
        }
        if self.locator.max_delay_ms < self.locator.base_delay_ms {
            return Err(Error::configuration(
                "locator.max_delay_ms must not be lower than locator.base_delay_ms",
            ));
        }
        if self.manager_uids.iter().any(|uid| uid.is_sentinel()) {
            return Err(Error::configuration(
                "manager_uids must not contain sentinel identities",
            ));
        }
        Ok(())
    }

    /// Whether `uid` may call administrative operations.
    pub fn is_manager(&self, uid: Uid) -> bool {
        uid.is_implicitly_allowed() || self.manager_uids.contains(&uid)
    }
}
