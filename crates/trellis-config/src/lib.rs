//! # trellis-config: Node configuration
//!
//! Layered configuration for a Trellis node: built-in defaults, user
//! config, project config, gitignored local overrides, then `TRELLIS_*`
//! environment variables, each layer overriding the last.

mod loader;
mod paths;

pub use loader::ConfigLoader;
pub use paths::Paths;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    /// Name of the active environment profile.
    pub environment: String,
    pub network: NetworkConfig,
    pub ble: BleConfig,
    pub storage: StorageConfig,
    pub commissioning: CommissioningConfig,
    pub log: LogConfig,
}

impl Default for TrellisConfig {
    fn default() -> Self {
        Self {
            environment: "default".to_string(),
            network: NetworkConfig::default(),
            ble: BleConfig::default(),
            storage: StorageConfig::default(),
            commissioning: CommissioningConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl TrellisConfig {
    /// Resolves relative paths against the project directory.
    pub fn resolve_paths(&mut self, project_dir: &std::path::Path) {
        if self.storage.root.is_relative() {
            self.storage.root = project_dir.join(&self.storage.root);
        }
    }
}

/// UDP/mDNS settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Matter operational port.
    pub port: u16,
    /// Interface name mDNS binds to; empty means all interfaces.
    pub mdns_interface: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 5540,
            mdns_interface: String::new(),
        }
    }
}

/// BLE commissioning transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// HCI adapter index.
    pub hci_id: u32,
    pub enabled: bool,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            hci_id: 0,
            enabled: false,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the node's key/value store.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".trellis"),
        }
    }
}

/// Commissioning window parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissioningConfig {
    pub passcode: u32,
    pub discriminator: u16,
    /// PBKDF iteration count advertised during PASE.
    pub pbkdf_iterations: u32,
}

impl Default for CommissioningConfig {
    fn default() -> Self {
        Self {
            passcode: 20202021,
            discriminator: 3840,
            pbkdf_iterations: 1000,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing filter directive, e.g. "info" or "trellis_session=debug".
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
