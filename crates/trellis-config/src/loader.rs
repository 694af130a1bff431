//! Configuration loader with multi-source merging.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{Paths, TrellisConfig};

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir).
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "TRELLIS".to_string(),
        }
    }

    /// Set the project directory.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "TRELLIS").
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence.
    pub fn load(self) -> Result<TrellisConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = TrellisConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/trellis/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Project config (trellis.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (trellis.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (TRELLIS_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        // Build and deserialize
        let config = builder.build().context("Failed to build configuration")?;

        let mut trellis_config: TrellisConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Resolve relative paths
        trellis_config.resolve_paths(&self.project_dir);

        Ok(trellis_config)
    }

    /// Load configuration or return defaults if not found.
    pub fn load_or_default(self) -> TrellisConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("TRELLIS_TEST_NONE")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.network.port, 5540);
        assert_eq!(config.commissioning.passcode, 20202021);
        assert_eq!(config.commissioning.discriminator, 3840);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_project_file_overrides_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("trellis.toml"),
            "environment = \"lab\"\n[network]\nport = 5550\n",
        )
        .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("TRELLIS_TEST_NONE")
            .load()
            .expect("Failed to load config");

        assert_eq!(config.environment, "lab");
        assert_eq!(config.network.port, 5550);
        // Untouched sections keep their defaults.
        assert_eq!(config.commissioning.passcode, 20202021);
    }

    #[test]
    fn test_local_file_overrides_project_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("trellis.toml"), "[network]\nport = 5550\n")
            .expect("Failed to write config");
        fs::write(
            temp_dir.path().join("trellis.local.toml"),
            "[network]\nport = 5560\n",
        )
        .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("TRELLIS_TEST_NONE")
            .load()
            .expect("Failed to load config");
        assert_eq!(config.network.port, 5560);
    }

    #[test]
    fn test_relative_storage_root_is_resolved() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .with_env_prefix("TRELLIS_TEST_NONE")
            .load()
            .expect("Failed to load config");
        assert!(config.storage.root.starts_with(temp_dir.path()));
    }
}
