//! Configuration file locations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Well-known configuration paths.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("net", "trellis", "trellis"),
        }
    }

    /// `~/.config/trellis/config.toml` (platform equivalent).
    pub fn user_config_file(&self) -> Result<PathBuf> {
        let dirs = self
            .project_dirs
            .as_ref()
            .context("no home directory available")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// `<project>/trellis.toml`.
    pub fn project_config_file(project_dir: &Path) -> PathBuf {
        project_dir.join("trellis.toml")
    }

    /// `<project>/trellis.local.toml`, expected to be gitignored.
    pub fn local_config_file(project_dir: &Path) -> PathBuf {
        project_dir.join("trellis.local.toml")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
