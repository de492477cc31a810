//! XDG-compliant path management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

/// Manages all application paths following XDG base directories
#[derive(Debug, Clone)]
pub struct Paths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl Paths {
    /// Resolve the platform directories for modshelf
    pub fn new() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "modshelf")
            .context("Failed to determine project directories")?;
        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }

    /// Paths rooted in one directory, used by tests and portable installs
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    // ========== Config Paths ==========

    /// Config directory: ~/.config/modshelf/
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Main config file: ~/.config/modshelf/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    // ========== Data Paths ==========

    /// Data directory: ~/.local/share/modshelf/
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// Profile registry: ~/.local/share/modshelf/profiles.json
    pub fn profiles_file(&self) -> PathBuf {
        self.data_dir.join("profiles.json")
    }

    /// Default profiles root: ~/.local/share/modshelf/profiles/
    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }

    /// Log file: ~/.local/share/modshelf/modshelf.log
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("modshelf.log")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.profiles_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_paths_stay_inside_root() {
        let paths = Paths::rooted_at("/portable");
        assert_eq!(paths.config_file(), PathBuf::from("/portable/config/config.toml"));
        assert_eq!(paths.profiles_file(), PathBuf::from("/portable/data/profiles.json"));
        assert_eq!(paths.log_file(), PathBuf::from("/portable/data/modshelf.log"));
    }
}
