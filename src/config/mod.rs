//! Configuration management for modshelf
//!
//! Uses XDG-compliant paths:
//! - Config: ~/.config/modshelf/config.toml
//! - Data: ~/.local/share/modshelf/
//! - Cache: ~/.cache/modshelf/

mod paths;

pub use paths::Paths;

use crate::error::ModError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The game's active mods directory (enabled mods live here)
    pub game_mods_dir: Option<String>,

    /// Override for where per-profile storage and databases live
    pub profiles_root: Option<String>,

    /// Where the browser drops downloaded archives
    pub downloads_dir: Option<String>,

    /// Nexus Mods API key
    pub nexus_api_key: Option<String>,

    /// Nexus game domain used for listing URLs and API calls
    pub nexus_game_domain: String,

    /// Active profile id
    pub active_profile: String,

    /// Delay before a requested sync runs, so bursts of edits collapse
    pub sync_debounce_ms: u64,

    /// How long the update flow waits for a browser download
    pub download_timeout_secs: u64,

    /// Attempts for removing files another process may hold open
    pub remove_retries: u32,

    /// Fixed delay between removal attempts
    pub remove_retry_delay_ms: u64,

    #[serde(skip)]
    paths: Option<Paths>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            game_mods_dir: None,
            profiles_root: None,
            downloads_dir: None,
            nexus_api_key: None,
            nexus_game_domain: "stardewvalley".to_string(),
            active_profile: "default".to_string(),
            sync_debounce_ms: 250,
            download_timeout_secs: 300,
            remove_retries: 10,
            remove_retry_delay_ms: 1000,
            paths: None,
        }
    }
}

impl Config {
    /// Load configuration from disk or create default
    pub async fn load(paths: Paths) -> Result<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            let mut config = Config::default();
            config.paths = Some(paths.clone());
            config.save().await?;
            config
        };

        config.paths = Some(paths);
        Ok(config)
    }

    /// Save configuration to disk
    pub async fn save(&self) -> Result<()> {
        let config_path = self.paths()?.config_file();

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    pub fn paths(&self) -> Result<&Paths> {
        self.paths
            .as_ref()
            .context("Config was not loaded from disk")
    }

    pub fn with_paths(mut self, paths: Paths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Game mods directory, validated to be an existing directory
    pub fn validate_game_root(&self) -> Result<PathBuf> {
        let raw = self
            .game_mods_dir
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ModError::Config("game mods directory is not set".into()))?;

        let path = PathBuf::from(raw);
        if !path.is_dir() {
            return Err(ModError::Config(format!(
                "game mods directory does not exist: {}",
                path.display()
            ))
            .into());
        }
        Ok(path)
    }

    /// Root holding one folder per profile
    pub fn profiles_root(&self) -> Result<PathBuf> {
        match self.profiles_root.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(root) => Ok(PathBuf::from(root)),
            None => Ok(self.paths()?.profiles_dir()),
        }
    }

    /// Download directory, defaulting to ~/Downloads
    pub fn downloads_dir(&self) -> PathBuf {
        if let Some(dir) = self.downloads_dir.as_deref().filter(|s| !s.trim().is_empty()) {
            return PathBuf::from(dir);
        }
        directories::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("Downloads"))
    }

    pub fn nexus_api_key(&self) -> Option<&str> {
        self.nexus_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn sync_debounce(&self) -> Duration {
        Duration::from_millis(self.sync_debounce_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn remove_retry_delay(&self) -> Duration {
        Duration::from_millis(self.remove_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_creates_default_config() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::rooted_at(dir.path());

        let config = Config::load(paths.clone()).await.unwrap();
        assert!(paths.config_file().exists());
        assert_eq!(config.nexus_game_domain, "stardewvalley");
        assert_eq!(config.active_profile, "default");
    }

    #[tokio::test]
    async fn save_and_reload() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::rooted_at(dir.path());

        let mut config = Config::load(paths.clone()).await.unwrap();
        config.game_mods_dir = Some("/games/sdv/Mods".into());
        config.sync_debounce_ms = 500;
        config.save().await.unwrap();

        let reloaded = Config::load(paths).await.unwrap();
        assert_eq!(reloaded.game_mods_dir.as_deref(), Some("/games/sdv/Mods"));
        assert_eq!(reloaded.sync_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn game_root_errors_are_config_errors() {
        let config = Config::default();
        let err = config.validate_game_root().unwrap_err();
        assert!(matches!(err.downcast_ref::<ModError>(), Some(ModError::Config(_))));

        let config = Config {
            game_mods_dir: Some("/definitely/not/here".into()),
            ..Config::default()
        };
        let err = config.validate_game_root().unwrap_err();
        assert!(matches!(err.downcast_ref::<ModError>(), Some(ModError::Config(_))));
    }

    #[test]
    fn game_root_accepts_existing_dir() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            game_mods_dir: Some(dir.path().to_string_lossy().to_string()),
            ..Config::default()
        };
        assert_eq!(config.validate_game_root().unwrap(), dir.path());
    }
}
