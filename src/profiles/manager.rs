//! Profile registry persisted as `profiles.json`

use super::{LibraryContext, Profile};
use crate::config::Config;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileFile {
    active_profile: String,
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Known profiles and which one is active
pub struct ProfileStore {
    path: PathBuf,
    data: ProfileFile,
}

impl ProfileStore {
    /// Load the registry, creating it with one default profile when absent
    pub async fn load(path: impl Into<PathBuf>, active: &str) -> Result<Self> {
        let path = path.into();

        let data = if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .context("Failed to read profiles file")?;
            serde_json::from_str(&content).context("Failed to parse profiles file")?
        } else {
            let active = if active.trim().is_empty() { DEFAULT_PROFILE } else { active };
            let mut profiles = BTreeMap::new();
            profiles.insert(active.to_string(), Profile::new("Default"));
            ProfileFile {
                active_profile: active.to_string(),
                profiles,
            }
        };

        let store = Self { path, data };
        store.save().await?;
        Ok(store)
    }

    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&self.data)?;
        tokio::fs::write(&self.path, content)
            .await
            .context("Failed to write profiles file")?;
        Ok(())
    }

    /// Profiles as (id, profile), sorted by id
    pub fn list(&self) -> Vec<(&str, &Profile)> {
        self.data
            .profiles
            .iter()
            .map(|(id, p)| (id.as_str(), p))
            .collect()
    }

    pub fn active(&self) -> &str {
        &self.data.active_profile
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.data.profiles.get(id)
    }

    pub async fn create(&mut self, id: &str, name: &str) -> Result<()> {
        let id = id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            bail!("Invalid profile id '{}'", id);
        }
        if self.data.profiles.contains_key(id) {
            bail!("Profile '{}' already exists", id);
        }

        let name = if name.trim().is_empty() { id } else { name.trim() };
        self.data.profiles.insert(id.to_string(), Profile::new(name));
        self.save().await?;
        tracing::info!("Created profile '{}'", id);
        Ok(())
    }

    pub async fn rename(&mut self, id: &str, name: &str) -> Result<()> {
        let Some(profile) = self.data.profiles.get_mut(id) else {
            bail!("Profile '{}' not found", id);
        };
        profile.name = name.trim().to_string();
        self.save().await
    }

    pub async fn set_active(&mut self, id: &str) -> Result<()> {
        if !self.data.profiles.contains_key(id) {
            bail!("Profile '{}' not found", id);
        }
        self.data.active_profile = id.to_string();
        self.save().await?;
        tracing::info!("Switched to profile '{}'", id);
        Ok(())
    }

    /// Resolve the library context of a profile, creating its directories
    pub fn context_for(&self, id: &str, config: &Config) -> Result<LibraryContext> {
        if !self.data.profiles.contains_key(id) {
            bail!("Profile '{}' not found", id);
        }

        let game_root = absolute(&config.validate_game_root()?)?;
        let profile_root = absolute(&config.profiles_root()?.join(id))?;

        let mut ctx = LibraryContext::new(game_root, profile_root);
        std::fs::create_dir_all(&ctx.storage_root).with_context(|| {
            format!("Failed to create storage root {}", ctx.storage_root.display())
        })?;

        ctx.game_domain = config.nexus_game_domain.clone();
        ctx.remove_retries = config.remove_retries;
        ctx.remove_retry_delay = config.remove_retry_delay();
        Ok(ctx)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use tempfile::TempDir;

    #[tokio::test]
    async fn first_load_creates_default_profile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");

        let store = ProfileStore::load(&path, DEFAULT_PROFILE).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.active(), DEFAULT_PROFILE);
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn create_rename_switch_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");

        let mut store = ProfileStore::load(&path, DEFAULT_PROFILE).await.unwrap();
        store.create("coop", "Co-op run").await.unwrap();
        assert!(store.create("coop", "again").await.is_err());
        assert!(store.create("../escape", "x").await.is_err());

        store.rename("coop", "Co-op with friends").await.unwrap();
        store.set_active("coop").await.unwrap();
        assert!(store.set_active("nope").await.is_err());

        let reloaded = ProfileStore::load(&path, DEFAULT_PROFILE).await.unwrap();
        assert_eq!(reloaded.active(), "coop");
        assert_eq!(reloaded.get("coop").unwrap().name, "Co-op with friends");
    }

    #[tokio::test]
    async fn context_layout() {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("Mods");
        std::fs::create_dir_all(&game).unwrap();

        let mut config = Config::default().with_paths(Paths::rooted_at(dir.path()));
        config.game_mods_dir = Some(game.to_string_lossy().to_string());

        let store = ProfileStore::load(dir.path().join("profiles.json"), DEFAULT_PROFILE)
            .await
            .unwrap();
        let ctx = store.context_for(DEFAULT_PROFILE, &config).unwrap();

        assert_eq!(ctx.game_root, game);
        assert!(ctx.storage_root.is_dir());
        assert!(ctx.storage_root.ends_with("profiles/default/storage"));
        assert!(ctx.db_path.ends_with("profiles/default/mods.db"));
        assert_eq!(ctx.game_domain, "stardewvalley");

        assert!(store.context_for("ghost", &config).is_err());
    }
}
