//! Profiles and the library context they resolve to
//!
//! Each profile owns a storage directory for disabled mods and its own
//! database. The game mods directory is shared by every profile.

mod manager;

pub use manager::*;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A named profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Display name
    pub name: String,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: String,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Everything the scanner, database and reconciler need to know about
/// where one profile's library lives
#[derive(Debug, Clone)]
pub struct LibraryContext {
    /// Game mods directory; mods here are enabled
    pub game_root: PathBuf,
    /// Profile storage directory; mods here are disabled
    pub storage_root: PathBuf,
    pub profile_root: PathBuf,
    pub db_path: PathBuf,
    /// Nexus game domain used to build listing URLs
    pub game_domain: String,
    pub remove_retries: u32,
    pub remove_retry_delay: Duration,
}

impl LibraryContext {
    /// Context for an arbitrary pair of roots, with the database beside the storage root
    pub fn new(game_root: impl Into<PathBuf>, profile_root: impl Into<PathBuf>) -> Self {
        let profile_root = profile_root.into();
        Self {
            game_root: game_root.into(),
            storage_root: profile_root.join("storage"),
            db_path: profile_root.join("mods.db"),
            profile_root,
            game_domain: "stardewvalley".to_string(),
            remove_retries: 10,
            remove_retry_delay: Duration::from_millis(1000),
        }
    }

    /// Root a mod with the given enabled state belongs under
    pub fn root_for(&self, enabled: bool) -> &PathBuf {
        if enabled {
            &self.game_root
        } else {
            &self.storage_root
        }
    }
}
