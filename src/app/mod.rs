//! Application state and orchestration

mod actions;
pub mod scheduler;

pub use scheduler::SyncScheduler;

use crate::config::Config;
use crate::db::Database;
use crate::mods::update::{Browser, SystemBrowser};
use crate::mods::{ModManager, SyncReport};
use crate::nexus::{NexusClient, NexusError};
use crate::profiles::ProfileStore;
use crate::queue::UpdateProcessor;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// The active profile's library: its mod manager and sync scheduler
pub struct Library {
    pub mods: ModManager,
    pub scheduler: SyncScheduler,
}

/// Main application struct that orchestrates all components
pub struct App {
    /// Application configuration
    pub config: Arc<RwLock<Config>>,

    /// Profile registry
    pub profiles: Arc<RwLock<ProfileStore>>,

    /// Opened on first use; needs a valid game mods directory
    library: OnceCell<Arc<Library>>,

    browser: Arc<dyn Browser>,
}

impl App {
    /// Create a new App instance
    pub async fn new(config: Config) -> Result<Self> {
        let paths = config.paths()?.clone();
        paths.ensure_dirs().context("Failed to create directories")?;

        let profiles = ProfileStore::load(paths.profiles_file(), &config.active_profile).await?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            profiles: Arc::new(RwLock::new(profiles)),
            library: OnceCell::new(),
            browser: Arc::new(SystemBrowser),
        })
    }

    /// Replace the browser used by the update flow
    pub fn with_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = browser;
        self
    }

    /// Library of the active profile, opening its database on first use
    pub async fn library(&self) -> Result<Arc<Library>> {
        self.library
            .get_or_try_init(|| async {
                let config = self.config.read().await;
                let profiles = self.profiles.read().await;
                let ctx = profiles.context_for(profiles.active(), &config)?;

                let db = Database::open(&ctx.db_path).context("Failed to open database")?;
                let mods = ModManager::new(ctx, Arc::new(db));
                let scheduler = SyncScheduler::new(mods.reconciler());

                tracing::debug!(
                    "Opened library for profile '{}' at {}",
                    profiles.active(),
                    mods.context().profile_root.display()
                );
                Ok::<_, anyhow::Error>(Arc::new(Library { mods, scheduler }))
            })
            .await
            .cloned()
    }

    /// Run the debounced pass a mutating command asked for
    pub async fn sync_after_change(&self) -> Result<SyncReport> {
        let library = self.library().await?;
        let debounce = self.config.read().await.sync_debounce();
        library.scheduler.request(debounce);
        match library.scheduler.flush().await? {
            Some(report) => Ok(report),
            None => library.scheduler.run_now().await,
        }
    }

    /// Nexus client for the configured key and game
    pub async fn nexus(&self) -> Result<NexusClient> {
        let config = self.config.read().await;
        let key = config.nexus_api_key().ok_or(NexusError::InvalidKey)?;
        Ok(NexusClient::new(key, &config.nexus_game_domain)?)
    }

    pub async fn update_processor(&self) -> Result<UpdateProcessor> {
        let library = self.library().await?;
        let config = self.config.read().await;
        Ok(UpdateProcessor::new(
            library.mods.context().clone(),
            library.mods.db().clone(),
            self.browser.clone(),
            config.downloads_dir(),
            config.download_timeout(),
        ))
    }

    /// Make another profile active; its library is opened on next use
    pub async fn switch_profile(&mut self, id: &str) -> Result<()> {
        self.profiles.write().await.set_active(id).await?;

        let mut config = self.config.write().await;
        config.active_profile = id.to_string();
        config.save().await?;
        drop(config);

        self.library = OnceCell::new();
        Ok(())
    }
}
