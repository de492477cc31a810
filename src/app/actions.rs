//! CLI command action handlers

use super::App;
use crate::db::{MetadataEdit, ModRecord, ModStatus};
use crate::error::ModError;
use crate::mods::SyncReport;
use crate::nexus::{self, MetadataService};
use crate::queue::{QueueSummary, UpdateOutcome, UpdateQueue};
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

impl App {
    // ========== Setup ==========

    pub async fn cmd_init(&self, game_mods_dir: &str, downloads_dir: Option<&str>) -> Result<()> {
        let game = PathBuf::from(game_mods_dir.trim());
        if !game.is_dir() {
            return Err(ModError::Config(format!("{} is not a directory", game.display())).into());
        }

        {
            let mut config = self.config.write().await;
            config.game_mods_dir = Some(game.to_string_lossy().to_string());
            if let Some(dir) = downloads_dir.map(str::trim).filter(|d| !d.is_empty()) {
                config.downloads_dir = Some(dir.to_string());
            }
            config.save().await?;
        }

        println!("Game mods directory: {}", game.display());
        let report = self.sync_after_change().await?;
        print_report(&report);

        let library = self.library().await?;
        println!("Storage directory:   {}", library.mods.context().storage_root.display());
        println!("Run 'modshelf list' to see your mods.");
        Ok(())
    }

    pub async fn cmd_sync(&self) -> Result<()> {
        let library = self.library().await?;
        let report = library.scheduler.run_now().await?;
        print_report(&report);
        Ok(())
    }

    // ========== Mod Commands ==========

    pub async fn cmd_list(&self) -> Result<()> {
        let library = self.library().await?;
        let mods = library.mods.list()?;

        if mods.is_empty() {
            println!("No mods in profile '{}'.", self.profiles.read().await.active());
            return Ok(());
        }

        let mut current_category: Option<&str> = None;
        for m in &mods {
            if current_category != Some(m.category.as_str()) {
                println!("\n{:02} {}", m.category_order, m.category);
                println!("{:-<60}", "");
                current_category = Some(m.category.as_str());
            }
            println!(
                "{:>4}. {} {} (v{}){}  [{}]",
                m.mod_order,
                status_marker(m),
                m.display_name(),
                m.version,
                update_marker(m),
                m.identity
            );
        }
        Ok(())
    }

    pub async fn cmd_info(&self, identity: &str) -> Result<()> {
        let library = self.library().await?;
        let m = library.mods.get(identity)?;

        println!("Mod Information");
        println!("{:-<40}", "");
        println!("Name:      {}", m.display_name());
        println!("Identity:  {}", m.identity);
        println!("Version:   {}", m.version);
        if let Some(latest) = m.latest_version.as_deref().filter(|_| m.has_update()) {
            println!("Latest:    {}", latest);
        }
        println!("Status:    {}", m.status);
        println!("Category:  {} (#{})", m.category, m.category_order);
        println!("Position:  {}", m.mod_order);
        if let Some(author) = &m.author {
            println!("Author:    {}", author);
        }
        if let Some(url) = &m.source_url {
            println!("Source:    {}", url);
        }
        if m.is_modpack {
            println!("Modpack:   {} manifests", m.manifest_count);
        }
        println!("Folder:    {}", m.folder_path.display());
        if let Some(description) = m.description.as_deref().filter(|d| !d.is_empty()) {
            println!("\n{}", description);
        }
        Ok(())
    }

    pub async fn cmd_set_enabled(&self, identities: &[String], enabled: bool) -> Result<()> {
        let library = self.library().await?;
        for identity in identities {
            library.mods.set_enabled(identity, enabled)?;
            println!("{}: {}", if enabled { "Enabled" } else { "Disabled" }, identity);
        }
        self.finish_change().await
    }

    pub async fn cmd_delete(&self, identity: &str) -> Result<()> {
        let library = self.library().await?;
        library.mods.delete(identity).await?;
        println!("Deleted: {}", identity);
        self.finish_change().await
    }

    pub async fn cmd_rename(&self, identity: &str, name: &str) -> Result<()> {
        let library = self.library().await?;
        library.mods.rename(identity, name)?;
        println!("Renamed {} to '{}'", identity, name.trim());
        self.finish_change().await
    }

    pub async fn cmd_category(&self, identity: &str, category: &str) -> Result<()> {
        let library = self.library().await?;
        library.mods.set_category(identity, category)?;
        println!("Moved {} to category '{}'", identity, category.trim());
        self.finish_change().await
    }

    pub async fn cmd_move(&self, identity: &str, position: i64) -> Result<()> {
        let library = self.library().await?;
        library.mods.reorder_mod(identity, position)?;
        println!("Moved {} to position {}", identity, position);
        self.finish_change().await
    }

    pub async fn cmd_move_category(&self, category: &str, position: i64) -> Result<()> {
        let library = self.library().await?;
        library.mods.reorder_category(category, position)?;
        println!("Moved category '{}' to position {}", category, position);
        self.finish_change().await
    }

    pub async fn cmd_import(&self, path: &str, category: &str) -> Result<()> {
        let library = self.library().await?;
        println!("Importing from: {}", path);
        let identity = library.mods.import(Path::new(path.trim()), category).await?;
        println!("Imported {} (disabled)", identity);
        println!("Run 'modshelf enable {}' to activate it.", identity);
        self.finish_change().await
    }

    pub async fn cmd_edit(&self, identity: &str, edit: &MetadataEdit) -> Result<()> {
        let library = self.library().await?;
        library.mods.edit_metadata(identity, edit)?;
        println!("Updated metadata of {}", identity);
        self.finish_change().await
    }

    pub async fn cmd_ignore_update(&self, identity: &str) -> Result<()> {
        let library = self.library().await?;
        library.mods.ignore_update(identity)?;
        println!("Ignoring the pending update of {}", identity);
        Ok(())
    }

    async fn finish_change(&self) -> Result<()> {
        let report = self.sync_after_change().await?;
        if !report.is_noop() {
            print_report(&report);
        }
        Ok(())
    }

    // ========== Profile Commands ==========

    pub async fn cmd_profile_list(&self) -> Result<()> {
        let profiles = self.profiles.read().await;
        println!("Profiles:");
        for (id, profile) in profiles.list() {
            let marker = if id == profiles.active() { " [active]" } else { "" };
            println!("  {} ({}){}", profile.name, id, marker);
        }
        Ok(())
    }

    pub async fn cmd_profile_create(&self, id: &str, name: Option<&str>) -> Result<()> {
        self.profiles
            .write()
            .await
            .create(id, name.unwrap_or(id))
            .await?;
        println!("Created profile: {}", id);
        println!("Run 'modshelf profile switch {}' to use it.", id);
        Ok(())
    }

    pub async fn cmd_profile_switch(&mut self, id: &str) -> Result<()> {
        self.switch_profile(id).await?;
        println!("Switched to profile: {}", id);

        if self.config.read().await.validate_game_root().is_ok() {
            let report = self.sync_after_change().await?;
            print_report(&report);
        }
        Ok(())
    }

    pub async fn cmd_profile_rename(&self, id: &str, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            bail!("Profile name cannot be empty");
        }
        self.profiles.write().await.rename(id, name).await?;
        println!("Renamed profile {} to '{}'", id, name.trim());
        Ok(())
    }

    // ========== Nexus Commands ==========

    pub async fn cmd_nexus_set_key(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            bail!("API key cannot be empty");
        }
        {
            let mut config = self.config.write().await;
            config.nexus_api_key = Some(key.to_string());
            config.save().await?;
        }
        println!("API key saved.");
        self.cmd_nexus_validate().await
    }

    pub async fn cmd_nexus_validate(&self) -> Result<()> {
        let client = self.nexus().await?;
        let status = client.validate_key().await?;
        if !status.valid {
            bail!(nexus::NexusError::InvalidKey);
        }

        println!("API key is valid.");
        if let (Some(left), Some(limit)) = (status.quota_left, status.quota_limit) {
            println!("Daily requests left: {}/{}", left, limit);
        }
        Ok(())
    }

    pub async fn cmd_nexus_fill(&self, identity: Option<&str>) -> Result<()> {
        let client = self.nexus().await?;
        let library = self.library().await?;
        let domain = library.mods.context().game_domain.clone();
        let db = library.mods.db();

        match identity {
            Some(identity) => {
                if nexus::auto_fill(&client, db, identity, &domain).await? {
                    println!("Filled metadata for {}", identity);
                } else {
                    println!("No Nexus listing found for {}", identity);
                }
            }
            None => {
                let stats = nexus::auto_fill_all(&client, db, &domain).await?;
                println!(
                    "Filled {} mods ({} without listing, {} failed)",
                    stats.filled, stats.skipped, stats.failed
                );
            }
        }
        Ok(())
    }

    pub async fn cmd_nexus_check_updates(&self) -> Result<()> {
        let client = self.nexus().await?;
        let library = self.library().await?;

        let stats = nexus::check_updates(&client, library.mods.db()).await?;
        println!("Checked {} mods, {} failed.", stats.checked, stats.failed);

        let pending = library.mods.pending_updates()?;
        if pending.is_empty() {
            println!("Everything is up to date.");
        } else {
            println!("Updates available:");
            for m in &pending {
                println!(
                    "  {} {} -> {}",
                    m.display_name(),
                    m.version,
                    m.latest_version.as_deref().unwrap_or("?")
                );
            }
            println!("Run 'modshelf update-all' to install them.");
        }
        Ok(())
    }

    // ========== Updates ==========

    pub async fn cmd_update(&self, identity: &str) -> Result<()> {
        let library = self.library().await?;
        let record = library.mods.get(identity)?;
        if !record.has_update() {
            println!("{} has no pending update. Run 'modshelf nexus check-updates' first.", identity);
            return Ok(());
        }

        let mut queue = UpdateQueue::new();
        queue.push(identity);
        self.run_updates(queue).await
    }

    pub async fn cmd_update_all(&self) -> Result<()> {
        let library = self.library().await?;
        let pending = library.mods.pending_updates()?;
        if pending.is_empty() {
            println!("No pending updates.");
            return Ok(());
        }
        self.run_updates(UpdateQueue::from_records(&pending)).await
    }

    async fn run_updates(&self, mut queue: UpdateQueue) -> Result<()> {
        let timeout = self.config.read().await.download_timeout();
        println!(
            "Updating {} mod(s). Download each file from the page that opens (waiting up to {}s each).",
            queue.len(),
            timeout.as_secs()
        );

        let processor = self.update_processor().await?;
        let outcomes = processor.run(&mut queue).await?;
        for (identity, outcome) in &outcomes {
            println!("  {}: {}", identity, outcome);
        }

        let summary = QueueSummary::from_outcomes(&outcomes);
        println!(
            "{} updated, {} timed out, {} skipped, {} failed",
            summary.updated, summary.timed_out, summary.skipped, summary.failed
        );

        if outcomes.iter().any(|(_, o)| matches!(o, UpdateOutcome::Updated(_))) {
            self.finish_change().await?;
        }
        Ok(())
    }
}

fn status_marker(m: &ModRecord) -> &'static str {
    match m.status {
        ModStatus::Enabled => "[x]",
        ModStatus::Disabled => "[ ]",
        ModStatus::Missing => "[?]",
    }
}

fn update_marker(m: &ModRecord) -> String {
    match m.latest_version.as_deref() {
        Some(latest) if m.has_update() => format!(" -> v{}", latest),
        _ => String::new(),
    }
}

fn print_report(report: &SyncReport) {
    if report.is_noop() {
        println!("Library is in sync.");
        return;
    }
    println!(
        "Synced: {} new, {} updated, {} moved, {} renamed, {} quarantined, {} missing",
        report.new_mods,
        report.updated,
        report.moved,
        report.renamed,
        report.quarantined,
        report.missing
    );
    if report.skipped > 0 {
        println!("{} step(s) skipped, see the log for details.", report.skipped);
    }
}
