//! Mod library management - scanning, layout, import and updates
//!
//! Every user action writes to the database first; the physical folders
//! are brought in line by the next [`Reconciler::sync`] pass.

mod archive;
mod import;
pub mod layout;
pub mod manifest;
mod merge;
mod reconcile;
mod scanner;
pub mod update;

pub use archive::*;
pub use import::*;
pub use merge::*;
pub use reconcile::*;
pub use scanner::*;

use crate::db::{Database, MetadataEdit, ModRecord, ModStatus};
use crate::error::ModError;
use crate::profiles::LibraryContext;
use anyhow::{bail, Result};
use std::path::Path;
use std::sync::Arc;

/// Library operations for one profile
pub struct ModManager {
    ctx: LibraryContext,
    db: Arc<Database>,
}

impl ModManager {
    pub fn new(ctx: LibraryContext, db: Arc<Database>) -> Self {
        Self { ctx, db }
    }

    pub fn context(&self) -> &LibraryContext {
        &self.ctx
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.ctx.clone(), self.db.clone())
    }

    /// All mods in display order: category, then position, then name
    pub fn list(&self) -> Result<Vec<ModRecord>> {
        let mut mods: Vec<ModRecord> = self.db.get_all()?.into_values().collect();
        mods.sort_by(|a, b| {
            a.category_order
                .cmp(&b.category_order)
                .then_with(|| a.mod_order.cmp(&b.mod_order))
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(mods)
    }

    pub fn get(&self, identity: &str) -> Result<ModRecord> {
        self.db
            .get(identity)?
            .ok_or_else(|| ModError::NotFound(identity.to_string()).into())
    }

    /// Record the wanted state; the folder moves on the next sync
    pub fn set_enabled(&self, identity: &str, enabled: bool) -> Result<()> {
        self.get(identity)?;
        let status = if enabled { ModStatus::Enabled } else { ModStatus::Disabled };
        self.db.set_status(identity, status)?;
        tracing::info!("{} marked {}", identity, status);
        Ok(())
    }

    /// Flip enabled state of several mods at once
    pub fn toggle(&self, identities: &[String]) -> Result<()> {
        for identity in identities {
            let record = self.get(identity)?;
            self.set_enabled(identity, !record.status.is_enabled())?;
        }
        Ok(())
    }

    pub fn rename(&self, identity: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Mod name cannot be empty");
        }
        self.get(identity)?;
        self.db.update_name(identity, name)
    }

    /// Move a mod to the end of another category.
    ///
    /// An existing category keeps its position; a new one goes last.
    pub fn set_category(&self, identity: &str, category: &str) -> Result<()> {
        let category = category.trim();
        if category.is_empty() {
            bail!("Category cannot be empty");
        }

        let record = self.get(identity)?;
        if record.category == category {
            return Ok(());
        }

        let category_order = match self.db.order_of_category(category)? {
            Some(order) => order,
            None => self.db.max_category_order()? + 1,
        };
        let mod_order = self.db.max_mod_order(category)? + 1;

        self.db.update_category(identity, category, Some(category_order))?;
        self.db.update_order(identity, mod_order)?;
        tracing::info!("{} moved to category '{}'", identity, category);
        Ok(())
    }

    /// Put a category at a 1-based position, shifting the others
    pub fn reorder_category(&self, category: &str, position: i64) -> Result<()> {
        let mut orders = self.db.category_orders()?;
        orders.sort_by(|(a_name, a), (b_name, b)| {
            a.unwrap_or(i64::MAX)
                .cmp(&b.unwrap_or(i64::MAX))
                .then_with(|| a_name.cmp(b_name))
        });

        let mut names: Vec<String> = orders.into_iter().map(|(name, _)| name).collect();
        let Some(current) = names.iter().position(|c| c == category) else {
            return Err(ModError::NotFound(format!("category {}", category)).into());
        };

        let moved = names.remove(current);
        let index = (position.max(1) as usize - 1).min(names.len());
        names.insert(index, moved);

        let dense: Vec<(String, i64)> = names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (name, idx as i64 + 1))
            .collect();
        self.db.set_category_orders(&dense)
    }

    /// Put a mod at a 1-based position inside its category
    pub fn reorder_mod(&self, identity: &str, position: i64) -> Result<()> {
        let record = self.get(identity)?;

        let mut siblings = self.db.get_by_category(&record.category)?;
        siblings.sort_by(|a, b| a.mod_order.cmp(&b.mod_order).then_with(|| a.name.cmp(&b.name)));

        let mut ids: Vec<String> = siblings.into_iter().map(|m| m.identity).collect();
        ids.retain(|id| id != identity);
        let index = (position.max(1) as usize - 1).min(ids.len());
        ids.insert(index, identity.to_string());

        for (idx, id) in ids.iter().enumerate() {
            self.db.update_order(id, idx as i64 + 1)?;
        }
        Ok(())
    }

    /// Remove the mod folder (best effort) and then its record
    pub async fn delete(&self, identity: &str) -> Result<()> {
        let record = self.get(identity)?;

        if record.folder_path.exists() {
            if let Err(e) = layout::remove_with_retry(
                &record.folder_path,
                self.ctx.remove_retries,
                self.ctx.remove_retry_delay,
            )
            .await
            {
                tracing::warn!("Could not remove folder of {}: {:#}", identity, e);
            }
        }

        self.db.delete(identity)?;
        tracing::info!("Deleted {}", identity);
        Ok(())
    }

    pub fn edit_metadata(&self, identity: &str, edit: &MetadataEdit) -> Result<()> {
        self.get(identity)?;

        if let Some(name) = edit.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            self.db.update_name(identity, name)?;
        }
        if let Some(version) = &edit.version {
            self.db.update_version(identity, version.trim())?;
        }
        if let Some(author) = &edit.author {
            self.db.update_author(identity, author.trim())?;
        }
        if let Some(description) = &edit.description {
            self.db.update_description(identity, description)?;
        }
        if let Some(url) = &edit.source_url {
            self.db.update_source(identity, url.trim())?;
        }
        if let Some(image) = &edit.image_url {
            self.db.update_image(identity, image.trim())?;
        }
        Ok(())
    }

    /// Forget the newer version reported for a mod
    pub fn ignore_update(&self, identity: &str) -> Result<()> {
        self.get(identity)?;
        self.db.clear_latest_version(identity)
    }

    /// Mods whose latest known version differs from the installed one
    pub fn pending_updates(&self) -> Result<Vec<ModRecord>> {
        Ok(self.list()?.into_iter().filter(has_update).collect())
    }

    pub async fn import(&self, source: &Path, category: &str) -> Result<String> {
        import_mod(&self.ctx, &self.db, source, category).await
    }
}

/// Current and latest versions are both known and differ
pub fn has_update(record: &ModRecord) -> bool {
    record.has_update()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DEFAULT_CATEGORY;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manager() -> (TempDir, ModManager) {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("Mods");
        std::fs::create_dir_all(&game).unwrap();
        let mut ctx = LibraryContext::new(game, dir.path().join("profile"));
        ctx.remove_retry_delay = Duration::from_millis(1);
        let db = Arc::new(Database::open_in_memory().unwrap());
        (dir, ModManager::new(ctx, db))
    }

    fn add(m: &ModManager, identity: &str, category: &str, category_order: i64) {
        let mut record = ModRecord::new(identity, m.context().storage_root.join(identity));
        record.name = identity.to_string();
        record.version = "1.0".into();
        record.category = category.to_string();
        record.category_order = category_order;
        m.db().upsert(&record).unwrap();
    }

    fn order_of(m: &ModManager) -> Vec<(String, i64, i64)> {
        m.list()
            .unwrap()
            .into_iter()
            .map(|r| (r.identity, r.category_order, r.mod_order))
            .collect()
    }

    #[test]
    fn list_is_in_display_order() {
        let (_dir, m) = manager();
        add(&m, "b", "maps", 2);
        add(&m, "a", DEFAULT_CATEGORY, 1);
        add(&m, "c", DEFAULT_CATEGORY, 1);

        assert_eq!(
            order_of(&m),
            vec![
                ("a".to_string(), 1, 1),
                ("c".to_string(), 1, 2),
                ("b".to_string(), 2, 1)
            ]
        );
    }

    #[test]
    fn toggle_only_writes_status() {
        let (_dir, m) = manager();
        add(&m, "a", DEFAULT_CATEGORY, 1);

        m.toggle(&["a".to_string()]).unwrap();
        let record = m.get("a").unwrap();
        assert_eq!(record.status, ModStatus::Enabled);
        assert_eq!(record.folder_path, m.context().storage_root.join("a"));

        m.set_enabled("a", false).unwrap();
        assert_eq!(m.get("a").unwrap().status, ModStatus::Disabled);

        let err = m.set_enabled("ghost", true).unwrap_err();
        assert!(matches!(err.downcast_ref::<ModError>(), Some(ModError::NotFound(_))));
    }

    #[test]
    fn category_change_appends() {
        let (_dir, m) = manager();
        add(&m, "a", DEFAULT_CATEGORY, 1);
        add(&m, "b", DEFAULT_CATEGORY, 1);
        add(&m, "c", "maps", 2);

        m.set_category("a", "maps").unwrap();
        let a = m.get("a").unwrap();
        assert_eq!((a.category.as_str(), a.category_order, a.mod_order), ("maps", 2, 2));

        m.set_category("b", "ui").unwrap();
        let b = m.get("b").unwrap();
        assert_eq!((b.category.as_str(), b.category_order, b.mod_order), ("ui", 3, 1));

        assert!(m.set_category("c", "  ").is_err());
    }

    #[test]
    fn category_reorder_shifts_others() {
        let (_dir, m) = manager();
        add(&m, "a", "first", 1);
        add(&m, "b", "second", 2);
        add(&m, "c", "third", 3);

        m.reorder_category("third", 1).unwrap();
        let orders = m.db().category_orders().unwrap();
        assert_eq!(
            orders,
            vec![
                ("first".to_string(), Some(2)),
                ("second".to_string(), Some(3)),
                ("third".to_string(), Some(1)),
            ]
        );

        m.reorder_category("third", 99).unwrap();
        assert_eq!(m.db().order_of_category("third").unwrap(), Some(3));
        assert!(m.reorder_category("nope", 1).is_err());
    }

    #[test]
    fn mod_reorder_is_remove_and_insert() {
        let (_dir, m) = manager();
        for id in ["a", "b", "c", "d"] {
            add(&m, id, DEFAULT_CATEGORY, 1);
        }

        m.reorder_mod("d", 2).unwrap();
        let ids: Vec<String> = m.list().unwrap().into_iter().map(|r| r.identity).collect();
        assert_eq!(ids, vec!["a", "d", "b", "c"]);

        m.reorder_mod("a", 0).unwrap();
        m.reorder_mod("b", 10).unwrap();
        let ids: Vec<String> = m.list().unwrap().into_iter().map(|r| r.identity).collect();
        assert_eq!(ids, vec!["a", "d", "c", "b"]);
        let orders: Vec<i64> = m.list().unwrap().into_iter().map(|r| r.mod_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
    }

    #[test]
    fn rename_and_metadata_edits() {
        let (_dir, m) = manager();
        add(&m, "a", DEFAULT_CATEGORY, 1);

        assert!(m.rename("a", "   ").is_err());
        m.rename("a", " Farm Expansion ").unwrap();

        m.edit_metadata(
            "a",
            &MetadataEdit {
                author: Some("Alice".into()),
                source_url: Some("https://www.nexusmods.com/stardewvalley/mods/1".into()),
                ..MetadataEdit::default()
            },
        )
        .unwrap();

        let record = m.get("a").unwrap();
        assert_eq!(record.name, "Farm Expansion");
        assert_eq!(record.author.as_deref(), Some("Alice"));
        assert_eq!(record.version, "1.0");
    }

    #[test]
    fn updates_can_be_ignored() {
        let (_dir, m) = manager();
        add(&m, "a", DEFAULT_CATEGORY, 1);
        m.db().update_latest_version("a", "2.0").unwrap();

        assert_eq!(m.pending_updates().unwrap().len(), 1);
        m.ignore_update("a").unwrap();
        assert!(m.pending_updates().unwrap().is_empty());
        assert!(!has_update(&m.get("a").unwrap()));
    }

    #[tokio::test]
    async fn delete_removes_folder_and_row() {
        let (_dir, m) = manager();
        add(&m, "a", DEFAULT_CATEGORY, 1);
        let folder = m.get("a").unwrap().folder_path;
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("manifest.json"), "{}").unwrap();

        m.delete("a").await.unwrap();
        assert!(!folder.exists());
        assert!(m.db().get("a").unwrap().is_none());

        add(&m, "b", DEFAULT_CATEGORY, 1);
        m.delete("b").await.unwrap();
        assert!(m.db().is_empty().unwrap());
    }
}
