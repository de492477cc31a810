//! Converge the game root, the storage root and the database
//!
//! The database decides category, order and enabled state; the filesystem
//! decides what exists. One [`Reconciler::sync`] pass rescans both roots,
//! folds the scan into the database, then moves and renames folders until
//! the layout matches. Every filesystem step checks its own preconditions
//! and is skipped (and logged) when they fail, so a pass interrupted at any
//! point is finished by the next one.

use super::layout::{self, QUARANTINE_DIR, TEMP_PREFIX};
use super::merge::{merge, MergedScan};
use super::scanner::{ScanResult, Scanner, UNKNOWN};
use crate::db::{Database, ModRecord, ModStatus, DEFAULT_CATEGORY};
use crate::error::ModError;
use crate::profiles::LibraryContext;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What one pass changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub new_mods: usize,
    pub updated: usize,
    pub quarantined: usize,
    pub moved: usize,
    pub renamed: usize,
    pub missing: usize,
    pub skipped: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.new_mods == 0
            && self.updated == 0
            && self.quarantined == 0
            && self.moved == 0
            && self.renamed == 0
            && self.missing == 0
    }
}

#[derive(Clone)]
pub struct Reconciler {
    ctx: LibraryContext,
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(ctx: LibraryContext, db: Arc<Database>) -> Self {
        Self { ctx, db }
    }

    /// Run one full reconciliation pass
    pub fn sync(&self) -> Result<SyncReport> {
        self.check_roots()?;
        let mut report = SyncReport::default();

        let bootstrap = self.db.is_empty()?;
        if bootstrap {
            tracing::info!("Empty library, registering mods found on disk");
        }

        let merged = self.scan_all(!bootstrap, &mut report);
        self.update_database(&merged, bootstrap, &mut report)?;
        self.normalize_category_orders()?;
        self.rename_category_folders(&mut report)?;

        let merged = self.scan_all(true, &mut report);
        self.refresh_paths(&merged)?;

        self.relocate(&mut report)?;
        self.relocate(&mut report)?;

        self.compact_mod_orders()?;
        self.rename_mod_folders(&mut report)?;
        self.mark_missing(&merged, &mut report)?;
        self.cleanup_category_dirs()?;

        tracing::info!(
            "Sync finished: {} new, {} updated, {} moved, {} renamed, {} quarantined, {} missing",
            report.new_mods,
            report.updated,
            report.moved,
            report.renamed,
            report.quarantined,
            report.missing
        );
        Ok(report)
    }

    fn check_roots(&self) -> Result<()> {
        if !self.ctx.game_root.is_dir() {
            return Err(ModError::Config(format!(
                "game mods directory does not exist: {}",
                self.ctx.game_root.display()
            ))
            .into());
        }
        std::fs::create_dir_all(&self.ctx.storage_root).map_err(|e| {
            ModError::Config(format!(
                "cannot create storage directory {}: {}",
                self.ctx.storage_root.display(),
                e
            ))
        })?;
        Ok(())
    }

    fn roots(&self) -> [&Path; 2] {
        [self.ctx.game_root.as_path(), self.ctx.storage_root.as_path()]
    }

    // ========== Rescan & merge ==========

    fn scan_all(&self, isolate: bool, report: &mut SyncReport) -> MergedScan {
        let game = Scanner::new(&self.ctx.game_root, &self.ctx.game_domain);
        let storage = Scanner::new(&self.ctx.storage_root, &self.ctx.game_domain);

        let mut game_scan = game.scan();
        let mut storage_scan = storage.scan();

        if isolate && !(game_scan.duplicates.is_empty() && storage_scan.duplicates.is_empty()) {
            self.isolate_duplicates(&game_scan, &self.ctx.game_root, report);
            self.isolate_duplicates(&storage_scan, &self.ctx.storage_root, report);
            game_scan = game.scan();
            storage_scan = storage.scan();
        }

        merge(&storage_scan, &game_scan)
    }

    /// Move every non-primary copy of a duplicated identity into quarantine
    fn isolate_duplicates(&self, scan: &ScanResult, root: &Path, report: &mut SyncReport) {
        let quarantine = root.join(QUARANTINE_DIR);

        for (identity, paths) in &scan.duplicates {
            let Some(primary) = scan.mods.get(identity).map(|m| &m.folder_path) else {
                continue;
            };

            for path in paths.iter().filter(|p| *p != primary) {
                if !path.exists() {
                    tracing::debug!("Duplicate of {} vanished: {}", identity, path.display());
                    report.skipped += 1;
                    continue;
                }
                if !layout::is_under_root(path, root) {
                    tracing::warn!(
                        "Duplicate of {} is outside {}, leaving it: {}",
                        identity,
                        root.display(),
                        path.display()
                    );
                    report.skipped += 1;
                    continue;
                }

                let target = quarantine.join(layout::file_name(path));
                if target.exists() {
                    tracing::warn!(
                        "Quarantine already holds {}, leaving duplicate of {} in place",
                        target.display(),
                        identity
                    );
                    report.skipped += 1;
                    continue;
                }

                match layout::move_path(path, &target) {
                    Ok(()) => {
                        tracing::info!(
                            "Quarantined duplicate of {}: {} -> {}",
                            identity,
                            path.display(),
                            target.display()
                        );
                        report.quarantined += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to quarantine {}: {:#}", path.display(), e);
                        report.skipped += 1;
                    }
                }
            }
        }
    }

    // ========== Database update ==========

    fn update_database(&self, merged: &MergedScan, bootstrap: bool, report: &mut SyncReport) -> Result<()> {
        let known = self.db.get_all()?;

        for (identity, scanned) in &merged.mods {
            match known.get(identity) {
                Some(existing) => {
                    let record = merge_known(existing, scanned);
                    if !same_tracked_fields(existing, &record) {
                        tracing::debug!("Refreshing {} from disk", identity);
                        self.db.upsert(&record)?;
                        report.updated += 1;
                    }
                }
                None => {
                    let mut record = scanned.clone();
                    record.category = DEFAULT_CATEGORY.to_string();
                    record.mod_order = crate::db::APPEND_ORDER;
                    record.category_order = if bootstrap {
                        1
                    } else {
                        match self.db.order_of_category(DEFAULT_CATEGORY)? {
                            Some(order) => order,
                            None => self.db.max_category_order()? + 1,
                        }
                    };

                    tracing::info!("New mod {} at {}", identity, record.folder_path.display());
                    self.db.upsert(&record)?;
                    report.new_mods += 1;
                }
            }
        }

        Ok(())
    }

    /// Rewrite category orders as 1..K, keeping their relative order
    fn normalize_category_orders(&self) -> Result<()> {
        let mut orders = self.db.category_orders()?;
        orders.sort_by(|(a_name, a), (b_name, b)| {
            let a = a.unwrap_or(i64::MAX);
            let b = b.unwrap_or(i64::MAX);
            a.cmp(&b).then_with(|| a_name.cmp(b_name))
        });

        let changed: Vec<(String, i64)> = orders
            .into_iter()
            .enumerate()
            .filter_map(|(idx, (category, current))| {
                let dense = idx as i64 + 1;
                (current != Some(dense)).then_some((category, dense))
            })
            .collect();

        if !changed.is_empty() {
            tracing::debug!("Renumbering {} categories", changed.len());
            self.db.set_category_orders(&changed)?;
        }
        Ok(())
    }

    /// Category label on disk mapped to its canonical order
    fn canonical_categories(&self) -> Result<BTreeMap<String, i64>> {
        Ok(self
            .db
            .category_orders()?
            .into_iter()
            .map(|(category, order)| (layout::sanitize_name(&category), order.unwrap_or(1)))
            .collect())
    }

    // ========== Category folders ==========

    fn rename_category_folders(&self, report: &mut SyncReport) -> Result<()> {
        let categories = self.canonical_categories()?;

        for root in self.roots() {
            if !root.is_dir() {
                tracing::warn!("Skipping category folders for missing root {}", root.display());
                continue;
            }

            let on_disk = category_dirs(root);
            for (label, order) in &categories {
                let expected = root.join(layout::category_dir_name(*order, label));
                if expected.is_dir() {
                    continue;
                }

                let existing = on_disk
                    .iter()
                    .find(|(_, disk_label, path)| disk_label == label && *path != expected);

                match existing {
                    Some((_, _, old)) if !expected.exists() => {
                        match std::fs::rename(old, &expected) {
                            Ok(()) => {
                                tracing::info!(
                                    "Renamed category folder {} -> {}",
                                    old.display(),
                                    expected.display()
                                );
                                report.renamed += 1;
                            }
                            Err(e) => {
                                tracing::warn!("Failed to rename {}: {}", old.display(), e);
                                report.skipped += 1;
                            }
                        }
                    }
                    Some((_, _, old)) => {
                        tracing::warn!(
                            "Cannot rename {}: {} is taken",
                            old.display(),
                            expected.display()
                        );
                        report.skipped += 1;
                    }
                    None => {
                        if let Err(e) = std::fs::create_dir_all(&expected) {
                            tracing::warn!("Failed to create {}: {}", expected.display(), e);
                            report.skipped += 1;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Point the database at where each identity was actually found
    fn refresh_paths(&self, merged: &MergedScan) -> Result<()> {
        let known = self.db.get_all()?;
        for (identity, location) in &merged.locations {
            if let Some(record) = known.get(identity) {
                if &record.folder_path != location {
                    tracing::debug!("{} now at {}", identity, location.display());
                    self.db.update_path(identity, location)?;
                }
            }
        }
        Ok(())
    }

    // ========== Relocation ==========

    fn target_dir(&self, record: &ModRecord) -> PathBuf {
        self.ctx
            .root_for(record.status.is_enabled())
            .join(layout::category_dir_name(record.category_order, &record.category))
    }

    /// Move each existing mod folder under the root and category folder
    /// its record asks for
    fn relocate(&self, report: &mut SyncReport) -> Result<()> {
        for (identity, record) in self.db.get_all()? {
            let current = &record.folder_path;
            if !current.is_dir() {
                continue;
            }

            let name = layout::file_name(current);
            let target = self.target_dir(&record).join(&name);
            if *current == target {
                continue;
            }

            let destination = if !target.exists() {
                target
            } else {
                let fallback = self
                    .ctx
                    .root_for(record.status.is_enabled())
                    .join(QUARANTINE_DIR)
                    .join(&name);
                if fallback == *current {
                    continue;
                }
                if fallback.exists() {
                    tracing::warn!(
                        "{} cannot move to {} and quarantine is taken, leaving it",
                        identity,
                        target.display()
                    );
                    report.skipped += 1;
                    continue;
                }
                tracing::warn!(
                    "{} collides at {}, quarantining instead",
                    identity,
                    target.display()
                );
                report.quarantined += 1;
                fallback
            };

            match layout::move_path(current, &destination) {
                Ok(()) => {
                    tracing::info!(
                        "Moved {}: {} -> {}",
                        identity,
                        current.display(),
                        destination.display()
                    );
                    self.db.update_path(&identity, &destination)?;
                    report.moved += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to move {}: {:#}", identity, e);
                    report.skipped += 1;
                }
            }
        }
        Ok(())
    }

    // ========== Ordering ==========

    /// Rewrite mod orders as 1..N inside every category
    fn compact_mod_orders(&self) -> Result<()> {
        let mut by_category: BTreeMap<String, Vec<ModRecord>> = BTreeMap::new();
        for record in self.db.get_all()?.into_values() {
            by_category.entry(record.category.clone()).or_default().push(record);
        }

        for mods in by_category.values_mut() {
            mods.sort_by(|a, b| {
                order_key(a)
                    .cmp(&order_key(b))
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.identity.cmp(&b.identity))
            });

            for (idx, record) in mods.iter().enumerate() {
                let dense = idx as i64 + 1;
                if record.mod_order != dense {
                    self.db.update_order(&record.identity, dense)?;
                }
            }
        }
        Ok(())
    }

    /// Rename mod folders to `NNNN_identity_name` in two phases so that
    /// swapping two orders never hits an occupied name
    fn rename_mod_folders(&self, report: &mut SyncReport) -> Result<()> {
        let mut placeholders: BTreeMap<String, PathBuf> = BTreeMap::new();

        for (identity, record) in self.db.get_all()? {
            let current = &record.folder_path;
            let Some(parent) = managed_category_dir(current) else {
                continue;
            };

            let target = parent.join(layout::leaf_name(record.mod_order, &identity, &record.name));
            if *current == target {
                continue;
            }

            let prefix = layout::temp_prefix(&identity);
            let name = layout::file_name(current);
            if name.starts_with(&prefix) {
                placeholders.insert(identity, current.clone());
                continue;
            }

            let temp = parent.join(format!("{}{}", prefix, name));
            if temp.exists() {
                tracing::warn!("Placeholder {} already exists, skipping {}", temp.display(), identity);
                report.skipped += 1;
                continue;
            }

            match std::fs::rename(current, &temp) {
                Ok(()) => {
                    self.db.update_path(&identity, &temp)?;
                    placeholders.insert(identity, temp);
                }
                Err(e) => {
                    tracing::warn!("Failed to rename {}: {}", current.display(), e);
                    report.skipped += 1;
                }
            }
        }

        for (identity, temp) in &placeholders {
            let Some(record) = self.db.get(identity)? else {
                continue;
            };
            let current = &record.folder_path;
            let Some(parent) = current.parent().filter(|_| current.is_dir()) else {
                continue;
            };

            let target = parent.join(layout::leaf_name(record.mod_order, identity, &record.name));
            if target.exists() {
                tracing::warn!("{} is taken, {} stays at {}", target.display(), identity, temp.display());
                report.skipped += 1;
                continue;
            }

            match std::fs::rename(current, &target) {
                Ok(()) => {
                    tracing::debug!("Renamed {} -> {}", current.display(), target.display());
                    self.db.update_path(identity, &target)?;
                    report.renamed += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to rename {}: {}", current.display(), e);
                    report.skipped += 1;
                }
            }
        }

        for (identity, temp) in &placeholders {
            let still_used = self
                .db
                .get(identity)?
                .map(|r| r.folder_path == *temp)
                .unwrap_or(false);
            if !still_used && temp.exists() {
                tracing::warn!("Removing leftover placeholder {}", temp.display());
                if let Err(e) = std::fs::remove_dir_all(temp) {
                    tracing::warn!("Failed to remove {}: {}", temp.display(), e);
                }
            }
        }

        Ok(())
    }

    // ========== Missing & cleanup ==========

    fn mark_missing(&self, merged: &MergedScan, report: &mut SyncReport) -> Result<()> {
        for (identity, record) in self.db.get_all()? {
            if record.status == ModStatus::Missing
                || merged.locations.contains_key(&identity)
                || record.folder_path.exists()
            {
                continue;
            }
            tracing::warn!("{} is missing (last seen at {})", identity, record.folder_path.display());
            self.db.mark_missing(&identity)?;
            report.missing += 1;
        }
        Ok(())
    }

    /// Remove empty category folders the database no longer asks for
    fn cleanup_category_dirs(&self) -> Result<()> {
        let categories = self.canonical_categories()?;

        for root in self.roots() {
            for (order, label, path) in category_dirs(root) {
                let wanted = categories.get(&label) == Some(&order);
                if wanted || !is_empty_dir(&path) {
                    continue;
                }
                match std::fs::remove_dir(&path) {
                    Ok(()) => tracing::debug!("Removed empty category folder {}", path.display()),
                    Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
        }
        Ok(())
    }
}

/// Fold a fresh scan into a known record.
///
/// Category, orders and (unless the mod was missing) status stay with the
/// database; user-visible metadata keeps the stored value unless it is blank.
fn merge_known(existing: &ModRecord, scanned: &ModRecord) -> ModRecord {
    let mut record = existing.clone();
    record.folder_path = scanned.folder_path.clone();
    if existing.status == ModStatus::Missing {
        record.status = scanned.status;
    }

    record.name = prefer_stored(&existing.name, &scanned.name);
    if !is_blank(&scanned.version) {
        record.version = scanned.version.clone();
    }
    record.author = prefer_stored_opt(&existing.author, &scanned.author);
    record.description = prefer_stored_opt(&existing.description, &scanned.description);
    record.source_url = prefer_stored_opt(&existing.source_url, &scanned.source_url);
    record.image_url = prefer_stored_opt(&existing.image_url, &scanned.image_url);
    record.manifest_count = scanned.manifest_count;
    record.is_modpack = scanned.is_modpack;
    record
}

fn same_tracked_fields(a: &ModRecord, b: &ModRecord) -> bool {
    a.name == b.name
        && a.version == b.version
        && a.author == b.author
        && a.description == b.description
        && a.folder_path == b.folder_path
        && a.status == b.status
        && a.category == b.category
        && a.source_url == b.source_url
        && a.image_url == b.image_url
        && a.manifest_count == b.manifest_count
        && a.is_modpack == b.is_modpack
}

/// Empty or the scanner's placeholder
fn is_blank(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case(UNKNOWN)
}

fn prefer_stored(stored: &str, scanned: &str) -> String {
    if is_blank(stored) && !scanned.trim().is_empty() {
        scanned.to_string()
    } else {
        stored.to_string()
    }
}

fn prefer_stored_opt(stored: &Option<String>, scanned: &Option<String>) -> Option<String> {
    match stored.as_deref() {
        Some(value) if !is_blank(value) => stored.clone(),
        _ if scanned.as_deref().is_some_and(|s| !s.trim().is_empty()) => scanned.clone(),
        _ => stored.clone(),
    }
}

fn order_key(record: &ModRecord) -> i64 {
    if record.mod_order > 0 {
        record.mod_order
    } else {
        crate::db::APPEND_ORDER
    }
}

/// Parent of a mod folder when that parent is a real category folder
fn managed_category_dir(path: &Path) -> Option<&Path> {
    if !path.is_dir() {
        return None;
    }
    let parent = path.parent()?;
    layout::parse_category_dir(&layout::file_name(parent)).map(|_| parent)
}

/// Category folders directly under a root as (order, label, path)
fn category_dirs(root: &Path) -> Vec<(i64, String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut dirs: Vec<(i64, String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let name = layout::file_name(&p);
            if name.starts_with(TEMP_PREFIX) {
                return None;
            }
            layout::parse_category_dir(&name).map(|(order, label)| (order, label, p))
        })
        .collect();
    dirs.sort();
    dirs
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
