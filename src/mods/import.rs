//! Add a mod from a folder or archive into profile storage

use super::archive;
use super::layout;
use super::scanner::{Scanner, FALLBACK_PREFIX};
use crate::db::{Database, ModStatus, DEFAULT_CATEGORY};
use crate::error::ModError;
use crate::profiles::LibraryContext;
use anyhow::{bail, Context, Result};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Copy or extract `source` into the storage root and register it disabled.
///
/// The new record goes to the end of `category`. Nothing is written to the
/// database when no identity can be read; the copied files are removed.
/// Returns the mod identity; the caller runs a sync to place the folder.
pub async fn import_mod(
    ctx: &LibraryContext,
    db: &Database,
    source: &Path,
    category: &str,
) -> Result<String> {
    if !source.exists() {
        bail!("Import source does not exist: {}", source.display());
    }
    tokio::fs::create_dir_all(&ctx.storage_root)
        .await
        .context("Failed to create storage directory")?;

    let installed = if archive::is_archive(source) {
        unpack_archive(&ctx.storage_root, source).await?
    } else if source.is_dir() {
        copy_folder(&ctx.storage_root, source).await?
    } else {
        bail!("Not a folder or supported archive: {}", source.display());
    };

    match register(ctx, db, source, &installed, category) {
        Ok(identity) => {
            tracing::info!("Imported {} into {}", identity, installed.display());
            Ok(identity)
        }
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&installed).await {
                tracing::warn!("Failed to remove {}: {}", installed.display(), cleanup);
            }
            Err(e)
        }
    }
}

fn register(
    ctx: &LibraryContext,
    db: &Database,
    source: &Path,
    installed: &Path,
    category: &str,
) -> Result<String> {
    let scanner = Scanner::new(&ctx.storage_root, &ctx.game_domain);
    let mut record = match scanner.inspect(installed) {
        Some(record) if !record.identity.starts_with(FALLBACK_PREFIX) => record,
        _ => return Err(ModError::Identity(source.to_path_buf()).into()),
    };

    if db.get(&record.identity)?.is_some() {
        return Err(ModError::AlreadyInstalled(record.identity).into());
    }

    let category = match category.trim() {
        "" => DEFAULT_CATEGORY,
        c => c,
    };

    record.status = ModStatus::Disabled;
    record.category = category.to_string();
    record.category_order = match db.order_of_category(category)? {
        Some(order) => order,
        None => db.max_category_order()? + 1,
    };
    record.mod_order = db.max_mod_order(category)? + 1;
    if record.source_url.is_none() {
        record.source_url = nexus_id_from_filename(&layout::file_name(source))
            .map(|id| format!("https://www.nexusmods.com/{}/mods/{}", ctx.game_domain, id));
    }

    db.upsert(&record)?;
    Ok(record.identity)
}

async fn copy_folder(storage: &Path, source: &Path) -> Result<PathBuf> {
    let dest = layout::unique_child(storage, &layout::sanitize_name(&layout::file_name(source)));
    let (src, dst) = (source.to_path_buf(), dest.clone());
    tokio::task::spawn_blocking(move || layout::copy_dir(&src, &dst))
        .await
        .context("Copy task panicked")??;
    Ok(dest)
}

async fn unpack_archive(storage: &Path, source: &Path) -> Result<PathBuf> {
    let staging = layout::unique_child(storage, ".import");
    archive::extract_archive(source, &staging).await?;

    let root = archive::extracted_root(&staging)?;
    let name = if root == staging {
        source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    } else {
        layout::file_name(&root)
    };

    let dest = layout::unique_child(storage, &layout::sanitize_name(&name));
    layout::move_path(&root, &dest)?;
    if staging.exists() {
        tokio::fs::remove_dir_all(&staging).await.ok();
    }
    Ok(dest)
}

/// Nexus listing id from a downloaded file name: `Farm Expansion-1234-1-0.zip`
pub fn nexus_id_from_filename(name: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"-(\d+)-\d").expect("valid regex"));
    re.captures(name).map(|c| c[1].to_string())
}
