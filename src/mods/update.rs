//! Replace a mod's contents with a newly downloaded archive
//!
//! Nexus does not allow free accounts to download through the API, so the
//! flow opens the listing's files page, waits for the browser to drop the
//! archive into the downloads directory, then swaps the folder contents.

use super::archive;
use super::layout;
use super::scanner::Scanner;
use crate::db::{Database, ModRecord};
use crate::error::ModError;
use crate::profiles::LibraryContext;
use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Sidecar suffixes browsers use while a download is in progress
pub const IN_PROGRESS_SUFFIXES: [&str; 3] = [".crdownload", ".part", ".download"];

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Opens URLs for the user
#[cfg_attr(test, mockall::automock)]
pub trait Browser: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// The desktop's default browser
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        open::that(url).with_context(|| format!("Failed to open {}", url))
    }
}

/// Files tab of a listing URL
pub fn files_page_url(source_url: &str) -> String {
    if source_url.contains("?tab=files") {
        source_url.to_string()
    } else {
        format!("{}?tab=files", source_url.trim_end_matches('/'))
    }
}

/// Open the files page, wait for the download and install it.
///
/// On timeout nothing is changed and [`ModError::DownloadTimeout`] is returned.
/// Returns the installed version.
pub async fn start_update(
    ctx: &LibraryContext,
    db: &Database,
    browser: &dyn Browser,
    identity: &str,
    downloads_dir: &Path,
    timeout: Duration,
) -> Result<String> {
    let record = db
        .get(identity)?
        .ok_or_else(|| ModError::NotFound(identity.to_string()))?;

    let Some(source) = record.source_url.as_deref().filter(|s| !s.trim().is_empty()) else {
        bail!("{} has no listing to download an update from", identity);
    };

    browser.open(&files_page_url(source))?;

    let archive = wait_for_download(downloads_dir, record.display_name(), timeout)
        .await
        .ok_or_else(|| ModError::DownloadTimeout(record.display_name().to_string()))?;

    apply_update(ctx, db, &record, &archive).await
}

/// Install `archive` over the record's folder and record the new version
pub async fn apply_update(
    ctx: &LibraryContext,
    db: &Database,
    record: &ModRecord,
    archive: &Path,
) -> Result<String> {
    replace_mod_contents(archive, &record.folder_path).await?;

    let version = match record.latest_version.as_deref().map(str::trim) {
        Some(latest) if !latest.is_empty() => latest.to_string(),
        _ => Scanner::new(&ctx.storage_root, &ctx.game_domain)
            .inspect(&record.folder_path)
            .map(|m| m.version)
            .unwrap_or_else(|| record.version.clone()),
    };

    db.update_version(&record.identity, &version)?;
    db.clear_latest_version(&record.identity)?;

    if let Err(e) = layout::remove_with_retry(archive, ctx.remove_retries, ctx.remove_retry_delay).await {
        tracing::warn!("Update installed but the archive could not be removed: {:#}", e);
    }

    tracing::info!("Updated {} to {}", record.identity, version);
    Ok(version)
}

/// Extract `archive` next to itself and swap the result into `target`
pub async fn replace_mod_contents(archive: &Path, target: &Path) -> Result<()> {
    let staging = with_suffix(archive, "_tmp");
    if staging.exists() {
        tokio::fs::remove_dir_all(&staging).await?;
    }

    archive::extract_archive(archive, &staging).await?;
    let result = archive::extracted_root(&staging).and_then(|root| swap_in(&root, target));

    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        tracing::debug!("Failed to remove {}: {}", staging.display(), e);
    }
    result
}

/// Move `new_root` to `target`, keeping the old folder as a backup until
/// the move has succeeded. On failure the backup is put back.
pub fn swap_in(new_root: &Path, target: &Path) -> Result<()> {
    let backup = with_suffix(target, "_backup");
    if backup.exists() {
        bail!("Backup folder already exists: {}", backup.display());
    }

    if target.exists() {
        layout::move_path(target, &backup)
            .with_context(|| format!("Failed to back up {}", target.display()))?;
    }

    if let Err(e) = layout::move_path(new_root, target) {
        tracing::warn!("Installing into {} failed, restoring backup", target.display());
        if backup.exists() {
            if target.exists() {
                std::fs::remove_dir_all(target).ok();
            }
            layout::move_path(&backup, target)
                .with_context(|| format!("Failed to restore {}", target.display()))?;
        }
        return Err(e.context("Failed to move the new contents into place"));
    }

    if backup.exists() {
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            tracing::warn!("Failed to remove backup {}: {}", backup.display(), e);
        }
    }
    Ok(())
}

/// Poll `dir` until a finished zip for `mod_name` shows up
pub async fn wait_for_download(dir: &Path, mod_name: &str, timeout: Duration) -> Option<PathBuf> {
    poll_for_download(dir, mod_name, timeout, POLL_INTERVAL).await
}

async fn poll_for_download(
    dir: &Path,
    mod_name: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<PathBuf> {
    tracing::info!("Waiting for a download of '{}' in {}", mod_name, dir.display());

    // File timestamps come from a coarse clock
    let since = SystemTime::now() - Duration::from_secs(2);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match find_download(dir, mod_name, since) {
            Ok(Some(path)) => {
                tracing::info!("Found download {}", path.display());
                return Some(path);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Cannot read downloads directory: {:#}", e);
                return None;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Timed out waiting for a download of '{}'", mod_name);
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

/// One look at the downloads directory.
///
/// Only finished zips modified after `since` count. A zip whose name
/// contains `mod_name` wins; otherwise the newest one is taken.
pub fn find_download(dir: &Path, mod_name: &str, since: SystemTime) -> Result<Option<PathBuf>> {
    let wanted = mod_name.trim().to_lowercase();
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        let name = layout::file_name(&path).to_lowercase();
        if !name.ends_with(".zip") || !path.is_file() {
            continue;
        }
        if IN_PROGRESS_SUFFIXES
            .iter()
            .any(|suffix| with_suffix(&path, suffix).exists())
        {
            continue;
        }

        let modified = path.metadata()?.modified()?;
        if modified < since {
            continue;
        }

        if !wanted.is_empty() && name.contains(&wanted) {
            return Ok(Some(path));
        }
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModStatus;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, manifest: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("Farm Expansion/manifest.json", options).unwrap();
        zip.write_all(manifest.as_bytes()).unwrap();
        zip.start_file("Farm Expansion/new.txt", options).unwrap();
        zip.write_all(b"new").unwrap();
        zip.finish().unwrap();
    }

    fn installed_mod(root: &Path) -> PathBuf {
        let target = root.join("0001_Alice.Farm_Farm Expansion");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("manifest.json"), r#"{"UniqueID":"Alice.Farm","Version":"1.0"}"#)
            .unwrap();
        std::fs::write(target.join("old.txt"), "old").unwrap();
        target
    }

    #[test]
    fn swap_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let target = installed_mod(dir.path());
        let fresh = dir.path().join("fresh");
        std::fs::create_dir_all(&fresh).unwrap();
        std::fs::write(fresh.join("new.txt"), "new").unwrap();

        swap_in(&fresh, &target).unwrap();

        assert!(target.join("new.txt").is_file());
        assert!(!target.join("old.txt").exists());
        assert!(!with_suffix(&target, "_backup").exists());
        assert!(!fresh.exists());
    }

    #[test]
    fn failed_swap_restores_original() {
        let dir = TempDir::new().unwrap();
        let target = installed_mod(dir.path());

        let err = swap_in(&dir.path().join("does-not-exist"), &target);
        assert!(err.is_err());

        assert_eq!(std::fs::read_to_string(target.join("old.txt")).unwrap(), "old");
        assert!(target.join("manifest.json").is_file());
        assert!(!with_suffix(&target, "_backup").exists());
    }

    #[test]
    fn swap_refuses_to_clobber_a_backup() {
        let dir = TempDir::new().unwrap();
        let target = installed_mod(dir.path());
        std::fs::create_dir_all(with_suffix(&target, "_backup")).unwrap();
        let fresh = dir.path().join("fresh");
        std::fs::create_dir_all(&fresh).unwrap();

        assert!(swap_in(&fresh, &target).is_err());
        assert!(target.join("old.txt").is_file());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn replace_from_zip_cleans_up() {
        let dir = TempDir::new().unwrap();
        let target = installed_mod(dir.path());
        let archive = dir.path().join("Farm Expansion-1-1-1.zip");
        write_zip(&archive, r#"{"UniqueID":"Alice.Farm","Version":"1.1"}"#);

        replace_mod_contents(&archive, &target).await.unwrap();

        assert!(target.join("new.txt").is_file());
        assert!(!target.join("old.txt").exists());
        assert!(!with_suffix(&archive, "_tmp").exists());
    }

    #[test]
    fn download_detection() {
        let dir = TempDir::new().unwrap();
        let earlier = SystemTime::now() - Duration::from_secs(30);

        std::fs::write(dir.path().join("Other Mod-9-1-0.zip"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(
            find_download(dir.path(), "Farm Expansion", earlier).unwrap(),
            Some(dir.path().join("Other Mod-9-1-0.zip"))
        );

        let wanted = dir.path().join("Farm Expansion-1-1-1.zip");
        std::fs::write(&wanted, "x").unwrap();
        std::fs::write(with_suffix(&wanted, ".crdownload"), "x").unwrap();
        assert_eq!(
            find_download(dir.path(), "Farm Expansion", earlier).unwrap(),
            Some(dir.path().join("Other Mod-9-1-0.zip"))
        );

        std::fs::remove_file(with_suffix(&wanted, ".crdownload")).unwrap();
        assert_eq!(find_download(dir.path(), "farm expansion", earlier).unwrap(), Some(wanted));

        let later = SystemTime::now() + Duration::from_secs(60);
        assert_eq!(find_download(dir.path(), "Farm Expansion", later).unwrap(), None);
    }

    #[tokio::test]
    async fn waiting_times_out() {
        let dir = TempDir::new().unwrap();
        let found = poll_for_download(
            dir.path(),
            "Farm Expansion",
            Duration::from_millis(30),
            Duration::from_millis(10),
        )
        .await;
        assert!(found.is_none());
    }

    fn library(dir: &Path) -> (LibraryContext, Database, PathBuf) {
        let game = dir.join("Mods");
        std::fs::create_dir_all(&game).unwrap();
        let ctx = LibraryContext::new(&game, dir.join("profile"));
        let db = Database::open_in_memory().unwrap();

        let target = installed_mod(&game);
        let mut record = ModRecord::new("Alice.Farm", &target);
        record.name = "Farm Expansion".into();
        record.version = "1.0".into();
        record.status = ModStatus::Enabled;
        record.source_url = Some("https://www.nexusmods.com/stardewvalley/mods/1".into());
        record.latest_version = Some("1.1".into());
        db.upsert(&record).unwrap();

        (ctx, db, target)
    }

    #[tokio::test]
    async fn full_update_flow() {
        let dir = TempDir::new().unwrap();
        let (mut ctx, db, target) = library(dir.path());
        ctx.remove_retry_delay = Duration::from_millis(1);

        let downloads = dir.path().join("Downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        let archive = downloads.join("Farm Expansion-1-1-1.zip");
        write_zip(&archive, r#"{"UniqueID":"Alice.Farm","Version":"1.1"}"#);

        let mut browser = MockBrowser::new();
        browser
            .expect_open()
            .withf(|url: &str| url == "https://www.nexusmods.com/stardewvalley/mods/1?tab=files")
            .times(1)
            .returning(|_| Ok(()));

        let version = start_update(&ctx, &db, &browser, "Alice.Farm", &downloads, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(version, "1.1");
        let stored = db.get("Alice.Farm").unwrap().unwrap();
        assert_eq!(stored.version, "1.1");
        assert!(!stored.has_update());
        assert!(target.join("new.txt").is_file());
        assert!(!archive.exists());
    }

    #[tokio::test]
    async fn timeout_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (ctx, db, target) = library(dir.path());
        let downloads = dir.path().join("Downloads");
        std::fs::create_dir_all(&downloads).unwrap();

        let mut browser = MockBrowser::new();
        browser.expect_open().returning(|_| Ok(()));

        let err = start_update(&ctx, &db, &browser, "Alice.Farm", &downloads, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ModError>(), Some(ModError::DownloadTimeout(_))));

        let stored = db.get("Alice.Farm").unwrap().unwrap();
        assert_eq!(stored.version, "1.0");
        assert!(stored.has_update());
        assert!(target.join("old.txt").is_file());
    }

    #[test]
    fn files_page() {
        assert_eq!(
            files_page_url("https://www.nexusmods.com/stardewvalley/mods/1/"),
            "https://www.nexusmods.com/stardewvalley/mods/1?tab=files"
        );
        assert_eq!(files_page_url("https://x/mods/1?tab=files"), "https://x/mods/1?tab=files");
    }
}
