//! Works through an [`UpdateQueue`] one mod at a time

use super::{QueueSummary, UpdateOutcome, UpdateQueue};
use crate::db::Database;
use crate::error::ModError;
use crate::mods::update::{self, Browser};
use crate::profiles::LibraryContext;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The single coordinator of an update run
pub struct UpdateProcessor {
    ctx: LibraryContext,
    db: Arc<Database>,
    browser: Arc<dyn Browser>,
    downloads_dir: PathBuf,
    timeout: Duration,
}

impl UpdateProcessor {
    pub fn new(
        ctx: LibraryContext,
        db: Arc<Database>,
        browser: Arc<dyn Browser>,
        downloads_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            ctx,
            db,
            browser,
            downloads_dir,
            timeout,
        }
    }

    /// Drain the queue, returning what happened to each identity in order
    pub async fn run(&self, queue: &mut UpdateQueue) -> Result<Vec<(String, UpdateOutcome)>> {
        let mut outcomes = Vec::with_capacity(queue.len());

        while let Some(identity) = queue.next() {
            tracing::info!("Updating {} ({} left)", identity, queue.len());
            let outcome = self.process(&identity).await?;
            tracing::info!("{}: {}", identity, outcome);
            outcomes.push((identity, outcome));
        }

        let summary = QueueSummary::from_outcomes(&outcomes);
        tracing::info!(
            "Update run finished: {} updated, {} timed out, {} skipped, {} failed",
            summary.updated,
            summary.timed_out,
            summary.skipped,
            summary.failed
        );
        Ok(outcomes)
    }

    async fn process(&self, identity: &str) -> Result<UpdateOutcome> {
        let Some(record) = self.db.get(identity)? else {
            return Ok(UpdateOutcome::Skipped("not in library".into()));
        };
        if !record.has_update() {
            return Ok(UpdateOutcome::Skipped("already up to date".into()));
        }
        if record.source_url.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Ok(UpdateOutcome::Skipped("no listing".into()));
        }

        let result = update::start_update(
            &self.ctx,
            &self.db,
            self.browser.as_ref(),
            identity,
            &self.downloads_dir,
            self.timeout,
        )
        .await;

        Ok(match result {
            Ok(version) => UpdateOutcome::Updated(version),
            Err(e) if matches!(e.downcast_ref::<ModError>(), Some(ModError::DownloadTimeout(_))) => {
                UpdateOutcome::TimedOut
            }
            Err(e) => UpdateOutcome::Failed(format!("{:#}", e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ModRecord, ModStatus};
    use crate::mods::update::MockBrowser;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn installed(db: &Database, root: &Path, identity: &str, name: &str, latest: Option<&str>) {
        let folder = root.join(identity);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("manifest.json"), format!(r#"{{"UniqueID":"{}"}}"#, identity))
            .unwrap();

        let mut record = ModRecord::new(identity, &folder);
        record.name = name.into();
        record.version = "1.0".into();
        record.status = ModStatus::Enabled;
        record.source_url = Some(format!("https://www.nexusmods.com/stardewvalley/mods/{}", name.len()));
        record.latest_version = latest.map(String::from);
        db.upsert(&record).unwrap();
    }

    fn write_zip(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("Farm/manifest.json", options).unwrap();
        zip.write_all(br#"{"UniqueID":"Alice.Farm","Version":"1.1"}"#).unwrap();
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn processes_queue_in_order() {
        let dir = TempDir::new().unwrap();
        let game = dir.path().join("Mods");
        let downloads = dir.path().join("Downloads");
        std::fs::create_dir_all(&downloads).unwrap();

        let mut ctx = LibraryContext::new(&game, dir.path().join("profile"));
        ctx.remove_retry_delay = Duration::from_millis(1);
        let db = Arc::new(Database::open_in_memory().unwrap());

        installed(&db, &game, "Alice.Farm", "Farm Expansion", Some("1.1"));
        installed(&db, &game, "Bob.Tools", "Tools", Some("2.0"));
        installed(&db, &game, "Carl.Fresh", "Fresh", None);
        write_zip(&downloads.join("Farm Expansion-4-1-1.zip"));

        let mut browser = MockBrowser::new();
        browser.expect_open().times(2).returning(|_| Ok(()));

        let mut queue = UpdateQueue::from_records(&db.get_all().unwrap().into_values().collect::<Vec<_>>());
        queue.push("Carl.Fresh");
        queue.push("Ghost.Mod");

        let processor = UpdateProcessor::new(ctx, db.clone(), Arc::new(browser), downloads, Duration::ZERO);
        let outcomes = processor.run(&mut queue).await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(
            outcomes,
            vec![
                ("Alice.Farm".to_string(), UpdateOutcome::Updated("1.1".into())),
                ("Bob.Tools".to_string(), UpdateOutcome::TimedOut),
                ("Carl.Fresh".to_string(), UpdateOutcome::Skipped("already up to date".into())),
                ("Ghost.Mod".to_string(), UpdateOutcome::Skipped("not in library".into())),
            ]
        );

        let summary = QueueSummary::from_outcomes(&outcomes);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.total(), 4);
        assert_eq!(db.get("Bob.Tools").unwrap().unwrap().version, "1.0");
        assert!(!db.get("Alice.Farm").unwrap().unwrap().has_update());
    }
}
