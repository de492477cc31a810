//! Fill mod metadata and update markers from the metadata service
//!
//! These passes only touch metadata columns. Paths, status, category and
//! ordering belong to the reconciler.

use super::{MetadataService, NexusError};
use crate::db::{Database, ModRecord};
use anyhow::Result;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Numeric listing id in a source reference: `.../mods/2400`
pub fn listing_id(url: &str) -> Option<u64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"/mods/(\d+)").expect("valid regex"));
    re.captures(url)?.get(1)?.as_str().parse().ok()
}

pub fn listing_url(game_domain: &str, mod_id: u64) -> String {
    format!("https://www.nexusmods.com/{}/mods/{}", game_domain, mod_id)
}

/// Outcome of a bulk pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FillStats {
    pub filled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateStats {
    pub checked: usize,
    pub available: usize,
    pub failed: usize,
}

async fn require_valid_key(service: &dyn MetadataService) -> Result<()> {
    let status = service.validate_key().await?;
    if !status.valid {
        return Err(NexusError::InvalidKey.into());
    }
    Ok(())
}

/// Fill one mod. Returns `false` when no listing could be found for it.
pub async fn auto_fill(
    service: &dyn MetadataService,
    db: &Database,
    identity: &str,
    game_domain: &str,
) -> Result<bool> {
    require_valid_key(service).await?;
    let Some(record) = db.get(identity)? else {
        return Err(crate::error::ModError::NotFound(identity.to_string()).into());
    };
    fill_record(service, db, &record, game_domain).await
}

/// Fill every mod, skipping the ones that fail
pub async fn auto_fill_all(
    service: &dyn MetadataService,
    db: &Database,
    game_domain: &str,
) -> Result<FillStats> {
    require_valid_key(service).await?;
    let mut stats = FillStats::default();

    for (identity, record) in db.get_all()? {
        match fill_record(service, db, &record, game_domain).await {
            Ok(true) => stats.filled += 1,
            Ok(false) => stats.skipped += 1,
            Err(e) => {
                tracing::warn!("Auto-fill failed for {}: {:#}", identity, e);
                stats.failed += 1;
            }
        }
    }

    tracing::info!(
        "Auto-fill finished: {} filled, {} without listing, {} failed",
        stats.filled,
        stats.skipped,
        stats.failed
    );
    Ok(stats)
}

async fn fill_record(
    service: &dyn MetadataService,
    db: &Database,
    record: &ModRecord,
    game_domain: &str,
) -> Result<bool> {
    let identity = &record.identity;

    let mod_id = match record.source_url.as_deref().and_then(listing_id) {
        Some(id) => id,
        None => {
            let hits = service.search(record.display_name()).await?;
            let Some(hit) = hits.first() else {
                tracing::debug!("No listing found for {}", identity);
                return Ok(false);
            };
            let url = listing_url(game_domain, hit.mod_id);
            tracing::info!("Linked {} to {}", identity, url);
            db.update_source(identity, &url)?;
            hit.mod_id
        }
    };

    let info = service.fetch_by_id(mod_id).await?;

    if let Some(summary) = non_empty(&info.summary) {
        db.update_description(identity, summary)?;
    }
    if let Some(author) = non_empty(&info.author) {
        db.update_author(identity, author)?;
    }
    if let Some(version) = non_empty(&info.version) {
        db.update_version(identity, version)?;
    }
    if let Some(picture) = non_empty(&info.picture_url) {
        db.update_image(identity, picture)?;
    }

    tracing::debug!("Filled metadata for {} from listing {}", identity, mod_id);
    Ok(true)
}

/// Record the newest listed version of every linked mod
pub async fn check_updates(service: &dyn MetadataService, db: &Database) -> Result<UpdateStats> {
    require_valid_key(service).await?;
    let mut stats = UpdateStats::default();

    for (identity, record) in db.get_all()? {
        let Some(mod_id) = record.source_url.as_deref().and_then(listing_id) else {
            continue;
        };

        let info = match service.fetch_by_id(mod_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Update check failed for {}: {}", identity, e);
                stats.failed += 1;
                continue;
            }
        };
        stats.checked += 1;

        let latest = non_empty(&info.version).unwrap_or("");
        if !latest.is_empty() && latest != record.version.trim() {
            tracing::info!("{} has an update: {} -> {}", identity, record.version, latest);
            db.update_latest_version(&identity, latest)?;
            stats.available += 1;
        } else if record.latest_version.as_deref().is_some_and(|v| !v.is_empty()) {
            db.clear_latest_version(&identity)?;
        }
    }

    Ok(stats)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ModStatus;
    use crate::nexus::{KeyStatus, MockMetadataService, ModInfo, SearchHit};

    fn valid_key(service: &mut MockMetadataService) {
        service.expect_validate_key().returning(|| {
            Ok(KeyStatus {
                valid: true,
                quota_left: Some(100),
                quota_limit: Some(100),
            })
        });
    }

    fn add(db: &Database, identity: &str, name: &str, source: Option<&str>) {
        let mut record = ModRecord::new(identity, format!("/mods/{}", identity));
        record.name = name.to_string();
        record.version = "1.0".into();
        record.author = Some("Unknown".into());
        record.source_url = source.map(String::from);
        db.upsert(&record).unwrap();
    }

    fn info(version: &str) -> ModInfo {
        ModInfo {
            name: Some("Farm Expansion".into()),
            version: Some(version.into()),
            author: Some("Alice".into()),
            summary: Some("A bigger farm".into()),
            picture_url: Some("https://img/farm.png".into()),
        }
    }

    #[test]
    fn listing_ids() {
        assert_eq!(listing_id("https://www.nexusmods.com/stardewvalley/mods/2400"), Some(2400));
        assert_eq!(listing_id("https://www.nexusmods.com/stardewvalley/mods/2400?tab=files"), Some(2400));
        assert_eq!(listing_id("https://example.com/"), None);
    }

    #[tokio::test]
    async fn fill_uses_linked_listing() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "Alice.Farm", "Farm", Some("https://www.nexusmods.com/stardewvalley/mods/12"));

        let mut service = MockMetadataService::new();
        valid_key(&mut service);
        service.expect_search().never();
        service
            .expect_fetch_by_id()
            .withf(|id| *id == 12)
            .times(1)
            .returning(|_| Ok(info("1.2")));

        assert!(auto_fill(&service, &db, "Alice.Farm", "stardewvalley").await.unwrap());

        let record = db.get("Alice.Farm").unwrap().unwrap();
        assert_eq!(record.author.as_deref(), Some("Alice"));
        assert_eq!(record.description.as_deref(), Some("A bigger farm"));
        assert_eq!(record.version, "1.2");
        assert_eq!(record.image_url.as_deref(), Some("https://img/farm.png"));
        assert_eq!(record.name, "Farm");
        assert_eq!(record.status, ModStatus::Disabled);
        assert_eq!(record.mod_order, 1);
    }

    #[tokio::test]
    async fn fill_searches_and_links_when_unlinked() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "Alice.Farm", "Farm Expansion", None);

        let mut service = MockMetadataService::new();
        valid_key(&mut service);
        service
            .expect_search()
            .withf(|keyword: &str| keyword == "Farm Expansion")
            .returning(|_| {
                Ok(vec![SearchHit {
                    mod_id: 77,
                    name: Some("Farm Expansion".into()),
                }])
            });
        service.expect_fetch_by_id().returning(|_| Ok(info("1.0")));

        assert!(auto_fill(&service, &db, "Alice.Farm", "stardewvalley").await.unwrap());
        assert_eq!(
            db.get("Alice.Farm").unwrap().unwrap().source_url.as_deref(),
            Some("https://www.nexusmods.com/stardewvalley/mods/77")
        );
    }

    #[tokio::test]
    async fn invalid_key_stops_before_any_write() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "Alice.Farm", "Farm", None);

        let mut service = MockMetadataService::new();
        service
            .expect_validate_key()
            .returning(|| Ok(KeyStatus::default()));
        service.expect_search().never();

        let err = auto_fill_all(&service, &db, "stardewvalley").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<NexusError>(), Some(NexusError::InvalidKey)));

        let err = check_updates(&service, &db).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<NexusError>(), Some(NexusError::InvalidKey)));
    }

    #[tokio::test]
    async fn bulk_fill_skips_failures() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "A.Good", "Good", Some("https://www.nexusmods.com/stardewvalley/mods/1"));
        add(&db, "B.Gone", "Gone", Some("https://www.nexusmods.com/stardewvalley/mods/2"));
        add(&db, "C.Unlisted", "Unlisted", None);

        let mut service = MockMetadataService::new();
        valid_key(&mut service);
        service.expect_search().returning(|_| Ok(Vec::new()));
        service.expect_fetch_by_id().returning(|id| match id {
            1 => Ok(info("1.0")),
            _ => Err(NexusError::Status(404)),
        });

        let stats = auto_fill_all(&service, &db, "stardewvalley").await.unwrap();
        assert_eq!(
            stats,
            FillStats {
                filled: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(db.get("A.Good").unwrap().unwrap().author.as_deref(), Some("Alice"));
        assert_eq!(db.get("B.Gone").unwrap().unwrap().author.as_deref(), Some("Unknown"));
    }

    #[tokio::test]
    async fn update_check_sets_and_clears_markers() {
        let db = Database::open_in_memory().unwrap();
        add(&db, "A.Old", "Old", Some("https://www.nexusmods.com/stardewvalley/mods/1"));
        add(&db, "B.Current", "Current", Some("https://www.nexusmods.com/stardewvalley/mods/2"));
        add(&db, "C.Local", "Local", None);
        db.update_latest_version("B.Current", "0.9").unwrap();

        let mut service = MockMetadataService::new();
        valid_key(&mut service);
        service.expect_fetch_by_id().returning(|id| match id {
            1 => Ok(info("1.1")),
            _ => Ok(info("1.0")),
        });

        let stats = check_updates(&service, &db).await.unwrap();
        assert_eq!(stats.checked, 2);
        assert_eq!(stats.available, 1);

        let old = db.get("A.Old").unwrap().unwrap();
        assert_eq!(old.latest_version.as_deref(), Some("1.1"));
        assert!(old.has_update());
        assert_eq!(old.version, "1.0");
        assert!(!db.get("B.Current").unwrap().unwrap().has_update());
        assert!(!db.get("C.Local").unwrap().unwrap().has_update());
    }
}
