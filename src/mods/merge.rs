//! Combine the storage and game scans into one identity map

use super::scanner::ScanResult;
use crate::db::{ModRecord, ModStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Merged view of both roots
#[derive(Debug, Default)]
pub struct MergedScan {
    pub mods: BTreeMap<String, ModRecord>,
    /// Where each identity currently lives on disk
    pub locations: BTreeMap<String, PathBuf>,
}

/// Merge scans; the copy in the game root wins over the stored one
pub fn merge(storage: &ScanResult, game: &ScanResult) -> MergedScan {
    let mut merged = MergedScan::default();

    let sources = [
        (storage, ModStatus::Disabled),
        (game, ModStatus::Enabled),
    ];

    for (scan, status) in sources {
        for (identity, record) in &scan.mods {
            if status == ModStatus::Disabled && merged.mods.contains_key(identity) {
                continue;
            }
            if let Some(previous) = merged.mods.get(identity) {
                tracing::debug!(
                    "{} exists in both roots, keeping {} over {}",
                    identity,
                    record.folder_path.display(),
                    previous.folder_path.display()
                );
            }

            let mut record = record.clone();
            record.status = status;
            merged
                .locations
                .insert(identity.clone(), record.folder_path.clone());
            merged.mods.insert(identity.clone(), record);
        }
    }

    merged
}
