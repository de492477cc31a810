//! Discover mods under one root directory
//!
//! A root holds mod folders directly or inside category folders
//! (`NN_label`). Anything with a `manifest.json` somewhere beneath it is a
//! mod. Scanning never modifies the filesystem.

use super::layout::{self, QUARANTINE_DIR};
use super::manifest::Manifest;
use crate::db::{ModRecord, ModStatus};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

/// Placeholder for metadata the manifest did not provide
pub const UNKNOWN: &str = "Unknown";

/// Result of scanning one root
#[derive(Debug, Default)]
pub struct ScanResult {
    /// One record per identity, `folder_path` set to the primary location
    pub mods: BTreeMap<String, ModRecord>,
    /// Every contributing path for identities found more than once
    pub duplicates: BTreeMap<String, Vec<PathBuf>>,
}

pub struct Scanner {
    root: PathBuf,
    game_domain: String,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, game_domain: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            game_domain: game_domain.into(),
        }
    }

    pub fn scan(&self) -> ScanResult {
        let mut candidates: BTreeMap<String, Vec<ModRecord>> = BTreeMap::new();

        if !self.root.is_dir() {
            tracing::warn!("Mods root does not exist: {}", self.root.display());
            return ScanResult::default();
        }

        for entry in sorted_subdirs(&self.root) {
            let name = layout::file_name(&entry);
            if name == QUARANTINE_DIR {
                continue;
            }

            if layout::parse_category_dir(&name).is_some() {
                tracing::trace!("Entering category folder {}", name);
                for child in sorted_subdirs(&entry) {
                    self.scan_candidate(&child, &mut candidates);
                }
            } else {
                self.scan_candidate(&entry, &mut candidates);
            }
        }

        let mut result = ScanResult::default();
        for (identity, records) in candidates {
            let paths: Vec<PathBuf> = records.iter().map(|r| r.folder_path.clone()).collect();
            let primary = pick_primary(&paths);

            let Some(mut chosen) = records.into_iter().find(|r| r.folder_path == primary) else {
                continue;
            };
            chosen.folder_path = primary;

            if paths.len() > 1 {
                let mut sorted = paths;
                sorted.sort();
                tracing::warn!("Duplicate identity {} at {} locations", identity, sorted.len());
                result.duplicates.insert(identity.clone(), sorted);
            }
            result.mods.insert(identity, chosen);
        }

        tracing::debug!(
            "Scanned {}: {} mods, {} duplicated",
            self.root.display(),
            result.mods.len(),
            result.duplicates.len()
        );
        result
    }

    /// Read one candidate folder; `None` when it holds no manifest
    pub fn inspect(&self, dir: &Path) -> Option<ModRecord> {
        let manifests = find_manifests(dir);
        if manifests.is_empty() {
            tracing::trace!("Skipping {} (no manifest)", dir.display());
            return None;
        }

        let parsed = manifests.iter().find_map(|path| Manifest::load(path));
        Some(self.build_record(dir, manifests.len(), parsed))
    }

    fn scan_candidate(&self, dir: &Path, candidates: &mut BTreeMap<String, Vec<ModRecord>>) {
        let Some(record) = self.inspect(dir) else {
            return;
        };

        tracing::trace!(
            "Found {} at {} ({} manifests)",
            record.identity,
            dir.display(),
            record.manifest_count
        );
        candidates
            .entry(record.identity.clone())
            .or_default()
            .push(record);
    }

    fn build_record(&self, dir: &Path, manifest_count: usize, parsed: Option<Manifest>) -> ModRecord {
        let base = layout::file_name(dir);
        let manifest = parsed.unwrap_or_default();

        let (identity, base_name) = match manifest.unique_id.clone() {
            Some(identity) => (identity, base.clone()),
            None => renamed_fallback(&base)
                .unwrap_or_else(|| (fallback_identity(&base), base.clone())),
        };

        let mut record = ModRecord::new(identity, dir);
        record.name = manifest.name.clone().unwrap_or(base_name);
        record.version = manifest.version.clone().unwrap_or_else(|| UNKNOWN.to_string());
        record.author = Some(manifest.author.clone().unwrap_or_else(|| UNKNOWN.to_string()));
        record.description = Some(manifest.description.clone().unwrap_or_default());
        record.source_url = manifest.nexus_url(&self.game_domain);
        record.manifest_count = manifest_count as i64;
        record.is_modpack = manifest_count > 1;
        record.status = ModStatus::Enabled;
        record
    }
}

/// Marks identities synthesized from a folder name
pub const FALLBACK_PREFIX: &str = "broken::";

/// Synthetic identity for a mod whose manifest could not be read
pub fn fallback_identity(base_name: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(base_name.as_bytes()));
    format!("{}{}", FALLBACK_PREFIX, &digest[..12])
}

/// Identity and original name of a fallback mod whose folder was already
/// laid out: `0003_broken__<hash>_<name>` or its rename placeholder
fn renamed_fallback(base: &str) -> Option<(String, String)> {
    static LEAF: OnceLock<Regex> = OnceLock::new();
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let leaf = LEAF.get_or_init(|| {
        Regex::new(r"^\d{4,}_broken__([0-9a-f]{12})_(.+)$").expect("valid regex")
    });
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"^__tmp__broken__([0-9a-f]{12})__(.+)$").expect("valid regex")
    });

    if let Some(caps) = placeholder.captures(base) {
        let rest = &caps[2];
        let name = leaf
            .captures(rest)
            .map(|c| c[2].to_string())
            .unwrap_or_else(|| rest.to_string());
        return Some((format!("{}{}", FALLBACK_PREFIX, &caps[1]), name));
    }
    leaf.captures(base)
        .map(|c| (format!("{}{}", FALLBACK_PREFIX, &c[1]), c[2].to_string()))
}

/// Whether a folder name looks like an OS-made copy: `Mod (1)`, `Mod - Copy`
pub fn has_copy_marker(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(\(\d+\)|（\d+）|(^|[\s_-])copy)$").expect("valid regex")
    });
    re.is_match(name.trim())
}

/// Primary location among duplicates: no copy marker, then shortest, then lexicographic
pub fn pick_primary(paths: &[PathBuf]) -> PathBuf {
    paths
        .iter()
        .min_by_key(|p| {
            let text = p.to_string_lossy().to_string();
            (
                has_copy_marker(&layout::file_name(p)),
                text.chars().count(),
                text.to_lowercase(),
            )
        })
        .cloned()
        .unwrap_or_default()
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    dirs.sort();
    dirs
}

fn find_manifests(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case("manifest.json"))
        .map(|e| e.into_path())
        .collect()
}
