//! Database record types

use rusqlite::Row;
use std::fmt;
use std::path::PathBuf;

/// Category assigned to mods the library has not seen before
pub const DEFAULT_CATEGORY: &str = "default";

/// `mod_order` sentinel meaning "append to the end of the category"
pub const APPEND_ORDER: i64 = 9999;

/// Where a mod lives, as far as the library is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModStatus {
    /// Lives under the game mods directory
    Enabled,
    /// Lives under the profile storage directory
    Disabled,
    /// Known to the database but absent from both roots at the last scan
    Missing,
}

impl ModStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModStatus::Enabled => "enabled",
            ModStatus::Disabled => "disabled",
            ModStatus::Missing => "missing",
        }
    }

    /// Parse a stored status; unknown values read as disabled
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "enabled" => ModStatus::Enabled,
            "missing" => ModStatus::Missing,
            _ => ModStatus::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ModStatus::Enabled)
    }
}

impl fmt::Display for ModStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `mods` table, keyed by identity
///
/// `category_order` and `mod_order` are owned by the ordering operations;
/// [`Database::upsert`](super::Database::upsert) never overwrites them on update.
#[derive(Debug, Clone, PartialEq)]
pub struct ModRecord {
    pub identity: String,
    pub name: String,
    pub version: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub folder_path: PathBuf,
    pub status: ModStatus,
    pub category: String,
    pub category_order: i64,
    pub mod_order: i64,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
    /// Newest version reported by the metadata service, when it differs
    pub latest_version: Option<String>,
    pub manifest_count: i64,
    pub is_modpack: bool,
    pub added_at: String,
    pub updated_at: String,
}

impl ModRecord {
    /// A fresh record in the default category, appended to its end
    pub fn new(identity: impl Into<String>, folder_path: impl Into<PathBuf>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            identity: identity.into(),
            name: String::new(),
            version: String::new(),
            author: None,
            description: None,
            folder_path: folder_path.into(),
            status: ModStatus::Disabled,
            category: DEFAULT_CATEGORY.to_string(),
            category_order: 1,
            mod_order: APPEND_ORDER,
            source_url: None,
            image_url: None,
            latest_version: None,
            manifest_count: 1,
            is_modpack: false,
            added_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        let folder_path: String = row.get("folder_path")?;
        Ok(Self {
            identity: row.get("identity")?,
            name: row.get("name")?,
            version: row.get("version")?,
            author: row.get("author")?,
            description: row.get("description")?,
            folder_path: PathBuf::from(folder_path),
            status: ModStatus::parse(&status),
            category: row.get("category")?,
            category_order: row.get("category_order")?,
            mod_order: row.get("mod_order")?,
            source_url: row.get("source_url")?,
            image_url: row.get("image_url")?,
            latest_version: row.get("latest_version")?,
            manifest_count: row.get("manifest_count")?,
            is_modpack: row.get::<_, i32>("is_modpack")? != 0,
            added_at: row.get::<_, Option<String>>("added_at")?.unwrap_or_default(),
            updated_at: row.get::<_, Option<String>>("updated_at")?.unwrap_or_default(),
        })
    }

    /// Name shown to users, falling back to the identity
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.identity
        } else {
            &self.name
        }
    }

    /// A newer version is known and differs from the installed one
    pub fn has_update(&self) -> bool {
        let current = self.version.trim();
        let latest = self.latest_version.as_deref().unwrap_or("").trim();
        !current.is_empty() && !latest.is_empty() && current != latest
    }
}

/// Metadata fields a user may edit by hand
#[derive(Debug, Clone, Default)]
pub struct MetadataEdit {
    pub name: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub image_url: Option<String>,
}
