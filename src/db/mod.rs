//! SQLite store for the mod library
//!
//! One database per profile. The `mods` table is keyed by mod identity and is
//! the single source of truth for category, ordering and enabled state.

mod schema;

pub use schema::*;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Database wrapper with thread-safe access
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;
        tracing::debug!("Opened mod database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        db.migrate_mod_columns()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mods (
                identity TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT '',
                author TEXT,
                description TEXT,
                folder_path TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'disabled',
                category TEXT NOT NULL DEFAULT 'default',
                category_order INTEGER NOT NULL DEFAULT 1,
                mod_order INTEGER NOT NULL DEFAULT 1,
                source_url TEXT,
                image_url TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_mods_category ON mods(category);

            -- Migration version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                migration_name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Add columns introduced after the first release; existing rows keep their data
    fn migrate_mod_columns(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let migration_name = "mods_extra_columns_v1";
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_version WHERE migration_name = ?1",
                params![migration_name],
                |row| {
                    let count: i64 = row.get(0)?;
                    Ok(count > 0)
                },
            )
            .unwrap_or(false);

        if already_applied {
            return Ok(());
        }

        let columns_to_add = [
            ("latest_version", "TEXT"),
            ("manifest_count", "INTEGER NOT NULL DEFAULT 1"),
            ("is_modpack", "INTEGER NOT NULL DEFAULT 0"),
            ("added_at", "TEXT"),
            ("updated_at", "TEXT"),
        ];

        for (column_name, column_type) in columns_to_add {
            let has_column: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM pragma_table_info('mods') WHERE name=?1",
                    params![column_name],
                    |row| row.get(0),
                )
                .unwrap_or(false);

            if !has_column {
                conn.execute(
                    &format!("ALTER TABLE mods ADD COLUMN {} {}", column_name, column_type),
                    [],
                )?;
                tracing::info!("Added column '{}' to mods table", column_name);
            }
        }

        conn.execute(
            "INSERT INTO schema_version (migration_name, applied_at) VALUES (?1, datetime('now'))",
            params![migration_name],
        )?;

        Ok(())
    }

    // ========== Upsert / Read ==========

    /// Insert a new identity or refresh the mutable fields of a known one.
    ///
    /// On update `category_order` and `mod_order` are left untouched. On insert
    /// a `mod_order` of [`APPEND_ORDER`] (or anything non-positive) becomes
    /// `max(mod_order in category) + 1`.
    pub fn upsert(&self, m: &ModRecord) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mod_order = if m.mod_order <= 0 || m.mod_order >= APPEND_ORDER {
            let max: Option<i64> = tx.query_row(
                "SELECT MAX(mod_order) FROM mods WHERE category = ?1",
                params![m.category],
                |row| row.get(0),
            )?;
            max.unwrap_or(0) + 1
        } else {
            m.mod_order
        };

        let now = chrono::Utc::now().to_rfc3339();
        let added_at = if m.added_at.is_empty() { now.clone() } else { m.added_at.clone() };

        tx.execute(
            r#"
            INSERT INTO mods (identity, name, version, author, description, folder_path, status,
                              category, category_order, mod_order, source_url, image_url,
                              latest_version, manifest_count, is_modpack, added_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(identity) DO UPDATE SET
                name = excluded.name,
                version = excluded.version,
                author = excluded.author,
                description = excluded.description,
                folder_path = excluded.folder_path,
                status = excluded.status,
                category = excluded.category,
                source_url = excluded.source_url,
                image_url = excluded.image_url,
                manifest_count = excluded.manifest_count,
                is_modpack = excluded.is_modpack,
                updated_at = excluded.updated_at
            "#,
            params![
                m.identity,
                m.name,
                m.version,
                m.author,
                m.description,
                m.folder_path.to_string_lossy().to_string(),
                m.status.as_str(),
                m.category,
                m.category_order.max(1),
                mod_order,
                m.source_url,
                m.image_url,
                m.latest_version,
                m.manifest_count,
                m.is_modpack as i32,
                added_at,
                now,
            ],
        )?;

        tx.commit().context("Failed to upsert mod")?;
        Ok(())
    }

    /// Get a mod by identity
    pub fn get(&self, identity: &str) -> Result<Option<ModRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM mods WHERE identity = ?1",
            params![identity],
            |row| ModRecord::from_row(row),
        )
        .optional()
        .context("Failed to query mod")
    }

    /// All mods keyed by identity
    pub fn get_all(&self) -> Result<BTreeMap<String, ModRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM mods")?;

        let mods = stmt
            .query_map([], |row| ModRecord::from_row(row))?
            .map(|r| r.map(|m| (m.identity.clone(), m)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(mods)
    }

    /// Mods of one category, unordered; callers sort by `mod_order`
    pub fn get_by_category(&self, category: &str) -> Result<Vec<ModRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM mods WHERE category = ?1")?;

        let mods = stmt
            .query_map(params![category], |row| ModRecord::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(mods)
    }

    /// Distinct category names currently present
    pub fn get_categories(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT category FROM mods ORDER BY category")?;

        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(categories)
    }

    /// Each category with the smallest `category_order` among its mods
    pub fn category_orders(&self) -> Result<Vec<(String, Option<i64>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category, MIN(category_order) FROM mods GROUP BY category ORDER BY category",
        )?;

        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Order already used by a category, if any mod carries it
    pub fn order_of_category(&self, category: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let order: Option<i64> = conn.query_row(
            "SELECT MIN(category_order) FROM mods WHERE category = ?1",
            params![category],
            |row| row.get(0),
        )?;
        Ok(order)
    }

    /// Highest `category_order` in use (0 for an empty library)
    pub fn max_category_order(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(category_order) FROM mods", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    /// Highest `mod_order` in a category (0 when the category is empty)
    pub fn max_mod_order(&self, category: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(mod_order) FROM mods WHERE category = ?1",
            params![category],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM mods", [], |row| row.get(0))?;
        Ok(count == 0)
    }

    // ========== Field-level updates ==========
    //
    // Each call commits on its own. Unknown identities are a no-op.

    fn set_column(&self, column: &'static str, identity: &str, value: &dyn ToSql) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "UPDATE mods SET {} = ?1, updated_at = ?2 WHERE identity = ?3",
            column
        );
        conn.execute(&sql, params![value, chrono::Utc::now().to_rfc3339(), identity])
            .with_context(|| format!("Failed to update {} of '{}'", column, identity))?;
        Ok(())
    }

    pub fn update_path(&self, identity: &str, path: &Path) -> Result<()> {
        self.set_column("folder_path", identity, &path.to_string_lossy().to_string())
    }

    pub fn update_order(&self, identity: &str, mod_order: i64) -> Result<()> {
        self.set_column("mod_order", identity, &mod_order.max(1))
    }

    /// Move a mod to another category, optionally setting the category order too
    pub fn update_category(
        &self,
        identity: &str,
        category: &str,
        category_order: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        match category_order {
            Some(order) => conn.execute(
                "UPDATE mods SET category = ?1, category_order = ?2, updated_at = ?3 WHERE identity = ?4",
                params![category, order.max(1), now, identity],
            )?,
            None => conn.execute(
                "UPDATE mods SET category = ?1, updated_at = ?2 WHERE identity = ?3",
                params![category, now, identity],
            )?,
        };
        Ok(())
    }

    /// Set the order of every mod in a category
    pub fn set_category_order(&self, category: &str, category_order: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mods SET category_order = ?1 WHERE category = ?2",
            params![category_order.max(1), category],
        )?;
        Ok(())
    }

    /// Write several category orders in one transaction
    pub fn set_category_orders(&self, orders: &[(String, i64)]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (category, order) in orders {
            tx.execute(
                "UPDATE mods SET category_order = ?1 WHERE category = ?2",
                params![(*order).max(1), category],
            )?;
        }
        tx.commit().context("Failed to write category orders")?;
        Ok(())
    }

    pub fn set_status(&self, identity: &str, status: ModStatus) -> Result<()> {
        self.set_column("status", identity, &status.as_str())
    }

    pub fn mark_missing(&self, identity: &str) -> Result<()> {
        self.set_status(identity, ModStatus::Missing)
    }

    pub fn update_version(&self, identity: &str, version: &str) -> Result<()> {
        self.set_column("version", identity, &version)
    }

    pub fn update_source(&self, identity: &str, url: &str) -> Result<()> {
        self.set_column("source_url", identity, &url)
    }

    pub fn update_image(&self, identity: &str, image: &str) -> Result<()> {
        self.set_column("image_url", identity, &image)
    }

    pub fn update_description(&self, identity: &str, description: &str) -> Result<()> {
        self.set_column("description", identity, &description)
    }

    pub fn update_author(&self, identity: &str, author: &str) -> Result<()> {
        self.set_column("author", identity, &author)
    }

    pub fn update_name(&self, identity: &str, name: &str) -> Result<()> {
        self.set_column("name", identity, &name)
    }

    pub fn update_latest_version(&self, identity: &str, latest: &str) -> Result<()> {
        self.set_column("latest_version", identity, &latest)
    }

    pub fn clear_latest_version(&self, identity: &str) -> Result<()> {
        self.set_column("latest_version", identity, &"")
    }

    /// Remove a mod row permanently
    pub fn delete(&self, identity: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM mods WHERE identity = ?1", params![identity])?;
        Ok(())
    }
}
