//! On-disk naming rules and guarded filesystem moves
//!
//! Layout: `<root>/<NN>_<category>/<NNNN>_<identity>_<name>/`.

use anyhow::{Context, Result};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use walkdir::WalkDir;

/// Reserved top-level folder holding duplicates and conflicting folders
pub const QUARANTINE_DIR: &str = "99_duplicates";

/// Prefix of the placeholder names used by the two-phase mod rename
pub const TEMP_PREFIX: &str = "__tmp__";

fn category_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2,})_(.+)$").expect("valid regex"))
}

/// Make a string safe to use as one path component
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['.', ' ']);

    if trimmed.is_empty() {
        "Unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Canonical folder name of a category: `01_default`
pub fn category_dir_name(order: i64, category: &str) -> String {
    format!("{:02}_{}", order, sanitize_name(category))
}

/// Split a category folder name into its order and label.
///
/// The quarantine folder is never a category.
pub fn parse_category_dir(name: &str) -> Option<(i64, String)> {
    if name == QUARANTINE_DIR {
        return None;
    }
    let caps = category_dir_re().captures(name)?;
    let order = caps.get(1)?.as_str().parse().ok()?;
    Some((order, caps.get(2)?.as_str().to_string()))
}

/// Folder name a mod converges to: `0001_Alice.Farm_Farm Expansion`
pub fn leaf_name(mod_order: i64, identity: &str, name: &str) -> String {
    format!(
        "{:04}_{}_{}",
        mod_order,
        sanitize_name(identity),
        sanitize_name(name)
    )
}

/// Placeholder prefix reserved for one identity during the rename
pub fn temp_prefix(identity: &str) -> String {
    format!("{}{}__", TEMP_PREFIX, sanitize_name(identity))
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Whether `path` resolves to a location inside `root`
pub fn is_under_root(path: &Path, root: &Path) -> bool {
    match (path.canonicalize(), root.canonicalize()) {
        (Ok(path), Ok(root)) => path.starts_with(&root) && path != root,
        _ => false,
    }
}

/// Move a directory, falling back to copy + delete across filesystems
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                rename_err
            );
            copy_dir(src, dst)?;
            std::fs::remove_dir_all(src)
                .with_context(|| format!("Copied but failed to remove {}", src.display()))?;
            Ok(())
        }
    }
}

/// Recursively copy a directory tree
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Remove a file or directory, retrying while another process holds it
pub async fn remove_with_retry(path: &Path, attempts: u32, delay: Duration) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if !path.exists() {
            return Ok(());
        }

        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(
                    "Removing {} failed (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    attempts,
                    e
                );
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    match last_err {
        Some(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        None => Ok(()),
    }
}

/// Pick `<dir>/<name>`, or `<dir>/<name>_<suffix>` when that is taken
pub fn unique_child(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    dir.join(format!("{}_{}", name, &suffix[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_name("  Farm   Expansion  "), "Farm Expansion");
        assert_eq!(sanitize_name("a<b>c:d\"e/f\\g|h?i*j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_name("Trailing..."), "Trailing");
        assert_eq!(sanitize_name("tab\there"), "tab_here");
        assert_eq!(sanitize_name(" .. "), "Unnamed");
        assert_eq!(sanitize_name(""), "Unnamed");
    }

    #[test]
    fn category_dirs() {
        assert_eq!(category_dir_name(1, "default"), "01_default");
        assert_eq!(category_dir_name(12, "Maps: big"), "12_Maps_ big");
        assert_eq!(parse_category_dir("03_Maps"), Some((3, "Maps".to_string())));
        assert_eq!(parse_category_dir("120_Many"), Some((120, "Many".to_string())));
        assert_eq!(parse_category_dir("1_short"), None);
        assert_eq!(parse_category_dir("01_"), None);
        assert_eq!(parse_category_dir("SomeMod"), None);
        assert_eq!(parse_category_dir(QUARANTINE_DIR), None);
    }

    #[test]
    fn leaf_names() {
        assert_eq!(
            leaf_name(1, "Alice.Farm", "Farm Expansion"),
            "0001_Alice.Farm_Farm Expansion"
        );
        assert_eq!(leaf_name(12, "broken::abc", ""), "0012_broken__abc_Unnamed");
        assert_eq!(temp_prefix("Alice.Farm"), "__tmp__Alice.Farm__");
    }

    #[test]
    fn under_root_check() {
        let dir = TempDir::new().unwrap();
        let inside = dir.path().join("a/b");
        std::fs::create_dir_all(&inside).unwrap();
        let other = TempDir::new().unwrap();

        assert!(is_under_root(&inside, dir.path()));
        assert!(!is_under_root(dir.path(), dir.path()));
        assert!(!is_under_root(other.path(), dir.path()));
        assert!(!is_under_root(&dir.path().join("missing"), dir.path()));
    }

    #[test]
    fn move_creates_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("inner")).unwrap();
        std::fs::write(src.join("inner/file.txt"), "x").unwrap();

        let dst = dir.path().join("deep/new/dst");
        move_path(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(std::fs::read_to_string(dst.join("inner/file.txt")).unwrap(), "x");
    }

    #[test]
    fn unique_child_avoids_collisions() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_child(dir.path(), "Mod"), dir.path().join("Mod"));

        std::fs::create_dir(dir.path().join("Mod")).unwrap();
        let next = unique_child(dir.path(), "Mod");
        assert_ne!(next, dir.path().join("Mod"));
        assert!(file_name(&next).starts_with("Mod_"));
    }

    #[tokio::test]
    async fn remove_with_retry_handles_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.zip");
        std::fs::write(&file, "zip").unwrap();
        let folder = dir.path().join("folder");
        std::fs::create_dir_all(folder.join("x")).unwrap();

        remove_with_retry(&file, 3, Duration::from_millis(1)).await.unwrap();
        remove_with_retry(&folder, 3, Duration::from_millis(1)).await.unwrap();
        remove_with_retry(&dir.path().join("gone"), 3, Duration::from_millis(1))
            .await
            .unwrap();

        assert!(!file.exists());
        assert!(!folder.exists());
    }
}
