//! Archive handling for imports and updates (zip, 7z, rar)

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Archive kinds a mod may be distributed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
}

impl ArchiveFormat {
    /// Detect format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "zip" => Some(Self::Zip),
            "7z" => Some(Self::SevenZip),
            "rar" => Some(Self::Rar),
            _ => None,
        }
    }

    /// Detect format from the leading magic bytes
    fn sniff(path: &Path) -> Result<Option<Self>> {
        use std::io::Read;

        let mut head = [0u8; 4];
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let read = file.read(&mut head)?;
        let head = &head[..read];

        Ok(if head.starts_with(&[0x50, 0x4B]) {
            Some(Self::Zip)
        } else if head.starts_with(&[0x37, 0x7A, 0xBC, 0xAF]) {
            Some(Self::SevenZip)
        } else if head.starts_with(&[0x52, 0x61, 0x72, 0x21]) {
            Some(Self::Rar)
        } else {
            None
        })
    }
}

/// Whether an import source should be extracted rather than copied
pub fn is_archive(path: &Path) -> bool {
    path.is_file() && ArchiveFormat::from_path(path).is_some()
}

/// Extract an archive into `dest`, creating it when needed
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let format = match ArchiveFormat::from_path(archive) {
        Some(format) => format,
        None => ArchiveFormat::sniff(archive)?
            .with_context(|| format!("Unknown archive format: {}", archive.display()))?,
    };

    tokio::fs::create_dir_all(dest).await?;
    tracing::debug!("Extracting {:?} archive {} into {}", format, archive.display(), dest.display());

    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || match format {
        ArchiveFormat::Zip => extract_zip(&archive, &dest),
        ArchiveFormat::SevenZip => {
            sevenz_rust::decompress_file(&archive, &dest).context("Failed to extract 7z archive")
        }
        ArchiveFormat::Rar => extract_rar(&archive, &dest),
    })
    .await
    .context("Extraction task panicked")?
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).context("Failed to open archive")?;
    let mut zip = zip::ZipArchive::new(file).context("Failed to read ZIP archive")?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let relative = sanitize_entry(entry.name());
        if relative.as_os_str().is_empty() {
            continue;
        }
        let outpath = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = std::fs::File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

fn extract_rar(archive: &Path, dest: &Path) -> Result<()> {
    let output = std::process::Command::new("unrar")
        .args(["x", "-o+", "-y"])
        .arg(archive)
        .arg(dest)
        .output();

    match output {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => anyhow::bail!("unrar failed: {}", String::from_utf8_lossy(&out.stderr)),
        Err(_) => anyhow::bail!("RAR extraction requires 'unrar' to be installed"),
    }
}

/// Strip traversal components from an archive entry name
fn sanitize_entry(name: &str) -> PathBuf {
    name.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect()
}

/// The directory that holds the mod inside an extraction folder.
///
/// Archives usually wrap the mod in one top-level folder; when the
/// extraction produced exactly one directory and nothing else, that
/// directory is the mod root.
pub fn extracted_root(dir: &Path) -> Result<PathBuf> {
    let entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(dir.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn format_detection() {
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.zip")), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.7z")), Some(ArchiveFormat::SevenZip));
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.RAR")), Some(ArchiveFormat::Rar));
        assert_eq!(ArchiveFormat::from_path(Path::new("manifest.json")), None);
    }

    #[test]
    fn entry_names_cannot_escape() {
        assert_eq!(sanitize_entry("Mod/manifest.json"), PathBuf::from("Mod/manifest.json"));
        assert_eq!(sanitize_entry("Mod\\assets\\a.png"), PathBuf::from("Mod/assets/a.png"));
        assert_eq!(sanitize_entry("../../etc/passwd"), PathBuf::from("etc/passwd"));
    }

    #[tokio::test]
    async fn zip_extracts_and_finds_wrapped_root() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("Farm Expansion-123-1-1.zip");
        write_zip(
            &archive,
            &[
                ("Farm Expansion/manifest.json", r#"{"UniqueID":"Alice.Farm"}"#),
                ("Farm Expansion/assets/map.tmx", "<map/>"),
            ],
        );

        let dest = dir.path().join("out");
        extract_archive(&archive, &dest).await.unwrap();

        let root = extracted_root(&dest).unwrap();
        assert_eq!(root, dest.join("Farm Expansion"));
        assert!(root.join("manifest.json").is_file());
        assert!(root.join("assets/map.tmx").is_file());
    }

    #[tokio::test]
    async fn flat_archive_root_is_the_extraction_dir() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("flat.zip");
        write_zip(&archive, &[("manifest.json", "{}"), ("content.json", "{}")]);

        let dest = dir.path().join("out");
        extract_archive(&archive, &dest).await.unwrap();
        assert_eq!(extracted_root(&dest).unwrap(), dest);
    }
}
