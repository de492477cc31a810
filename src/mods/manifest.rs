//! Lenient `manifest.json` parsing
//!
//! Mod authors ship manifests with comments, trailing commas and legacy
//! encodings. Decoding tries UTF-8 (with and without BOM), GBK and then
//! Windows-1252; JSON keys are matched case-insensitively.

use regex_lite::Regex;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::OnceLock;

/// Fields read from a manifest; everything is optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub unique_id: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub update_keys: Vec<String>,
}

impl Manifest {
    /// Read and parse a manifest file; `None` when it cannot be decoded or parsed
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("Cannot read manifest {}: {}", path.display(), e);
                return None;
            }
        };

        let Some(text) = decode_text(&bytes) else {
            tracing::debug!("Manifest encoding not recognised: {}", path.display());
            return None;
        };

        match Self::parse(&text) {
            Some(manifest) => Some(manifest),
            None => {
                tracing::debug!("Manifest parse failed: {}", path.display());
                None
            }
        }
    }

    /// Parse manifest text after stripping comments and trailing commas
    pub fn parse(text: &str) -> Option<Self> {
        let cleaned = clean_json(text);
        let value: Value = serde_json::from_str(&cleaned).ok()?;
        let obj = value.as_object()?;

        let update_keys = match get_ci(obj, "UpdateKeys") {
            Some(Value::Array(keys)) => keys
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
            _ => get_ci(obj, "UpdateKey")
                .and_then(Value::as_str)
                .map(|k| vec![k.to_string()])
                .unwrap_or_default(),
        };

        Some(Self {
            unique_id: text_field(obj, "UniqueID"),
            name: text_field(obj, "Name"),
            version: text_field(obj, "Version"),
            author: text_field(obj, "Author"),
            description: text_field(obj, "Description"),
            update_keys,
        })
    }

    /// Listing URL synthesized from the first `Nexus:<id>` update key
    pub fn nexus_url(&self, game_domain: &str) -> Option<String> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"(?i)nexus:\s*(\d+)").expect("valid regex"));

        self.update_keys.iter().find_map(|key| {
            let id = re.captures(key)?.get(1)?.as_str().to_string();
            Some(format!("https://www.nexusmods.com/{}/mods/{}", game_domain, id))
        })
    }
}

fn get_ci<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match get_ci(obj, key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Decode manifest bytes trying each supported encoding in turn
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(text) = std::str::from_utf8(rest) {
            return Some(text.to_string());
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.to_string());
    }

    if let Some(text) = encoding_rs::GBK.decode_without_bom_handling_and_without_replacement(bytes) {
        return Some(text.into_owned());
    }

    let (text, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    (!had_errors).then(|| text.into_owned())
}

/// Remove `//` comment lines, `/* */` blocks and commas before `}` or `]`
pub fn clean_json(text: &str) -> String {
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    let block = BLOCK.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid regex"));
    let trailing = TRAILING.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

    let without_lines = text
        .lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n");

    let without_blocks = block.replace_all(&without_lines, "");
    trailing.replace_all(&without_blocks, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commented_manifest() {
        let text = r#"
        {
            // generated by hand
            "Name": "Farm Expansion",
            "Author": "Alice",
            "Version": "1.0",
            /* block
               comment */
            "UniqueID": "Alice.Farm",
            "UpdateKeys": [ "Nexus:12345", ],
        }
        "#;

        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.unique_id.as_deref(), Some("Alice.Farm"));
        assert_eq!(manifest.name.as_deref(), Some("Farm Expansion"));
        assert_eq!(manifest.author.as_deref(), Some("Alice"));
        assert_eq!(
            manifest.nexus_url("stardewvalley").as_deref(),
            Some("https://www.nexusmods.com/stardewvalley/mods/12345")
        );
    }

    #[test]
    fn keys_are_case_insensitive() {
        let manifest =
            Manifest::parse(r#"{"uniqueid": "Bob.Tools", "NAME": "Tools", "version": 2}"#).unwrap();
        assert_eq!(manifest.unique_id.as_deref(), Some("Bob.Tools"));
        assert_eq!(manifest.name.as_deref(), Some("Tools"));
        assert_eq!(manifest.version.as_deref(), Some("2"));
    }

    #[test]
    fn single_update_key_and_blank_fields() {
        let manifest =
            Manifest::parse(r#"{"UniqueID": "X", "Author": "  ", "UpdateKey": "nexus:77"}"#).unwrap();
        assert!(manifest.author.is_none());
        assert_eq!(
            manifest.nexus_url("stardewvalley").as_deref(),
            Some("https://www.nexusmods.com/stardewvalley/mods/77")
        );

        let manifest = Manifest::parse(r#"{"UpdateKeys": ["GitHub:a/b", "ModDrop:5"]}"#).unwrap();
        assert!(manifest.nexus_url("stardewvalley").is_none());
    }

    #[test]
    fn rejects_non_objects_and_garbage() {
        assert!(Manifest::parse("[1, 2]").is_none());
        assert!(Manifest::parse("{ not json").is_none());
    }

    #[test]
    fn decodes_bom_and_legacy_encodings() {
        let mut bom = vec![0xEF, 0xBB, 0xBF];
        bom.extend_from_slice(br#"{"UniqueID":"A"}"#);
        assert_eq!(decode_text(&bom).unwrap(), r#"{"UniqueID":"A"}"#);

        // "农场" in GBK
        let gbk = [0xC5, 0xA9, 0xB3, 0xA1];
        assert_eq!(decode_text(&gbk).unwrap(), "农场");
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, r#"{"UniqueID": "Alice.Farm",}"#).unwrap();
        assert_eq!(
            Manifest::load(&path).unwrap().unique_id.as_deref(),
            Some("Alice.Farm")
        );

        std::fs::write(&path, "garbage").unwrap();
        assert!(Manifest::load(&path).is_none());
    }
}
