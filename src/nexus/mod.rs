//! Nexus Mods metadata integration

pub mod autofill;
pub mod rest;

pub use autofill::{
    auto_fill, auto_fill_all, check_updates, listing_id, listing_url, FillStats, UpdateStats,
};
pub use rest::NexusClient;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the metadata service
#[derive(Debug, Error)]
pub enum NexusError {
    #[error("Nexus API key is invalid or not set")]
    InvalidKey,

    #[error("cannot reach Nexus Mods: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Nexus Mods returned status {0}")]
    Status(u16),

    #[error("unexpected response from Nexus Mods: {0}")]
    Decode(String),
}

/// Listing details used to fill in mod metadata
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub picture_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchHit {
    pub mod_id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of validating an API key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyStatus {
    pub valid: bool,
    pub quota_left: Option<i64>,
    pub quota_limit: Option<i64>,
}

/// Remote source of mod metadata
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn fetch_by_id(&self, mod_id: u64) -> Result<ModInfo, NexusError>;

    async fn search(&self, keyword: &str) -> Result<Vec<SearchHit>, NexusError>;

    async fn validate_key(&self) -> Result<KeyStatus, NexusError>;
}
