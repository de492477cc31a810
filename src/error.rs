//! Typed errors that callers need to tell apart
//!
//! Most operations return `anyhow::Result`; these variants travel inside
//! `anyhow::Error` and can be recovered with `downcast_ref::<ModError>()`
//! when the CLI needs to print a specific message.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModError {
    /// A required path is missing or invalid (game mods dir, storage root)
    #[error("configuration error: {0}")]
    Config(String),

    /// An import source has no manifest with a usable UniqueID
    #[error("could not determine a mod identity from {}", .0.display())]
    Identity(PathBuf),

    #[error("mod '{0}' is already installed")]
    AlreadyInstalled(String),

    #[error("mod '{0}' not found")]
    NotFound(String),

    /// Waiting for a browser download gave up
    #[error("timed out waiting for a download of '{0}'")]
    DownloadTimeout(String),
}
