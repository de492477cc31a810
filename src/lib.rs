//! modshelf - A CLI mod manager that keeps mod folders in sync with a library
//!
//! This crate provides:
//! - A SQLite library of installed mods per profile
//! - Reconciliation of the game's mods folder and a storage folder
//! - Category and load order encoded in folder names
//! - Archive and folder imports, duplicate quarantine
//! - Nexus Mods metadata auto-fill and browser-assisted updates

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod mods;
pub mod nexus;
pub mod profiles;
pub mod queue;

pub use app::App;
pub use config::Config;
