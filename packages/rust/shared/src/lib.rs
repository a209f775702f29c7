//! Shared types, error model, and configuration for wikidict.
//!
//! This crate is the foundation depended on by all other wikidict crates.
//! It provides:
//! - [`WikidictError`], the unified error type
//! - Domain types ([`Entry`], [`PageRange`], title and cursor helpers)
//! - Configuration ([`AppConfig`], [`SyncConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CatalogConfig, CompileConfig, DictionaryMetaConfig, FetchConfig, RetryPolicy,
    SyncConfig, UpdateConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{Result, WikidictError};
pub use types::{CURRENT_FORMAT_VERSION, Entry, PageRange, normalize_title, parse_cursor};
