//! Application configuration for wikidict.
//!
//! User config lives at `~/.wikidict/wikidict.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WikidictError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "wikidict.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".wikidict";

// ---------------------------------------------------------------------------
// Config structs (matching wikidict.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote catalog (MediaWiki API) settings.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Fetch pool settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Per-title retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Update run settings.
    #[serde(default)]
    pub update: UpdateConfig,

    /// Dictionary compiler settings.
    #[serde(default)]
    pub compile: CompileConfig,

    /// Metadata tags written into every dictionary.
    #[serde(default)]
    pub dictionary: DictionaryMetaConfig,
}

/// `[catalog]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// MediaWiki `api.php` endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Site root used to absolutize wiki-relative links.
    #[serde(default = "default_site_url")]
    pub site_url: String,

    /// Only titles starting with this prefix belong to the corpus.
    #[serde(default = "default_title_prefix")]
    pub title_prefix: String,

    /// URL path prefix of links pointing at other corpus articles.
    #[serde(default = "default_article_link_prefix")]
    pub article_link_prefix: String,

    /// Namespaces watched for recent changes (`|`-separated ids).
    #[serde(default = "default_namespaces")]
    pub namespaces: String,

    /// Regex matching scan-page titles; group 1 is the volume, group 2 the page.
    #[serde(default = "default_source_page_pattern")]
    pub source_page_pattern: String,

    /// User-Agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// Minimum ms to wait before each page fetch.
    #[serde(default)]
    pub rate_limit_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            site_url: default_site_url(),
            title_prefix: default_title_prefix(),
            article_link_prefix: default_article_link_prefix(),
            namespaces: default_namespaces(),
            source_page_pattern: default_source_page_pattern(),
            user_agent: default_user_agent(),
            timeout_secs: default_request_timeout(),
            rate_limit_ms: 0,
        }
    }
}

fn default_api_url() -> String {
    "https://en.wikisource.org/w/api.php".into()
}
fn default_site_url() -> String {
    "https://en.wikisource.org".into()
}
fn default_title_prefix() -> String {
    "1911 Encyclopædia Britannica".into()
}
fn default_article_link_prefix() -> String {
    "/wiki/1911_Encyclop%C3%A6dia_Britannica/".into()
}
fn default_namespaces() -> String {
    "0|104".into()
}
fn default_source_page_pattern() -> String {
    r"^Page:EB1911 - Volume (\d+)\.djvu/(\d+)$".into()
}
fn default_user_agent() -> String {
    concat!("wikidict/", env!("CARGO_PKG_VERSION")).into()
}
fn default_request_timeout() -> u64 {
    30
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum concurrent page fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Normalize fetched content before merging it.
    #[serde(default)]
    pub normalize: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            normalize: false,
        }
    }
}

fn default_concurrency() -> u32 {
    4
}

/// `[retry]` section: bounded exponential backoff for a single title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per title, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles on every further attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound for a single delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries and never sleeps.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16);
        let factor = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
        let ms = self
            .backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    10_000
}

/// `[update]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Abort the whole run after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// `[compile]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Close a content block once it holds this many raw bytes.
    #[serde(default = "default_max_block_bytes")]
    pub max_block_bytes: usize,

    /// Close a content block once it holds this many items.
    #[serde(default = "default_max_block_entries")]
    pub max_block_entries: usize,

    /// Prefix removed from titles to form headwords. Titles without it
    /// are not compiled.
    #[serde(default = "default_strip_prefix", skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<String>,

    /// HTML prepended to every article (stylesheet links, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_prefix: Option<String>,

    /// Directory of static resources added under `~/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources_dir: Option<PathBuf>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            max_block_bytes: default_max_block_bytes(),
            max_block_entries: default_max_block_entries(),
            strip_prefix: default_strip_prefix(),
            content_prefix: None,
            resources_dir: None,
        }
    }
}

fn default_strip_prefix() -> Option<String> {
    Some(format!("{}/", default_title_prefix()))
}
fn default_max_block_bytes() -> usize {
    512 * 1024
}
fn default_max_block_entries() -> usize {
    4096
}

/// `[dictionary]` section: metadata tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryMetaConfig {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default = "default_license_name")]
    pub license_name: String,
    #[serde(default = "default_license_url")]
    pub license_url: String,
    #[serde(default = "default_source")]
    pub source: String,
}

impl Default for DictionaryMetaConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            license_name: default_license_name(),
            license_url: default_license_url(),
            source: default_source(),
        }
    }
}

impl DictionaryMetaConfig {
    /// Tags in the fixed order they are written to an artifact.
    pub fn tags(&self) -> Vec<(String, String)> {
        vec![
            ("label".into(), self.label.clone()),
            ("license.name".into(), self.license_name.clone()),
            ("license.url".into(), self.license_url.clone()),
            ("source".into(), self.source.clone()),
            ("uri".into(), self.source.clone()),
        ]
    }
}

fn default_label() -> String {
    default_title_prefix()
}
fn default_license_name() -> String {
    "Creative Commons Attribution-Share Alike 3.0".into()
}
fn default_license_url() -> String {
    "https://creativecommons.org/licenses/by-sa/3.0/".into()
}
fn default_source() -> String {
    "https://en.wikisource.org/wiki/1911_Encyclop%C3%A6dia_Britannica".into()
}

// ---------------------------------------------------------------------------
// Sync config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime synchronization configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum concurrent page fetches.
    pub concurrency: u32,
    /// Retry policy for a single title.
    pub retry: RetryPolicy,
    /// Delay before each page fetch in ms.
    pub rate_limit_ms: u64,
    /// Normalize fetched content before merging.
    pub normalize: bool,
    /// Whole-run timeout.
    pub timeout: Option<Duration>,
}

impl From<&AppConfig> for SyncConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.fetch.concurrency,
            retry: config.retry,
            rate_limit_ms: config.catalog.rate_limit_ms,
            normalize: config.fetch.normalize,
            timeout: config.update.timeout_secs.map(Duration::from_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.wikidict/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| WikidictError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.wikidict/wikidict.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| WikidictError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| WikidictError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| WikidictError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| WikidictError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| WikidictError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
