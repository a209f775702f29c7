//! Remote article catalogs.
//!
//! This crate provides:
//! - [`RemoteCatalog`]: the seam the update engine talks to
//! - [`MediaWikiCatalog`]: catalog backed by a MediaWiki `api.php` endpoint
//! - [`MemoryCatalog`]: in-process catalog with scriptable failures

pub mod mediawiki;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wikidict_shared::{Entry, PageRange, Result};

pub use mediawiki::MediaWikiCatalog;
pub use memory::MemoryCatalog;

// ---------------------------------------------------------------------------
// Catalog trait
// ---------------------------------------------------------------------------

/// Authoritative source of titles and article content.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Check that the catalog answers queries at all.
    async fn ping(&self) -> Result<()>;

    /// Every title that belongs to the corpus, in catalog order.
    async fn list_titles(&self) -> Result<Vec<String>>;

    /// Titles changed at or after `since`.
    ///
    /// `None` means there is no cursor yet: every title is reported.
    async fn changed_since(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet>;

    /// Point lookup of a single title.
    async fn fetch(&self, title: &str) -> FetchOutcome;
}

/// Result of a single point lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(Entry),
    NotFound,
    /// The lookup failed in a way that may succeed on retry.
    TransientFailure(String),
}

impl FetchOutcome {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchOutcome::TransientFailure(_))
    }
}

// ---------------------------------------------------------------------------
// Change sets
// ---------------------------------------------------------------------------

/// How a title showed up in the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Edit,
    /// Reported by a full listing rather than the change feed.
    Listed,
}

/// A changed article.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedTitle {
    pub title: String,
    pub kind: ChangeKind,
    /// When the change happened, if the catalog knows.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Everything that changed since a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Changed articles, one per title.
    pub titles: Vec<ChangedTitle>,
    /// Changed scan pages: volume to page indexes.
    pub source_pages: BTreeMap<u32, BTreeSet<u32>>,
}

impl ChangeSet {
    /// A change set reporting every title of a full listing.
    pub fn listing(titles: impl IntoIterator<Item = String>) -> Self {
        Self {
            titles: titles
                .into_iter()
                .map(|title| ChangedTitle {
                    title,
                    kind: ChangeKind::Listed,
                    last_modified: None,
                })
                .collect(),
            source_pages: BTreeMap::new(),
        }
    }

    /// Record a changed scan page.
    pub fn add_source_page(&mut self, volume: u32, page: u32) {
        self.source_pages.entry(volume).or_default().insert(page);
    }

    /// Whether any changed scan page falls inside `range`.
    pub fn touches(&self, range: &PageRange) -> bool {
        self.source_pages
            .get(&range.volume)
            .is_some_and(|pages| pages.range(range.start..=range.end).next().is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty() && self.source_pages.is_empty()
    }
}
