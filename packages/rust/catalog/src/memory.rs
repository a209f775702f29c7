//! In-process catalog.
//!
//! Holds pages in memory and reports changes from their `last_modified`
//! timestamps. Failures can be scripted per title or for the whole catalog,
//! which is how the update engine's retry and abort paths are exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use wikidict_shared::{Entry, Result, WikidictError, normalize_title};

use crate::{ChangeKind, ChangeSet, ChangedTitle, FetchOutcome, RemoteCatalog};

#[derive(Debug, Default)]
struct State {
    pages: BTreeMap<String, Entry>,
    /// Scan page edits: (volume, page, when).
    source_edits: Vec<(u32, u32, DateTime<Utc>)>,
    /// Remaining transient failures per title.
    failures: HashMap<String, u32>,
    unreachable: bool,
    fetches: HashMap<String, u32>,
}

/// [`RemoteCatalog`] backed by an in-memory page map.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog holding `entries`.
    pub fn with_entries(entries: impl IntoIterator<Item = Entry>) -> Self {
        let catalog = Self::new();
        for entry in entries {
            catalog.put(entry);
        }
        catalog
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or replace a page. Its `last_modified` is its change time.
    pub fn put(&self, entry: Entry) {
        let title = normalize_title(&entry.title);
        self.state().pages.insert(title, entry);
    }

    /// Remove a page so lookups report it as not found.
    pub fn remove(&self, title: &str) {
        self.state().pages.remove(&normalize_title(title));
    }

    /// Record an edit of a scan page.
    pub fn edit_source_page(&self, volume: u32, page: u32, at: DateTime<Utc>) {
        self.state().source_edits.push((volume, page, at));
    }

    /// Make the next `times` fetches of `title` fail transiently.
    pub fn fail_title(&self, title: &str, times: u32) {
        self.state().failures.insert(normalize_title(title), times);
    }

    /// Make every call fail, as if the remote were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// How many times `title` has been fetched.
    pub fn fetch_count(&self, title: &str) -> u32 {
        self.state()
            .fetches
            .get(&normalize_title(title))
            .copied()
            .unwrap_or(0)
    }

    /// Total number of fetches across all titles.
    pub fn total_fetches(&self) -> u32 {
        self.state().fetches.values().sum()
    }
}

#[async_trait]
impl RemoteCatalog for MemoryCatalog {
    async fn ping(&self) -> Result<()> {
        if self.state().unreachable {
            return Err(WikidictError::Network("catalog unreachable".into()));
        }
        Ok(())
    }

    async fn list_titles(&self) -> Result<Vec<String>> {
        let state = self.state();
        if state.unreachable {
            return Err(WikidictError::Network("catalog unreachable".into()));
        }
        Ok(state.pages.keys().cloned().collect())
    }

    async fn changed_since(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet> {
        let state = self.state();
        if state.unreachable {
            return Err(WikidictError::Network("catalog unreachable".into()));
        }

        let Some(since) = since else {
            return Ok(ChangeSet::listing(state.pages.keys().cloned()));
        };

        let mut set = ChangeSet {
            titles: state
                .pages
                .values()
                .filter(|e| e.last_modified >= since)
                .map(|e| ChangedTitle {
                    title: e.title.clone(),
                    kind: ChangeKind::Edit,
                    last_modified: Some(e.last_modified),
                })
                .collect(),
            ..ChangeSet::default()
        };
        for &(volume, page, at) in &state.source_edits {
            if at >= since {
                set.add_source_page(volume, page);
            }
        }
        Ok(set)
    }

    async fn fetch(&self, title: &str) -> FetchOutcome {
        let key = normalize_title(title);
        let mut state = self.state();
        *state.fetches.entry(key.clone()).or_default() += 1;

        if state.unreachable {
            return FetchOutcome::TransientFailure("catalog unreachable".into());
        }
        if let Some(remaining) = state.failures.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return FetchOutcome::TransientFailure(format!("scripted failure for '{key}'"));
            }
        }

        match state.pages.get(&key) {
            Some(entry) => FetchOutcome::Found(entry.clone()),
            None => FetchOutcome::NotFound,
        }
    }
}
