//! Delta sync: bring the entry store up to date with the remote catalog.
//!
//! Queries the change feed from the stored cursor, refreshes every changed
//! title plus every stored entry transcluding a changed scan page, merges the
//! results with remote-wins semantics and advances the cursor to the instant
//! the query was issued.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use wikidict_catalog::{ChangeSet, FetchOutcome, RemoteCatalog};
use wikidict_normalize::{Normalizer, PageRangeDetector};
use wikidict_shared::{AppConfig, Entry, Result, SyncConfig, WikidictError, normalize_title};
use wikidict_storage::EntryStore;

use crate::fetch::{confirm_reachable, fetch_all, retry_call};
use crate::pipeline::{ProgressReporter, RunLog, TitleStatus};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs update passes against a [`RemoteCatalog`].
pub struct UpdateEngine<C: RemoteCatalog + 'static> {
    pub(crate) catalog: Arc<C>,
    pub(crate) config: SyncConfig,
    normalizer: Option<Normalizer>,
    ranges: Option<PageRangeDetector>,
}

/// Result of a delta sync.
#[derive(Debug, Clone)]
pub struct DeltaOutcome {
    pub log: RunLog,
    /// Instant the change query was issued.
    pub sync_point: DateTime<Utc>,
    /// Whether the store cursor moved to `sync_point`.
    pub cursor_advanced: bool,
    /// Entries refreshed because a scan page they transclude changed.
    pub range_refreshed: usize,
}

impl<C: RemoteCatalog + 'static> UpdateEngine<C> {
    pub fn new(catalog: Arc<C>, config: SyncConfig) -> Self {
        Self {
            catalog,
            config,
            normalizer: None,
            ranges: None,
        }
    }

    /// Normalize fetched content before it is merged.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Track scan-page ranges of fetched entries.
    pub fn with_range_detector(mut self, detector: PageRangeDetector) -> Self {
        self.ranges = Some(detector);
        self
    }

    /// Build an engine from the application config.
    pub fn from_config(catalog: Arc<C>, config: &AppConfig) -> Result<Self> {
        let sync = SyncConfig::from(config);
        let normalize = sync.normalize;
        let mut engine = Self::new(catalog, sync)
            .with_range_detector(PageRangeDetector::new(&config.catalog.source_page_pattern)?);
        if normalize {
            engine = engine.with_normalizer(Normalizer::new(&config.catalog)?);
        }
        Ok(engine)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Every article title the catalog knows.
    pub async fn list_titles(&self) -> Result<Vec<String>> {
        retry_call("title listing", &self.config.retry, || self.catalog.list_titles()).await
    }

    // -----------------------------------------------------------------------
    // Pass A
    // -----------------------------------------------------------------------

    /// Pull every change since `since` (or the store's cursor) into `store`.
    ///
    /// On error the store is left untouched, cursor included.
    #[instrument(skip_all, fields(entries = store.len()))]
    pub async fn delta_sync(
        &self,
        store: &mut EntryStore,
        since: Option<DateTime<Utc>>,
        progress: &dyn ProgressReporter,
    ) -> Result<DeltaOutcome> {
        let since = since.or_else(|| store.cursor());
        let sync_point = Utc::now();
        info!(since = ?since, "starting delta sync");

        let (fetched, range_refreshed) = self
            .with_timeout(self.stage_delta(store, since, progress))
            .await?;

        let mut log = RunLog::default();
        for (title, outcome) in fetched {
            match outcome {
                FetchOutcome::Found(entry) => {
                    let entry = self.prepare(entry);
                    let title = entry.title.clone();
                    let status = match store.upsert(entry) {
                        Some(_) => TitleStatus::Updated,
                        None => TitleStatus::Added,
                    };
                    debug!(title = %title, ?status, "merged");
                    log.record(title, status);
                }
                FetchOutcome::NotFound => {
                    info!(title = %title, "title no longer resolves");
                    log.record(title, TitleStatus::Unresolved);
                }
                FetchOutcome::TransientFailure(reason) => {
                    log.record(title, TitleStatus::Failed(reason));
                }
            }
        }

        // Failed titles are only found again if the cursor stays put.
        let cursor_advanced = log.failed().is_empty();
        if cursor_advanced {
            store.advance_cursor(sync_point);
        } else {
            warn!(failed = log.failed().len(), "cursor held back, failed titles retry next run");
        }
        info!(touched = log.touched(), failed = log.failed().len(), "delta sync complete");
        progress.done(&log);

        Ok(DeltaOutcome {
            log,
            sync_point,
            cursor_advanced,
            range_refreshed,
        })
    }

    async fn stage_delta(
        &self,
        store: &EntryStore,
        since: Option<DateTime<Utc>>,
        progress: &dyn ProgressReporter,
    ) -> Result<(Vec<(String, FetchOutcome)>, usize)> {
        progress.phase("Querying changes");
        let changes = retry_call("change feed", &self.config.retry, || {
            self.catalog.changed_since(since)
        })
        .await?;

        let mut seen = HashSet::new();
        let mut refresh = Vec::new();
        for change in &changes.titles {
            let title = normalize_title(&change.title);
            if !title.is_empty() && seen.insert(title.clone()) {
                refresh.push(title);
            }
        }
        let range_refreshed = self.transcluding_entries(store, &changes, &mut seen, &mut refresh);

        info!(
            changed = changes.titles.len(),
            range_refreshed,
            total = refresh.len(),
            "change set resolved"
        );
        if refresh.is_empty() {
            return Ok((Vec::new(), 0));
        }

        progress.phase("Fetching changed titles");
        let fetched = fetch_all(&self.catalog, refresh, &self.config, progress).await;
        confirm_reachable(self.catalog.as_ref(), &fetched, &self.config.retry).await?;
        Ok((fetched, range_refreshed))
    }

    /// Queue stored entries whose scan-page range saw an edit.
    fn transcluding_entries(
        &self,
        store: &EntryStore,
        changes: &ChangeSet,
        seen: &mut HashSet<String>,
        refresh: &mut Vec<String>,
    ) -> usize {
        if changes.source_pages.is_empty() {
            return 0;
        }
        let mut count = 0;
        for entry in store.entries() {
            let range = entry
                .source_range
                .or_else(|| self.ranges.as_ref().and_then(|d| d.detect(&entry.content)));
            let Some(range) = range else { continue };
            if changes.touches(&range) && seen.insert(entry.title.clone()) {
                debug!(title = %entry.title, volume = range.volume, "scan page changed");
                refresh.push(entry.title.clone());
                count += 1;
            }
        }
        count
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Record the scan-page range and normalize content before merging.
    pub(crate) fn prepare(&self, mut entry: Entry) -> Entry {
        if let Some(detector) = &self.ranges {
            if let Some(range) = detector.detect(&entry.content) {
                entry.source_range = Some(range);
            }
        }
        if let Some(normalizer) = &self.normalizer {
            normalizer.normalize_entry(&mut entry);
        }
        entry
    }

    /// Bound `fut` by the configured run timeout.
    pub(crate) async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(?limit, "run timed out, outstanding fetches cancelled");
                    Err(WikidictError::Timeout(limit))
                }
            },
            None => fut.await,
        }
    }
}
