//! Missing backfill and explicit point fetches.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, instrument};

use wikidict_catalog::{FetchOutcome, RemoteCatalog};
use wikidict_shared::{Entry, Result, WikidictError, normalize_title};
use wikidict_storage::EntryStore;

use crate::fetch::{confirm_reachable, fetch_all};
use crate::pipeline::{ProgressReporter, RunLog, TitleStatus};
use crate::update::UpdateEngine;

/// Entries fetched by a point-fetch pass, kept apart from the store.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub entries: Vec<Entry>,
    pub log: RunLog,
}

/// Reference titles absent from `store`.
///
/// Titles are normalized; order follows `reference` and repeats are dropped.
pub fn missing_titles<S: AsRef<str>>(reference: &[S], store: &EntryStore) -> Vec<String> {
    let mut seen = HashSet::new();
    reference
        .iter()
        .map(|t| normalize_title(t.as_ref()))
        .filter(|t| !t.is_empty() && !store.contains(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Parse a title list given as `@file` (one per line) or `A|B|C`.
pub fn parse_title_arg(arg: &str) -> Result<Vec<String>> {
    let raw = match arg.strip_prefix('@') {
        Some(path) => wikidict_storage::read_to_string(Path::new(path))?,
        None => arg.replace('|', "\n"),
    };

    let mut seen = HashSet::new();
    let titles: Vec<String> = raw
        .lines()
        .map(normalize_title)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();

    if titles.is_empty() {
        return Err(WikidictError::validation(format!("no titles in '{arg}'")));
    }
    Ok(titles)
}

impl<C: RemoteCatalog + 'static> UpdateEngine<C> {
    /// Fetch every reference title the store lacks.
    ///
    /// The store is not mutated; found entries come back as a [`Batch`].
    #[instrument(skip_all, fields(reference = reference.len(), entries = store.len()))]
    pub async fn backfill<S: AsRef<str>>(
        &self,
        reference: &[S],
        store: &EntryStore,
        progress: &dyn ProgressReporter,
    ) -> Result<Batch> {
        let missing = missing_titles(reference, store);
        info!(missing = missing.len(), "starting backfill");
        progress.phase("Fetching missing titles");
        self.point_fetch(missing, progress).await
    }

    /// Fetch an explicit title list.
    #[instrument(skip_all, fields(titles = titles.len()))]
    pub async fn fetch_titles<S: AsRef<str>>(
        &self,
        titles: &[S],
        progress: &dyn ProgressReporter,
    ) -> Result<Batch> {
        let mut seen = HashSet::new();
        let titles: Vec<String> = titles
            .iter()
            .map(|t| normalize_title(t.as_ref()))
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        progress.phase("Fetching titles");
        self.point_fetch(titles, progress).await
    }

    async fn point_fetch(
        &self,
        titles: Vec<String>,
        progress: &dyn ProgressReporter,
    ) -> Result<Batch> {
        let mut batch = Batch::default();
        if titles.is_empty() {
            progress.done(&batch.log);
            return Ok(batch);
        }

        let fetched = self
            .with_timeout(async {
                let fetched = fetch_all(&self.catalog, titles, &self.config, progress).await;
                confirm_reachable(self.catalog.as_ref(), &fetched, &self.config.retry).await?;
                Ok::<_, WikidictError>(fetched)
            })
            .await?;

        for (title, outcome) in fetched {
            match outcome {
                FetchOutcome::Found(entry) => {
                    let entry = self.prepare(entry);
                    batch.log.record(entry.title.clone(), TitleStatus::Added);
                    batch.entries.push(entry);
                }
                FetchOutcome::NotFound => {
                    info!(title = %title, "not found, will retry next run");
                    batch.log.record(title, TitleStatus::Unresolved);
                }
                FetchOutcome::TransientFailure(reason) => {
                    batch.log.record(title, TitleStatus::Failed(reason));
                }
            }
        }

        info!(
            fetched = batch.entries.len(),
            unresolved = batch.log.unresolved().len(),
            failed = batch.log.failed().len(),
            "point fetch complete"
        );
        progress.done(&batch.log);
        Ok(batch)
    }
}
