//! Retrying, bounded-concurrency page fetches.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use wikidict_catalog::{FetchOutcome, RemoteCatalog};
use wikidict_shared::{Result, RetryPolicy, SyncConfig, WikidictError};

use crate::pipeline::ProgressReporter;

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Fetch one title, retrying transient failures with exponential backoff.
///
/// `Found` and `NotFound` are final. A title still failing after
/// `retry.max_attempts` attempts comes back as its last `TransientFailure`.
pub async fn fetch_with_retry<C>(catalog: &C, title: &str, retry: &RetryPolicy) -> FetchOutcome
where
    C: RemoteCatalog + ?Sized,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = catalog.fetch(title).await;
        let FetchOutcome::TransientFailure(reason) = &outcome else {
            return outcome;
        };
        if attempt >= attempts {
            warn!(title, attempts, reason = %reason, "giving up on title");
            return outcome;
        }
        let delay = retry.delay_after(attempt);
        debug!(title, attempt, ?delay, reason = %reason, "transient fetch failure, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Run a whole-catalog call with retries.
///
/// Exhausting the retries means the catalog itself is unusable, so the
/// final error is reported as [`WikidictError::SystemicCatalog`].
pub async fn retry_call<T, F, Fut>(what: &str, retry: &RetryPolicy, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                warn!(what, attempts, error = %e, "catalog call failed");
                return Err(WikidictError::SystemicCatalog(format!(
                    "{what} failed after {attempts} attempts: {e}"
                )));
            }
            Err(e) => {
                let delay = retry.delay_after(attempt);
                debug!(what, attempt, ?delay, error = %e, "catalog call failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Fetch every title with at most `config.concurrency` requests in flight.
///
/// Results come back in input order, one per title. Dropping the returned
/// future aborts the outstanding fetches.
pub async fn fetch_all<C>(
    catalog: &Arc<C>,
    titles: Vec<String>,
    config: &SyncConfig,
    progress: &dyn ProgressReporter,
) -> Vec<(String, FetchOutcome)>
where
    C: RemoteCatalog + 'static,
{
    let total = titles.len();
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1) as usize));
    let mut tasks = JoinSet::new();

    for (idx, title) in titles.iter().enumerate() {
        let catalog = Arc::clone(catalog);
        let sem = Arc::clone(&semaphore);
        let title = title.clone();
        let retry = config.retry;
        let rate_limit = config.rate_limit_ms;

        tasks.spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return (idx, FetchOutcome::TransientFailure("fetch pool closed".into()));
            };
            if rate_limit > 0 {
                tokio::time::sleep(Duration::from_millis(rate_limit)).await;
            }
            (idx, fetch_with_retry(catalog.as_ref(), &title, &retry).await)
        });
    }

    let mut slots: Vec<Option<FetchOutcome>> = vec![None; total];
    let mut completed = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, outcome)) => {
                completed += 1;
                progress.title_fetched(&titles[idx], completed, total);
                slots[idx] = Some(outcome);
            }
            Err(e) => warn!(error = %e, "fetch task failed"),
        }
    }

    titles
        .into_iter()
        .zip(slots)
        .map(|(title, slot)| {
            let outcome = slot.unwrap_or_else(|| {
                FetchOutcome::TransientFailure("fetch task did not complete".into())
            });
            (title, outcome)
        })
        .collect()
}

/// Tell a down catalog apart from titles that fail on their own.
///
/// Only when every fetch failed transiently is the catalog itself checked;
/// if it still does not answer after retries the run is systemic. Otherwise
/// the failures stay per-title.
pub async fn confirm_reachable<C>(
    catalog: &C,
    results: &[(String, FetchOutcome)],
    retry: &RetryPolicy,
) -> Result<()>
where
    C: RemoteCatalog + ?Sized,
{
    if results.is_empty() || !results.iter().all(|(_, o)| o.is_transient()) {
        return Ok(());
    }
    debug!(failed = results.len(), "every fetch failed, checking the catalog");
    retry_call("catalog check", retry, || catalog.ping()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wikidict_catalog::MemoryCatalog;
    use wikidict_shared::Entry;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn catalog() -> MemoryCatalog {
        MemoryCatalog::with_entries([
            Entry::new("Abacus", "<p>counting frame</p>", Utc::now()),
            Entry::new("Zebra", "<p>striped</p>", Utc::now()),
        ])
    }

    #[tokio::test]
    async fn retries_until_found() {
        let catalog = catalog();
        catalog.fail_title("Abacus", 2);

        let outcome = fetch_with_retry(&catalog, "Abacus", &fast_retry(3)).await;
        assert!(matches!(outcome, FetchOutcome::Found(_)));
        assert_eq!(catalog.fetch_count("Abacus"), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let catalog = catalog();
        catalog.fail_title("Abacus", 5);

        let outcome = fetch_with_retry(&catalog, "Abacus", &fast_retry(3)).await;
        assert!(outcome.is_transient());
        assert_eq!(catalog.fetch_count("Abacus"), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let catalog = catalog();
        let outcome = fetch_with_retry(&catalog, "Yak", &fast_retry(3)).await;
        assert_eq!(outcome, FetchOutcome::NotFound);
        assert_eq!(catalog.fetch_count("Yak"), 1);
    }

    #[tokio::test]
    async fn retry_call_reports_systemic_after_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_call("change feed", &fast_retry(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WikidictError::Network("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(WikidictError::SystemicCatalog(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_preserves_input_order() {
        let catalog = Arc::new(catalog());
        let config = SyncConfig {
            concurrency: 2,
            retry: fast_retry(1),
            rate_limit_ms: 0,
            normalize: false,
            timeout: None,
        };
        let titles = vec!["Zebra".to_string(), "Yak".to_string(), "Abacus".to_string()];

        let results = fetch_all(&catalog, titles, &config, &SilentProgress).await;
        let order: Vec<_> = results.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(order, ["Zebra", "Yak", "Abacus"]);
        assert!(matches!(results[0].1, FetchOutcome::Found(_)));
        assert_eq!(results[1].1, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn lone_failing_title_is_not_systemic() {
        let catalog = catalog();
        let failed = vec![("Abacus".to_string(), FetchOutcome::TransientFailure("503".into()))];
        assert!(confirm_reachable(&catalog, &failed, &fast_retry(2)).await.is_ok());
        assert!(confirm_reachable(&catalog, &[], &fast_retry(2)).await.is_ok());
    }

    #[tokio::test]
    async fn failures_against_a_down_catalog_are_systemic() {
        let catalog = catalog();
        catalog.set_unreachable(true);
        let results = vec![
            ("Abacus".to_string(), FetchOutcome::TransientFailure("503".into())),
            ("Zebra".to_string(), FetchOutcome::TransientFailure("503".into())),
        ];
        assert!(matches!(
            confirm_reachable(&catalog, &results, &fast_retry(2)).await,
            Err(WikidictError::SystemicCatalog(_))
        ));

        // A single non-transient outcome means the catalog answered.
        let mixed = vec![
            ("Abacus".to_string(), FetchOutcome::TransientFailure("503".into())),
            ("Yak".to_string(), FetchOutcome::NotFound),
        ];
        assert!(confirm_reachable(&catalog, &mixed, &fast_retry(2)).await.is_ok());
    }
}
