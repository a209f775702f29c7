//! Catalog backed by the MediaWiki action API.
//!
//! Titles come from `list=allpages`, the change feed from
//! `list=recentchanges`, and article HTML from `action=parse`. Every list
//! query follows the API's `continue` protocol until exhausted.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use wikidict_shared::{CatalogConfig, Entry, Result, WikidictError};

use crate::{ChangeKind, ChangeSet, ChangedTitle, FetchOutcome, RemoteCatalog};

/// Format used for `rcstart`.
const API_TIMESTAMP: &str = "%Y%m%d%H%M%S";

type Params = Vec<(String, String)>;

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Response shapes (formatversion=2)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct ListedPage {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RecentChange {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RevisionPage {
    #[serde(default)]
    pageid: Option<u64>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<RevisionInfo>,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    revid: u64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    title: String,
    pageid: u64,
    #[serde(default)]
    revid: Option<u64>,
    text: String,
}

fn api_error(value: &Value) -> Option<ApiError> {
    value
        .get("error")
        .and_then(|e| serde_json::from_value(e.clone()).ok())
}

// ---------------------------------------------------------------------------
// MediaWikiCatalog
// ---------------------------------------------------------------------------

/// [`RemoteCatalog`] talking to a MediaWiki `api.php` endpoint.
pub struct MediaWikiCatalog {
    client: Client,
    api_url: Url,
    title_prefix: String,
    namespaces: String,
    source_page: Regex,
}

impl MediaWikiCatalog {
    /// Create a catalog from the `[catalog]` config section.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url).map_err(|e| {
            WikidictError::config(format!("invalid catalog.api_url '{}': {e}", config.api_url))
        })?;

        let source_page = Regex::new(&config.source_page_pattern).map_err(|e| {
            WikidictError::config(format!("invalid catalog.source_page_pattern: {e}"))
        })?;
        if source_page.captures_len() < 3 {
            return Err(WikidictError::config(
                "catalog.source_page_pattern needs two capture groups (volume, page)",
            ));
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WikidictError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url,
            title_prefix: config.title_prefix.clone(),
            namespaces: config.namespaces.clone(),
            source_page,
        })
    }

    /// Volume and page index of a scan-page title, if it is one.
    pub fn source_page_of(&self, title: &str) -> Option<(u32, u32)> {
        let caps = self.source_page.captures(title)?;
        let volume = caps.get(1)?.as_str().parse().ok()?;
        let page = caps.get(2)?.as_str().parse().ok()?;
        Some((volume, page))
    }

    async fn call(&self, params: &Params) -> Result<Value> {
        debug!(?params, "api request");

        let response = self
            .client
            .get(self.api_url.clone())
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await
            .map_err(|e| WikidictError::Network(format!("{}: {e}", self.api_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WikidictError::Network(format!(
                "{}: HTTP {status}",
                self.api_url
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| WikidictError::parse(format!("invalid API response: {e}")))
    }

    /// Run a list query to exhaustion, collecting `query.<list_key>`.
    async fn query_list<T: DeserializeOwned>(&self, base: Params, list_key: &str) -> Result<Vec<T>> {
        let pointer = format!("/query/{list_key}");
        let mut items = Vec::new();
        let mut continuation: Params = Vec::new();

        loop {
            let mut request = base.clone();
            request.append(&mut continuation);

            let mut value = self.call(&request).await?;
            if let Some(err) = api_error(&value) {
                return Err(WikidictError::Network(format!(
                    "API error {}: {}",
                    err.code, err.info
                )));
            }

            let batch = value
                .pointer_mut(&pointer)
                .map(Value::take)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            let batch: Vec<T> = serde_json::from_value(batch)
                .map_err(|e| WikidictError::parse(format!("unexpected {list_key} shape: {e}")))?;
            debug!(list = list_key, batch = batch.len(), "list batch");
            items.extend(batch);

            match value.get("continue").and_then(Value::as_object) {
                Some(cont) => {
                    continuation = cont
                        .iter()
                        .map(|(k, v)| {
                            let v = v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string());
                            (k.clone(), v)
                        })
                        .collect();
                }
                None => break,
            }
        }

        Ok(items)
    }

    async fn fetch_page(&self, title: &str) -> Result<Option<Entry>> {
        let value = self
            .call(&params(&[
                ("action", "query"),
                ("prop", "revisions"),
                ("titles", title),
                ("rvprop", "ids|timestamp"),
            ]))
            .await?;
        if let Some(err) = api_error(&value) {
            return Err(WikidictError::Network(format!(
                "API error {}: {}",
                err.code, err.info
            )));
        }

        let pages = value
            .pointer("/query/pages")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let pages: Vec<RevisionPage> = serde_json::from_value(pages)
            .map_err(|e| WikidictError::parse(format!("unexpected pages shape: {e}")))?;

        let Some(page) = pages.into_iter().next() else {
            return Ok(None);
        };
        if page.missing || page.invalid {
            return Ok(None);
        }
        let (Some(page_id), Some(revision)) = (page.pageid, page.revisions.into_iter().next())
        else {
            return Ok(None);
        };

        let value = self
            .call(&params(&[
                ("action", "parse"),
                ("pageid", &page_id.to_string()),
                ("prop", "text"),
            ]))
            .await?;
        if let Some(err) = api_error(&value) {
            return match err.code.as_str() {
                "missingtitle" | "nosuchpageid" => Ok(None),
                _ => Err(WikidictError::Network(format!(
                    "API error {}: {}",
                    err.code, err.info
                ))),
            };
        }

        let parsed = value
            .get("parse")
            .cloned()
            .ok_or_else(|| WikidictError::parse("response has no parse object"))?;
        let parsed: ParsedPage = serde_json::from_value(parsed)
            .map_err(|e| WikidictError::parse(format!("unexpected parse shape: {e}")))?;

        Ok(Some(
            Entry::new(&parsed.title, parsed.text, revision.timestamp)
                .with_revision(parsed.revid.unwrap_or(revision.revid))
                .with_page_id(parsed.pageid),
        ))
    }
}

#[async_trait]
impl RemoteCatalog for MediaWikiCatalog {
    async fn ping(&self) -> Result<()> {
        let value = self
            .call(&params(&[("action", "query"), ("meta", "siteinfo"), ("siprop", "general")]))
            .await?;
        if let Some(err) = api_error(&value) {
            return Err(WikidictError::Network(format!(
                "API error {}: {}",
                err.code, err.info
            )));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(prefix = %self.title_prefix))]
    async fn list_titles(&self) -> Result<Vec<String>> {
        let pages: Vec<ListedPage> = self
            .query_list(
                params(&[
                    ("action", "query"),
                    ("list", "allpages"),
                    ("apprefix", &self.title_prefix),
                    ("aplimit", "max"),
                ]),
                "allpages",
            )
            .await?;

        info!(titles = pages.len(), "catalog listed");
        Ok(pages.into_iter().map(|p| p.title).collect())
    }

    #[instrument(skip_all, fields(since = ?since))]
    async fn changed_since(&self, since: Option<DateTime<Utc>>) -> Result<ChangeSet> {
        let Some(since) = since else {
            info!("no cursor, listing every title");
            return Ok(ChangeSet::listing(self.list_titles().await?));
        };

        let rcstart = since.format(API_TIMESTAMP).to_string();
        let changes: Vec<RecentChange> = self
            .query_list(
                params(&[
                    ("action", "query"),
                    ("list", "recentchanges"),
                    ("rcstart", &rcstart),
                    ("rcdir", "newer"),
                    ("rcnamespace", &self.namespaces),
                    ("rctoponly", "1"),
                    ("rctype", "edit|new"),
                    ("rcshow", "!redirect|!anon|!bot"),
                    ("rcprop", "title|timestamp|ids"),
                    ("rclimit", "max"),
                ]),
                "recentchanges",
            )
            .await?;

        let mut set = ChangeSet::default();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for change in changes {
            if change.title.starts_with(&self.title_prefix) {
                let kind = if change.kind == "new" {
                    ChangeKind::New
                } else {
                    ChangeKind::Edit
                };
                // Feed is oldest first; keep the newest timestamp per title.
                match seen.get(&change.title) {
                    Some(&idx) => set.titles[idx].last_modified = change.timestamp,
                    None => {
                        seen.insert(change.title.clone(), set.titles.len());
                        set.titles.push(ChangedTitle {
                            title: change.title,
                            kind,
                            last_modified: change.timestamp,
                        });
                    }
                }
            } else if let Some((volume, page)) = self.source_page_of(&change.title) {
                debug!(title = %change.title, "scan page changed");
                set.add_source_page(volume, page);
            }
        }

        info!(
            titles = set.titles.len(),
            volumes = set.source_pages.len(),
            "change feed read"
        );
        Ok(set)
    }

    async fn fetch(&self, title: &str) -> FetchOutcome {
        match self.fetch_page(title).await {
            Ok(Some(entry)) => FetchOutcome::Found(entry),
            Ok(None) => FetchOutcome::NotFound,
            Err(e) => FetchOutcome::TransientFailure(e.to_string()),
        }
    }
}
