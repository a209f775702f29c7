//! Content normalization for fetched wiki HTML.
//!
//! [`Normalizer`] makes article HTML self-contained: links between corpus
//! articles become bare (percent-encoded) article names, other wiki links and
//! image sources become absolute, and page chrome is removed. The DOM helpers
//! ([`remove_nodes`], [`rewrite_relative_hrefs`]) are shared with the
//! dictionary variants.
//!
//! [`PageRangeDetector`] reads the scan-page markers an article is
//! transcluded from.

mod passes;
mod range;

use regex::Regex;
use tracing::{debug, instrument};
use url::Url;

use wikidict_shared::{CatalogConfig, Entry, Result, WikidictError};

pub use passes::{encode_article_target, remove_nodes, rewrite_relative_hrefs};
pub use range::{PageRangeDetector, detect_page_range};

/// Applies the normalization passes in order.
#[derive(Debug, Clone)]
pub struct Normalizer {
    article_link: Regex,
    site_url: String,
}

impl Normalizer {
    /// Build a normalizer for the configured site and article link prefix.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let site = Url::parse(&config.site_url).map_err(|e| {
            WikidictError::config(format!("invalid catalog.site_url '{}': {e}", config.site_url))
        })?;
        let article_link = Regex::new(&format!(
            r#"href="{}([^"]*)""#,
            regex::escape(&config.article_link_prefix)
        ))
        .map_err(|e| WikidictError::config(format!("invalid catalog.article_link_prefix: {e}")))?;

        Ok(Self {
            article_link,
            site_url: site.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Run every pass over `html`.
    pub fn normalize(&self, html: &str) -> String {
        let html = passes::fix_article_links(html, &self.article_link);
        let html = passes::absolutize_wiki_links(&html, &self.site_url);
        let html = passes::absolutize_sources(&html, &self.site_url);
        let html = passes::encode_relative_links(&html);
        let html = passes::fix_protocol_relative_images(&html);
        passes::clean_html(&html)
    }

    /// Normalize an entry's content in place.
    #[instrument(skip_all, fields(title = %entry.title))]
    pub fn normalize_entry(&self, entry: &mut Entry) {
        let before = entry.content.len();
        entry.content = self.normalize(&entry.content);
        debug!(before, after = entry.content.len(), "normalized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn normalizer() -> Normalizer {
        Normalizer::new(&CatalogConfig::default()).unwrap()
    }

    #[test]
    fn internal_article_links_become_bare_targets() {
        let html = r#"<p>See <a href="/wiki/1911_Encyclop%C3%A6dia_Britannica/Yak_(animal)">Yak</a>.</p>"#;
        let out = normalizer().normalize(html);
        assert!(out.contains(r#"href="Yak%20(animal)""#), "{out}");
    }

    #[test]
    fn nested_article_targets_escape_slashes() {
        let html = r#"<a href="/wiki/1911_Encyclop%C3%A6dia_Britannica/Abacus/Notes">n</a>"#;
        let out = normalizer().normalize(html);
        assert!(out.contains(r#"href="Abacus%2FNotes""#), "{out}");
    }

    #[test]
    fn other_wiki_links_and_sources_become_absolute() {
        let html = concat!(
            r#"<a href="/wiki/Author:Someone">a</a>"#,
            r#"<img src="/w/index.php?title=Special:FilePath&amp;file=X.png">"#,
            r#"<img src="//upload.wikimedia.org/x.png">"#,
        );
        let out = normalizer().normalize(html);
        assert!(out.contains(r#"href="https://en.wikisource.org/wiki/Author:Someone""#), "{out}");
        assert!(out.contains(r#"src="https://en.wikisource.org/w/index.php"#), "{out}");
        assert!(out.contains(r#"src="https://upload.wikimedia.org/x.png""#), "{out}");
    }

    #[test]
    fn relative_links_are_encoded_anchors_kept() {
        let html = r##"<a href="Zebra_crossing">z</a><a href="#cite_note-1">1</a><a href="https://example.org/a_b">x</a>"##;
        let out = normalizer().normalize(html);
        assert!(out.contains(r#"href="Zebra%20crossing""#), "{out}");
        assert!(out.contains(r##"href="#cite_note-1""##), "{out}");
        assert!(out.contains(r#"href="https://example.org/a_b""#), "{out}");
    }

    #[test]
    fn chrome_and_comments_are_removed() {
        let html = concat!(
            r#"<div id="headerContainer"><b>Header</b></div>"#,
            r#"<div class="mw-parser-output"><!-- NewPP limit report -->"#,
            r#"<h2>Abacus<span class="mw-editsection">[edit]</span></h2><p>Body</p></div>"#,
        );
        let out = normalizer().normalize(html);
        assert!(!out.contains("Header"));
        assert!(!out.contains("NewPP"));
        assert!(!out.contains("[edit]"));
        assert!(out.contains("<p>Body</p>"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let html = concat!(
            r#"<div class="mw-parser-output"><!-- c --><a href="/wiki/1911_Encyclop%C3%A6dia_Britannica/Yak">Yak</a>"#,
            r#"<a href="Mole_rat">m</a><img src="//x.org/a.png"></div>"#,
        );
        let n = normalizer();
        let once = n.normalize(html);
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn normalize_entry_rewrites_content() {
        let mut entry = Entry::new("Abacus", r#"<a href="Yak_ox">y</a>"#, Utc::now());
        normalizer().normalize_entry(&mut entry);
        assert!(entry.content.contains(r#"href="Yak%20ox""#));
    }

    #[test]
    fn rejects_invalid_site_url() {
        let config = CatalogConfig {
            site_url: "not a url".into(),
            ..CatalogConfig::default()
        };
        assert!(Normalizer::new(&config).is_err());
    }
}
