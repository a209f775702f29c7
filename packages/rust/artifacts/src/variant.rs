//! Content rendering variants.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use wikidict_normalize::{remove_nodes, rewrite_relative_hrefs};
use wikidict_shared::WikidictError;

/// Link scheme the compat readers resolve as a headword lookup.
pub const LOOKUP_SCHEME: &str = "gdlookup://localhost/";

static EDIT_SECTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.mw-editsection").expect("valid selector"));
static PAGENUM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.pagenum").expect("valid selector"));

/// How article payloads are rendered into an artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Content as stored.
    #[default]
    Default,
    /// Lookup-scheme cross references, decorative markup stripped.
    Compat,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Default, Variant::Compat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Default => "default",
            Variant::Compat => "compat",
        }
    }

    /// Render one article payload.
    pub fn apply<'a>(&self, html: &'a str) -> Cow<'a, str> {
        match self {
            Variant::Default => Cow::Borrowed(html),
            Variant::Compat => {
                let stripped = remove_nodes(html, true, is_decoration);
                Cow::Owned(rewrite_relative_hrefs(&stripped, |href| {
                    format!("{LOOKUP_SCHEME}{href}")
                }))
            }
        }
    }
}

fn is_decoration(el: &ElementRef) -> bool {
    if EDIT_SECTION_SEL.matches(el) {
        return true;
    }
    // Empty page-number anchors.
    PAGENUM_SEL.matches(el) && el.text().all(|t| t.trim().is_empty())
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = WikidictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Variant::Default),
            "compat" | "goldendict" => Ok(Variant::Compat),
            other => Err(WikidictError::validation(format!(
                "unknown variant '{other}' (expected default or compat)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity() {
        let html = r#"<a href="Yak">Yak</a><!-- c -->"#;
        assert!(matches!(Variant::Default.apply(html), Cow::Borrowed(s) if s == html));
    }

    #[test]
    fn compat_rewrites_relative_links_only() {
        let html = r##"<p><a href="Yak%20ox">Yak</a> <a href="https://x.org/">x</a> <a href="#n1">1</a></p>"##;
        let out = Variant::Compat.apply(html);
        assert!(out.contains(r#"href="gdlookup://localhost/Yak%20ox""#), "{out}");
        assert!(out.contains(r#"href="https://x.org/""#));
        assert!(out.contains(r##"href="#n1""##));
    }

    #[test]
    fn compat_strips_decoration() {
        let html = concat!(
            r#"<div><!-- limit report --><h2>History<span class="mw-editsection">[edit]</span></h2>"#,
            r#"<span class="pagenum" data-page-index="4"></span><span class="pagenum">p. 4</span><p>Body</p></div>"#,
        );
        let out = Variant::Compat.apply(html);
        assert!(!out.contains("limit report"));
        assert!(!out.contains("[edit]"));
        assert!(!out.contains("data-page-index"));
        assert!(out.contains("p. 4"));
        assert!(out.contains("<p>Body</p>"));
    }

    #[test]
    fn parses_names() {
        assert_eq!("compat".parse::<Variant>().unwrap(), Variant::Compat);
        assert_eq!("Default".parse::<Variant>().unwrap(), Variant::Default);
        assert!("slob".parse::<Variant>().is_err());
        assert_eq!(Variant::Compat.to_string(), "compat");
    }
}
