//! Normalization passes.
//!
//! The link passes are textual rewrites of `href`/`src` attributes; the
//! cleanup pass edits the parsed DOM. Each pass is `&str -> String` and the
//! order matters: article links must be rewritten before the generic
//! `/wiki/` pass sees them.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use scraper::{ElementRef, Html, Selector};

/// Encode an article name the way bare cross-reference hrefs carry it.
pub fn encode_article_target(target: &str) -> String {
    target.replace('_', "%20").replace('/', "%2F")
}

fn is_relative_href(href: &str) -> bool {
    !(href.starts_with("http") || href.starts_with('/') || href.starts_with('#'))
}

// ---------------------------------------------------------------------------
// Pass 1: Internal article links
// ---------------------------------------------------------------------------

pub(crate) fn fix_article_links(html: &str, article_link: &Regex) -> String {
    article_link
        .replace_all(html, |caps: &Captures| {
            format!(r#"href="{}""#, encode_article_target(&caps[1]))
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2 + 3: Other wiki links and /w/ sources
// ---------------------------------------------------------------------------

pub(crate) fn absolutize_wiki_links(html: &str, site_url: &str) -> String {
    html.replace(r#"href="/wiki/"#, &format!(r#"href="{site_url}/wiki/"#))
}

pub(crate) fn absolutize_sources(html: &str, site_url: &str) -> String {
    html.replace(r#"src="/w/"#, &format!(r#"src="{site_url}/w/"#))
}

// ---------------------------------------------------------------------------
// Pass 4: Remaining relative links
// ---------------------------------------------------------------------------

/// Rewrite every relative `href` (not `http…`, `/…` or `#…`) with `f`.
pub fn rewrite_relative_hrefs(html: &str, f: impl Fn(&str) -> String) -> String {
    static HREF_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"href="([^"]*)""#).expect("valid regex"));

    HREF_RE
        .replace_all(html, |caps: &Captures| {
            let href = &caps[1];
            if is_relative_href(href) {
                format!(r#"href="{}""#, f(href))
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

pub(crate) fn encode_relative_links(html: &str) -> String {
    rewrite_relative_hrefs(html, encode_article_target)
}

// ---------------------------------------------------------------------------
// Pass 5: Protocol-relative images
// ---------------------------------------------------------------------------

pub(crate) fn fix_protocol_relative_images(html: &str) -> String {
    html.replace(r#"src="//"#, r#"src="https://"#)
}

// ---------------------------------------------------------------------------
// Pass 6: Page chrome and comments
// ---------------------------------------------------------------------------

static HEADER_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div#headerContainer").expect("valid selector"));
static EDIT_SECTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.mw-editsection").expect("valid selector"));

pub(crate) fn clean_html(html: &str) -> String {
    remove_nodes(html, true, |el| {
        HEADER_SEL.matches(el) || EDIT_SECTION_SEL.matches(el)
    })
}

/// Remove every element for which `matches` holds, and optionally every
/// HTML comment, from an HTML fragment.
///
/// Input without anything to remove is returned unchanged.
pub fn remove_nodes(
    html: &str,
    remove_comments: bool,
    mut matches: impl FnMut(&ElementRef) -> bool,
) -> String {
    let mut doc = Html::parse_fragment(html);

    let mut doomed: Vec<_> = doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches(el))
        .map(|el| el.id())
        .collect();
    if remove_comments {
        doomed.extend(
            doc.tree
                .nodes()
                .filter(|node| node.value().is_comment())
                .map(|node| node.id()),
        );
    }

    if doomed.is_empty() {
        return html.to_string();
    }

    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }

    doc.root_element().inner_html()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_target() {
        assert_eq!(encode_article_target("Yak_(animal)/Notes"), "Yak%20(animal)%2FNotes");
    }

    #[test]
    fn rewrite_skips_absolute_and_anchors() {
        let html = r##"<a href="A_b">1</a><a href="/wiki/X">2</a><a href="#n">3</a><a href="http://x">4</a>"##;
        let out = rewrite_relative_hrefs(html, |h| format!("gdlookup://localhost/{h}"));
        assert!(out.contains(r#"href="gdlookup://localhost/A_b""#));
        assert!(out.contains(r#"href="/wiki/X""#));
        assert!(out.contains(r##"href="#n""##));
        assert!(out.contains(r#"href="http://x""#));
    }

    #[test]
    fn remove_nodes_untouched_when_nothing_matches() {
        let html = "<p>plain   <b>text</b></p>";
        assert_eq!(remove_nodes(html, true, |_| false), html);
    }

    #[test]
    fn remove_nodes_drops_matches_and_comments() {
        let html = "<div><!-- x --><span class=\"drop\">gone</span><p>kept</p></div>";
        let out = remove_nodes(html, true, |el| el.value().classes().any(|c| c == "drop"));
        assert_eq!(out, "<div><p>kept</p></div>");
    }
}
