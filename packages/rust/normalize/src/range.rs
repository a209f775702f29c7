//! Scan-page range detection.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use wikidict_shared::{PageRange, Result, WikidictError};

static PAGENUM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.pagenum").expect("valid selector"));

/// Detects which scan pages an article is transcluded from.
#[derive(Debug, Clone)]
pub struct PageRangeDetector {
    pattern: Regex,
}

impl PageRangeDetector {
    /// `pattern` matches scan-page names; group 1 captures the volume.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| WikidictError::config(format!("invalid source page pattern: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn detect(&self, html: &str) -> Option<PageRange> {
        detect_page_range(html, &self.pattern)
    }
}

/// Read the `span.pagenum` markers of an article.
///
/// The volume comes from the first marker's `data-page-name`; start and end
/// are the min and max `data-page-index`. A marker missing either attribute,
/// or naming a page the pattern does not recognize, means no range.
pub fn detect_page_range(html: &str, pattern: &Regex) -> Option<PageRange> {
    let doc = Html::parse_fragment(html);

    let mut volume = None;
    let mut start = u32::MAX;
    let mut end = 0;

    for span in doc.select(&PAGENUM_SEL) {
        let el = span.value();
        let name = el.attr("data-page-name")?;
        let index: u32 = el.attr("data-page-index")?.trim().parse().ok()?;

        if volume.is_none() {
            let caps = pattern.captures(name)?;
            volume = Some(caps.get(1)?.as_str().parse().ok()?);
        }
        start = start.min(index);
        end = end.max(index);
    }

    volume.map(|volume| PageRange { volume, start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> PageRangeDetector {
        PageRangeDetector::new(r"^Page:EB1911 - Volume (\d+)\.djvu/(\d+)$").unwrap()
    }

    fn marker(page: u32) -> String {
        format!(
            r#"<span class="pagenum ws-pagenum" data-page-name="Page:EB1911 - Volume 03.djvu/{page}" data-page-index="{page}"></span>"#
        )
    }

    #[test]
    fn range_spans_min_to_max() {
        let html = format!("<p>{}text{}more{}</p>", marker(121), marker(119), marker(120));
        assert_eq!(
            detector().detect(&html),
            Some(PageRange { volume: 3, start: 119, end: 121 })
        );
    }

    #[test]
    fn no_markers_no_range() {
        assert_eq!(detector().detect("<p>Plain article</p>"), None);
    }

    #[test]
    fn incomplete_marker_yields_no_range() {
        let html = format!(
            r#"{}<span class="pagenum" data-page-name="Page:EB1911 - Volume 03.djvu/122"></span>"#,
            marker(121)
        );
        assert_eq!(detector().detect(&html), None);
    }

    #[test]
    fn unrecognized_page_name_yields_no_range() {
        let html = r#"<span class="pagenum" data-page-name="Page:Other.djvu/4" data-page-index="4"></span>"#;
        assert_eq!(detector().detect(html), None);
    }
}
