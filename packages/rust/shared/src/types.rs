//! Core domain types for the wikidict corpus.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WikidictError};

/// Current format version of the corpus container.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Titles
// ---------------------------------------------------------------------------

/// Normalize a page title the way MediaWiki does.
///
/// Underscores become spaces, whitespace runs collapse to a single space,
/// the result is trimmed and its first character upper-cased.
pub fn normalize_title(raw: &str) -> String {
    let spaced = raw.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Parse a cursor timestamp given on the command line.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`) or the compact MediaWiki form
/// `YYYYMMDD[hhmmss]`, right-padded with zeros to 14 digits.
pub fn parse_cursor(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    if raw.len() < 8 || raw.len() > 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WikidictError::parse(format!(
            "invalid timestamp '{raw}': expected RFC 3339 or YYYYMMDD[hhmmss]"
        )));
    }

    let padded = format!("{raw:0<14}");
    NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| WikidictError::parse(format!("invalid timestamp '{raw}': {e}")))
}

// ---------------------------------------------------------------------------
// PageRange
// ---------------------------------------------------------------------------

/// Range of scanned source pages an article is transcluded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    /// Volume number of the scan.
    pub volume: u32,
    /// First page index (inclusive).
    pub start: u32,
    /// Last page index (inclusive).
    pub end: u32,
}

impl PageRange {
    /// Whether `page` of `volume` falls inside this range.
    pub fn contains(&self, volume: u32, page: u32) -> bool {
        self.volume == volume && (self.start..=self.end).contains(&page)
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A single titled article of the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Normalized, unique title.
    pub title: String,
    /// HTML payload.
    pub content: String,
    /// Timestamp of the revision `content` was taken from.
    pub last_modified: DateTime<Utc>,
    /// Remote revision id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    /// Remote page id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<u64>,
    /// Scan pages the content is transcluded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_range: Option<PageRange>,
    /// Fields this version does not know about, kept as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Entry {
    /// Create an entry with a normalized title and no optional metadata.
    pub fn new(
        title: impl AsRef<str>,
        content: impl Into<String>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            title: normalize_title(title.as_ref()),
            content: content.into(),
            last_modified,
            revision: None,
            page_id: None,
            source_range: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the remote revision id.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Set the remote page id.
    pub fn with_page_id(mut self, page_id: u64) -> Self {
        self.page_id = Some(page_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_title_rules() {
        assert_eq!(normalize_title("abacus"), "Abacus");
        assert_eq!(normalize_title("  Zebra   crossing "), "Zebra crossing");
        assert_eq!(
            normalize_title("1911_Encyclopædia_Britannica/Yak"),
            "1911 Encyclopædia Britannica/Yak"
        );
        assert_eq!(normalize_title("élan"), "Élan");
        assert_eq!(normalize_title("   "), "");
    }

    #[test]
    fn parse_cursor_compact_and_rfc3339() {
        let compact = parse_cursor("20240501").expect("compact date");
        assert_eq!(compact, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());

        let full = parse_cursor("20240501123045").expect("compact datetime");
        assert_eq!(full, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap());

        let rfc = parse_cursor("2024-05-01T12:30:45+02:00").expect("rfc3339");
        assert_eq!(rfc, Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 45).unwrap());
    }

    #[test]
    fn parse_cursor_rejects_garbage() {
        assert!(parse_cursor("yesterday").is_err());
        assert!(parse_cursor("2024").is_err());
        assert!(parse_cursor("20241399").is_err());
    }

    #[test]
    fn page_range_contains() {
        let range = PageRange {
            volume: 3,
            start: 10,
            end: 12,
        };
        assert!(range.contains(3, 10));
        assert!(range.contains(3, 12));
        assert!(!range.contains(3, 13));
        assert!(!range.contains(4, 11));
    }

    #[test]
    fn entry_preserves_unknown_fields() {
        let json = r#"{"title":"Abacus","content":"<p>x</p>","last_modified":"2024-05-01T00:00:00Z","revid_legacy":42,"volume_note":"a"}"#;
        let entry: Entry = serde_json::from_str(json).expect("deserialize");
        assert_eq!(entry.title, "Abacus");
        assert_eq!(entry.extra.len(), 2);
        assert_eq!(entry.extra["revid_legacy"], 42);

        let back = serde_json::to_string(&entry).expect("serialize");
        assert!(back.contains("\"revid_legacy\":42"));
        assert!(back.contains("\"volume_note\":\"a\""));
    }

    #[test]
    fn entry_skips_absent_optionals() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = Entry::new("zebra", "", ts).with_revision(7);
        let json = serde_json::to_string(&entry).expect("serialize");
        assert_eq!(
            json,
            r#"{"title":"Zebra","content":"","last_modified":"2024-01-01T00:00:00Z","revision":7}"#
        );
    }
}
