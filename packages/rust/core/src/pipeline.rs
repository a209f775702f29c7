//! Progress reporting and the per-run log.

use std::fmt;
use std::io::{self, Write};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pass status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as each title's fetch completes (after retries).
    fn title_fetched(&self, title: &str, current: usize, total: usize);
    /// Called when a pass completes.
    fn done(&self, log: &RunLog);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn title_fetched(&self, _title: &str, _current: usize, _total: usize) {}
    fn done(&self, _log: &RunLog) {}
}

// ---------------------------------------------------------------------------
// Run log
// ---------------------------------------------------------------------------

/// What happened to one title during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleStatus {
    /// Replaced an existing entry.
    Updated,
    /// New to the store or batch.
    Added,
    /// The catalog does not know the title. Eligible again next run.
    Unresolved,
    /// Still failing after all retries.
    Failed(String),
}

/// Operator-facing record of a pass, one line per title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLog {
    records: Vec<(String, TitleStatus)>,
}

impl RunLog {
    pub fn record(&mut self, title: impl Into<String>, status: TitleStatus) {
        self.records.push((title.into(), status));
    }

    pub fn records(&self) -> &[(String, TitleStatus)] {
        &self.records
    }

    fn titles_where(&self, pred: impl Fn(&TitleStatus) -> bool) -> Vec<&str> {
        self.records
            .iter()
            .filter(|(_, status)| pred(status))
            .map(|(title, _)| title.as_str())
            .collect()
    }

    pub fn updated(&self) -> Vec<&str> {
        self.titles_where(|s| *s == TitleStatus::Updated)
    }

    pub fn added(&self) -> Vec<&str> {
        self.titles_where(|s| *s == TitleStatus::Added)
    }

    pub fn unresolved(&self) -> Vec<&str> {
        self.titles_where(|s| *s == TitleStatus::Unresolved)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.titles_where(|s| matches!(s, TitleStatus::Failed(_)))
    }

    /// Titles written to the store or batch.
    pub fn touched(&self) -> usize {
        self.updated().len() + self.added().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Closing line of the log.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Already up-to-date".to_string();
        }
        format!(
            "{} titles touched ({} updated, {} added, {} unresolved, {} failed)",
            self.touched(),
            self.updated().len(),
            self.added().len(),
            self.unresolved().len(),
            self.failed().len()
        )
    }

    /// Write every line and the summary.
    pub fn write_to(&self, mut out: impl Write) -> io::Result<()> {
        write!(out, "{self}")
    }
}

impl fmt::Display for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (title, status) in &self.records {
            match status {
                TitleStatus::Updated => writeln!(f, "updated: {title}")?,
                TitleStatus::Added => writeln!(f, "added: {title}")?,
                TitleStatus::Unresolved => writeln!(f, "unresolved: {title} (not found)")?,
                TitleStatus::Failed(reason) => writeln!(f, "failed: {title} ({reason})")?,
            }
        }
        writeln!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_is_up_to_date() {
        let log = RunLog::default();
        assert_eq!(log.to_string(), "Already up-to-date\n");
        assert_eq!(log.touched(), 0);
    }

    #[test]
    fn renders_one_line_per_title() {
        let mut log = RunLog::default();
        log.record("Abacus", TitleStatus::Updated);
        log.record("Yak", TitleStatus::Unresolved);
        log.record("Mole", TitleStatus::Failed("HTTP 503".into()));
        log.record("Zebra", TitleStatus::Added);

        let text = log.to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "updated: Abacus",
                "unresolved: Yak (not found)",
                "failed: Mole (HTTP 503)",
                "added: Zebra",
                "2 titles touched (1 updated, 1 added, 1 unresolved, 1 failed)",
            ]
        );

        let mut buf = Vec::new();
        log.write_to(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), text);
    }
}
