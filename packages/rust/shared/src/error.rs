//! Error types for wikidict.
//!
//! Library crates use [`WikidictError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-title failures ([`WikidictError::TransientFetch`],
//! [`WikidictError::NotFound`], [`WikidictError::Encode`]) are logged and
//! skipped by the pipelines; only structural or systemic errors abort a run.

use std::path::PathBuf;

/// Top-level error type for all wikidict operations.
#[derive(Debug, thiserror::Error)]
pub enum WikidictError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A single title could not be fetched (network hiccup, rate limit, 5xx).
    #[error("transient fetch error for '{title}': {message}")]
    TransientFetch { title: String, message: String },

    /// The remote source reports the title as absent.
    #[error("title not found: '{title}'")]
    NotFound { title: String },

    /// The corpus container could not be parsed.
    #[error("corrupt corpus container at line {line}: {message}")]
    CorruptStore { line: usize, message: String },

    /// The remote catalog is unreachable or rejects every query.
    #[error("remote catalog unavailable: {0}")]
    SystemicCatalog(String),

    /// A single entry cannot be transformed or encoded into a dictionary.
    #[error("cannot encode '{key}': {message}")]
    Encode { key: String, message: String },

    /// Network/HTTP error talking to the remote catalog.
    #[error("network error: {0}")]
    Network(String),

    /// Remote response or input parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A compiled dictionary artifact is malformed.
    #[error("invalid dictionary artifact: {message}")]
    Artifact { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad input, refused overwrite, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run exceeded its configured time budget.
    #[error("run timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WikidictError>;

impl WikidictError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an artifact error from any displayable message.
    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact {
            message: msg.into(),
        }
    }

    /// Create a corrupt-store error for a 1-based container line.
    pub fn corrupt(line: usize, msg: impl Into<String>) -> Self {
        Self::CorruptStore {
            line,
            message: msg.into(),
        }
    }

    /// Create an encode error for a dictionary key.
    pub fn encode(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Encode {
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only affects a single title and must not abort a run.
    pub fn is_per_title(&self) -> bool {
        matches!(
            self,
            Self::TransientFetch { .. } | Self::NotFound { .. } | Self::Encode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = WikidictError::config("missing api_url");
        assert_eq!(err.to_string(), "config error: missing api_url");

        let err = WikidictError::corrupt(7, "expected value");
        assert_eq!(
            err.to_string(),
            "corrupt corpus container at line 7: expected value"
        );

        let err = WikidictError::NotFound {
            title: "Yak".into(),
        };
        assert!(err.to_string().contains("'Yak'"));
    }

    #[test]
    fn per_title_classification() {
        assert!(WikidictError::encode("Abacus", "binary content").is_per_title());
        assert!(
            WikidictError::TransientFetch {
                title: "Abacus".into(),
                message: "HTTP 503".into(),
            }
            .is_per_title()
        );
        assert!(!WikidictError::SystemicCatalog("down".into()).is_per_title());
        assert!(!WikidictError::corrupt(1, "bad").is_per_title());
    }
}
