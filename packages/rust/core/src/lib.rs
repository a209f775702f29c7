//! Corpus synchronization for wikidict.
//!
//! This crate ties the remote catalog, the normalizer and the entry store
//! together into the two update passes:
//! - [`UpdateEngine::delta_sync`]: pull everything changed since the cursor
//! - [`UpdateEngine::backfill`]: fetch reference titles the store lacks

pub mod backfill;
pub mod fetch;
pub mod pipeline;
pub mod update;

pub use backfill::{Batch, missing_titles, parse_title_arg};
pub use pipeline::{ProgressReporter, RunLog, SilentProgress, TitleStatus};
pub use update::{DeltaOutcome, UpdateEngine};
