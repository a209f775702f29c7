//! Dictionary artifacts: compilation and reading.
//!
//! This crate provides:
//! - [`compile`]: turn an [`EntryStore`](wikidict_storage::EntryStore) into
//!   a sorted, block-compressed dictionary
//! - [`Variant`]: how article content is rendered into an artifact
//! - [`Dictionary`]: binary-search lookups over a compiled artifact
//! - [`format`]: the byte layout shared by both sides

mod compiler;
pub mod format;
mod reader;
mod variant;

use std::path::Path;

use tracing::info;

use wikidict_shared::{Result, WikidictError};

pub use compiler::{CompileOptions, CompileOutput, CompileReport, RESOURCE_PREFIX, compile};
pub use format::Header;
pub use reader::{Article, Dictionary};
pub use variant::{LOOKUP_SCHEME, Variant};

/// Write compiled bytes to `path`.
///
/// An existing file is only replaced when `force` is set; the new file
/// appears only once fully written.
pub fn write_artifact(path: &Path, bytes: &[u8], force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(WikidictError::validation(format!(
            "output file {} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WikidictError::io(parent, e))?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".partial");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, bytes).map_err(|e| WikidictError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| WikidictError::io(path, e))?;

    info!(path = %path.display(), bytes = bytes.len(), "dictionary written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use wikidict_shared::Entry;
    use wikidict_storage::EntryStore;

    const PREFIX: &str = "1911 Encyclopædia Britannica/";

    fn store(entries: &[(&str, &str)]) -> EntryStore {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut store = EntryStore::new();
        for (title, content) in entries {
            store.upsert(Entry::new(format!("{PREFIX}{title}"), *content, ts));
        }
        store
    }

    fn options(variant: Variant) -> CompileOptions {
        CompileOptions {
            variant,
            ..CompileOptions::default()
        }
    }

    #[test]
    fn both_variants_index_every_title() {
        let store = store(&[
            ("Abacus", r#"<p>Counting frame, see <a href="Zebra">Zebra</a>.</p>"#),
            ("Zebra", "<p>Striped.</p>"),
        ]);

        for variant in Variant::ALL {
            let out = compile(&store, &options(variant)).unwrap();
            let dict = Dictionary::from_bytes(out.bytes).unwrap();

            assert_eq!(dict.keys().collect::<Vec<_>>(), ["Abacus", "Zebra"]);
            assert_eq!(dict.variant(), variant.as_str());
            assert_eq!(dict.tag("label"), Some("1911 Encyclopædia Britannica"));

            let abacus = dict.get("Abacus").unwrap().expect("Abacus indexed");
            assert_eq!(abacus.content_type, format::HTML_CONTENT_TYPE);
            match variant {
                Variant::Default => assert!(abacus.text().contains(r#"href="Zebra""#)),
                Variant::Compat => {
                    assert!(abacus.text().contains(r#"href="gdlookup://localhost/Zebra""#))
                }
            }
            assert!(dict.get("Yak").unwrap().is_none());
        }
    }

    #[test]
    fn write_artifact_refuses_overwrite_without_force() {
        let dir = std::env::temp_dir().join(format!(
            "wikidict-artifact-test-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let path = dir.join("eb.wikidict");

        write_artifact(&path, b"first", false).unwrap();
        assert!(matches!(
            write_artifact(&path, b"second", false),
            Err(WikidictError::Validation { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        write_artifact(&path, b"second", true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
