//! Corpus storage: the [`EntryStore`] and its JSON Lines container.
//!
//! A container is one metadata record followed by one [`Entry`] per line,
//! sorted by normalized title:
//!
//! ```text
//! {"wikidict":{"format":1,"cursor":"2024-05-01T00:00:00Z"}}
//! {"title":"Abacus","content":"...","last_modified":"..."}
//! {"title":"Zebra","content":"...","last_modified":"..."}
//! ```
//!
//! Loading is forgiving in the ways an appended batch needs: later metadata
//! records are ignored and a repeated title replaces the earlier line.

pub mod container;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use wikidict_shared::{CURRENT_FORMAT_VERSION, Entry, Result, WikidictError, normalize_title};

pub use container::{Compression, ContainerWriter};

/// Key of the metadata record in a container.
pub const META_KEY: &str = "wikidict";

/// Store-level metadata carried in the container's first record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Container format version.
    pub format: u32,
    /// Last successfully synchronized point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<DateTime<Utc>>,
    /// Metadata this version does not know about.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for StoreMeta {
    fn default() -> Self {
        Self {
            format: CURRENT_FORMAT_VERSION,
            cursor: None,
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Serialize)]
struct MetaRecord<'a> {
    wikidict: &'a StoreMeta,
}

/// Title-sorted collection of corpus entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryStore {
    meta: StoreMeta,
    entries: BTreeMap<String, Entry>,
}

impl EntryStore {
    /// Create an empty store with no cursor.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load a container from a file, decompressing by extension.
    pub fn load_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| WikidictError::io(path, e))?;
        let reader = Compression::from_path(path).wrap_reader(file);
        let store = Self::load(reader)?;
        info!(
            path = %path.display(),
            entries = store.len(),
            cursor = ?store.cursor(),
            "corpus loaded"
        );
        Ok(store)
    }

    /// Load a container from an uncompressed JSON Lines reader.
    pub fn load(reader: impl BufRead) -> Result<Self> {
        let mut store = Self::new();
        let mut seen_meta = false;
        let mut duplicates = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.map_err(|e| WikidictError::corrupt(line_no, format!("read failed: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }

            let value: serde_json::Value = serde_json::from_str(&line)
                .map_err(|e| WikidictError::corrupt(line_no, e.to_string()))?;
            let serde_json::Value::Object(mut record) = value else {
                return Err(WikidictError::corrupt(line_no, "record is not a JSON object"));
            };

            if !record.contains_key("title") {
                if let Some(meta) = record.remove(META_KEY) {
                    if seen_meta {
                        debug!(line = line_no, "ignoring additional metadata record");
                        continue;
                    }
                    let meta: StoreMeta = serde_json::from_value(meta).map_err(|e| {
                        WikidictError::corrupt(line_no, format!("invalid metadata: {e}"))
                    })?;
                    if meta.format > CURRENT_FORMAT_VERSION {
                        warn!(
                            format = meta.format,
                            supported = CURRENT_FORMAT_VERSION,
                            "container written by a newer version, unknown fields are kept as-is"
                        );
                    }
                    store.meta = meta;
                    seen_meta = true;
                    continue;
                }
            }

            let entry: Entry = serde_json::from_value(serde_json::Value::Object(record))
                .map_err(|e| WikidictError::corrupt(line_no, format!("invalid entry: {e}")))?;
            if normalize_title(&entry.title).is_empty() {
                return Err(WikidictError::corrupt(line_no, "entry has an empty title"));
            }
            if store.upsert(entry).is_some() {
                duplicates += 1;
            }
        }

        if duplicates > 0 {
            debug!(duplicates, "later lines replaced earlier entries with the same title");
        }

        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    /// Insert or replace an entry by normalized title.
    ///
    /// Content, timestamp and metadata are replaced together. Returns the
    /// superseded entry, if any.
    pub fn upsert(&mut self, mut entry: Entry) -> Option<Entry> {
        entry.title = normalize_title(&entry.title);
        self.entries.insert(entry.title.clone(), entry)
    }

    /// Whether an entry with this (normalized) title exists.
    pub fn contains(&self, title: &str) -> bool {
        self.entries.contains_key(&normalize_title(title))
    }

    /// Look up an entry by (normalized) title.
    pub fn get(&self, title: &str) -> Option<&Entry> {
        self.entries.get(&normalize_title(title))
    }

    /// All titles in byte order of the normalized title.
    ///
    /// The order is part of the contract: dictionary indexing depends on it.
    pub fn titles(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// All entries, in title order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> + Clone + '_ {
        self.entries.values()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only `limit` entries starting at position `start` in title
    /// order, dropping the rest. Metadata is untouched.
    ///
    /// Returns the number of entries dropped.
    pub fn window(&mut self, start: usize, limit: Option<usize>) -> usize {
        let before = self.entries.len();
        let end = limit.map_or(usize::MAX, |n| start.saturating_add(n));
        self.entries = std::mem::take(&mut self.entries)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| (start..end).contains(i))
            .map(|(_, kv)| kv)
            .collect();
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!(start, ?limit, kept = self.entries.len(), dropped, "corpus windowed");
        }
        dropped
    }

    /// Store metadata.
    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    /// Last successfully synchronized point, if any.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.meta.cursor
    }

    /// Move the cursor forward. An older timestamp leaves it unchanged.
    pub fn advance_cursor(&mut self, to: DateTime<Utc>) {
        match self.meta.cursor {
            Some(current) if current >= to => {
                debug!(%current, requested = %to, "cursor not moved backwards");
            }
            _ => self.meta.cursor = Some(to),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the container as uncompressed JSON Lines.
    ///
    /// Output is deterministic for the same logical content.
    pub fn serialize(&self, mut writer: impl Write) -> std::io::Result<()> {
        serde_json::to_writer(&mut writer, &MetaRecord { wikidict: &self.meta })?;
        writer.write_all(b"\n")?;
        write_entries(&mut writer, self.entries.values())
    }

    /// Write the container to `path`, compressing by extension.
    ///
    /// The file is replaced only once the full container has been written.
    #[instrument(skip_all, fields(path = %path.display(), entries = self.len()))]
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomically(path, |w| self.serialize(w))?;
        info!("corpus written");
        Ok(())
    }
}

/// Write an additive batch (entries only, no metadata record) to `path`.
///
/// The result can be appended onto a container written by [`EntryStore::save`]
/// with the same compression.
#[instrument(skip_all, fields(path = %path.display(), entries = entries.len()))]
pub fn write_batch(path: &Path, entries: &[Entry]) -> Result<()> {
    write_atomically(path, |w| write_entries(w, entries.iter()))?;
    info!("batch written");
    Ok(())
}

/// Read a whole container file into memory, decompressed.
pub fn read_to_string(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| WikidictError::io(path, e))?;
    let mut out = String::new();
    Compression::from_path(path)
        .wrap_reader(file)
        .read_to_string(&mut out)
        .map_err(|e| WikidictError::io(path, e))?;
    Ok(out)
}

fn write_entries<'a>(
    mut writer: impl Write,
    entries: impl Iterator<Item = &'a Entry>,
) -> std::io::Result<()> {
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

fn write_atomically(
    path: &Path,
    body: impl FnOnce(&mut ContainerWriter<BufWriter<File>>) -> std::io::Result<()>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| WikidictError::io(parent, e))?;
    }

    let tmp = partial_path(path);
    let file = File::create(&tmp).map_err(|e| WikidictError::io(&tmp, e))?;
    let mut writer = Compression::from_path(path).wrap_writer(BufWriter::new(file));

    let written = body(&mut writer)
        .and_then(|()| writer.finish())
        .and_then(|mut inner| inner.flush());
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(WikidictError::io(&tmp, e));
    }

    std::fs::rename(&tmp, path).map_err(|e| WikidictError::io(path, e))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir()
            .join(format!("wikidict-store-test-{}-{nanos}", std::process::id()))
            .join(name)
    }

    fn to_string(store: &EntryStore) -> String {
        let mut buf = Vec::new();
        store.serialize(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn upsert_replaces_whole_entry() {
        let mut store = EntryStore::new();
        assert!(store.upsert(Entry::new("Abacus", "rev1", ts(1)).with_revision(1)).is_none());

        let old = store
            .upsert(Entry::new("abacus", "rev2", ts(2)))
            .expect("replaced");
        assert_eq!(old.content, "rev1");

        let current = store.get("Abacus").unwrap();
        assert_eq!(current.content, "rev2");
        assert_eq!(current.last_modified, ts(2));
        assert_eq!(current.revision, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lookups_normalize_titles() {
        let mut store = EntryStore::new();
        store.upsert(Entry::new("Zebra crossing", "x", ts(1)));
        assert!(store.contains("zebra_crossing"));
        assert!(store.contains("  Zebra   crossing"));
        assert!(store.get("Zebra").is_none());
    }

    #[test]
    fn titles_are_sorted_and_restartable() {
        let mut store = EntryStore::new();
        for title in ["Zebra", "Abacus", "Yak", "Aardvark"] {
            store.upsert(Entry::new(title, "", ts(1)));
        }
        let titles = store.titles();
        let first: Vec<_> = titles.clone().collect();
        let second: Vec<_> = titles.collect();
        assert_eq!(first, ["Aardvark", "Abacus", "Yak", "Zebra"]);
        assert_eq!(first, second);
    }

    #[test]
    fn window_keeps_a_title_ordered_slice() {
        let mut store = EntryStore::new();
        for title in ["Zebra", "Abacus", "Yak", "Aardvark", "Mole"] {
            store.upsert(Entry::new(title, "", ts(1)));
        }
        store.advance_cursor(ts(3));

        let mut slice = store.clone();
        assert_eq!(slice.window(1, Some(2)), 3);
        assert_eq!(slice.titles().collect::<Vec<_>>(), ["Abacus", "Mole"]);
        assert_eq!(slice.cursor(), Some(ts(3)));

        let mut tail = store.clone();
        assert_eq!(tail.window(3, None), 3);
        assert_eq!(tail.titles().collect::<Vec<_>>(), ["Yak", "Zebra"]);

        let mut past_end = store.clone();
        past_end.window(10, Some(5));
        assert!(past_end.is_empty());

        let mut whole = store.clone();
        assert_eq!(whole.window(0, None), 0);
        assert_eq!(whole, store);
    }

    #[test]
    fn serialization_is_independent_of_insert_order() {
        let mut a = EntryStore::new();
        let mut b = EntryStore::new();
        let entries = [
            Entry::new("Zebra", "z", ts(1)),
            Entry::new("Abacus", "a", ts(2)),
            Entry::new("Mole", "m", ts(3)),
        ];
        for e in &entries {
            a.upsert(e.clone());
        }
        for e in entries.iter().rev() {
            b.upsert(e.clone());
        }
        assert_eq!(to_string(&a), to_string(&b));
    }

    #[test]
    fn load_roundtrip_preserves_unknown_fields() {
        let input = concat!(
            r#"{"wikidict":{"format":1,"cursor":"2024-05-01T00:00:00Z","origin":"ci"}}"#,
            "\n",
            r#"{"title":"Abacus","content":"<p>a</p>","last_modified":"2024-05-01T00:00:00Z","revision":3,"pageid_legacy":9}"#,
            "\n",
        );
        let store = EntryStore::load(input.as_bytes()).expect("load");
        assert_eq!(store.cursor(), Some(ts(1)));
        assert_eq!(store.meta().extra["origin"], "ci");
        assert_eq!(store.get("Abacus").unwrap().extra["pageid_legacy"], 9);
        assert_eq!(to_string(&store), input);
    }

    #[test]
    fn appended_batch_wins_and_keeps_first_cursor() {
        let mut store = EntryStore::new();
        store.upsert(Entry::new("Abacus", "old", ts(1)));
        store.advance_cursor(ts(4));
        let mut bytes = Vec::new();
        store.serialize(&mut bytes).unwrap();

        // A batch from another run: new title plus a newer copy of an old one.
        let batch = concat!(
            r#"{"wikidict":{"format":1,"cursor":"2024-05-09T00:00:00Z"}}"#,
            "\n",
            r#"{"title":"Yak","content":"y","last_modified":"2024-05-05T00:00:00Z"}"#,
            "\n",
            r#"{"title":"Abacus","content":"new","last_modified":"2024-05-05T00:00:00Z"}"#,
            "\n",
        );
        bytes.extend_from_slice(batch.as_bytes());

        let merged = EntryStore::load(bytes.as_slice()).expect("load");
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("Abacus").unwrap().content, "new");
        assert_eq!(merged.cursor(), Some(ts(4)));
    }

    #[test]
    fn corrupt_lines_report_line_number() {
        let input = concat!(
            r#"{"wikidict":{"format":1}}"#,
            "\n\n",
            r#"{"title":"Abacus","content":"a","last_modified":"2024-05-01T00:00:00Z"}"#,
            "\n",
            r#"{"title":"Broken","content":"#,
            "\n",
        );
        match EntryStore::load(input.as_bytes()) {
            Err(WikidictError::CorruptStore { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected CorruptStore, got {other:?}"),
        }

        let missing_content = r#"{"title":"Abacus","last_modified":"2024-05-01T00:00:00Z"}"#;
        assert!(matches!(
            EntryStore::load(missing_content.as_bytes()),
            Err(WikidictError::CorruptStore { line: 1, .. })
        ));

        assert!(matches!(
            EntryStore::load("[1,2]".as_bytes()),
            Err(WikidictError::CorruptStore { line: 1, .. })
        ));
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut store = EntryStore::new();
        store.advance_cursor(ts(5));
        store.advance_cursor(ts(3));
        assert_eq!(store.cursor(), Some(ts(5)));
        store.advance_cursor(ts(6));
        assert_eq!(store.cursor(), Some(ts(6)));
    }

    #[test]
    fn save_and_append_compressed_batch() {
        let corpus = temp_path("all.json.gz");
        let batch = temp_path("batch.json.gz");

        let mut store = EntryStore::new();
        store.upsert(Entry::new("Abacus", "a", ts(1)));
        store.advance_cursor(ts(2));
        store.save(&corpus).expect("save corpus");
        write_batch(&batch, &[Entry::new("Yak", "y", ts(3))]).expect("save batch");
        assert!(!partial_path(&corpus).exists());

        let mut bytes = std::fs::read(&corpus).unwrap();
        bytes.extend(std::fs::read(&batch).unwrap());
        std::fs::write(&corpus, bytes).unwrap();

        let loaded = EntryStore::load_path(&corpus).expect("load appended");
        assert_eq!(loaded.titles().collect::<Vec<_>>(), ["Abacus", "Yak"]);
        assert_eq!(loaded.cursor(), Some(ts(2)));

        let text = read_to_string(&corpus).unwrap();
        assert_eq!(text.lines().count(), 3);

        let _ = std::fs::remove_dir_all(corpus.parent().unwrap());
    }
}
