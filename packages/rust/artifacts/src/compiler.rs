//! Dictionary compiler.
//!
//! Items (articles and resources) are keyed, sorted by key bytes, packed
//! into blocks in key order and zlib-compressed block by block. The index
//! maps every key to `(block, offset, length, content type)`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use wikidict_shared::{AppConfig, CompileConfig, DictionaryMetaConfig, Result, WikidictError};
use wikidict_storage::EntryStore;

use crate::format::{
    BLOCK_TABLE_ENTRY, COMPRESSION_ZLIB, HTML_CONTENT_TYPE, Header, INDEX_RECORD_FIXED,
    content_type_for,
};
use crate::variant::Variant;

/// Prefix of resource keys.
pub const RESOURCE_PREFIX: &str = "~/";

// ---------------------------------------------------------------------------
// Options and output
// ---------------------------------------------------------------------------

/// Settings for one compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub variant: Variant,
    /// Close a block once it holds this many raw bytes.
    pub max_block_bytes: usize,
    /// Close a block once it holds this many items.
    pub max_block_entries: usize,
    /// Removed from the start of titles to form headwords.
    pub strip_prefix: Option<String>,
    /// Prepended to every article.
    pub content_prefix: Option<String>,
    /// Files added under `~/<relative path>`.
    pub resources_dir: Option<PathBuf>,
    /// Metadata tags, in write order.
    pub tags: Vec<(String, String)>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::from_sections(
            &CompileConfig::default(),
            &DictionaryMetaConfig::default(),
            Variant::Default,
        )
    }
}

impl CompileOptions {
    pub fn from_config(config: &AppConfig, variant: Variant) -> Self {
        Self::from_sections(&config.compile, &config.dictionary, variant)
    }

    fn from_sections(
        compile: &CompileConfig,
        meta: &DictionaryMetaConfig,
        variant: Variant,
    ) -> Self {
        Self {
            variant,
            max_block_bytes: compile.max_block_bytes,
            max_block_entries: compile.max_block_entries,
            strip_prefix: compile.strip_prefix.clone(),
            content_prefix: compile.content_prefix.clone(),
            resources_dir: compile.resources_dir.clone(),
            tags: meta.tags(),
        }
    }

    /// Headword for a title, or `None` when the title lacks the corpus prefix.
    pub fn headword<'a>(&self, title: &'a str) -> Option<&'a str> {
        match self.strip_prefix.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) => title.strip_prefix(prefix),
            None => Some(title),
        }
    }
}

/// What went into an artifact and what was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileReport {
    /// Entries in the store.
    pub total: usize,
    /// Articles indexed.
    pub articles: usize,
    /// Titles skipped for lacking the corpus prefix.
    pub ignored: Vec<String>,
    /// Keys dropped because an earlier item already took them.
    pub duplicates: usize,
    /// Resource files indexed.
    pub resources: usize,
    /// Keys excluded, with the reason.
    pub excluded: Vec<(String, String)>,
    pub blocks: usize,
    pub uuid: Uuid,
}

/// A compiled artifact.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub bytes: Vec<u8>,
    pub report: CompileReport,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

struct Item {
    payload: Vec<u8>,
    content_type: String,
}

struct IndexEntry<'a> {
    key: &'a str,
    block: u32,
    offset: u32,
    len: u32,
    content_type: u8,
}

struct Packed {
    raw_len: u32,
    compressed: Vec<u8>,
}

/// Compile a store into one dictionary artifact.
///
/// Output depends only on the store contents and the options.
#[instrument(skip_all, fields(variant = %opts.variant, entries = store.len()))]
pub fn compile(store: &EntryStore, opts: &CompileOptions) -> Result<CompileOutput> {
    if opts.max_block_bytes == 0 || opts.max_block_entries == 0 {
        return Err(WikidictError::validation(
            "block limits must be greater than zero",
        ));
    }

    let mut report = CompileReport::default();
    let mut items: BTreeMap<String, Item> = BTreeMap::new();

    // Articles, in title order so "earlier" collisions are well defined.
    for entry in store.entries() {
        report.total += 1;
        let Some(key) = opts.headword(&entry.title) else {
            debug!(title = %entry.title, "no corpus prefix, ignored");
            report.ignored.push(entry.title.clone());
            continue;
        };
        if items.contains_key(key) {
            warn!(title = %entry.title, "duplicate headword");
            report.duplicates += 1;
            let e = WikidictError::encode(key, "duplicate headword");
            report.excluded.push((key.to_string(), e.to_string()));
            continue;
        }
        match encode_article(key, &entry.content, opts) {
            Ok(payload) => {
                items.insert(
                    key.to_string(),
                    Item {
                        payload,
                        content_type: HTML_CONTENT_TYPE.to_string(),
                    },
                );
                report.articles += 1;
            }
            Err(e) => {
                warn!(title = %entry.title, error = %e, "excluded from dictionary");
                report.excluded.push((key.to_string(), e.to_string()));
            }
        }
    }

    if let Some(dir) = &opts.resources_dir {
        for (key, path) in collect_resources(dir)? {
            if items.contains_key(&key) {
                let e = WikidictError::encode(&key, "collides with an article headword");
                warn!(key = %key, "resource excluded");
                report.duplicates += 1;
                report.excluded.push((key, e.to_string()));
                continue;
            }
            let payload = std::fs::read(&path).map_err(|e| WikidictError::io(&path, e))?;
            debug!(key = %key, bytes = payload.len(), "resource added");
            items.insert(
                key,
                Item {
                    payload,
                    content_type: content_type_for(&path).to_string(),
                },
            );
            report.resources += 1;
        }
    }

    // Content type table, in order of first use.
    let mut content_types: Vec<String> = Vec::new();
    for item in items.values() {
        if !content_types.contains(&item.content_type) {
            content_types.push(item.content_type.clone());
        }
    }

    if content_types.len() > u8::MAX as usize {
        return Err(WikidictError::validation(format!(
            "too many content types: {} (at most {})",
            content_types.len(),
            u8::MAX
        )));
    }

    let (index, blocks) = pack(&items, &content_types, opts)?;
    let index_bytes = encode_index(&index).map_err(write_failed)?;

    let mut block_table = Vec::with_capacity(blocks.len() * BLOCK_TABLE_ENTRY);
    let mut block_offset = 0u64;
    for block in &blocks {
        write_block_entry(&mut block_table, block_offset, block)?;
        block_offset += block.compressed.len() as u64;
    }

    let uuid = artifact_uuid(opts.variant, &index_bytes, &block_table, &blocks);

    let mut header = Header {
        uuid,
        compression: COMPRESSION_ZLIB.to_string(),
        variant: opts.variant.as_str().to_string(),
        tags: opts.tags.clone(),
        content_types,
        entry_count: count_u32(index.len(), "entries")?,
        block_count: count_u32(blocks.len(), "blocks")?,
        index_offset: 0,
        block_table_offset: 0,
        blocks_offset: 0,
        file_size: 0,
    };
    header.validate()?;

    // Offsets are fixed-width, so the header length does not depend on them.
    let mut sized = Vec::new();
    header.write_to(&mut sized).map_err(write_failed)?;
    header.index_offset = sized.len() as u64;
    header.block_table_offset = header.index_offset + index_bytes.len() as u64;
    header.blocks_offset = header.block_table_offset + block_table.len() as u64;
    header.file_size = header.blocks_offset + block_offset;

    let mut bytes = Vec::with_capacity(header.file_size as usize);
    header.write_to(&mut bytes).map_err(write_failed)?;
    bytes.extend_from_slice(&index_bytes);
    bytes.extend_from_slice(&block_table);
    for block in &blocks {
        bytes.extend_from_slice(&block.compressed);
    }

    report.blocks = blocks.len();
    report.uuid = uuid;

    info!(
        total = report.total,
        articles = report.articles,
        ignored = report.ignored.len(),
        duplicates = report.duplicates,
        resources = report.resources,
        excluded = report.excluded.len(),
        blocks = report.blocks,
        bytes = bytes.len(),
        %uuid,
        "dictionary compiled"
    );

    Ok(CompileOutput { bytes, report })
}

fn encode_article(key: &str, content: &str, opts: &CompileOptions) -> Result<Vec<u8>> {
    if key.trim().is_empty() {
        return Err(WikidictError::encode(key, "empty headword"));
    }
    if key.len() > u16::MAX as usize {
        return Err(WikidictError::encode(
            key,
            format!("headword is {} bytes, at most {} allowed", key.len(), u16::MAX),
        ));
    }
    if key.chars().any(char::is_control) {
        return Err(WikidictError::encode(key, "headword contains control characters"));
    }
    if let Some(c) = content.chars().find(|c| is_forbidden_control(*c)) {
        return Err(WikidictError::encode(
            key,
            format!("content contains control character U+{:04X}", c as u32),
        ));
    }

    let rendered = opts.variant.apply(content);
    let prefix = opts.content_prefix.as_deref().unwrap_or("");
    let len = prefix.len() + rendered.len();
    if len > u32::MAX as usize {
        return Err(WikidictError::encode(
            key,
            format!("content is {len} bytes, at most {} allowed", u32::MAX),
        ));
    }

    let mut payload = Vec::with_capacity(len);
    payload.extend_from_slice(prefix.as_bytes());
    payload.extend_from_slice(rendered.as_bytes());
    Ok(payload)
}

/// NUL and the other C0 controls that are not whitespace.
fn is_forbidden_control(c: char) -> bool {
    c < ' ' && !c.is_ascii_whitespace()
}

/// Files under `dir`, keyed `~/<relative path>` with `/` separators.
fn collect_resources(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let listing = std::fs::read_dir(&current).map_err(|e| WikidictError::io(&current, e))?;
        for dirent in listing {
            let path = dirent.map_err(|e| WikidictError::io(&current, e))?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            found.push((format!("{RESOURCE_PREFIX}{key}"), path));
        }
    }

    found.sort();
    Ok(found)
}

fn pack<'a>(
    items: &'a BTreeMap<String, Item>,
    content_types: &[String],
    opts: &CompileOptions,
) -> Result<(Vec<IndexEntry<'a>>, Vec<Packed>)> {
    let mut index = Vec::with_capacity(items.len());
    let mut blocks = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut current_items = 0usize;

    for (key, item) in items {
        let content_type = content_types
            .iter()
            .position(|ct| ct == &item.content_type)
            .and_then(|i| u8::try_from(i).ok())
            .ok_or_else(|| {
                WikidictError::validation(format!(
                    "content type {} has no table slot",
                    item.content_type
                ))
            })?;

        index.push(IndexEntry {
            key,
            block: count_u32(blocks.len(), "blocks")?,
            offset: count_u32(current.len(), "block offset")?,
            len: count_u32(item.payload.len(), "item length")?,
            content_type,
        });
        current.extend_from_slice(&item.payload);
        current_items += 1;

        if current.len() >= opts.max_block_bytes || current_items >= opts.max_block_entries {
            blocks.push(compress_block(&current)?);
            current.clear();
            current_items = 0;
        }
    }
    if current_items > 0 {
        blocks.push(compress_block(&current)?);
    }

    Ok((index, blocks))
}

fn compress_block(raw: &[u8]) -> Result<Packed> {
    let raw_len = count_u32(raw.len(), "block size")?;
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(raw).map_err(write_failed)?;
    let compressed = encoder.finish().map_err(write_failed)?;
    debug!(raw = raw_len, compressed = compressed.len(), "block packed");
    Ok(Packed {
        raw_len,
        compressed,
    })
}

fn encode_index(index: &[IndexEntry]) -> std::io::Result<Vec<u8>> {
    let mut offsets = Vec::with_capacity(index.len() * 4);
    let mut records = Vec::new();

    for entry in index {
        offsets.write_u32::<BigEndian>(records.len() as u32)?;
        records.reserve(INDEX_RECORD_FIXED + entry.key.len());
        records.write_u16::<BigEndian>(entry.key.len() as u16)?;
        records.write_all(entry.key.as_bytes())?;
        records.write_u32::<BigEndian>(entry.block)?;
        records.write_u32::<BigEndian>(entry.offset)?;
        records.write_u32::<BigEndian>(entry.len)?;
        records.write_u8(entry.content_type)?;
    }

    offsets.extend_from_slice(&records);
    Ok(offsets)
}

fn write_block_entry(out: &mut impl Write, offset: u64, block: &Packed) -> Result<()> {
    let compressed_len = count_u32(block.compressed.len(), "compressed block size")?;
    out.write_u64::<BigEndian>(offset).map_err(write_failed)?;
    out.write_u32::<BigEndian>(compressed_len).map_err(write_failed)?;
    out.write_u32::<BigEndian>(block.raw_len).map_err(write_failed)
}

fn artifact_uuid(variant: Variant, index: &[u8], table: &[u8], blocks: &[Packed]) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(variant.as_str().as_bytes());
    hasher.update(index);
    hasher.update(table);
    for block in blocks {
        hasher.update(&block.compressed);
    }
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &hasher.finalize())
}

fn count_u32(n: usize, what: &str) -> Result<u32> {
    u32::try_from(n).map_err(|_| WikidictError::validation(format!("too many {what}: {n}")))
}

fn write_failed(e: std::io::Error) -> WikidictError {
    WikidictError::artifact(format!("failed to encode dictionary: {e}"))
}
