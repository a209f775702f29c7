//! Read access to compiled dictionaries.

use std::io::{Cursor, Read};
use std::ops::Range;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use flate2::read::ZlibDecoder;
use tracing::{debug, instrument};
use uuid::Uuid;

use wikidict_shared::{Result, WikidictError};

use crate::format::{BLOCK_TABLE_ENTRY, COMPRESSION_ZLIB, Header, INDEX_RECORD_FIXED};

#[derive(Debug, Clone)]
struct Record {
    key: Range<usize>,
    block: u32,
    offset: u32,
    len: u32,
    content_type: u8,
}

#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    offset: u64,
    compressed_len: u32,
    raw_len: u32,
}

/// One stored item.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub content: Vec<u8>,
    pub content_type: String,
}

impl Article {
    /// Content as text, replacing invalid UTF-8.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// An opened dictionary artifact.
///
/// The index is parsed and checked on open; blocks are decompressed on
/// demand.
#[derive(Debug)]
pub struct Dictionary {
    data: Vec<u8>,
    header: Header,
    records: Vec<Record>,
    blocks: Vec<BlockInfo>,
}

impl Dictionary {
    /// Open an artifact from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| WikidictError::io(path, e))?;
        Self::from_bytes(data)
    }

    /// Parse and validate an artifact held in memory.
    #[instrument(skip_all, fields(bytes = data.len()))]
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = Header::read_from(&mut Cursor::new(data.as_slice()))?;

        if header.compression != COMPRESSION_ZLIB {
            return Err(WikidictError::artifact(format!(
                "unsupported compression '{}'",
                header.compression
            )));
        }
        if header.file_size != data.len() as u64 {
            return Err(WikidictError::artifact(format!(
                "file size mismatch: header says {}, found {}",
                header.file_size,
                data.len()
            )));
        }
        if !(header.index_offset <= header.block_table_offset
            && header.block_table_offset <= header.blocks_offset
            && header.blocks_offset <= header.file_size)
        {
            return Err(WikidictError::artifact("section offsets out of order"));
        }

        let index = section(&data, header.index_offset, header.block_table_offset)?;
        let table = section(&data, header.block_table_offset, header.blocks_offset)?;
        let blocks_len = header.file_size - header.blocks_offset;

        let blocks = parse_block_table(table, header.block_count as usize, blocks_len)?;
        let records = parse_index(
            index,
            header.index_offset as usize,
            header.entry_count as usize,
            &blocks,
            header.content_types.len(),
        )?;

        // Keys must be valid UTF-8 and strictly ascending.
        for (i, record) in records.iter().enumerate() {
            let key = std::str::from_utf8(&data[record.key.clone()])
                .map_err(|_| WikidictError::artifact(format!("index record {i}: key is not UTF-8")))?;
            if i > 0 && data[records[i - 1].key.clone()] >= *key.as_bytes() {
                return Err(WikidictError::artifact(format!(
                    "index not sorted at record {i} ('{key}')"
                )));
            }
        }

        debug!(
            entries = records.len(),
            blocks = blocks.len(),
            variant = %header.variant,
            "dictionary opened"
        );

        Ok(Self {
            data,
            header,
            records,
            blocks,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn uuid(&self) -> Uuid {
        self.header.uuid
    }

    pub fn variant(&self) -> &str {
        &self.header.variant
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.header.tags
    }

    /// Value of a tag by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.header
            .tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn content_types(&self) -> &[String] {
        &self.header.content_types
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// All keys in index order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.records.iter().map(|r| self.key_of(r))
    }

    fn key_of(&self, record: &Record) -> &str {
        // Checked UTF-8 in from_bytes.
        std::str::from_utf8(&self.data[record.key.clone()]).unwrap_or_default()
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Result<Option<Article>> {
        let Ok(pos) = self
            .records
            .binary_search_by(|r| self.data[r.key.clone()].cmp(key.as_bytes()))
        else {
            return Ok(None);
        };
        let record = &self.records[pos];

        let block = self.block(record.block as usize)?;
        let start = record.offset as usize;
        let end = start + record.len as usize;
        let content = block
            .get(start..end)
            .ok_or_else(|| {
                WikidictError::artifact(format!("item '{key}' extends past its block"))
            })?
            .to_vec();

        let content_type = self
            .header
            .content_types
            .get(record.content_type as usize)
            .cloned()
            .unwrap_or_default();

        Ok(Some(Article {
            content,
            content_type,
        }))
    }

    /// Decompress one block, checking its size.
    fn block(&self, idx: usize) -> Result<Vec<u8>> {
        let info = self
            .blocks
            .get(idx)
            .ok_or_else(|| WikidictError::artifact(format!("block {idx} out of range")))?;

        let start = (self.header.blocks_offset + info.offset) as usize;
        let compressed = &self.data[start..start + info.compressed_len as usize];

        let mut raw = Vec::with_capacity(info.raw_len as usize);
        ZlibDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| WikidictError::artifact(format!("block {idx}: zlib error: {e}")))?;
        if raw.len() != info.raw_len as usize {
            return Err(WikidictError::artifact(format!(
                "block {idx}: expected {} bytes, decompressed {}",
                info.raw_len,
                raw.len()
            )));
        }
        Ok(raw)
    }
}

fn section(data: &[u8], start: u64, end: u64) -> Result<&[u8]> {
    data.get(start as usize..end as usize)
        .ok_or_else(|| WikidictError::artifact("section extends past end of file"))
}

fn parse_block_table(table: &[u8], count: usize, blocks_len: u64) -> Result<Vec<BlockInfo>> {
    if table.len() != count * BLOCK_TABLE_ENTRY {
        return Err(WikidictError::artifact(format!(
            "block table is {} bytes, expected {} for {count} blocks",
            table.len(),
            count * BLOCK_TABLE_ENTRY
        )));
    }

    let blocks: Vec<BlockInfo> = table
        .chunks_exact(BLOCK_TABLE_ENTRY)
        .map(|raw| BlockInfo {
            offset: BigEndian::read_u64(&raw[0..8]),
            compressed_len: BigEndian::read_u32(&raw[8..12]),
            raw_len: BigEndian::read_u32(&raw[12..16]),
        })
        .collect();

    for (i, block) in blocks.iter().enumerate() {
        if block.offset + block.compressed_len as u64 > blocks_len {
            return Err(WikidictError::artifact(format!(
                "block {i} extends past end of file"
            )));
        }
    }
    Ok(blocks)
}

fn parse_index(
    index: &[u8],
    index_start: usize,
    count: usize,
    blocks: &[BlockInfo],
    content_types: usize,
) -> Result<Vec<Record>> {
    let table_len = count * 4;
    if index.len() < table_len {
        return Err(WikidictError::artifact("index offset table truncated"));
    }
    let (offsets, body) = index.split_at(table_len);
    let body_start = index_start + table_len;

    let mut records = Vec::with_capacity(count);
    for (i, raw) in offsets.chunks_exact(4).enumerate() {
        let at = BigEndian::read_u32(raw) as usize;
        let bad = |what: &str| WikidictError::artifact(format!("index record {i}: {what}"));

        let fixed = body.get(at..at + 2).ok_or_else(|| bad("offset out of range"))?;
        let key_len = BigEndian::read_u16(fixed) as usize;
        let key_start = at + 2;
        let rest = body
            .get(key_start + key_len..at + INDEX_RECORD_FIXED + key_len)
            .ok_or_else(|| bad("record truncated"))?;

        let record = Record {
            key: body_start + key_start..body_start + key_start + key_len,
            block: BigEndian::read_u32(&rest[0..4]),
            offset: BigEndian::read_u32(&rest[4..8]),
            len: BigEndian::read_u32(&rest[8..12]),
            content_type: rest[12],
        };

        let block = blocks
            .get(record.block as usize)
            .ok_or_else(|| bad("block out of range"))?;
        if record.offset as u64 + record.len as u64 > block.raw_len as u64 {
            return Err(bad("item extends past its block"));
        }
        if record.content_type as usize >= content_types {
            return Err(bad("unknown content type"));
        }
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileOptions, compile};
    use chrono::{TimeZone, Utc};
    use wikidict_shared::Entry;
    use wikidict_storage::EntryStore;

    fn sample() -> Vec<u8> {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut store = EntryStore::new();
        for title in ["Abacus", "Mole", "Yak", "Zebra"] {
            store.upsert(Entry::new(title, format!("<p>{title}</p>"), ts));
        }
        let opts = CompileOptions {
            strip_prefix: None,
            ..CompileOptions::default()
        };
        compile(&store, &opts).unwrap().bytes
    }

    #[test]
    fn lookups_binary_search_the_index() {
        let dict = Dictionary::from_bytes(sample()).unwrap();
        assert_eq!(dict.len(), 4);
        for key in ["Abacus", "Mole", "Yak", "Zebra"] {
            let article = dict.get(key).unwrap().expect(key);
            assert_eq!(article.text(), format!("<p>{key}</p>"));
        }
        assert!(dict.get("Aardvark").unwrap().is_none());
        assert!(dict.get("Zz").unwrap().is_none());
        assert!(dict.get("").unwrap().is_none());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            Dictionary::from_bytes(bytes),
            Err(WikidictError::Artifact { .. })
        ));
    }

    #[test]
    fn corrupt_block_fails_on_lookup() {
        let mut bytes = sample();
        let dict = Dictionary::from_bytes(bytes.clone()).unwrap();
        let blocks_offset = dict.header().blocks_offset as usize;

        // Damage the zlib stream body, past its two-byte header.
        for b in &mut bytes[blocks_offset + 2..blocks_offset + 6] {
            *b ^= 0xFF;
        }
        let dict = Dictionary::from_bytes(bytes).unwrap();
        assert!(dict.get("Abacus").is_err());
    }

    #[test]
    fn not_a_dictionary() {
        assert!(Dictionary::from_bytes(b"{\"wikidict\":{}}".to_vec()).is_err());
        assert!(Dictionary::from_bytes(Vec::new()).is_err());
    }
}
