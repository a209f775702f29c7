//! On-disk layout of a compiled dictionary.
//!
//! All integers are big-endian.
//!
//! ```text
//! magic            8 bytes  "WIKIDICT"
//! format version   u16
//! uuid             16 bytes
//! compression      u8 len + bytes
//! variant          u8 len + bytes
//! tags             u8 count, then (u8 len key, u16 len value)*
//! content types    u8 count, then (u16 len type)*
//! entry count      u32
//! block count      u32
//! index offset     u64
//! block table off  u64
//! blocks offset    u64
//! file size        u64
//! index            u32 record offsets, then records:
//!                  u16 key len, key, u32 block, u32 offset, u32 len, u8 content type
//! block table      (u64 offset from blocks start, u32 compressed len, u32 raw len)*
//! blocks           zlib streams
//! ```

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use wikidict_shared::{Result, WikidictError};

pub const MAGIC: &[u8; 8] = b"WIKIDICT";
pub const FORMAT_VERSION: u16 = 1;
pub const COMPRESSION_ZLIB: &str = "zlib";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Fixed part of an index record, excluding the key bytes.
pub(crate) const INDEX_RECORD_FIXED: usize = 2 + 4 + 4 + 4 + 1;
/// Size of one block table entry.
pub(crate) const BLOCK_TABLE_ENTRY: usize = 8 + 4 + 4;

/// Artifact header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub uuid: Uuid,
    pub compression: String,
    pub variant: String,
    pub tags: Vec<(String, String)>,
    pub content_types: Vec<String>,
    pub entry_count: u32,
    pub block_count: u32,
    pub index_offset: u64,
    pub block_table_offset: u64,
    pub blocks_offset: u64,
    pub file_size: u64,
}

impl Header {
    /// Check every length-prefixed field fits its prefix.
    pub(crate) fn validate(&self) -> Result<()> {
        check_len(&self.compression, u8::MAX as usize, "compression name")?;
        check_len(&self.variant, u8::MAX as usize, "variant name")?;
        if self.tags.len() > u8::MAX as usize {
            return Err(WikidictError::validation("too many tags"));
        }
        for (key, value) in &self.tags {
            check_len(key, u8::MAX as usize, "tag key")?;
            check_len(value, u16::MAX as usize, "tag value")?;
        }
        if self.content_types.len() > u8::MAX as usize {
            return Err(WikidictError::validation("too many content types"));
        }
        for ct in &self.content_types {
            check_len(ct, u16::MAX as usize, "content type")?;
        }
        Ok(())
    }

    pub(crate) fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(MAGIC)?;
        out.write_u16::<BigEndian>(FORMAT_VERSION)?;
        out.write_all(self.uuid.as_bytes())?;
        write_str_u8(out, &self.compression)?;
        write_str_u8(out, &self.variant)?;

        out.write_u8(self.tags.len() as u8)?;
        for (key, value) in &self.tags {
            write_str_u8(out, key)?;
            write_str_u16(out, value)?;
        }

        out.write_u8(self.content_types.len() as u8)?;
        for ct in &self.content_types {
            write_str_u16(out, ct)?;
        }

        out.write_u32::<BigEndian>(self.entry_count)?;
        out.write_u32::<BigEndian>(self.block_count)?;
        out.write_u64::<BigEndian>(self.index_offset)?;
        out.write_u64::<BigEndian>(self.block_table_offset)?;
        out.write_u64::<BigEndian>(self.blocks_offset)?;
        out.write_u64::<BigEndian>(self.file_size)?;
        Ok(())
    }

    /// Read a header, checking magic and version.
    pub(crate) fn read_from(input: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        input.read_exact(&mut magic).map_err(truncated)?;
        if &magic != MAGIC {
            return Err(WikidictError::artifact("not a wikidict dictionary (bad magic)"));
        }

        let version = input.read_u16::<BigEndian>().map_err(truncated)?;
        if version != FORMAT_VERSION {
            return Err(WikidictError::artifact(format!(
                "unsupported format version {version}"
            )));
        }

        Self::read_body(input).map_err(truncated)
    }

    fn read_body(input: &mut impl Read) -> io::Result<Self> {
        let mut uuid = [0u8; 16];
        input.read_exact(&mut uuid)?;
        let compression = read_str_u8(input)?;
        let variant = read_str_u8(input)?;

        let tag_count = input.read_u8()?;
        let mut tags = Vec::with_capacity(tag_count as usize);
        for _ in 0..tag_count {
            let key = read_str_u8(input)?;
            let value = read_str_u16(input)?;
            tags.push((key, value));
        }

        let ct_count = input.read_u8()?;
        let mut content_types = Vec::with_capacity(ct_count as usize);
        for _ in 0..ct_count {
            content_types.push(read_str_u16(input)?);
        }

        Ok(Self {
            uuid: Uuid::from_bytes(uuid),
            compression,
            variant,
            tags,
            content_types,
            entry_count: input.read_u32::<BigEndian>()?,
            block_count: input.read_u32::<BigEndian>()?,
            index_offset: input.read_u64::<BigEndian>()?,
            block_table_offset: input.read_u64::<BigEndian>()?,
            blocks_offset: input.read_u64::<BigEndian>()?,
            file_size: input.read_u64::<BigEndian>()?,
        })
    }
}

fn truncated(e: io::Error) -> WikidictError {
    WikidictError::artifact(format!("truncated or malformed header: {e}"))
}

fn check_len(s: &str, max: usize, what: &str) -> Result<()> {
    if s.len() > max {
        return Err(WikidictError::validation(format!(
            "{what} is {} bytes, at most {max} allowed",
            s.len()
        )));
    }
    Ok(())
}

fn write_str_u8(out: &mut impl Write, s: &str) -> io::Result<()> {
    out.write_u8(s.len() as u8)?;
    out.write_all(s.as_bytes())
}

fn write_str_u16(out: &mut impl Write, s: &str) -> io::Result<()> {
    out.write_u16::<BigEndian>(s.len() as u16)?;
    out.write_all(s.as_bytes())
}

fn read_string(input: &mut impl Read, len: usize) -> io::Result<String> {
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn read_str_u8(input: &mut impl Read) -> io::Result<String> {
    let len = input.read_u8()? as usize;
    read_string(input, len)
}

fn read_str_u16(input: &mut impl Read) -> io::Result<String> {
    let len = input.read_u16::<BigEndian>()? as usize;
    read_string(input, len)
}

/// Guess a content type from a resource file extension.
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => HTML_CONTENT_TYPE,
        "css" => "text/css",
        "js" => "application/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn header() -> Header {
        Header {
            uuid: Uuid::from_u128(0x1234),
            compression: COMPRESSION_ZLIB.into(),
            variant: "default".into(),
            tags: vec![("label".into(), "Test".into())],
            content_types: vec![HTML_CONTENT_TYPE.into(), "text/css".into()],
            entry_count: 2,
            block_count: 1,
            index_offset: 100,
            block_table_offset: 150,
            blocks_offset: 166,
            file_size: 200,
        }
    }

    #[test]
    fn header_layout_starts_with_magic_and_version() {
        let mut bytes = Vec::new();
        header().write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(&bytes[8..10], &[0, 1]);
        assert_eq!(&bytes[10..26], Uuid::from_u128(0x1234).as_bytes());
        assert_eq!(bytes[26] as usize, "zlib".len());
        assert_eq!(&bytes[27..31], b"zlib");

        let back = Header::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(back, header());
    }

    #[test]
    fn bad_magic_and_truncation_are_artifact_errors() {
        let mut bytes = Vec::new();
        header().write_to(&mut bytes).unwrap();

        let mut wrong = bytes.clone();
        wrong[0] = b'X';
        assert!(matches!(
            Header::read_from(&mut wrong.as_slice()),
            Err(WikidictError::Artifact { .. })
        ));

        let short = &bytes[..bytes.len() - 3];
        assert!(matches!(
            Header::read_from(&mut &short[..]),
            Err(WikidictError::Artifact { .. })
        ));
    }

    #[test]
    fn validate_rejects_oversized_tag_key() {
        let mut h = header();
        h.tags.push(("k".repeat(300), "v".into()));
        assert!(h.validate().is_err());
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("css/site.CSS")), "text/css");
        assert_eq!(content_type_for(Path::new("images/a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("LICENSE")), "application/octet-stream");
    }
}
