//! Transport compression for corpus containers.
//!
//! The codec is picked from the file extension. Decoders are multi-member
//! aware, so a compressed batch appended onto a compressed container reads
//! back as a single stream.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

/// Compression applied to a container file on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Plain JSON Lines.
    #[default]
    None,
    /// Gzip (.gz)
    Gzip,
    /// Bzip2 (.bz2, .bz)
    Bzip2,
}

impl Compression {
    /// Detect compression from a file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "gz" => Compression::Gzip,
                "bz2" | "bz" => Compression::Bzip2,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Wrap a raw reader with the matching decoder.
    pub fn wrap_reader<'a, R: Read + 'a>(self, reader: R) -> Box<dyn BufRead + 'a> {
        match self {
            Compression::None => Box::new(BufReader::new(reader)),
            Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(reader))),
            Compression::Bzip2 => Box::new(BufReader::new(MultiBzDecoder::new(reader))),
        }
    }

    /// Wrap a raw writer with the matching encoder.
    pub fn wrap_writer<W: Write>(self, writer: W) -> ContainerWriter<W> {
        match self {
            Compression::None => ContainerWriter::Plain(writer),
            Compression::Gzip => {
                ContainerWriter::Gzip(GzEncoder::new(writer, flate2::Compression::best()))
            }
            Compression::Bzip2 => {
                ContainerWriter::Bzip2(BzEncoder::new(writer, bzip2::Compression::best()))
            }
        }
    }
}

/// Writer that must be explicitly finished so trailer errors surface.
pub enum ContainerWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
}

impl<W: Write> ContainerWriter<W> {
    /// Flush the encoder trailer and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            ContainerWriter::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            ContainerWriter::Gzip(enc) => enc.finish(),
            ContainerWriter::Bzip2(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for ContainerWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ContainerWriter::Plain(w) => w.write(buf),
            ContainerWriter::Gzip(w) => w.write(buf),
            ContainerWriter::Bzip2(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ContainerWriter::Plain(w) => w.flush(),
            ContainerWriter::Gzip(w) => w.flush(),
            ContainerWriter::Bzip2(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_from_extension() {
        assert_eq!(Compression::from_path("all.json"), Compression::None);
        assert_eq!(Compression::from_path("all.json.gz"), Compression::Gzip);
        assert_eq!(Compression::from_path("data/all.json.bz"), Compression::Bzip2);
        assert_eq!(Compression::from_path("all.json.BZ2"), Compression::Bzip2);
        assert_eq!(Compression::from_path("noext"), Compression::None);
    }

    #[test]
    fn concatenated_members_read_as_one_stream() {
        for codec in [Compression::Gzip, Compression::Bzip2] {
            let mut first = codec.wrap_writer(Vec::new());
            first.write_all(b"line one\n").unwrap();
            let mut bytes = first.finish().unwrap();

            let mut second = codec.wrap_writer(Vec::new());
            second.write_all(b"line two\n").unwrap();
            bytes.extend(second.finish().unwrap());

            let mut out = String::new();
            codec
                .wrap_reader(bytes.as_slice())
                .read_to_string(&mut out)
                .unwrap();
            assert_eq!(out, "line one\nline two\n", "codec {codec:?}");
        }
    }
}
