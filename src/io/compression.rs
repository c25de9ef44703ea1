//! Transparent compression for shards and artifacts.
//!
//! Shards are frequently shipped as `.bz2` or `.gz` archives, and large artifacts are
//! often written as `.zst`. Every reader and writer in this crate goes through
//! [`auto_detect_reader`] / [`auto_detect_writer`] so callers never have to care.
//!
//! ## Built-in Codecs
//!
//! When enabled via feature flags, the following codecs are available:
//! - **Gzip** (`.gz`) - via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)
//! - **Bzip2** (`.bz2`) - via `bzip2` (feature: `compression-bzip2`)
//! - **Xz** (`.xz`) - via `xz2` (feature: `compression-xz`)
//!
//! ## Detection
//!
//! Extensions are checked first, falling back to magic bytes for readers only.
//! Writers are wrapped purely by extension; an unknown extension yields a plain
//! buffered writer.
//!
//! Compressed streams are not seekable. Anything that needs to look at the start of a
//! shard and then start over (see [`crate::sniff`]) reopens the file instead.
//!
//! Writers are [`FinishWrite`] trait objects. Dropping one does not report trailer or
//! buffer errors, so a writer must be ended with [`FinishWrite::close`].

use anyhow::{Context, Result};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A writer that must be closed explicitly.
pub trait FinishWrite: Write {
    /// Write any codec trailer, flush every buffered layer and surface the first error.
    ///
    /// # Errors
    /// Returns the error raised by the codec or by the underlying writer.
    fn close(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write> FinishWrite for BufWriter<W> {
    fn close(self: Box<Self>) -> io::Result<()> {
        let mut inner = self.into_inner().map_err(io::IntoInnerError::into_error)?;
        inner.flush()
    }
}

/// A compression algorithm that can wrap readers and writers.
///
/// Implementations must be stateless; one instance is shared by every stream.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip", "zstd").
    fn name(&self) -> &str;

    /// File extensions associated with this codec, lowercase with the leading dot.
    fn extensions(&self) -> &[&str];

    /// Optional magic byte signature for content-based detection.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap a reader with decompression.
    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>>;

    /// Wrap a writer with compression. Closing the result closes `writer` too.
    fn wrap_writer_dyn(&self, writer: Box<dyn FinishWrite>) -> io::Result<Box<dyn FinishWrite>>;
}

static CODECS: &[&dyn CompressionCodec] = &[
    #[cfg(feature = "compression-gzip")]
    &GzipCodec,
    #[cfg(feature = "compression-zstd")]
    &ZstdCodec,
    #[cfg(feature = "compression-bzip2")]
    &Bzip2Codec,
    #[cfg(feature = "compression-xz")]
    &XzCodec,
];

/// All codecs compiled into this build.
#[must_use]
pub fn codecs() -> &'static [&'static dyn CompressionCodec] {
    CODECS
}

/// Detect a codec from the file path extension (case-insensitive).
#[must_use]
pub fn detect_from_extension(path: impl AsRef<Path>) -> Option<&'static dyn CompressionCodec> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    codecs()
        .iter()
        .copied()
        .find(|codec| codec.extensions().iter().any(|ext| path_str.ends_with(ext)))
}

/// Detect a codec from magic bytes at the start of a buffered stream.
///
/// The reader is not advanced.
fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<&'static dyn CompressionCodec> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    codecs().iter().copied().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| buf.len() >= magic.len() && buf.starts_with(magic))
    })
}

/// File name with any recognised compression extension removed.
///
/// `comments-2019.jsonl.bz2` becomes `comments-2019.jsonl`; names without a codec
/// extension are returned unchanged. Used to match shard suffixes on compressed shards.
#[must_use]
pub fn logical_name(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_lowercase();
    for codec in codecs() {
        for ext in codec.extensions() {
            if lower.ends_with(ext) {
                return name[..name.len() - ext.len()].to_string();
            }
        }
    }
    name
}

/// Wrap a reader with decompression if the path or content calls for it.
///
/// Detection order: file extension, then magic bytes, then pass-through. The returned
/// reader is always buffered.
///
/// # Errors
/// Returns an error if the codec fails to initialise its decoder.
pub fn auto_detect_reader<R: Read + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn Read>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_reader_dyn(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    let mut buf_reader = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buf_reader) {
        return codec
            .wrap_reader_dyn(Box::new(buf_reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    Ok(Box::new(buf_reader))
}

/// Wrap a writer with compression chosen by the path extension.
///
/// The result is buffered and must be ended with [`FinishWrite::close`].
///
/// # Errors
/// Returns an error if the codec fails to initialise its encoder.
pub fn auto_detect_writer<W: Write + 'static>(
    writer: W,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn FinishWrite>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_writer_dyn(Box::new(BufWriter::new(writer)))
            .with_context(|| format!("wrap writer with {} codec", codec.name()));
    }
    Ok(Box::new(BufWriter::new(writer)))
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        // Multi-member archives are common for concatenated shard dumps.
        use flate2::read::MultiGzDecoder;
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn FinishWrite>) -> io::Result<Box<dyn FinishWrite>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-gzip")]
impl FinishWrite for flate2::write::GzEncoder<Box<dyn FinishWrite>> {
    fn close(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.close()
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn FinishWrite>) -> io::Result<Box<dyn FinishWrite>> {
        zstd::stream::write::Encoder::new(writer, 3).map(|e| Box::new(e) as Box<dyn FinishWrite>)
    }
}

#[cfg(feature = "compression-zstd")]
impl FinishWrite for zstd::stream::write::Encoder<'static, Box<dyn FinishWrite>> {
    fn close(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.close()
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extensions(&self) -> &[&str] {
        &[".bz2", ".bzip2"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(b"BZh")
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        // pbzip2-style dumps consist of several concatenated streams.
        use bzip2::read::MultiBzDecoder;
        Ok(Box::new(MultiBzDecoder::new(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn FinishWrite>) -> io::Result<Box<dyn FinishWrite>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        Ok(Box::new(BzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-bzip2")]
impl FinishWrite for bzip2::write::BzEncoder<Box<dyn FinishWrite>> {
    fn close(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.close()
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extensions(&self) -> &[&str] {
        &[".xz"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn wrap_reader_dyn(&self, reader: Box<dyn Read>) -> io::Result<Box<dyn Read>> {
        use xz2::read::XzDecoder;
        Ok(Box::new(XzDecoder::new_multi_decoder(reader)))
    }

    fn wrap_writer_dyn(&self, writer: Box<dyn FinishWrite>) -> io::Result<Box<dyn FinishWrite>> {
        use xz2::write::XzEncoder;
        Ok(Box::new(XzEncoder::new(writer, 6)))
    }
}

#[cfg(feature = "compression-xz")]
impl FinishWrite for xz2::write::XzEncoder<Box<dyn FinishWrite>> {
    fn close(self: Box<Self>) -> io::Result<()> {
        (*self).finish()?.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_name_strips_codec_suffix() {
        assert_eq!(logical_name("shards/a.jsonl"), "a.jsonl");
        #[cfg(feature = "compression-bzip2")]
        assert_eq!(logical_name("shards/RC_2019-01.jsonl.BZ2"), "RC_2019-01.jsonl");
        #[cfg(feature = "compression-gzip")]
        assert_eq!(logical_name("b.json.gz"), "b.json");
    }

    /// Accepts writes until it has been flushed once, then fails every write.
    struct FailsAfterFlush {
        written: Vec<u8>,
        flushed: bool,
    }

    impl Write for FailsAfterFlush {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.flushed {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    fn failing() -> FailsAfterFlush {
        FailsAfterFlush {
            written: Vec::new(),
            flushed: false,
        }
    }

    #[test]
    fn close_reports_buffered_write_failure() -> Result<()> {
        let mut w = auto_detect_writer(failing(), "merged.ndjson")?;
        w.write_all(b"{\"a\":1}\n")?;
        w.flush()?;
        w.write_all(b"{\"a\":2}\n")?;
        let err = w.close().expect_err("pending bytes could not be written");
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn close_reports_gzip_trailer_failure() -> Result<()> {
        let mut w = auto_detect_writer(failing(), "merged.ndjson.gz")?;
        w.write_all(b"{\"a\":1}\n")?;
        w.flush()?;
        let err = w.close().expect_err("trailer could not be written");
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
        Ok(())
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn closed_zstd_stream_is_complete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.ndjson.zst");
        let mut w = auto_detect_writer(std::fs::File::create(&path)?, &path)?;
        w.write_all(b"{\"a\":1}\n")?;
        w.close()?;

        let mut r = auto_detect_reader(std::fs::File::open(&path)?, &path)?;
        let mut out = String::new();
        r.read_to_string(&mut out)?;
        assert_eq!(out, "{\"a\":1}\n");
        Ok(())
    }

    #[test]
    fn plain_reader_passes_through() -> Result<()> {
        let data = b"{\"a\":1}\n".to_vec();
        let mut r = auto_detect_reader(std::io::Cursor::new(data.clone()), "x.jsonl")?;
        let mut out = Vec::new();
        r.read_to_end(&mut out)?;
        assert_eq!(out, data);
        Ok(())
    }
}
