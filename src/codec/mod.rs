//! Section compression for binary mesh containers.
//!
//! A compressed section stores its uncompressed size next to the payload,
//! so codecs here work on raw blocks: no size prefixes or frame headers
//! beyond what the codec itself requires, and decompression is told how
//! many bytes to expect. Producing a different length is an error.
//!
//! The expected size comes from the file and is not trusted: decoders
//! grow their output as bytes arrive and stop one byte past it, and LZ4,
//! which needs its buffer up front, refuses sizes its worst-case ratio
//! cannot reach.
//!
//! # Identity rules
//! Every codec has a permanent one-byte tag written into each section
//! header. A reader that meets an unknown tag fails; it never guesses.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Default compression level (zstd scale; brotli clamps to 0-11).
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

// Brotli stream tuning.
const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

// An LZ4 match length grows by at most 255 per input byte.
const LZ4_MAX_RATIO: usize = 255;
const LZ4_SLACK: usize = 64;

// ── CodecId ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    None,
    Zstd,
    Lz4,
    Brotli,
    Lzma,
}

impl CodecId {
    pub const ALL: [CodecId; 5] = [
        CodecId::None, CodecId::Zstd, CodecId::Lz4, CodecId::Brotli, CodecId::Lzma,
    ];

    /// On-disk tag.
    #[inline]
    pub fn tag(self) -> u8 {
        match self {
            CodecId::None   => 0,
            CodecId::Zstd   => 1,
            CodecId::Lz4    => 2,
            CodecId::Brotli => 3,
            CodecId::Lzma   => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            CodecId::None   => "none",
            CodecId::Zstd   => "zstd",
            CodecId::Lz4    => "lz4",
            CodecId::Brotli => "brotli",
            CodecId::Lzma   => "lzma",
        }
    }

    /// Case-insensitive; used by the CLI and config files.
    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name().eq_ignore_ascii_case(s))
    }

    /// Whether `level` changes anything for this codec.
    pub fn uses_level(self) -> bool {
        matches!(self, CodecId::Zstd | CodecId::Brotli)
    }

    /// Upper bound on what `len` payload bytes can decode to, for codecs
    /// that have one.
    pub fn max_output(self, len: usize) -> Option<usize> {
        match self {
            CodecId::None => Some(len),
            CodecId::Lz4  => Some(len.saturating_mul(LZ4_MAX_RATIO).saturating_add(LZ4_SLACK)),
            _             => None,
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{codec} compression failed: {message}")]
    Compression { codec: &'static str, message: String },
    #[error("{codec} decompression failed: {message}")]
    Decompression { codec: &'static str, message: String },
    #[error("{codec} produced {found} bytes, section header says {expected}")]
    SizeMismatch { codec: &'static str, expected: usize, found: usize },
    #[error("{codec} cannot expand {input} bytes to {size}")]
    Implausible { codec: &'static str, input: usize, size: usize },
    #[error("unknown codec tag {0}")]
    UnknownTag(u8),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;

    /// Restore exactly `size` bytes.
    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CodecError>;
}

fn failed(id: CodecId, e: impl ToString) -> CodecError {
    CodecError::Compression { codec: id.name(), message: e.to_string() }
}

fn corrupt(id: CodecId, e: impl ToString) -> CodecError {
    CodecError::Decompression { codec: id.name(), message: e.to_string() }
}

fn sized(id: CodecId, out: Vec<u8>, size: usize) -> Result<Vec<u8>, CodecError> {
    if out.len() == size {
        Ok(out)
    } else {
        Err(CodecError::SizeMismatch { codec: id.name(), expected: size, found: out.len() })
    }
}

/// Drain `reader` into a fresh buffer, reading at most one byte past `size`.
fn bounded(id: CodecId, reader: impl Read, size: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    reader
        .take((size as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| corrupt(id, e))?;
    sized(id, out, size)
}

/// Sink that fails once more than `limit` bytes are written.
struct Capped {
    out:   Vec<u8>,
    limit: usize,
}

impl Write for Capped {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.out.len().saturating_add(buf.len()) > self.limit {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "output longer than section size"));
        }
        self.out.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Built-in codecs ──────────────────────────────────────────────────────────

/// Stored sections.
pub struct Identity;

impl Codec for Identity {
    fn id(&self) -> CodecId { CodecId::None }

    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CodecError> {
        sized(self.id(), data.to_vec(), size)
    }
}

pub struct Zstd;

impl Codec for Zstd {
    fn id(&self) -> CodecId { CodecId::Zstd }

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let range = zstd::compression_level_range();
        let level = level.clamp(*range.start(), *range.end());
        zstd::bulk::compress(data, level).map_err(|e| failed(self.id(), e))
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CodecError> {
        let decoder = zstd::stream::read::Decoder::new(data).map_err(|e| corrupt(self.id(), e))?;
        bounded(self.id(), decoder, size)
    }
}

/// LZ4 block format; the section header carries the size.
pub struct Lz4;

impl Codec for Lz4 {
    fn id(&self) -> CodecId { CodecId::Lz4 }

    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::block::compress(data))
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CodecError> {
        if self.id().max_output(data.len()).is_some_and(|max| size > max) {
            return Err(CodecError::Implausible { codec: self.id().name(), input: data.len(), size });
        }
        let out = lz4_flex::block::decompress(data, size).map_err(|e| corrupt(self.id(), e))?;
        sized(self.id(), out, size)
    }
}

pub struct Brotli;

impl Codec for Brotli {
    fn id(&self) -> CodecId { CodecId::Brotli }

    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, quality, BROTLI_WINDOW);
            w.write_all(data).map_err(|e| failed(self.id(), e))?;
        }
        Ok(out)
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CodecError> {
        bounded(self.id(), brotli::Decompressor::new(data, BROTLI_BUFFER), size)
    }
}

pub struct Lzma;

impl Codec for Lzma {
    fn id(&self) -> CodecId { CodecId::Lzma }

    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut io::Cursor::new(data), &mut out).map_err(|e| failed(self.id(), e))?;
        Ok(out)
    }

    fn decompress(&self, data: &[u8], size: usize) -> Result<Vec<u8>, CodecError> {
        let mut sink = Capped { out: Vec::new(), limit: size };
        lzma_rs::lzma_decompress(&mut io::Cursor::new(data), &mut sink).map_err(|e| corrupt(self.id(), e))?;
        sized(self.id(), sink.out, size)
    }
}

// ── Lookup ───────────────────────────────────────────────────────────────────

pub fn get_codec(id: CodecId) -> &'static dyn Codec {
    match id {
        CodecId::None   => &Identity,
        CodecId::Zstd   => &Zstd,
        CodecId::Lz4    => &Lz4,
        CodecId::Brotli => &Brotli,
        CodecId::Lzma   => &Lzma,
    }
}

/// Codec for an on-disk tag. Callers must not fall back to another codec.
pub fn get_codec_by_tag(tag: u8) -> Result<&'static dyn Codec, CodecError> {
    CodecId::from_tag(tag).map(get_codec).ok_or(CodecError::UnknownTag(tag))
}
