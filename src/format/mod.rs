//! Plug-in contract for mesh file formats.
//!
//! A format is a value implementing [`MeshFormat`]: a reader producing a
//! [`Mesh`], a writer consuming one, a content sniffer and a declaration of
//! what the on-disk layout can represent. The engine never special-cases a
//! format; everything it needs is in the trait.
//!
//! # Thread safety
//! Formats are shared through the process-wide registry, so they must be
//! `Send + Sync` and keep no mutable state between calls.

pub mod mcb;
pub mod meshjson;
pub mod registry;
pub mod stl;
pub mod ugrid;
pub mod vtk;

use byteorder::ByteOrder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::ops::BitOr;
use std::path::Path;

use crate::cell::CellType;
use crate::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::data::{ArrayValues, DType};
use crate::error::{ReadError, UnsupportedFeatureError, WriteError};
use crate::mesh::Mesh;

pub use registry::FormatRegistry;

// ── Capabilities ─────────────────────────────────────────────────────────────

/// Set of structural features a format can represent faithfully.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE:                 Capabilities = Capabilities(0);
    /// More than one cell type in a mesh.
    pub const MIXED_CELL_TYPES:     Capabilities = Capabilities(1 << 0);
    /// Cell data stored per block rather than as one flat array.
    pub const PER_BLOCK_CELL_DATA:  Capabilities = Capabilities(1 << 1);
    pub const FIELD_DATA:           Capabilities = Capabilities(1 << 2);
    pub const BINARY:               Capabilities = Capabilities(1 << 3);
    pub const ASCII:                Capabilities = Capabilities(1 << 4);
    pub const HIGHER_ORDER_CELLS:   Capabilities = Capabilities(1 << 5);
    pub const POINT_DATA:           Capabilities = Capabilities(1 << 6);
    pub const CELL_DATA:            Capabilities = Capabilities(1 << 7);
    /// Variable-arity cells (polygons).
    pub const POLYGONS:             Capabilities = Capabilities(1 << 8);
    /// A mesh with no cells at all.
    pub const POINT_CLOUD:          Capabilities = Capabilities(1 << 9);
    pub const POINTS_2D:            Capabilities = Capabilities(1 << 10);
    /// Several blocks of the same cell type. Without it the engine
    /// consolidates before writing.
    pub const REPEATED_CELL_TYPES:  Capabilities = Capabilities(1 << 11);
    pub const COMPRESSION:          Capabilities = Capabilities(1 << 12);

    const NAMES: [(Capabilities, &'static str); 13] = [
        (Self::MIXED_CELL_TYPES,    "mixed-cell-types"),
        (Self::PER_BLOCK_CELL_DATA, "per-block-cell-data"),
        (Self::FIELD_DATA,          "field-data"),
        (Self::BINARY,              "binary"),
        (Self::ASCII,               "ascii"),
        (Self::HIGHER_ORDER_CELLS,  "higher-order-cells"),
        (Self::POINT_DATA,          "point-data"),
        (Self::CELL_DATA,           "cell-data"),
        (Self::POLYGONS,            "polygons"),
        (Self::POINT_CLOUD,         "point-cloud"),
        (Self::POINTS_2D,           "2d-points"),
        (Self::REPEATED_CELL_TYPES, "repeated-cell-types"),
        (Self::COMPRESSION,         "compression"),
    ];

    #[inline]
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES.iter().filter(|(c, _)| self.contains(*c)).map(|(_, n)| *n).collect()
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;
    fn bitor(self, rhs: Self) -> Self { Capabilities(self.0 | rhs.0) }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.names().join(", "))
    }
}

// ── Encoding / precision ─────────────────────────────────────────────────────

/// ASCII or binary sub-variant of a format that offers both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Ascii,
    Binary,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Ascii  => "ascii",
            Encoding::Binary => "binary",
        })
    }
}

/// Width of the floating values a format stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precision {
    Float64,
    Float32,
}

impl Precision {
    /// Relative tolerance for comparing a mesh with its re-read copy.
    pub fn tolerance(self) -> f64 {
        match self {
            Precision::Float64 => 0.0,
            Precision::Float32 => f32::EPSILON as f64,
        }
    }
}

// ── Read / write plumbing ────────────────────────────────────────────────────

/// Source handed to a reader: the whole file plus its path when known.
/// Some formats (UGRID) pick a sub-variant from the file name.
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    pub bytes: &'a [u8],
    pub path:  Option<&'a Path>,
}

impl<'a> Input<'a> {
    pub fn new(bytes: &'a [u8], path: Option<&'a Path>) -> Self {
        Self { bytes, path }
    }
}

/// Destination handed to a writer.
pub struct Output<'a> {
    pub sink: &'a mut dyn Write,
    pub path: Option<&'a Path>,
}

impl<'a> Output<'a> {
    pub fn new(sink: &'a mut dyn Write, path: Option<&'a Path>) -> Self {
        Self { sink, path }
    }
}

/// Writer knobs. Formats ignore the ones that do not apply to them.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// `None` keeps the format's default sub-variant.
    pub encoding:    Option<Encoding>,
    /// `None` keeps the format's default (uncompressed for all built-ins).
    pub compression: Option<CodecId>,
    pub level:       i32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { encoding: None, compression: None, level: DEFAULT_COMPRESSION_LEVEL }
    }
}

// ── MeshFormat ───────────────────────────────────────────────────────────────

pub trait MeshFormat: Send + Sync {
    /// Registry key, lowercase.
    fn name(&self) -> &'static str;

    /// File extensions without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    fn capabilities(&self) -> Capabilities;

    /// Cell types the format can store; `None` means any.
    fn cell_types(&self) -> Option<&'static [CellType]> {
        None
    }

    /// Whether the leading bytes of a file look like this format.
    fn detect(&self, head: &[u8]) -> bool;

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError>;

    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, options: &WriteOptions) -> Result<(), WriteError>;

    /// Format-specific representability checks beyond [`Capabilities`].
    fn check(&self, _mesh: &Mesh) -> Result<(), UnsupportedFeatureError> {
        Ok(())
    }

    /// Floating width used for a given file; drives round-trip tolerance.
    fn precision(&self, _path: Option<&Path>) -> Precision {
        Precision::Float64
    }
}

// ── Shared scanner ───────────────────────────────────────────────────────────

/// Cursor over a file that mixes whitespace-separated text with raw binary
/// runs (legacy VTK, UGRID, STL). Tracks the line for text errors and the
/// byte offset for binary ones.
pub(crate) struct Scanner<'a> {
    format: &'static str,
    bytes:  &'a [u8],
    pos:    usize,
    line:   usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(format: &'static str, bytes: &'a [u8]) -> Self {
        Self { format, bytes, pos: 0, line: 1 }
    }

    pub(crate) fn line(&self) -> usize { self.line }

    pub(crate) fn offset(&self) -> u64 { self.pos as u64 }

    pub(crate) fn error(&self, message: impl Into<String>) -> ReadError {
        ReadError::at_line(self.format, self.line, message)
    }

    fn skip_whitespace(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if !b.is_ascii_whitespace() {
                break;
            }
            if b == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
    }

    /// True once only whitespace remains.
    pub(crate) fn at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.bytes.len()
    }

    pub(crate) fn next_token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        if self.pos >= self.bytes.len() {
            return None;
        }
        let start = self.pos;
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        Some(std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("<non-text>"))
    }

    pub(crate) fn peek_token(&mut self) -> Option<&'a str> {
        let (pos, line) = (self.pos, self.line);
        let tok = self.next_token();
        self.pos = pos;
        self.line = line;
        tok
    }

    pub(crate) fn expect(&mut self, what: &str) -> Result<&'a str, ReadError> {
        let line = self.line;
        self.next_token().ok_or_else(|| {
            ReadError::at_line(self.format, line, format!("unexpected end of file, expected {what}"))
        })
    }

    /// Consume a keyword, ignoring case.
    pub(crate) fn keyword(&mut self, keyword: &str) -> Result<(), ReadError> {
        let tok = self.expect(keyword)?;
        if tok.eq_ignore_ascii_case(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{keyword}`, found `{tok}`")))
        }
    }

    /// Next token parsed as `T`, or a located [`ReadError`].
    pub(crate) fn parse<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, ReadError> {
        let tok = self.expect(what)?;
        tok.parse::<T>().map_err(|_| self.error(format!("invalid {what}: `{tok}`")))
    }

    /// Remainder of the current line, without the line break.
    pub(crate) fn rest_of_line(&mut self) -> &'a str {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
        let text = &self.bytes[start..self.pos];
        if self.pos < self.bytes.len() {
            self.pos += 1;
            self.line += 1;
        }
        std::str::from_utf8(text).unwrap_or("").trim_end_matches('\r')
    }

    /// Step over the line break that separates a text header from the binary
    /// payload following it.
    pub(crate) fn end_header_line(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                break;
            }
        }
    }

    pub(crate) fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], ReadError> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.bytes.len()).ok_or_else(|| {
            ReadError::at_offset(
                self.format,
                self.offset(),
                format!("truncated {what}: need {len} bytes, {} left", self.bytes.len() - self.pos),
            )
        })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// `count` whitespace-separated values of the given dtype.
    pub(crate) fn text_values(&mut self, dtype: DType, count: usize, what: &str) -> Result<ArrayValues, ReadError> {
        Ok(match dtype {
            DType::Float64 => ArrayValues::Float64((0..count).map(|_| self.parse(what)).collect::<Result<_, _>>()?),
            DType::Float32 => ArrayValues::Float32((0..count).map(|_| self.parse(what)).collect::<Result<_, _>>()?),
            DType::Int64   => ArrayValues::Int64((0..count).map(|_| self.parse(what)).collect::<Result<_, _>>()?),
            DType::Int32   => ArrayValues::Int32((0..count).map(|_| self.parse(what)).collect::<Result<_, _>>()?),
        })
    }

    /// `count` packed values of the given dtype in byte order `B`.
    pub(crate) fn binary_values<B: ByteOrder>(
        &mut self,
        dtype: DType,
        count: usize,
        what: &str,
    ) -> Result<ArrayValues, ReadError> {
        let len = count.checked_mul(dtype.size()).ok_or_else(|| self.error(format!("{what} count overflows")))?;
        let raw = self.take(len, what)?;
        let step = dtype.size();
        Ok(match dtype {
            DType::Float64 => ArrayValues::Float64(raw.chunks_exact(step).map(B::read_f64).collect()),
            DType::Float32 => ArrayValues::Float32(raw.chunks_exact(step).map(B::read_f32).collect()),
            DType::Int64   => ArrayValues::Int64(raw.chunks_exact(step).map(B::read_i64).collect()),
            DType::Int32   => ArrayValues::Int32(raw.chunks_exact(step).map(B::read_i32).collect()),
        })
    }
}

/// Widen decoded integers to point indices, shifting by `base` (1 for
/// one-based formats). Negative results are a read error.
pub(crate) fn to_indices(format: &str, values: &ArrayValues, base: i64) -> Result<Vec<usize>, ReadError> {
    (0..values.len())
        .map(|i| {
            let v = values
                .get_i64(i)
                .ok_or_else(|| ReadError::new(format, "connectivity must be integral"))?;
            usize::try_from(v - base).map_err(|_| ReadError::new(format, format!("invalid point index {v}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::BigEndian;

    #[test]
    fn capability_sets_compose() {
        let caps = Capabilities::ASCII | Capabilities::BINARY | Capabilities::POINT_DATA;
        assert!(caps.contains(Capabilities::ASCII | Capabilities::BINARY));
        assert!(!caps.contains(Capabilities::FIELD_DATA));
        assert_eq!(caps.to_string(), "binary, ascii, point-data");
    }

    #[test]
    fn scanner_tracks_lines() {
        let mut s = Scanner::new("vtk", b"POINTS 2\n1.0 2.0\n  x");
        s.keyword("points").unwrap();
        assert_eq!(s.parse::<usize>("count").unwrap(), 2);
        assert_eq!(s.parse::<f64>("x").unwrap(), 1.0);
        assert_eq!(s.line(), 2);
        s.next_token();
        let err = s.parse::<f64>("coordinate").unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn scanner_switches_to_binary_after_header() {
        let mut bytes = b"DATA 2\n".to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 7, 0xff, 0xff, 0xff, 0xff]);
        let mut s = Scanner::new("vtk", &bytes);
        s.keyword("DATA").unwrap();
        s.parse::<usize>("count").unwrap();
        s.end_header_line();
        let values = s.binary_values::<BigEndian>(DType::Int32, 2, "values").unwrap();
        assert_eq!(values, ArrayValues::Int32(vec![7, -1]));
        assert!(s.at_end());
        let err = s.take(4, "trailer").unwrap_err();
        assert!(err.to_string().contains("byte offset 15"), "{err}");
    }

    #[test]
    fn indices_reject_negative_values() {
        assert_eq!(to_indices("ugrid", &ArrayValues::Int32(vec![1, 3]), 1).unwrap(), vec![0, 2]);
        assert!(to_indices("ugrid", &ArrayValues::Int32(vec![0]), 1).is_err());
        assert!(to_indices("vtk", &ArrayValues::Float64(vec![0.0]), 0).is_err());
    }
}
