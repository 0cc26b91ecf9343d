//! Whole-file operations built on the [`Converter`].
//!
//! Each one reads a file into the canonical mesh, optionally rewrites it
//! with different writer options and reports or stores the result. None of
//! them inspects format-specific bytes; a format opts in through its
//! [`Capabilities`].

use log::{debug, info};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::cell::CellType;
use crate::codec::CodecId;
use crate::config::ConvertOptions;
use crate::engine::Converter;
use crate::error::{Result, UnsupportedFeatureError};
use crate::format::{Capabilities, Encoding, MeshFormat, WriteOptions};

// ── MeshInfo ─────────────────────────────────────────────────────────────────

/// Summary returned by [`info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshInfo {
    pub format:     String,
    pub num_points: usize,
    pub point_dim:  usize,
    /// Cell count per type, types in first-seen block order.
    pub cells:      Vec<(CellType, usize)>,
    pub blocks:     usize,
    pub point_data: Vec<String>,
    pub cell_data:  Vec<String>,
    pub field_data: Vec<String>,
}

impl fmt::Display for MeshInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |names: &[String]| if names.is_empty() { "-".to_owned() } else { names.join(", ") };
        writeln!(f, "── Mesh ─────────────────────────────────────────────────")?;
        writeln!(f, "  Format         {}", self.format)?;
        writeln!(f, "  Points         {} ({}D)", self.num_points, self.point_dim)?;
        writeln!(f, "  Cell blocks    {}", self.blocks)?;
        for (cell_type, count) in &self.cells {
            writeln!(f, "    {:<14} {count}", cell_type.name())?;
        }
        writeln!(f, "  Point data     {}", list(&self.point_data))?;
        writeln!(f, "  Cell data      {}", list(&self.cell_data))?;
        write!(f, "  Field data     {}", list(&self.field_data))
    }
}

// ── Operations ───────────────────────────────────────────────────────────────

fn require(format: &dyn MeshFormat, caps: Capabilities, feature: &str) -> Result<()> {
    if format.capabilities().contains(caps) {
        Ok(())
    } else {
        Err(UnsupportedFeatureError::new(format.name(), feature).into())
    }
}

pub fn convert(conv: &Converter<'_>, input: &Path, output: &Path, options: &ConvertOptions) -> Result<()> {
    conv.convert(input, output, options)?;
    info!("converted {} -> {}", input.display(), output.display());
    Ok(())
}

pub fn info(conv: &Converter<'_>, path: &Path, format: Option<&str>) -> Result<MeshInfo> {
    let (mesh, format) = conv.read(path, format)?;
    Ok(MeshInfo {
        format:     format.name().to_owned(),
        num_points: mesh.num_points(),
        point_dim:  mesh.points().dim(),
        cells:      mesh.cell_counts(),
        blocks:     mesh.cells().len(),
        point_data: mesh.point_data().keys().cloned().collect(),
        cell_data:  mesh.cell_data().keys().cloned().collect(),
        field_data: mesh.field_data().keys().cloned().collect(),
    })
}

/// Rewrite `path` in its own format with `options`, to `output` or in place.
fn rewrite(
    conv:    &Converter<'_>,
    path:    &Path,
    output:  Option<&Path>,
    needs:   (Capabilities, &str),
    options: WriteOptions,
) -> Result<()> {
    let (mesh, format) = conv.read(path, None)?;
    require(format, needs.0, needs.1)?;
    let target = output.unwrap_or(path);
    conv.write(&mesh, target, Some(format.name()), &options)?;
    Ok(())
}

/// Rewrite with compressed sections.
pub fn compress(conv: &Converter<'_>, path: &Path, output: Option<&Path>, codec: CodecId, level: i32) -> Result<()> {
    if !codec.uses_level() {
        debug!("{} ignores the compression level", codec.name());
    }
    let options = WriteOptions { compression: Some(codec), level, ..WriteOptions::default() };
    rewrite(conv, path, output, (Capabilities::COMPRESSION, "compression"), options)?;
    info!("compressed {} with {}", path.display(), codec.name());
    Ok(())
}

pub fn decompress(conv: &Converter<'_>, path: &Path, output: Option<&Path>) -> Result<()> {
    let options = WriteOptions { compression: Some(CodecId::None), ..WriteOptions::default() };
    rewrite(conv, path, output, (Capabilities::COMPRESSION, "compression"), options)?;
    info!("decompressed {}", path.display());
    Ok(())
}

fn reencode(conv: &Converter<'_>, path: &Path, encoding: Encoding) -> Result<()> {
    let options = WriteOptions { encoding: Some(encoding), ..WriteOptions::default() };
    rewrite(conv, path, None, (Capabilities::ASCII | Capabilities::BINARY, "a choice of encodings"), options)?;
    info!("rewrote {} as {encoding}", path.display());
    Ok(())
}

/// Rewrite `path` in place with ASCII encoding.
pub fn ascii(conv: &Converter<'_>, path: &Path) -> Result<()> {
    reencode(conv, path, Encoding::Ascii)
}

/// Rewrite `path` in place with binary encoding.
pub fn binary(conv: &Converter<'_>, path: &Path) -> Result<()> {
    reencode(conv, path, Encoding::Binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBlock;
    use crate::format::registry::FormatRegistry;
    use crate::mesh::{Mesh, Points};
    use crate::MeshError;

    fn write_sample(conv: &Converter<'_>, path: &Path) {
        let mesh = Mesh::builder(Points::from_xy(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]))
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2]]).unwrap())
            .point_data("u", vec![1.0, 2.0, 3.0])
            .build()
            .unwrap();
        conv.write(&mesh, path, None, &WriteOptions::default()).unwrap();
    }

    #[test]
    fn info_reports_counts_and_names() {
        let reg = FormatRegistry::with_builtin();
        let conv = Converter::new(&reg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.json");
        write_sample(&conv, &path);

        let summary = info(&conv, &path, None).unwrap();
        assert_eq!(summary.format, "meshjson");
        assert_eq!(summary.num_points, 3);
        assert_eq!(summary.point_dim, 2);
        assert_eq!(summary.cells, vec![(CellType::Triangle, 1)]);
        assert_eq!(summary.point_data, vec!["u".to_owned()]);
        let text = summary.to_string();
        assert!(text.contains("triangle"), "{text}");
        assert!(text.contains("Cell data      -"), "{text}");
    }

    #[test]
    fn compression_needs_a_capable_format() {
        let reg = FormatRegistry::with_builtin();
        let conv = Converter::new(&reg);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.json");
        write_sample(&conv, &path);
        let before = std::fs::read(&path).unwrap();

        let err = compress(&conv, &path, None, CodecId::Zstd, 3).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFeature(_)), "{err}");
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(matches!(ascii(&conv, &path), Err(MeshError::UnsupportedFeature(_))));
    }
}
