//! AFLR3 UGRID (`.ugrid`) volume grids.
//!
//! The file has no magic bytes; its variant is spelled by the suffix before
//! `.ugrid` (`wing.lb8.ugrid`):
//!
//! | suffix  | layout  | byte order | float | int |
//! |---------|---------|------------|-------|-----|
//! | (none)  | text    |            | f8    | i4  |
//! | `b8l`   | C       | big        | f8    | i8  |
//! | `b8`    | C       | big        | f8    | i4  |
//! | `b4`    | C       | big        | f4    | i4  |
//! | `lb8l`  | C       | little     | f8    | i8  |
//! | `lb8`   | C       | little     | f8    | i4  |
//! | `lb4`   | C       | little     | f4    | i4  |
//! | `r8`    | Fortran | big        | f8    | i4  |
//! | `r4`    | Fortran | big        | f4    | i4  |
//! | `lr8`   | Fortran | little     | f8    | i4  |
//! | `lr4`   | Fortran | little     | f4    | i4  |
//!
//! Fortran files wrap the 7-count header and the body in two records, each
//! framed by a leading and trailing byte count.
//!
//! Body order: coordinates, triangle and quad connectivity, one boundary tag
//! per triangle and quad, then tetrahedra, pyramids, prisms and hexahedra.
//! Indices are one-based. Boundary tags surface as the `ugrid:ref` cell
//! data; volume cells carry no tag and read back as zero.

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use log::debug;
use std::io::Write;
use std::path::Path;

use super::{to_indices, Capabilities, Encoding, Input, MeshFormat, Output, Precision, Scanner, WriteOptions};
use crate::cell::{CellBlock, CellType};
use crate::data::{ArrayValues, DType, DataArray};
use crate::error::{ReadError, UnsupportedFeatureError, WriteError};
use crate::mesh::{CellDataMap, DataMap, Mesh, Points};

const NAME: &str = "ugrid";

/// Cell types in file order; the first two are boundary faces.
const TYPES: [CellType; 6] = [
    CellType::Triangle,
    CellType::Quad,
    CellType::Tetra,
    CellType::Pyramid,
    CellType::Wedge,
    CellType::Hexahedron,
];

/// Cell data names accepted as boundary tags, in order of preference.
pub const TAG_NAMES: [&str; 4] = ["ugrid:ref", "medit:ref", "gmsh:physical", "flac3d:zone"];

/// Canonical pyramid vertex `j` is UGRID vertex `PYRAMID_FROM_FILE[j]`.
const PYRAMID_FROM_FILE: [usize; 5] = [1, 0, 4, 2, 3];
/// Inverse of [`PYRAMID_FROM_FILE`].
const PYRAMID_TO_FILE: [usize; 5] = [1, 0, 3, 4, 2];

// ── Variant ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Text,
    C,
    Fortran,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    framing: Framing,
    little:  bool,
    float:   DType,
    int:     DType,
}

impl Layout {
    const TEXT: Layout = Layout { framing: Framing::Text, little: false, float: DType::Float64, int: DType::Int32 };

    fn from_suffix(suffix: &str) -> Option<Layout> {
        let (framing, little, float, int) = match suffix {
            "b8l"  => (Framing::C, false, DType::Float64, DType::Int64),
            "b8"   => (Framing::C, false, DType::Float64, DType::Int32),
            "b4"   => (Framing::C, false, DType::Float32, DType::Int32),
            "lb8l" => (Framing::C, true, DType::Float64, DType::Int64),
            "lb8"  => (Framing::C, true, DType::Float64, DType::Int32),
            "lb4"  => (Framing::C, true, DType::Float32, DType::Int32),
            "r8"   => (Framing::Fortran, false, DType::Float64, DType::Int32),
            "r4"   => (Framing::Fortran, false, DType::Float32, DType::Int32),
            "lr8"  => (Framing::Fortran, true, DType::Float64, DType::Int32),
            "lr4"  => (Framing::Fortran, true, DType::Float32, DType::Int32),
            "ascii" => return Some(Self::TEXT),
            _ => return None,
        };
        Some(Layout { framing, little, float, int })
    }

    /// Variant named by the second-to-last dot component of the file name.
    fn for_path(path: Option<&Path>) -> Layout {
        let name = path.and_then(Path::file_name).and_then(|n| n.to_str()).unwrap_or("");
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() > 2 {
            Self::from_suffix(&parts[parts.len() - 2].to_ascii_lowercase()).unwrap_or(Self::TEXT)
        } else {
            Self::TEXT
        }
    }
}

// ── Reading ──────────────────────────────────────────────────────────────────

struct Source<'a> {
    s:      Scanner<'a>,
    layout: Layout,
}

impl<'a> Source<'a> {
    fn values(&mut self, dtype: DType, count: usize, what: &str) -> Result<ArrayValues, ReadError> {
        match (self.layout.framing, self.layout.little) {
            (Framing::Text, _) => self.s.text_values(dtype, count, what),
            (_, true)          => self.s.binary_values::<LittleEndian>(dtype, count, what),
            (_, false)         => self.s.binary_values::<BigEndian>(dtype, count, what),
        }
    }

    fn ints(&mut self, count: usize, what: &str) -> Result<ArrayValues, ReadError> {
        self.values(self.layout.int, count, what)
    }

    /// Fortran record marker; returns the byte count it declares.
    fn marker(&mut self) -> Result<u64, ReadError> {
        let at = self.s.offset();
        let raw = self.ints(1, "record marker")?;
        raw.get_i64(0)
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| ReadError::at_offset(NAME, at, "negative record marker"))
    }

    fn expect_marker(&mut self, expected: u64) -> Result<(), ReadError> {
        let at = self.s.offset();
        let found = self.marker()?;
        if found != expected {
            return Err(ReadError::at_offset(
                NAME,
                at,
                format!("record marker says {found} bytes, record has {expected}"),
            ));
        }
        Ok(())
    }

    fn fortran(&self) -> bool {
        self.layout.framing == Framing::Fortran
    }
}

fn read_mesh(input: &Input<'_>, layout: Layout) -> Result<Mesh, ReadError> {
    let mut src = Source { s: Scanner::new(NAME, input.bytes), layout };
    let int_size = layout.int.size() as u64;

    if src.fortran() {
        src.expect_marker(7 * int_size)?;
    }
    let header = src.ints(7, "header")?;
    let counts = to_indices(NAME, &header, 0).map_err(|_| ReadError::new(NAME, "header of ugrid file is ill-formed"))?;
    if src.fortran() {
        src.expect_marker(7 * int_size)?;
    }
    let body_start = src.s.offset();
    let body_len = if src.fortran() { Some(src.marker()?) } else { None };

    let num_points = counts[0];
    let coords = src.values(layout.float, num_points.saturating_mul(3), "coordinates")?;
    let coords = (0..coords.len()).map(|i| coords.get_f64(i)).collect();

    let mut cells = Vec::new();
    let mut tags = Vec::new();
    let mut read_block = |src: &mut Source<'_>, k: usize| -> Result<(), ReadError> {
        let t = TYPES[k];
        let n = counts[k + 1];
        if n == 0 {
            return Ok(());
        }
        let nodes = t.num_nodes().unwrap_or(0);
        let raw = src.ints(n.saturating_mul(nodes), t.name())?;
        let mut conn = to_indices(NAME, &raw, 1)?;
        if t == CellType::Pyramid {
            conn = conn
                .chunks_exact(5)
                .flat_map(|c| PYRAMID_FROM_FILE.map(|j| c[j]))
                .collect();
        }
        cells.push(CellBlock::from_parts(t, conn, None).map_err(|e| ReadError::invalid_mesh(NAME, e))?);
        Ok(())
    };

    for k in 0..2 {
        read_block(&mut src, k)?;
    }
    for k in 0..2 {
        if counts[k + 1] > 0 {
            tags.push(src.ints(counts[k + 1], "boundary tags")?);
        }
    }
    for k in 2..TYPES.len() {
        read_block(&mut src, k)?;
    }

    if let Some(expected) = body_len {
        let found = src.s.offset() - body_start - int_size;
        if found != expected {
            return Err(ReadError::at_offset(
                NAME,
                body_start,
                format!("record marker says {expected} bytes, record has {found}"),
            ));
        }
        src.expect_marker(expected)?;
    }

    let mut cell_data = CellDataMap::new();
    if !cells.is_empty() {
        let volume_tags = cells[tags.len()..].iter().map(|b| {
            let zeros = match layout.int {
                DType::Int64 => ArrayValues::Int64(vec![0; b.len()]),
                _            => ArrayValues::Int32(vec![0; b.len()]),
            };
            DataArray::scalars(zeros)
        });
        let arrays = tags.into_iter().map(DataArray::scalars).chain(volume_tags).collect();
        cell_data.insert(TAG_NAMES[0].to_owned(), arrays);
    }

    let invalid = |e| ReadError::invalid_mesh(NAME, e);
    let points = Points::new(coords, 3).map_err(invalid)?;
    Mesh::new(points, cells, DataMap::new(), cell_data, DataMap::new()).map_err(invalid)
}

// ── Writing ──────────────────────────────────────────────────────────────────

/// Serializes one record in the file's layout.
struct Encoder {
    layout: Layout,
    buf:    Vec<u8>,
}

impl Encoder {
    fn new(layout: Layout) -> Self {
        Self { layout, buf: Vec::new() }
    }

    fn ints(&mut self, values: &[i64], per_row: usize) -> Result<(), WriteError> {
        if self.layout.framing == Framing::Text {
            for row in values.chunks(per_row.max(1)) {
                let line: Vec<String> = row.iter().map(i64::to_string).collect();
                writeln!(self.buf, "{}", line.join(" ")).map_err(|e| WriteError::io(NAME, e))?;
            }
            return Ok(());
        }
        for &v in values {
            let mut word = [0u8; 8];
            let bytes = match self.layout.int {
                DType::Int64 => {
                    write_i64(&mut word, v, self.layout.little);
                    &word[..8]
                }
                _ => {
                    let v = i32::try_from(v).map_err(|_| WriteError::new(NAME, format!("{v} does not fit a 4-byte integer")))?;
                    write_i32(&mut word, v, self.layout.little);
                    &word[..4]
                }
            };
            self.buf.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn floats(&mut self, values: &[f64], per_row: usize) -> Result<(), WriteError> {
        let io = |e| WriteError::io(NAME, e);
        match (self.layout.framing, self.layout.float, self.layout.little) {
            (Framing::Text, _, _) => {
                for row in values.chunks(per_row.max(1)) {
                    let line: Vec<String> = row.iter().map(f64::to_string).collect();
                    writeln!(self.buf, "{}", line.join(" ")).map_err(io)?;
                }
            }
            (_, DType::Float32, true)  => values.iter().try_for_each(|&v| self.buf.write_f32::<LittleEndian>(v as f32)).map_err(io)?,
            (_, DType::Float32, false) => values.iter().try_for_each(|&v| self.buf.write_f32::<BigEndian>(v as f32)).map_err(io)?,
            (_, _, true)               => values.iter().try_for_each(|&v| self.buf.write_f64::<LittleEndian>(v)).map_err(io)?,
            (_, _, false)              => values.iter().try_for_each(|&v| self.buf.write_f64::<BigEndian>(v)).map_err(io)?,
        }
        Ok(())
    }

    /// Emit the record, framed with byte counts for Fortran layouts.
    fn finish(self, sink: &mut dyn Write) -> Result<(), WriteError> {
        let io = |e| WriteError::io(NAME, e);
        if self.layout.framing != Framing::Fortran {
            return sink.write_all(&self.buf).map_err(io);
        }
        let len = i32::try_from(self.buf.len())
            .map_err(|_| WriteError::new(NAME, "record exceeds the 2 GiB Fortran limit"))?;
        let mut marker = [0u8; 8];
        write_i32(&mut marker, len, self.layout.little);
        sink.write_all(&marker[..4]).map_err(io)?;
        sink.write_all(&self.buf).map_err(io)?;
        sink.write_all(&marker[..4]).map_err(io)
    }
}

fn write_i32(buf: &mut [u8], v: i32, little: bool) {
    if little { LittleEndian::write_i32(buf, v) } else { BigEndian::write_i32(buf, v) }
}

fn write_i64(buf: &mut [u8], v: i64, little: bool) {
    if little { LittleEndian::write_i64(buf, v) } else { BigEndian::write_i64(buf, v) }
}

/// The cell data array supplying boundary tags, if any.
fn tag_source(mesh: &Mesh) -> Option<(&'static str, &[DataArray])> {
    TAG_NAMES
        .iter()
        .find_map(|&name| mesh.cell_data().get(name).map(|arrays| (name, arrays.as_slice())))
}

fn write_mesh(mesh: &Mesh, sink: &mut dyn Write, layout: Layout) -> Result<(), WriteError> {
    if mesh.points().dim() != 3 {
        return Err(WriteError::new(NAME, "points must be three-dimensional"));
    }
    if let Some(block) = mesh.cells().iter().find(|b| !TYPES.contains(&b.cell_type())) {
        return Err(WriteError::new(NAME, format!("cannot store {} cells", block.cell_type())));
    }
    let count = |t: CellType| mesh.cells_of_type(t).map(CellBlock::len).sum::<usize>() as i64;

    let mut header = Encoder::new(layout);
    let counts: Vec<i64> = std::iter::once(mesh.num_points() as i64).chain(TYPES.iter().map(|&t| count(t))).collect();
    header.ints(&counts, 7)?;
    header.finish(sink)?;

    let mut body = Encoder::new(layout);
    body.floats(mesh.points().coords(), 3)?;

    let one_based = |t: CellType| -> Vec<i64> {
        mesh.cells_of_type(t)
            .flat_map(|b| b.iter())
            .flat_map(|cell| {
                let file: Vec<usize> = if t == CellType::Pyramid {
                    PYRAMID_TO_FILE.iter().map(|&j| cell[j]).collect()
                } else {
                    cell.to_vec()
                };
                file.into_iter().map(|i| i as i64 + 1)
            })
            .collect()
    };

    for &t in &TYPES[..2] {
        body.ints(&one_based(t), t.num_nodes().unwrap_or(1))?;
    }

    let source = tag_source(mesh);
    for &t in &TYPES[..2] {
        let tags: Vec<i64> = match source {
            Some((_, arrays)) => mesh
                .cells()
                .iter()
                .zip(arrays)
                .filter(|(b, _)| b.cell_type() == t)
                .flat_map(|(_, a)| (0..a.values().len()).map(move |i| a.values().get_i64(i).unwrap_or(1)))
                .collect(),
            None => vec![1; count(t) as usize],
        };
        body.ints(&tags, 1)?;
    }

    for &t in &TYPES[2..] {
        body.ints(&one_based(t), t.num_nodes().unwrap_or(1))?;
    }
    debug!("ugrid: {} points, counts {:?}, tags from {:?}", mesh.num_points(), &counts[1..], source.map(|s| s.0));
    body.finish(sink)
}

// ── Format ───────────────────────────────────────────────────────────────────

pub struct UgridFormat;

impl MeshFormat for UgridFormat {
    fn name(&self) -> &'static str { NAME }

    fn extensions(&self) -> &'static [&'static str] { &["ugrid"] }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MIXED_CELL_TYPES
            | Capabilities::PER_BLOCK_CELL_DATA
            | Capabilities::ASCII
            | Capabilities::BINARY
            | Capabilities::CELL_DATA
            | Capabilities::POINT_CLOUD
    }

    fn cell_types(&self) -> Option<&'static [CellType]> {
        Some(&TYPES)
    }

    /// No magic bytes; UGRID is only recognised by extension.
    fn detect(&self, _head: &[u8]) -> bool {
        false
    }

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError> {
        read_mesh(input, Layout::for_path(input.path))
    }

    /// The file name fixes the variant, so an explicitly requested encoding
    /// must agree with it.
    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, options: &WriteOptions) -> Result<(), WriteError> {
        let layout = Layout::for_path(out.path);
        if let Some(encoding) = options.encoding {
            let text = layout.framing == Framing::Text;
            if text != (encoding == Encoding::Ascii) {
                return Err(WriteError::new(
                    NAME,
                    format!("{encoding} output needs a matching file name suffix (e.g. `.lb8.ugrid` for binary)"),
                ));
            }
        }
        write_mesh(mesh, &mut *out.sink, layout)
    }

    /// Only one boundary-tag array survives, and only on faces.
    fn check(&self, mesh: &Mesh) -> Result<(), UnsupportedFeatureError> {
        let source = tag_source(mesh);
        for name in mesh.cell_data().keys() {
            if source.map(|(s, _)| s) != Some(name.as_str()) {
                return Err(UnsupportedFeatureError::new(NAME, format!("cell data `{name}`")));
            }
        }
        let Some((name, arrays)) = source else {
            return Ok(());
        };
        for (block, array) in mesh.cells().iter().zip(arrays) {
            if !array.dtype().is_integer() || array.components() != 1 {
                return Err(UnsupportedFeatureError::new(NAME, format!("non-integer tags in `{name}`")));
            }
            let surface = TYPES[..2].contains(&block.cell_type());
            if !surface && (0..array.values().len()).any(|i| array.values().get_i64(i) != Some(0)) {
                return Err(UnsupportedFeatureError::new(
                    NAME,
                    format!("`{name}` tags on {} cells", block.cell_type()),
                ));
            }
        }
        Ok(())
    }

    fn precision(&self, path: Option<&Path>) -> Precision {
        match Layout::for_path(path).float {
            DType::Float32 => Precision::Float32,
            _              => Precision::Float64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Faces before volumes, one block per type: the order UGRID stores.
    fn grid() -> Mesh {
        let points = Points::from_xyz(&[
            [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0],
            [0.5, 0.5, 1.0], [0.1, 0.2, -1.0 / 3.0],
        ]);
        Mesh::builder(points)
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 4], vec![1, 2, 4]]).unwrap())
            .cells(CellBlock::new(CellType::Quad, vec![vec![0, 1, 2, 3]]).unwrap())
            .cells(CellBlock::new(CellType::Tetra, vec![vec![0, 1, 3, 5]]).unwrap())
            .cells(CellBlock::new(CellType::Pyramid, vec![vec![0, 1, 2, 3, 4]]).unwrap())
            .cell_data(
                "ugrid:ref",
                vec![
                    DataArray::from(vec![7i32, 8]),
                    DataArray::from(vec![9i32]),
                    DataArray::from(vec![0i32]),
                    DataArray::from(vec![0i32]),
                ],
            )
            .build()
            .unwrap()
    }

    fn encode(mesh: &Mesh, file: &str) -> Vec<u8> {
        let path = PathBuf::from(file);
        let mut buf = Vec::new();
        UgridFormat
            .write(mesh, &mut Output::new(&mut buf, Some(&path)), &WriteOptions::default())
            .unwrap();
        buf
    }

    fn decode(bytes: &[u8], file: &str) -> Mesh {
        let path = PathBuf::from(file);
        UgridFormat.read(&Input::new(bytes, Some(&path))).unwrap()
    }

    #[test]
    fn every_variant_round_trips() {
        let mesh = grid();
        for suffix in ["ascii", "b8l", "b8", "b4", "lb8l", "lb8", "lb4", "r8", "r4", "lr8", "lr4"] {
            let file = format!("grid.{suffix}.ugrid");
            let back = decode(&encode(&mesh, &file), &file);
            let tol = UgridFormat.precision(Some(Path::new(&file))).tolerance();
            assert!(back.approx_eq(&mesh, tol), "variant {suffix}");
        }
        let plain = decode(&encode(&mesh, "grid.ugrid"), "grid.ugrid");
        assert_eq!(plain, mesh);
    }

    #[test]
    fn pyramid_order_is_mapped_both_ways() {
        let text = encode(&grid(), "grid.ugrid");
        let text = String::from_utf8(text).unwrap();
        // Canonical [0,1,2,3,4] is stored as [1,0,3,4,2] in file order, one-based.
        assert!(text.lines().any(|l| l == "2 1 4 5 3"), "{text}");
    }

    #[test]
    fn fortran_records_are_framed() {
        let bytes = encode(&grid(), "grid.r8.ugrid");
        assert_eq!(BigEndian::read_i32(&bytes[0..4]), 28);
        assert_eq!(BigEndian::read_i32(&bytes[32..36]), 28);
        let body = BigEndian::read_i32(&bytes[36..40]) as usize;
        assert_eq!(bytes.len(), 40 + body + 4);

        let mut broken = bytes.clone();
        broken[0] = 1;
        let path = PathBuf::from("grid.r8.ugrid");
        assert!(UgridFormat.read(&Input::new(&broken, Some(&path))).is_err());
    }

    #[test]
    fn fallback_tags_and_rejections() {
        let mesh = Mesh::builder(Points::from_xyz(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]))
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2]]).unwrap())
            .cell_data("gmsh:physical", vec![DataArray::from(vec![4i64])])
            .build()
            .unwrap();
        assert!(UgridFormat.check(&mesh).is_ok());
        let back = decode(&encode(&mesh, "t.ugrid"), "t.ugrid");
        assert_eq!(back.cell_data()["ugrid:ref"], vec![DataArray::from(vec![4i32])]);

        let mut bad = grid().into_parts();
        bad.3.insert("ugrid:ref".into(), vec![
            DataArray::from(vec![7i32, 8]),
            DataArray::from(vec![9i32]),
            DataArray::from(vec![3i32]),
            DataArray::from(vec![0i32]),
        ]);
        let bad = Mesh::new(bad.0, bad.1, bad.2, bad.3, bad.4).unwrap();
        assert!(UgridFormat.check(&bad).is_err());
    }

    #[test]
    fn encoding_must_match_file_name() {
        let path = PathBuf::from("grid.ugrid");
        let options = WriteOptions { encoding: Some(Encoding::Binary), ..WriteOptions::default() };
        let mut buf = Vec::new();
        assert!(UgridFormat.write(&grid(), &mut Output::new(&mut buf, Some(&path)), &options).is_err());
    }
}
