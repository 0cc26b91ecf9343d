//! Legacy VTK (`.vtk`) reader/writer for `UNSTRUCTURED_GRID` datasets.
//!
//! Cells live in one flat array (`CELLS` + `CELL_TYPES`), so cell data is a
//! single array per name across all cells. Reading cuts the flat array back
//! into blocks at every type change, so two adjacent blocks of one type come
//! back as one. The format therefore does not claim repeated cell types and
//! meshes reach it consolidated.
//!
//! - Encodings: `ASCII` and `BINARY` (big-endian, as the format mandates).
//! - Points are always stored with three components; 2D meshes are padded
//!   with `z = 0` and come back as 3D.
//! - Point, cell and dataset data are written as `FIELD` arrays. The reader
//!   also accepts `SCALARS`, `VECTORS` and `NORMALS` attributes, and the
//!   `OFFSETS`/`CONNECTIVITY` cell layout of version 5 files.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt::Display;
use std::io::{self, Write};

use super::{to_indices, Capabilities, Encoding, Input, MeshFormat, Output, Scanner, WriteOptions};
use crate::cell::CellType;
use crate::consolidate::{partition, split_runs};
use crate::data::{ArrayValues, DType, DataArray};
use crate::error::{ReadError, UnsupportedFeatureError, WriteError};
use crate::mesh::{DataMap, FlatCells, Mesh, Points};

const NAME: &str = "vtk";
const MAGIC: &[u8] = b"# vtk DataFile";
const VERSION_LINE: &str = "# vtk DataFile Version 4.2";
const TITLE: &str = "written by meshconv";

fn vtk_dtype_name(dtype: DType) -> &'static str {
    match dtype {
        DType::Float64 => "double",
        DType::Float32 => "float",
        DType::Int64   => "vtktypeint64",
        DType::Int32   => "int",
    }
}

fn dtype_from_vtk(name: &str) -> Option<DType> {
    match name.to_ascii_lowercase().as_str() {
        "double"                        => Some(DType::Float64),
        "float"                         => Some(DType::Float32),
        "long" | "vtktypeint64"         => Some(DType::Int64),
        "int" | "vtktypeint32"          => Some(DType::Int32),
        _                               => None,
    }
}

// ── Reading ──────────────────────────────────────────────────────────────────

/// Which attribute section subsequent arrays belong to.
#[derive(Clone, Copy)]
enum Section {
    Dataset,
    Point,
    Cell,
}

struct Parser<'a> {
    s:      Scanner<'a>,
    binary: bool,
}

impl<'a> Parser<'a> {
    fn dtype(&mut self) -> Result<DType, ReadError> {
        let tok = self.s.expect("data type")?;
        dtype_from_vtk(tok).ok_or_else(|| self.s.error(format!("unsupported data type `{tok}`")))
    }

    fn values(&mut self, dtype: DType, count: usize, what: &str) -> Result<ArrayValues, ReadError> {
        if self.binary {
            self.s.end_header_line();
            self.s.binary_values::<BigEndian>(dtype, count, what)
        } else {
            self.s.text_values(dtype, count, what)
        }
    }

    fn product(&self, a: usize, b: usize) -> Result<usize, ReadError> {
        a.checked_mul(b).ok_or_else(|| self.s.error("array size overflows"))
    }

    fn array(&mut self, dtype: DType, tuples: usize, components: usize, name: &str) -> Result<DataArray, ReadError> {
        let total = self.product(tuples, components)?;
        let values = self.values(dtype, total, name)?;
        DataArray::new(values, components).map_err(|e| ReadError::invalid_mesh(NAME, e))
    }

    /// `FIELD <name> <count>` followed by `count` arrays.
    fn field(&mut self, into: &mut DataMap) -> Result<(), ReadError> {
        self.s.expect("field name")?;
        let count: usize = self.s.parse("field array count")?;
        for _ in 0..count {
            let name = self.s.expect("array name")?.to_owned();
            let components: usize = self.s.parse("component count")?;
            let tuples: usize = self.s.parse("tuple count")?;
            let dtype = self.dtype()?;
            let array = self.array(dtype, tuples, components, &name)?;
            into.insert(name, array);
        }
        Ok(())
    }

    /// `SCALARS <name> <type> [components]` then `LOOKUP_TABLE <table>`.
    fn scalars(&mut self, tuples: usize, into: &mut DataMap) -> Result<(), ReadError> {
        let name = self.s.expect("array name")?.to_owned();
        let dtype = self.dtype()?;
        let components = match self.s.peek_token() {
            Some(tok) if !tok.eq_ignore_ascii_case("LOOKUP_TABLE") => self.s.parse("component count")?,
            _ => 1,
        };
        self.s.keyword("LOOKUP_TABLE")?;
        self.s.expect("lookup table name")?;
        let array = self.array(dtype, tuples, components, &name)?;
        into.insert(name, array);
        Ok(())
    }

    fn vectors(&mut self, tuples: usize, into: &mut DataMap) -> Result<(), ReadError> {
        let name = self.s.expect("array name")?.to_owned();
        let dtype = self.dtype()?;
        let array = self.array(dtype, tuples, 3, &name)?;
        into.insert(name, array);
        Ok(())
    }

    /// Cells after the `CELLS` keyword, as connectivity plus CSR offsets.
    fn cells(&mut self) -> Result<(Vec<usize>, Vec<usize>), ReadError> {
        let first: usize = self.s.parse("cell count")?;
        let second: usize = self.s.parse("cell list size")?;

        if matches!(self.s.peek_token(), Some(t) if t.eq_ignore_ascii_case("OFFSETS")) {
            self.s.keyword("OFFSETS")?;
            let dtype = self.dtype()?;
            let offsets = self.typed_indices(dtype, first, "offsets")?;
            self.s.keyword("CONNECTIVITY")?;
            let dtype = self.dtype()?;
            let connectivity = self.typed_indices(dtype, second, "connectivity")?;
            return Ok((connectivity, offsets));
        }

        // Legacy layout: per cell, a vertex count followed by the vertices.
        let raw = self.typed_indices(DType::Int32, second, "cell list")?;
        let mut connectivity = Vec::with_capacity(second.saturating_sub(first));
        let mut offsets = Vec::with_capacity(first + 1);
        offsets.push(0);
        let mut i = 0;
        for c in 0..first {
            let cell = raw
                .get(i)
                .and_then(|&k| raw.get(i + 1..i + 1 + k))
                .ok_or_else(|| self.s.error(format!("cell list ends inside cell {c}")))?;
            connectivity.extend_from_slice(cell);
            offsets.push(connectivity.len());
            i += 1 + cell.len();
        }
        if i != raw.len() {
            return Err(self.s.error(format!("cell list has {} entries, {first} cells use {i}", raw.len())));
        }
        Ok((connectivity, offsets))
    }

    /// Integer index list. Text is always parsed wide; binary honours the
    /// declared width.
    fn typed_indices(&mut self, dtype: DType, count: usize, what: &str) -> Result<Vec<usize>, ReadError> {
        if !dtype.is_integer() {
            return Err(self.s.error(format!("{what} must be integers")));
        }
        let line = self.s.line();
        let raw = self.values(if self.binary { dtype } else { DType::Int64 }, count, what)?;
        to_indices(NAME, &raw, 0).map_err(|e| ReadError::at_line(NAME, line, e.message))
    }

    fn cell_types(&mut self) -> Result<Vec<CellType>, ReadError> {
        let count: usize = self.s.parse("cell type count")?;
        let raw = self.values(DType::Int32, count, "cell types")?;
        let line = self.s.line();
        (0..raw.len())
            .map(|i| {
                let id = raw.get_i64(i).unwrap_or(-1);
                u8::try_from(id)
                    .ok()
                    .and_then(CellType::from_vtk_id)
                    .ok_or_else(|| ReadError::at_line(NAME, line, format!("unsupported VTK cell type {id}")))
            })
            .collect()
    }

    fn skip_metadata(&mut self) {
        self.s.rest_of_line();
        while !self.s.rest_of_line().trim().is_empty() {}
    }
}

// ── Writing ──────────────────────────────────────────────────────────────────

fn ascii_rows<W: Write + ?Sized, T: Display>(w: &mut W, values: &[T], per_row: usize) -> io::Result<()> {
    for row in values.chunks(per_row.max(1)) {
        let mut first = true;
        for v in row {
            if !first {
                w.write_all(b" ")?;
            }
            write!(w, "{v}")?;
            first = false;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn write_values<W: Write + ?Sized>(w: &mut W, binary: bool, values: &ArrayValues, per_row: usize) -> io::Result<()> {
    if !binary {
        return match values {
            ArrayValues::Float64(v) => ascii_rows(w, v, per_row),
            ArrayValues::Float32(v) => ascii_rows(w, v, per_row),
            ArrayValues::Int64(v)   => ascii_rows(w, v, per_row),
            ArrayValues::Int32(v)   => ascii_rows(w, v, per_row),
        };
    }
    match values {
        ArrayValues::Float64(v) => v.iter().try_for_each(|&x| w.write_f64::<BigEndian>(x))?,
        ArrayValues::Float32(v) => v.iter().try_for_each(|&x| w.write_f32::<BigEndian>(x))?,
        ArrayValues::Int64(v)   => v.iter().try_for_each(|&x| w.write_i64::<BigEndian>(x))?,
        ArrayValues::Int32(v)   => v.iter().try_for_each(|&x| w.write_i32::<BigEndian>(x))?,
    }
    writeln!(w)
}

fn write_field<W: Write + ?Sized>(w: &mut W, binary: bool, arrays: &DataMap) -> io::Result<()> {
    writeln!(w, "FIELD FieldData {}", arrays.len())?;
    for (name, array) in arrays {
        writeln!(w, "{name} {} {} {}", array.components(), array.len(), vtk_dtype_name(array.dtype()))?;
        write_values(w, binary, array.values(), array.components())?;
    }
    Ok(())
}

fn write_mesh<W: Write + ?Sized>(w: &mut W, mesh: &Mesh, flat: &FlatCells, cell_data: &DataMap, binary: bool) -> io::Result<()> {
    writeln!(w, "{VERSION_LINE}")?;
    writeln!(w, "{TITLE}")?;
    writeln!(w, "{}", if binary { "BINARY" } else { "ASCII" })?;
    writeln!(w, "DATASET UNSTRUCTURED_GRID")?;
    if !mesh.field_data().is_empty() {
        write_field(w, binary, mesh.field_data())?;
    }

    let points = mesh.points();
    writeln!(w, "POINTS {} double", points.len())?;
    let xyz: Vec<f64> = (0..points.len()).flat_map(|i| points.xyz(i)).collect();
    write_values(w, binary, &ArrayValues::Float64(xyz), 3)?;

    writeln!(w, "CELLS {} {}", flat.len(), flat.len() + flat.connectivity.len())?;
    if binary {
        let mut list = Vec::with_capacity(flat.len() + flat.connectivity.len());
        for i in 0..flat.len() {
            let cell = flat.cell(i);
            list.push(cell.len() as i32);
            list.extend(cell.iter().map(|&p| p as i32));
        }
        write_values(w, true, &ArrayValues::Int32(list), 1)?;
    } else {
        for i in 0..flat.len() {
            let cell = flat.cell(i);
            write!(w, "{}", cell.len())?;
            for p in cell {
                write!(w, " {p}")?;
            }
            writeln!(w)?;
        }
    }

    writeln!(w, "CELL_TYPES {}", flat.len())?;
    let types = flat.types.iter().map(|t| i32::from(t.vtk_id())).collect();
    write_values(w, binary, &ArrayValues::Int32(types), 1)?;

    if !mesh.point_data().is_empty() {
        writeln!(w, "POINT_DATA {}", points.len())?;
        write_field(w, binary, mesh.point_data())?;
    }
    if !cell_data.is_empty() {
        writeln!(w, "CELL_DATA {}", flat.len())?;
        write_field(w, binary, cell_data)?;
    }
    Ok(())
}

// ── Format ───────────────────────────────────────────────────────────────────

pub struct VtkFormat;

impl MeshFormat for VtkFormat {
    fn name(&self) -> &'static str { NAME }

    fn extensions(&self) -> &'static [&'static str] { &["vtk"] }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MIXED_CELL_TYPES
            | Capabilities::FIELD_DATA
            | Capabilities::BINARY
            | Capabilities::ASCII
            | Capabilities::HIGHER_ORDER_CELLS
            | Capabilities::POINT_DATA
            | Capabilities::CELL_DATA
            | Capabilities::POLYGONS
            | Capabilities::POINT_CLOUD
            | Capabilities::POINTS_2D
    }

    fn detect(&self, head: &[u8]) -> bool {
        head.starts_with(MAGIC)
    }

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError> {
        let mut s = Scanner::new(NAME, input.bytes);
        if !s.rest_of_line().starts_with("# vtk DataFile") {
            return Err(ReadError::at_line(NAME, 1, "missing `# vtk DataFile` header"));
        }
        s.rest_of_line();
        let binary = match s.rest_of_line().trim().to_ascii_uppercase().as_str() {
            "ASCII"  => false,
            "BINARY" => true,
            other    => return Err(ReadError::at_line(NAME, 3, format!("unknown encoding `{other}`"))),
        };
        s.keyword("DATASET")?;
        let kind = s.expect("dataset type")?;
        if !kind.eq_ignore_ascii_case("UNSTRUCTURED_GRID") {
            return Err(s.error(format!("unsupported dataset `{kind}`, expected UNSTRUCTURED_GRID")));
        }

        let mut p = Parser { s, binary };
        let mut coords = None;
        let mut cells = None;
        let mut types = None;
        let mut point_data = DataMap::new();
        let mut cell_data = DataMap::new();
        let mut field_data = DataMap::new();
        let mut section = Section::Dataset;
        let mut tuples = 0usize;

        while let Some(tok) = p.s.next_token() {
            match tok.to_ascii_uppercase().as_str() {
                "POINTS" => {
                    let n: usize = p.s.parse("point count")?;
                    let dtype = p.dtype()?;
                    let total = p.product(n, 3)?;
                    let values = p.values(dtype, total, "points")?;
                    coords = Some((0..values.len()).map(|i| values.get_f64(i)).collect::<Vec<_>>());
                }
                "CELLS" => cells = Some(p.cells()?),
                "CELL_TYPES" => types = Some(p.cell_types()?),
                "POINT_DATA" => {
                    tuples = p.s.parse("point data size")?;
                    section = Section::Point;
                }
                "CELL_DATA" => {
                    tuples = p.s.parse("cell data size")?;
                    section = Section::Cell;
                }
                "FIELD" => match section {
                    Section::Dataset => p.field(&mut field_data)?,
                    Section::Point   => p.field(&mut point_data)?,
                    Section::Cell    => p.field(&mut cell_data)?,
                },
                kw @ ("SCALARS" | "VECTORS" | "NORMALS") => {
                    let into = match section {
                        Section::Point   => &mut point_data,
                        Section::Cell    => &mut cell_data,
                        Section::Dataset => return Err(p.s.error(format!("{kw} outside POINT_DATA/CELL_DATA"))),
                    };
                    if kw == "SCALARS" {
                        p.scalars(tuples, into)?;
                    } else {
                        p.vectors(tuples, into)?;
                    }
                }
                "METADATA" => p.skip_metadata(),
                _ => return Err(p.s.error(format!("unexpected keyword `{tok}`"))),
            }
        }

        let coords = coords.ok_or_else(|| ReadError::new(NAME, "missing POINTS section"))?;
        let (connectivity, offsets) = cells.unwrap_or_else(|| (Vec::new(), vec![0]));
        let types = types.unwrap_or_default();
        if types.len() + 1 != offsets.len() {
            return Err(ReadError::new(
                NAME,
                format!("{} cell types for {} cells", types.len(), offsets.len().saturating_sub(1)),
            ));
        }

        let invalid = |e| ReadError::invalid_mesh(NAME, e);
        let points = Points::new(coords, 3).map_err(invalid)?;
        let flat = FlatCells { types, connectivity, offsets };
        split_runs(points, &flat, &cell_data, point_data, field_data).map_err(invalid)
    }

    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, options: &WriteOptions) -> Result<(), WriteError> {
        let parts = partition(mesh).map_err(|e| WriteError::new(NAME, e.to_string()))?;
        if parts.cells.connectivity.len() + parts.cells.len() > i32::MAX as usize
            || parts.cells.connectivity.iter().any(|&i| i > i32::MAX as usize)
        {
            return Err(WriteError::new(NAME, "cell list exceeds 32-bit indices"));
        }
        let binary = options.encoding == Some(Encoding::Binary);
        write_mesh(&mut *out.sink, mesh, &parts.cells, &parts.cell_data, binary).map_err(|e| WriteError::io(NAME, e))
    }

    /// Array names are whitespace-delimited tokens in the file.
    fn check(&self, mesh: &Mesh) -> Result<(), UnsupportedFeatureError> {
        let names = mesh
            .point_data()
            .keys()
            .chain(mesh.cell_data().keys())
            .chain(mesh.field_data().keys());
        for name in names {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(UnsupportedFeatureError::new(NAME, format!("array name `{name}` containing whitespace")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBlock;

    fn mixed() -> Mesh {
        let points = Points::from_xyz(&[
            [0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0], [0.5, 0.5, 1.0],
        ]);
        Mesh::builder(points)
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 4], vec![1, 2, 4]]).unwrap())
            .cells(CellBlock::new(CellType::Polygon, vec![vec![0, 1, 2, 3]]).unwrap())
            .cells(CellBlock::new(CellType::Triangle, vec![vec![2, 3, 4]]).unwrap())
            .point_data("velocity", DataArray::new(ArrayValues::Float64((0..15).map(|i| i as f64 * 0.1).collect()), 3).unwrap())
            .cell_data(
                "material",
                vec![DataArray::from(vec![1i32, 2]), DataArray::from(vec![3i32]), DataArray::from(vec![4i32])],
            )
            .field_data("time", vec![1.5f32])
            .build()
            .unwrap()
    }

    fn encode(mesh: &Mesh, encoding: Encoding) -> Vec<u8> {
        let mut buf = Vec::new();
        let options = WriteOptions { encoding: Some(encoding), ..WriteOptions::default() };
        VtkFormat.write(mesh, &mut Output::new(&mut buf, None), &options).unwrap();
        buf
    }

    #[test]
    fn round_trip_in_both_encodings() {
        let mesh = mixed();
        for encoding in [Encoding::Ascii, Encoding::Binary] {
            let buf = encode(&mesh, encoding);
            assert!(VtkFormat.detect(&buf));
            let back = VtkFormat.read(&Input::new(&buf, None)).unwrap();
            assert_eq!(back, mesh, "{encoding}");
        }
    }

    #[test]
    fn planar_points_come_back_padded() {
        let mesh = Mesh::builder(Points::from_xy(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]))
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2]]).unwrap())
            .build()
            .unwrap();
        let back = VtkFormat.read(&Input::new(&encode(&mesh, Encoding::Ascii), None)).unwrap();
        assert_eq!(back.points().dim(), 3);
        assert_eq!(back.points().get(2), &[0.0, 1.0, 0.0]);
        assert_eq!(back.cells(), mesh.cells());
    }

    #[test]
    fn reads_attributes_and_offsets_layout() {
        let text = b"# vtk DataFile Version 5.1
vtk output
ASCII
DATASET UNSTRUCTURED_GRID
POINTS 4 float
0 0 0 1 0 0
1 1 0 0 1 0
CELLS 3 5
OFFSETS vtktypeint64
0 3 5
CONNECTIVITY vtktypeint64
0 1 2 2 3
CELL_TYPES 2
5
3
CELL_DATA 2
SCALARS mat int 1
LOOKUP_TABLE default
7 8
POINT_DATA 4
VECTORS v double
0 0 1 0 0 1 0 0 1 0 0 1
";
        let mesh = VtkFormat.read(&Input::new(text, None)).unwrap();
        assert_eq!(mesh.cells().len(), 2);
        assert_eq!(mesh.cells()[0].cell_type(), CellType::Triangle);
        assert_eq!(mesh.cells()[1].connectivity(), &[2, 3]);
        assert_eq!(mesh.cell_data()["mat"], vec![DataArray::from(vec![7i32]), DataArray::from(vec![8i32])]);
        assert_eq!(mesh.point_data()["v"].components(), 3);
    }

    #[test]
    fn offsets_must_start_at_zero() {
        let text = b"# vtk DataFile Version 5.1
vtk output
ASCII
DATASET UNSTRUCTURED_GRID
POINTS 3 float
0 0 0 1 0 0 0 1 0
CELLS 2 4
OFFSETS vtktypeint64
1 4
CONNECTIVITY vtktypeint64
2 0 1 2
CELL_TYPES 1
5
";
        let err = VtkFormat.read(&Input::new(text, None)).unwrap_err();
        assert!(matches!(err.cause.as_deref(), Some(crate::error::MeshError::InvalidTopology(_))), "{err}");
    }

    #[test]
    fn unknown_cell_type_reports_line() {
        let text = b"# vtk DataFile Version 3.0
t
ASCII
DATASET UNSTRUCTURED_GRID
POINTS 1 double
0 0 0
CELLS 1 2
1 0
CELL_TYPES 1
99
";
        let err = VtkFormat.read(&Input::new(text, None)).unwrap_err();
        assert!(err.to_string().contains("line 10"), "{err}");
        assert!(err.message.contains("99"));
    }

    #[test]
    fn names_with_spaces_are_rejected() {
        let mesh = Mesh::builder(Points::from_xy(&[[0.0, 0.0]]))
            .point_data("wall distance", vec![1.0])
            .build()
            .unwrap();
        assert!(VtkFormat.check(&mesh).is_err());
        assert!(VtkFormat.check(&mixed()).is_ok());
    }
}
