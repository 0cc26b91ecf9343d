//! STL surface triangulations, ASCII and binary.
//!
//! STL stores triangles as three inline coordinates each, so points are
//! shared by value: the reader merges vertices with bit-identical
//! coordinates, numbering points in first-seen order. Nothing but triangles
//! survives, and a file needs at least one of them.
//!
//! Binary layout: 80-byte header, `u32` triangle count, then per triangle
//! a normal and three vertices as `f32` and a `u16` attribute word, all
//! little-endian.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use super::{Capabilities, Encoding, Input, MeshFormat, Output, Precision, Scanner, WriteOptions};
use crate::cell::{CellBlock, CellType};
use crate::error::{ReadError, UnsupportedFeatureError, WriteError};
use crate::mesh::{Mesh, Points};

const NAME: &str = "stl";
const HEADER_LEN: usize = 80;
const FACET_LEN: usize = 50;
const SOLID_NAME: &str = "meshconv";

/// Merges vertices by exact coordinates.
#[derive(Default)]
struct VertexPool {
    index:  HashMap<[u64; 3], usize>,
    coords: Vec<f64>,
}

impl VertexPool {
    fn insert(&mut self, p: [f64; 3]) -> usize {
        let next = self.index.len();
        let id = *self.index.entry(p.map(f64::to_bits)).or_insert(next);
        if id == next {
            self.coords.extend_from_slice(&p);
        }
        id
    }

    fn finish(self, connectivity: Vec<usize>) -> Result<Mesh, ReadError> {
        let invalid = |e| ReadError::invalid_mesh(NAME, e);
        let points = Points::new(self.coords, 3).map_err(invalid)?;
        let mut builder = Mesh::builder(points);
        if !connectivity.is_empty() {
            builder = builder.cells(CellBlock::from_parts(CellType::Triangle, connectivity, None).map_err(invalid)?);
        }
        builder.build().map_err(invalid)
    }
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN + 4 && {
        let n = LittleEndian::read_u32(&bytes[HEADER_LEN..HEADER_LEN + 4]) as u64;
        (HEADER_LEN as u64 + 4).checked_add(n * FACET_LEN as u64) == Some(bytes.len() as u64)
    }
}

fn read_binary(bytes: &[u8]) -> Result<Mesh, ReadError> {
    let n = LittleEndian::read_u32(&bytes[HEADER_LEN..HEADER_LEN + 4]) as usize;
    let mut pool = VertexPool::default();
    let mut connectivity = Vec::with_capacity(3 * n);
    for facet in bytes[HEADER_LEN + 4..].chunks_exact(FACET_LEN) {
        // Skip the stored normal; it is recomputed on write.
        for v in 0..3 {
            let at = 12 + 12 * v;
            let p = [0, 4, 8].map(|o| LittleEndian::read_f32(&facet[at + o..at + o + 4]) as f64);
            connectivity.push(pool.insert(p));
        }
    }
    pool.finish(connectivity)
}

fn read_ascii(bytes: &[u8]) -> Result<Mesh, ReadError> {
    let mut s = Scanner::new(NAME, bytes);
    let mut pool = VertexPool::default();
    let mut connectivity = Vec::new();

    s.keyword("solid")?;
    s.rest_of_line();
    loop {
        let tok = s.expect("`facet` or `endsolid`")?;
        if tok.eq_ignore_ascii_case("endsolid") {
            s.rest_of_line();
            // Some exporters concatenate several solids.
            match s.peek_token() {
                Some(t) if t.eq_ignore_ascii_case("solid") => {
                    s.next_token();
                    s.rest_of_line();
                    continue;
                }
                Some(t) => return Err(s.error(format!("unexpected `{t}` after endsolid"))),
                None => break,
            }
        }
        if !tok.eq_ignore_ascii_case("facet") {
            return Err(s.error(format!("expected `facet`, found `{tok}`")));
        }
        s.keyword("normal")?;
        for _ in 0..3 {
            s.parse::<f64>("normal component")?;
        }
        s.keyword("outer")?;
        s.keyword("loop")?;
        for _ in 0..3 {
            s.keyword("vertex")?;
            let p = [s.parse("x")?, s.parse("y")?, s.parse("z")?];
            connectivity.push(pool.insert(p));
        }
        s.keyword("endloop").map_err(|_| s.error("only triangular facets are supported"))?;
        s.keyword("endfacet")?;
    }
    pool.finish(connectivity)
}

fn normal(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [f64; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [u[1] * v[2] - u[2] * v[1], u[2] * v[0] - u[0] * v[2], u[0] * v[1] - u[1] * v[0]];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > 0.0 { n.map(|x| x / len) } else { [0.0; 3] }
}

fn triangles(mesh: &Mesh) -> impl Iterator<Item = [[f64; 3]; 3]> + '_ {
    mesh.cells_of_type(CellType::Triangle)
        .flat_map(|b| b.iter())
        .map(|cell| [mesh.points().xyz(cell[0]), mesh.points().xyz(cell[1]), mesh.points().xyz(cell[2])])
}

fn write_ascii(mesh: &Mesh, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "solid {SOLID_NAME}")?;
    for [a, b, c] in triangles(mesh) {
        let n = normal(a, b, c);
        writeln!(w, "facet normal {} {} {}", n[0], n[1], n[2])?;
        writeln!(w, " outer loop")?;
        for p in [a, b, c] {
            writeln!(w, "  vertex {} {} {}", p[0], p[1], p[2])?;
        }
        writeln!(w, " endloop")?;
        writeln!(w, "endfacet")?;
    }
    writeln!(w, "endsolid {SOLID_NAME}")
}

fn write_binary(mesh: &Mesh, w: &mut dyn Write, count: u32) -> std::io::Result<()> {
    let mut header = [0u8; HEADER_LEN];
    let label = b"binary STL written by meshconv";
    header[..label.len()].copy_from_slice(label);
    w.write_all(&header)?;
    w.write_u32::<LittleEndian>(count)?;
    for [a, b, c] in triangles(mesh) {
        for p in [normal(a, b, c), a, b, c] {
            for x in p {
                w.write_f32::<LittleEndian>(x as f32)?;
            }
        }
        w.write_u16::<LittleEndian>(0)?;
    }
    Ok(())
}

pub struct StlFormat;

impl MeshFormat for StlFormat {
    fn name(&self) -> &'static str { NAME }

    fn extensions(&self) -> &'static [&'static str] { &["stl"] }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ASCII | Capabilities::BINARY
    }

    fn cell_types(&self) -> Option<&'static [CellType]> {
        Some(&[CellType::Triangle])
    }

    fn detect(&self, head: &[u8]) -> bool {
        head.starts_with(b"solid ") || head.starts_with(b"solid\n")
    }

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError> {
        if is_binary(input.bytes) {
            read_binary(input.bytes)
        } else if input.bytes.trim_ascii_start().starts_with(b"solid") {
            read_ascii(input.bytes)
        } else {
            Err(ReadError::at_offset(NAME, 0, "neither an ASCII solid nor a binary STL of consistent size"))
        }
    }

    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, options: &WriteOptions) -> Result<(), WriteError> {
        if mesh.points().dim() != 3 {
            return Err(WriteError::new(NAME, "points must be three-dimensional"));
        }
        if let Some(block) = mesh.cells().iter().find(|b| b.cell_type() != CellType::Triangle) {
            return Err(WriteError::new(NAME, format!("cannot store {} cells", block.cell_type())));
        }
        let result = match options.encoding.unwrap_or(Encoding::Ascii) {
            Encoding::Ascii  => write_ascii(mesh, &mut *out.sink),
            Encoding::Binary => {
                let count = u32::try_from(mesh.num_cells())
                    .map_err(|_| WriteError::new(NAME, "more triangles than binary STL can count"))?;
                write_binary(mesh, &mut *out.sink, count)
            }
        };
        result.map_err(|e| WriteError::io(NAME, e))
    }

    /// Points exist only as triangle corners, identified by value.
    fn check(&self, mesh: &Mesh) -> Result<(), UnsupportedFeatureError> {
        if mesh.num_cells() == 0 {
            return Err(UnsupportedFeatureError::new(NAME, "a mesh without triangles"));
        }
        let mut used = vec![false; mesh.num_points()];
        for block in mesh.cells() {
            for &i in block.connectivity() {
                used[i] = true;
            }
        }
        if let Some(i) = used.iter().position(|u| !u) {
            return Err(UnsupportedFeatureError::new(NAME, format!("point {i}, which no triangle uses")));
        }
        let mut seen = HashMap::with_capacity(mesh.num_points());
        for i in 0..mesh.num_points() {
            if let Some(j) = seen.insert(mesh.points().xyz(i).map(f64::to_bits), i) {
                return Err(UnsupportedFeatureError::new(NAME, format!("coincident points {j} and {i}")));
            }
        }
        Ok(())
    }

    /// Binary files hold `f32`; the variant is not known from the name alone.
    fn precision(&self, _path: Option<&Path>) -> Precision {
        Precision::Float32
    }
}
