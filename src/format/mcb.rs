//! `mcb`: native compressed binary container.
//!
//! # On-disk layout
//! ```text
//! [ header  ]  magic "MCB\0" | version u16 | flags u16 | section_count u32
//! [ section ]* kind u8 | codec u8 | block u32 | name_len u16 | name
//!              orig_size u64 | comp_size u64 | crc32 u32 | payload
//! ```
//! All integers are little-endian. The CRC covers the *uncompressed* payload,
//! so a wrong codec tag and a corrupted payload are both caught. Sections
//! appear in a fixed order: points, one per cell block, then point, cell
//! and field data. `block` is the cell-block index for cell sections and
//! cell-data sections, zero otherwise.
//!
//! # Payloads
//! - points: `dim u8 | n u64 | n*dim f64`
//! - cells: `vtk_id u8 | ncells u64 | nconn u64 | conn u64* | offsets u64*`
//!   (offsets only for variable-arity types, `ncells + 1` entries)
//! - arrays: `dtype u8 | components u32 | nvalues u64 | values`

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use log::debug;
use std::io::{self, Cursor, Read, Write};

use super::{Capabilities, Input, MeshFormat, Output, WriteOptions};
use crate::cell::{CellBlock, CellType};
use crate::codec::{get_codec, get_codec_by_tag, CodecId};
use crate::data::{ArrayValues, DataArray, DType};
use crate::error::{ReadError, WriteError};
use crate::mesh::{CellDataMap, DataMap, Mesh, Points};

const NAME: &str = "mcb";

pub const MAGIC: &[u8; 4] = b"MCB\0";
pub const VERSION: u16 = 1;

// ── Section header ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SectionKind {
    Points    = 1,
    Cells     = 2,
    PointData = 3,
    CellData  = 4,
    FieldData = 5,
}

impl SectionKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(SectionKind::Points),
            2 => Some(SectionKind::Cells),
            3 => Some(SectionKind::PointData),
            4 => Some(SectionKind::CellData),
            5 => Some(SectionKind::FieldData),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SectionHeader {
    kind:      SectionKind,
    codec:     u8,
    block:     u32,
    name:      String,
    orig_size: u64,
    comp_size: u64,
    crc32:     u32,
}

impl SectionHeader {
    fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u8(self.kind as u8)?;
        w.write_u8(self.codec)?;
        w.write_u32::<LittleEndian>(self.block)?;
        w.write_u16::<LittleEndian>(self.name.len() as u16)?;
        w.write_all(self.name.as_bytes())?;
        w.write_u64::<LittleEndian>(self.orig_size)?;
        w.write_u64::<LittleEndian>(self.comp_size)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        Ok(())
    }

    fn read(r: &mut Cursor<&[u8]>) -> Result<Self, ReadError> {
        let at = r.position();
        let truncated = |_| ReadError::at_offset(NAME, at, "truncated section header");
        let kind_tag = r.read_u8().map_err(truncated)?;
        let kind = SectionKind::from_u8(kind_tag)
            .ok_or_else(|| ReadError::at_offset(NAME, at, format!("unknown section kind {kind_tag}")))?;
        let codec = r.read_u8().map_err(truncated)?;
        let block = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let name_len = r.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name).map_err(truncated)?;
        let name = String::from_utf8(name)
            .map_err(|_| ReadError::at_offset(NAME, at, "section name is not UTF-8"))?;
        Ok(Self {
            kind,
            codec,
            block,
            name,
            orig_size: r.read_u64::<LittleEndian>().map_err(truncated)?,
            comp_size: r.read_u64::<LittleEndian>().map_err(truncated)?,
            crc32:     r.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

// ── Payload encoding ─────────────────────────────────────────────────────────

fn dtype_tag(dtype: DType) -> u8 {
    match dtype {
        DType::Float64 => 1,
        DType::Float32 => 2,
        DType::Int64   => 3,
        DType::Int32   => 4,
    }
}

fn dtype_from_tag(tag: u8) -> Option<DType> {
    match tag {
        1 => Some(DType::Float64),
        2 => Some(DType::Float32),
        3 => Some(DType::Int64),
        4 => Some(DType::Int32),
        _ => None,
    }
}

fn encode_points(points: &Points) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(9 + points.coords().len() * 8);
    buf.write_u8(points.dim() as u8)?;
    buf.write_u64::<LittleEndian>(points.len() as u64)?;
    for &c in points.coords() {
        buf.write_f64::<LittleEndian>(c)?;
    }
    Ok(buf)
}

fn encode_cells(block: &CellBlock) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(17 + (block.connectivity().len() + block.offsets().len()) * 8);
    buf.write_u8(block.cell_type().vtk_id())?;
    buf.write_u64::<LittleEndian>(block.len() as u64)?;
    buf.write_u64::<LittleEndian>(block.connectivity().len() as u64)?;
    for &i in block.connectivity() {
        buf.write_u64::<LittleEndian>(i as u64)?;
    }
    if block.cell_type().is_variable_arity() {
        for &o in block.offsets() {
            buf.write_u64::<LittleEndian>(o as u64)?;
        }
    }
    Ok(buf)
}

fn encode_array(array: &DataArray) -> io::Result<Vec<u8>> {
    let values = array.values();
    let mut buf = Vec::with_capacity(13 + values.len() * array.dtype().size());
    buf.write_u8(dtype_tag(array.dtype()))?;
    buf.write_u32::<LittleEndian>(array.components() as u32)?;
    buf.write_u64::<LittleEndian>(values.len() as u64)?;
    match values {
        ArrayValues::Float64(v) => v.iter().try_for_each(|&x| buf.write_f64::<LittleEndian>(x))?,
        ArrayValues::Float32(v) => v.iter().try_for_each(|&x| buf.write_f32::<LittleEndian>(x))?,
        ArrayValues::Int64(v)   => v.iter().try_for_each(|&x| buf.write_i64::<LittleEndian>(x))?,
        ArrayValues::Int32(v)   => v.iter().try_for_each(|&x| buf.write_i32::<LittleEndian>(x))?,
    }
    Ok(buf)
}

/// Decoder over one decompressed payload. Errors point at the section start.
struct Payload<'a> {
    cur: Cursor<&'a [u8]>,
    at:  u64,
}

impl<'a> Payload<'a> {
    fn new(data: &'a [u8], at: u64) -> Self {
        Self { cur: Cursor::new(data), at }
    }

    fn err(&self, msg: impl Into<String>) -> ReadError {
        ReadError::at_offset(NAME, self.at, msg)
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        self.cur.read_u8().map_err(|_| self.err("truncated payload"))
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        self.cur.read_u32::<LittleEndian>().map_err(|_| self.err("truncated payload"))
    }

    fn u64(&mut self) -> Result<u64, ReadError> {
        self.cur.read_u64::<LittleEndian>().map_err(|_| self.err("truncated payload"))
    }

    /// A count that must fit in the bytes still available at `width` each.
    fn count(&mut self, width: usize) -> Result<usize, ReadError> {
        let n = self.u64()?;
        let left = self.cur.get_ref().len() as u64 - self.cur.position();
        if n.saturating_mul(width as u64) > left {
            return Err(self.err(format!("count {n} exceeds payload size")));
        }
        Ok(n as usize)
    }

    fn indices(&mut self, n: usize) -> Result<Vec<usize>, ReadError> {
        (0..n)
            .map(|_| {
                let v = self.u64()?;
                usize::try_from(v).map_err(|_| self.err(format!("index {v} out of range")))
            })
            .collect()
    }

    fn finish(&self) -> Result<(), ReadError> {
        if self.cur.position() as usize != self.cur.get_ref().len() {
            return Err(self.err("trailing bytes in section"));
        }
        Ok(())
    }
}

fn decode_points(data: &[u8], at: u64) -> Result<Points, ReadError> {
    let mut p = Payload::new(data, at);
    let dim = p.u8()? as usize;
    let n = p.count(8 * dim.max(1))?;
    let coords = (0..n * dim)
        .map(|_| p.cur.read_f64::<LittleEndian>().map_err(|_| p.err("truncated payload")))
        .collect::<Result<Vec<_>, _>>()?;
    p.finish()?;
    Points::new(coords, dim).map_err(|e| ReadError::invalid_mesh(NAME, e))
}

fn decode_cells(data: &[u8], at: u64) -> Result<CellBlock, ReadError> {
    let mut p = Payload::new(data, at);
    let id = p.u8()?;
    let cell_type = CellType::from_vtk_id(id).ok_or_else(|| p.err(format!("unknown cell type id {id}")))?;
    let ncells = p.u64()?;
    let nconn = p.count(8)?;
    let connectivity = p.indices(nconn)?;
    let offsets = if cell_type.is_variable_arity() {
        let n = usize::try_from(ncells)
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| p.err("cell count out of range"))?;
        Some(p.indices(n)?)
    } else {
        None
    };
    p.finish()?;
    let block = CellBlock::from_parts(cell_type, connectivity, offsets).map_err(|e| ReadError::invalid_mesh(NAME, e))?;
    if block.len() as u64 != ncells {
        return Err(p.err(format!("{cell_type} section declares {ncells} cells, holds {}", block.len())));
    }
    Ok(block)
}

fn decode_array(data: &[u8], at: u64) -> Result<DataArray, ReadError> {
    let mut p = Payload::new(data, at);
    let tag = p.u8()?;
    let dtype = dtype_from_tag(tag).ok_or_else(|| p.err(format!("unknown dtype tag {tag}")))?;
    let components = p.u32()? as usize;
    let n = p.count(dtype.size())?;
    let truncated = |_| ReadError::at_offset(NAME, at, "truncated payload");
    let cur = &mut p.cur;
    let values = match dtype {
        DType::Float64 => ArrayValues::Float64((0..n).map(|_| cur.read_f64::<LittleEndian>()).collect::<io::Result<_>>().map_err(truncated)?),
        DType::Float32 => ArrayValues::Float32((0..n).map(|_| cur.read_f32::<LittleEndian>()).collect::<io::Result<_>>().map_err(truncated)?),
        DType::Int64   => ArrayValues::Int64((0..n).map(|_| cur.read_i64::<LittleEndian>()).collect::<io::Result<_>>().map_err(truncated)?),
        DType::Int32   => ArrayValues::Int32((0..n).map(|_| cur.read_i32::<LittleEndian>()).collect::<io::Result<_>>().map_err(truncated)?),
    };
    p.finish()?;
    DataArray::new(values, components).map_err(|e| ReadError::invalid_mesh(NAME, e))
}

// ── Format ───────────────────────────────────────────────────────────────────

pub struct McbFormat;

impl McbFormat {
    fn write_section<W: Write + ?Sized>(
        sink: &mut W,
        kind: SectionKind,
        block: u32,
        name: &str,
        payload: &[u8],
        codec: CodecId,
        level: i32,
    ) -> Result<(), WriteError> {
        if name.len() > u16::MAX as usize {
            return Err(WriteError::new(NAME, format!("name `{name}` is too long")));
        }
        let compressed = get_codec(codec)
            .compress(payload, level)
            .map_err(|e| WriteError::new(NAME, e.to_string()))?;
        let header = SectionHeader {
            kind,
            codec: codec.tag(),
            block,
            name: name.to_owned(),
            orig_size: payload.len() as u64,
            comp_size: compressed.len() as u64,
            crc32: checksum(payload),
        };
        header.write(&mut *sink).map_err(|e| WriteError::io(NAME, e))?;
        sink.write_all(&compressed).map_err(|e| WriteError::io(NAME, e))
    }
}

impl MeshFormat for McbFormat {
    fn name(&self) -> &'static str { NAME }

    fn extensions(&self) -> &'static [&'static str] { &["mcb"] }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MIXED_CELL_TYPES
            | Capabilities::PER_BLOCK_CELL_DATA
            | Capabilities::FIELD_DATA
            | Capabilities::BINARY
            | Capabilities::HIGHER_ORDER_CELLS
            | Capabilities::POINT_DATA
            | Capabilities::CELL_DATA
            | Capabilities::POLYGONS
            | Capabilities::POINT_CLOUD
            | Capabilities::POINTS_2D
            | Capabilities::REPEATED_CELL_TYPES
            | Capabilities::COMPRESSION
    }

    fn detect(&self, head: &[u8]) -> bool {
        head.starts_with(MAGIC)
    }

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError> {
        let mut cur = Cursor::new(input.bytes);
        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)
            .map_err(|_| ReadError::at_offset(NAME, 0, "file too short for header"))?;
        if &magic != MAGIC {
            return Err(ReadError::at_offset(NAME, 0, "invalid magic number"));
        }
        let short = |_| ReadError::at_offset(NAME, 4, "file too short for header");
        let version = cur.read_u16::<LittleEndian>().map_err(short)?;
        if version != VERSION {
            return Err(ReadError::at_offset(NAME, 4, format!("unsupported version {version}")));
        }
        let _flags = cur.read_u16::<LittleEndian>().map_err(short)?;
        let count = cur.read_u32::<LittleEndian>().map_err(short)?;

        let mut points = None;
        let mut cells = Vec::new();
        let mut point_data = DataMap::new();
        let mut cell_data = CellDataMap::new();
        let mut field_data = DataMap::new();

        for _ in 0..count {
            let at = cur.position();
            let header = SectionHeader::read(&mut cur)?;
            let start = cur.position() as usize;
            let end = usize::try_from(header.comp_size)
                .ok()
                .and_then(|n| start.checked_add(n))
                .filter(|&e| e <= input.bytes.len())
                .ok_or_else(|| ReadError::at_offset(NAME, at, "section payload runs past end of file"))?;
            cur.set_position(end as u64);

            let codec = get_codec_by_tag(header.codec).map_err(|e| ReadError::at_offset(NAME, at, e.to_string()))?;
            let size = usize::try_from(header.orig_size)
                .ok()
                .filter(|&n| codec.id().max_output(end - start).map_or(true, |max| n <= max))
                .ok_or_else(|| {
                    let msg = format!(
                        "section claims {} bytes from {} {} bytes",
                        header.orig_size,
                        header.comp_size,
                        codec.id().name(),
                    );
                    ReadError::at_offset(NAME, at, msg)
                })?;
            let data = codec
                .decompress(&input.bytes[start..end], size)
                .map_err(|e| ReadError::at_offset(NAME, at, e.to_string()))?;
            if checksum(&data) != header.crc32 {
                return Err(ReadError::at_offset(NAME, at, "section checksum mismatch"));
            }

            match header.kind {
                SectionKind::Points => {
                    if points.is_some() {
                        return Err(ReadError::at_offset(NAME, at, "duplicate points section"));
                    }
                    points = Some(decode_points(&data, at)?);
                }
                SectionKind::Cells => {
                    if header.block as usize != cells.len() {
                        return Err(ReadError::at_offset(NAME, at, format!("cell block {} out of order", header.block)));
                    }
                    cells.push(decode_cells(&data, at)?);
                }
                SectionKind::PointData => {
                    point_data.insert(header.name, decode_array(&data, at)?);
                }
                SectionKind::CellData => {
                    let arrays = cell_data.entry(header.name.clone()).or_insert_with(Vec::new);
                    if header.block as usize != arrays.len() {
                        return Err(ReadError::at_offset(
                            NAME,
                            at,
                            format!("cell data `{}` block {} out of order", header.name, header.block),
                        ));
                    }
                    arrays.push(decode_array(&data, at)?);
                }
                SectionKind::FieldData => {
                    field_data.insert(header.name, decode_array(&data, at)?);
                }
            }
        }
        if cur.position() as usize != input.bytes.len() {
            return Err(ReadError::at_offset(NAME, cur.position(), "trailing bytes after last section"));
        }

        let points = points.ok_or_else(|| ReadError::new(NAME, "missing points section"))?;
        Mesh::new(points, cells, point_data, cell_data, field_data).map_err(|e| ReadError::invalid_mesh(NAME, e))
    }

    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, options: &WriteOptions) -> Result<(), WriteError> {
        let codec = options.compression.unwrap_or(CodecId::None);
        let level = options.level;
        let io_err = |e| WriteError::io(NAME, e);
        let sections = 1
            + mesh.cells().len()
            + mesh.point_data().len()
            + mesh.cell_data().values().map(Vec::len).sum::<usize>()
            + mesh.field_data().len();

        let sink = &mut *out.sink;
        sink.write_all(MAGIC).map_err(io_err)?;
        sink.write_u16::<LittleEndian>(VERSION).map_err(io_err)?;
        sink.write_u16::<LittleEndian>(0).map_err(io_err)?;
        sink.write_u32::<LittleEndian>(sections as u32).map_err(io_err)?;

        let payload = encode_points(mesh.points()).map_err(io_err)?;
        Self::write_section(sink, SectionKind::Points, 0, "", &payload, codec, level)?;
        for (b, block) in mesh.cells().iter().enumerate() {
            let payload = encode_cells(block).map_err(io_err)?;
            Self::write_section(sink, SectionKind::Cells, b as u32, "", &payload, codec, level)?;
        }
        for (name, array) in mesh.point_data() {
            let payload = encode_array(array).map_err(io_err)?;
            Self::write_section(sink, SectionKind::PointData, 0, name, &payload, codec, level)?;
        }
        for (name, arrays) in mesh.cell_data() {
            for (b, array) in arrays.iter().enumerate() {
                let payload = encode_array(array).map_err(io_err)?;
                Self::write_section(sink, SectionKind::CellData, b as u32, name, &payload, codec, level)?;
            }
        }
        for (name, array) in mesh.field_data() {
            let payload = encode_array(array).map_err(io_err)?;
            Self::write_section(sink, SectionKind::FieldData, 0, name, &payload, codec, level)?;
        }
        debug!("mcb: wrote {sections} sections with codec {}", codec.name());
        Ok(())
    }
}

/// Codec of the first section of an `mcb` file, if it parses that far.
pub fn section_codec(bytes: &[u8]) -> Option<CodecId> {
    let header_len = MAGIC.len() + 8;
    if !bytes.starts_with(MAGIC) || bytes.len() < header_len + 2 {
        return None;
    }
    CodecId::from_tag(bytes[header_len + 1])
}
