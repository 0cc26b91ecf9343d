//! `meshjson`: the canonical model serialized as JSON.
//!
//! Lossless for every mesh the model can hold, so it is the reference
//! format for round-trip tests and the fallback when nothing else fits.
//!
//! ```text
//! {"format":"meshjson","version":1,
//!  "points":{"dim":3,"coords":[...]},
//!  "cells":[{"type":"triangle","connectivity":[...]},
//!           {"type":"polygon","connectivity":[...],"offsets":[...]}],
//!  "point_data":{...},"cell_data":{"name":[...]},"field_data":{...}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Capabilities, Input, MeshFormat, Output, WriteOptions};
use crate::cell::{CellBlock, CellType};
use crate::data::DataArray;
use crate::error::{ReadError, UnsupportedFeatureError, WriteError};
use crate::mesh::{Mesh, Points};

const NAME: &str = "meshjson";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de>, C: Deserialize<'de>, D: Deserialize<'de>, L: Deserialize<'de>"))]
struct Document<P, C, D, L> {
    format:     String,
    version:    u32,
    points:     P,
    cells:      Vec<C>,
    #[serde(default)]
    point_data: BTreeMap<String, D>,
    #[serde(default)]
    cell_data:  BTreeMap<String, L>,
    #[serde(default)]
    field_data: BTreeMap<String, D>,
}

#[derive(Serialize, Deserialize)]
struct PointsRepr<V> {
    dim:    usize,
    coords: V,
}

#[derive(Serialize, Deserialize)]
struct BlockRepr<V> {
    #[serde(rename = "type")]
    cell_type:    CellType,
    connectivity: V,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offsets:      Option<V>,
}

type WriteDoc<'a> = Document<PointsRepr<&'a [f64]>, BlockRepr<&'a [usize]>, &'a DataArray, &'a [DataArray]>;
type ReadDoc = Document<PointsRepr<Vec<f64>>, BlockRepr<Vec<usize>>, DataArray, Vec<DataArray>>;

pub struct MeshJsonFormat;

impl MeshFormat for MeshJsonFormat {
    fn name(&self) -> &'static str { NAME }

    fn extensions(&self) -> &'static [&'static str] { &["json"] }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MIXED_CELL_TYPES
            | Capabilities::PER_BLOCK_CELL_DATA
            | Capabilities::FIELD_DATA
            | Capabilities::ASCII
            | Capabilities::HIGHER_ORDER_CELLS
            | Capabilities::POINT_DATA
            | Capabilities::CELL_DATA
            | Capabilities::POLYGONS
            | Capabilities::POINT_CLOUD
            | Capabilities::POINTS_2D
            | Capabilities::REPEATED_CELL_TYPES
    }

    fn detect(&self, head: &[u8]) -> bool {
        let text = String::from_utf8_lossy(head);
        text.trim_start().starts_with('{') && text.contains("\"meshjson\"")
    }

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError> {
        let doc: ReadDoc = serde_json::from_slice(input.bytes)
            .map_err(|e| ReadError::at_line(NAME, e.line(), e.to_string()))?;
        if doc.format != NAME {
            return Err(ReadError::new(NAME, format!("document declares format `{}`", doc.format)));
        }
        if doc.version != VERSION {
            return Err(ReadError::new(NAME, format!("unsupported version {}", doc.version)));
        }

        let invalid = |e| ReadError::invalid_mesh(NAME, e);
        let points = Points::new(doc.points.coords, doc.points.dim).map_err(invalid)?;
        let cells = doc
            .cells
            .into_iter()
            .map(|b| CellBlock::from_parts(b.cell_type, b.connectivity, b.offsets))
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        Mesh::new(points, cells, doc.point_data, doc.cell_data, doc.field_data).map_err(invalid)
    }

    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, _options: &WriteOptions) -> Result<(), WriteError> {
        let doc: WriteDoc<'_> = Document {
            format:  NAME.to_owned(),
            version: VERSION,
            points:  PointsRepr { dim: mesh.points().dim(), coords: mesh.points().coords() },
            cells:   mesh
                .cells()
                .iter()
                .map(|b| BlockRepr {
                    cell_type:    b.cell_type(),
                    connectivity: b.connectivity(),
                    offsets:      b.cell_type().is_variable_arity().then(|| b.offsets()),
                })
                .collect(),
            point_data: mesh.point_data().iter().map(|(k, v)| (k.clone(), v)).collect(),
            cell_data:  mesh.cell_data().iter().map(|(k, v)| (k.clone(), v.as_slice())).collect(),
            field_data: mesh.field_data().iter().map(|(k, v)| (k.clone(), v)).collect(),
        };
        serde_json::to_writer(&mut *out.sink, &doc).map_err(|e| WriteError::new(NAME, e.to_string()))?;
        out.sink.write_all(b"\n").map_err(|e| WriteError::io(NAME, e))
    }

    /// JSON has no spelling for NaN or infinity.
    fn check(&self, mesh: &Mesh) -> Result<(), UnsupportedFeatureError> {
        let finite = |a: &DataArray| (0..a.values().len()).all(|i| a.values().get_f64(i).is_finite());
        if !mesh.points().coords().iter().all(|c| c.is_finite()) {
            return Err(UnsupportedFeatureError::new(NAME, "non-finite point coordinates"));
        }
        let arrays = mesh
            .point_data()
            .iter()
            .chain(mesh.field_data())
            .chain(mesh.cell_data().iter().flat_map(|(k, v)| v.iter().map(move |a| (k, a))));
        for (name, array) in arrays {
            if !finite(array) {
                return Err(UnsupportedFeatureError::new(NAME, format!("non-finite values in `{name}`")));
            }
        }
        Ok(())
    }
}
