//! Reshaping between the two on-disk cell layouts.
//!
//! Typed-block formats (UGRID, the native formats) store one run per cell
//! type; flat formats (legacy VTK) store a single cell array with a type per
//! cell. Three operations bridge them:
//!
//! - [`consolidate`]: regroup blocks so each type occupies exactly one block,
//!   types in first-seen order, cells in original order within a type;
//! - [`partition`]: flatten blocks into one cell array and one array per
//!   cell-data name;
//! - [`split_runs`]: the reader side of `partition`: cut a flat cell array
//!   into blocks at every type change.
//!
//! Cell data always follows its cells through the same permutation. All three
//! return new values; the input mesh is never touched.

use log::debug;

use crate::cell::{CellBlock, CellType};
use crate::data::DataArray;
use crate::error::{MeshError, Result};
use crate::mesh::{CellDataMap, DataMap, FlatCells, Mesh, Points};

/// Flat view of a mesh's cells and cell data.
#[derive(Clone, Debug, PartialEq)]
pub struct Partitioned {
    pub cells:     FlatCells,
    /// One array per name spanning every cell in flat order.
    pub cell_data: DataMap,
}

fn check_topology(mesh: &Mesh) -> Result<()> {
    mesh.cells().iter().try_for_each(CellBlock::check_degenerate)
}

/// Flat cell indices in consolidated order.
///
/// Entry `k` is the position, in the flat (block order) numbering, of the
/// cell that lands at position `k` after [`consolidate`].
pub fn permutation(mesh: &Mesh) -> Vec<usize> {
    let mut starts = Vec::with_capacity(mesh.cells().len());
    let mut acc = 0;
    for block in mesh.cells() {
        starts.push(acc);
        acc += block.len();
    }
    let mut perm = Vec::with_capacity(acc);
    for cell_type in mesh.cell_types() {
        for (b, block) in mesh.cells().iter().enumerate() {
            if block.cell_type() == cell_type {
                perm.extend(starts[b]..starts[b] + block.len());
            }
        }
    }
    perm
}

/// Merge same-type blocks into one block per type.
///
/// A mesh whose types already occupy one block each comes back equal to the
/// input, which makes the operation idempotent.
pub fn consolidate(mesh: &Mesh) -> Result<Mesh> {
    check_topology(mesh)?;
    let types = mesh.cell_types();
    if types.len() == mesh.cells().len() {
        return Ok(mesh.clone());
    }

    let groups: Vec<(CellType, Vec<usize>)> = types
        .iter()
        .map(|&t| {
            let members = (0..mesh.cells().len())
                .filter(|&b| mesh.cells()[b].cell_type() == t)
                .collect();
            (t, members)
        })
        .collect();

    let cells: Vec<CellBlock> = groups
        .iter()
        .map(|(t, members)| CellBlock::concat(*t, members.iter().map(|&b| &mesh.cells()[b])))
        .collect();

    let mut cell_data = CellDataMap::new();
    for (name, arrays) in mesh.cell_data() {
        let merged = groups
            .iter()
            .map(|(t, members)| {
                DataArray::concat(members.iter().map(|&b| &arrays[b])).map_err(|e| {
                    MeshError::data_shape(format!("cell data `{name}` on {t} blocks: {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        cell_data.insert(name.clone(), merged);
    }

    debug!(
        "consolidated {} cell blocks into {} ({} cells)",
        mesh.cells().len(),
        cells.len(),
        mesh.num_cells()
    );

    Mesh::new(
        mesh.points().clone(),
        cells,
        mesh.point_data().clone(),
        cell_data,
        mesh.field_data().clone(),
    )
}

/// Flatten a mesh's cells and cell data.
///
/// Fails with [`MeshError::DataShape`] when a cell-data name has arrays of
/// different dtype or width on different blocks, since those cannot share a
/// single array.
pub fn partition(mesh: &Mesh) -> Result<Partitioned> {
    check_topology(mesh)?;
    let mut cell_data = DataMap::new();
    for (name, arrays) in mesh.cell_data() {
        // A points-only mesh has no arrays to join.
        if arrays.is_empty() {
            continue;
        }
        let joined = DataArray::concat(arrays)
            .map_err(|e| MeshError::data_shape(format!("cell data `{name}`: {e}")))?;
        cell_data.insert(name.clone(), joined);
    }
    Ok(Partitioned { cells: mesh.get_cells_flat(), cell_data })
}

/// Rebuild a mesh from flat cells, starting a new block at every type change.
///
/// Flat cell-data arrays must hold one tuple per cell; they are sliced along
/// the same block boundaries.
pub fn split_runs(
    points:     Points,
    flat:       &FlatCells,
    cell_data:  &DataMap,
    point_data: DataMap,
    field_data: DataMap,
) -> Result<Mesh> {
    if flat.offsets.len() != flat.types.len() + 1 {
        return Err(MeshError::data_shape(format!(
            "{} offsets for {} cells",
            flat.offsets.len(),
            flat.types.len()
        )));
    }
    let first = flat.offsets[0];
    let last = flat.offsets[flat.len()];
    if first != 0 || last != flat.connectivity.len() {
        return Err(MeshError::topology(format!(
            "offsets span {first}..{last} of {} connectivity entries",
            flat.connectivity.len()
        )));
    }
    for (name, array) in cell_data {
        if array.len() != flat.len() {
            return Err(MeshError::data_shape(format!(
                "cell data `{name}` has {} entries for {} cells",
                array.len(),
                flat.len()
            )));
        }
    }

    let mut runs: Vec<(CellType, usize, usize)> = Vec::new();
    for (i, &t) in flat.types.iter().enumerate() {
        match runs.last_mut() {
            Some((rt, _, end)) if *rt == t => *end = i + 1,
            _ => runs.push((t, i, i + 1)),
        }
    }

    let mut cells = Vec::with_capacity(runs.len());
    for &(t, start, end) in &runs {
        let base = flat.offsets[start];
        let top = flat.offsets[end];
        if top < base || top > flat.connectivity.len() {
            return Err(MeshError::topology(format!("offsets out of range for cells {start}..{end}")));
        }
        let offsets: Vec<usize> = flat.offsets[start..=end]
            .iter()
            .map(|&o| o.checked_sub(base))
            .collect::<Option<_>>()
            .ok_or_else(|| MeshError::topology(format!("offsets decrease within cells {start}..{end}")))?;
        cells.push(CellBlock::from_parts(t, flat.connectivity[base..top].to_vec(), Some(offsets))?);
    }

    let mut per_block = CellDataMap::new();
    for (name, array) in cell_data {
        let arrays = runs.iter().map(|&(_, s, e)| array.slice(s, e)).collect();
        per_block.insert(name.clone(), arrays);
    }

    Mesh::new(points, cells, point_data, per_block, field_data)
}
