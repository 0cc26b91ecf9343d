//! The canonical mesh: points, ordered cell blocks and three data maps.
//!
//! # Invariants
//! Checked once, when the mesh is built, so a violation is reported against
//! the reader that produced it rather than whichever writer runs later:
//! - every point-data array has one tuple per point;
//! - `cell_data[name]` holds one array per cell block, positionally aligned,
//!   each with one tuple per cell of that block;
//! - every connectivity index is below the point count.
//!
//! A mesh is never mutated after construction. Reshaping (see
//! [`crate::consolidate`]) always produces a new value.

use std::collections::BTreeMap;

use crate::cell::{CellBlock, CellType};
use crate::data::DataArray;
use crate::error::{MeshError, Result};

pub type DataMap = BTreeMap<String, DataArray>;
pub type CellDataMap = BTreeMap<String, Vec<DataArray>>;

// ── Points ───────────────────────────────────────────────────────────────────

/// Ordered point coordinates, 2 or 3 components each.
#[derive(Clone, Debug, PartialEq)]
pub struct Points {
    coords: Vec<f64>,
    dim:    usize,
}

impl Points {
    pub fn new(coords: Vec<f64>, dim: usize) -> Result<Self> {
        if dim != 2 && dim != 3 {
            return Err(MeshError::data_shape(format!("points must have 2 or 3 components, got {dim}")));
        }
        if coords.len() % dim != 0 {
            return Err(MeshError::data_shape(format!(
                "{} coordinates do not split into {dim}D points",
                coords.len()
            )));
        }
        Ok(Self { coords, dim })
    }

    pub fn from_xyz(rows: &[[f64; 3]]) -> Self {
        Self { coords: rows.iter().flatten().copied().collect(), dim: 3 }
    }

    pub fn from_xy(rows: &[[f64; 2]]) -> Self {
        Self { coords: rows.iter().flatten().copied().collect(), dim: 2 }
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn len(&self) -> usize { self.coords.len() / self.dim }

    pub fn is_empty(&self) -> bool { self.coords.is_empty() }

    /// Flat row-major coordinates.
    pub fn coords(&self) -> &[f64] { &self.coords }

    pub fn get(&self, i: usize) -> &[f64] {
        &self.coords[i * self.dim..(i + 1) * self.dim]
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.coords.chunks_exact(self.dim)
    }

    /// Point `i` padded with zeros to three components.
    pub fn xyz(&self, i: usize) -> [f64; 3] {
        let p = self.get(i);
        [p[0], p[1], if self.dim == 3 { p[2] } else { 0.0 }]
    }
}

// ── FlatCells ────────────────────────────────────────────────────────────────

/// All cells of a mesh as one array: what flat-array formats store.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FlatCells {
    /// Type of each cell.
    pub types:        Vec<CellType>,
    pub connectivity: Vec<usize>,
    /// CSR offsets into `connectivity`, `types.len() + 1` entries.
    pub offsets:      Vec<usize>,
}

impl FlatCells {
    pub fn len(&self) -> usize { self.types.len() }

    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    pub fn cell(&self, i: usize) -> &[usize] {
        &self.connectivity[self.offsets[i]..self.offsets[i + 1]]
    }
}

// ── Mesh ─────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    points:     Points,
    cells:      Vec<CellBlock>,
    point_data: DataMap,
    cell_data:  CellDataMap,
    field_data: DataMap,
}

impl Mesh {
    /// Build and validate a mesh. Fails with [`MeshError::DataShape`] on any
    /// invariant violation.
    pub fn new(
        points:     Points,
        cells:      Vec<CellBlock>,
        point_data: DataMap,
        cell_data:  CellDataMap,
        field_data: DataMap,
    ) -> Result<Self> {
        let n = points.len();
        for (b, block) in cells.iter().enumerate() {
            if let Some(max) = block.max_index() {
                if max >= n {
                    return Err(MeshError::data_shape(format!(
                        "cell block {b} ({}) references point {max}, mesh has {n} points",
                        block.cell_type()
                    )));
                }
            }
        }
        for (name, array) in &point_data {
            if array.len() != n {
                return Err(MeshError::data_shape(format!(
                    "point data `{name}` has {} entries, mesh has {n} points",
                    array.len()
                )));
            }
        }
        for (name, arrays) in &cell_data {
            if arrays.len() != cells.len() {
                return Err(MeshError::data_shape(format!(
                    "cell data `{name}` has {} arrays for {} cell blocks",
                    arrays.len(),
                    cells.len()
                )));
            }
            for (b, (array, block)) in arrays.iter().zip(&cells).enumerate() {
                if array.len() != block.len() {
                    return Err(MeshError::data_shape(format!(
                        "cell data `{name}` block {b} has {} entries for {} cells",
                        array.len(),
                        block.len()
                    )));
                }
            }
        }
        Ok(Self { points, cells, point_data, cell_data, field_data })
    }

    pub fn builder(points: Points) -> MeshBuilder {
        MeshBuilder {
            points,
            cells:      Vec::new(),
            point_data: DataMap::new(),
            cell_data:  CellDataMap::new(),
            field_data: DataMap::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn points(&self) -> &Points { &self.points }

    pub fn cells(&self) -> &[CellBlock] { &self.cells }

    pub fn point_data(&self) -> &DataMap { &self.point_data }

    pub fn cell_data(&self) -> &CellDataMap { &self.cell_data }

    pub fn field_data(&self) -> &DataMap { &self.field_data }

    pub fn num_points(&self) -> usize { self.points.len() }

    /// Total cells across all blocks.
    pub fn num_cells(&self) -> usize {
        self.cells.iter().map(CellBlock::len).sum()
    }

    pub fn into_parts(self) -> (Points, Vec<CellBlock>, DataMap, CellDataMap, DataMap) {
        (self.points, self.cells, self.point_data, self.cell_data, self.field_data)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// Blocks of the given type, in block order. Restartable by cloning.
    pub fn cells_of_type(&self, cell_type: CellType) -> impl Iterator<Item = &CellBlock> + Clone + '_ {
        self.cells.iter().filter(move |b| b.cell_type() == cell_type)
    }

    /// Distinct cell types in first-seen block order.
    pub fn cell_types(&self) -> Vec<CellType> {
        let mut seen = Vec::new();
        for block in &self.cells {
            if !seen.contains(&block.cell_type()) {
                seen.push(block.cell_type());
            }
        }
        seen
    }

    pub fn has_mixed_cell_types(&self) -> bool {
        self.cell_types().len() > 1
    }

    /// True when some type is split over more than one block.
    pub fn has_repeated_cell_types(&self) -> bool {
        self.cell_types().len() < self.cells.len()
    }

    /// Cell count per type, types in first-seen order.
    pub fn cell_counts(&self) -> Vec<(CellType, usize)> {
        self.cell_types()
            .into_iter()
            .map(|t| (t, self.cells_of_type(t).map(CellBlock::len).sum()))
            .collect()
    }

    /// Every cell in block order, with per-cell type and CSR offsets.
    pub fn get_cells_flat(&self) -> FlatCells {
        let total = self.num_cells();
        let mut flat = FlatCells {
            types:        Vec::with_capacity(total),
            connectivity: Vec::with_capacity(self.cells.iter().map(|b| b.connectivity().len()).sum()),
            offsets:      Vec::with_capacity(total + 1),
        };
        flat.offsets.push(0);
        for block in &self.cells {
            for cell in block.iter() {
                flat.types.push(block.cell_type());
                flat.connectivity.extend_from_slice(cell);
                flat.offsets.push(flat.connectivity.len());
            }
        }
        flat
    }

    /// Structural equality with a tolerance on floating coordinates and data.
    /// Connectivity and integer data must match exactly.
    pub fn approx_eq(&self, other: &Mesh, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0);
        let maps_eq = |a: &DataMap, b: &DataMap| {
            a.len() == b.len()
                && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v.approx_eq(w, tolerance)))
        };
        self.points.dim == other.points.dim
            && self.points.coords.len() == other.points.coords.len()
            && self.points.coords.iter().zip(&other.points.coords).all(|(a, b)| close(*a, *b))
            && self.cells == other.cells
            && maps_eq(&self.point_data, &other.point_data)
            && maps_eq(&self.field_data, &other.field_data)
            && self.cell_data.len() == other.cell_data.len()
            && self.cell_data.iter().all(|(k, v)| {
                other.cell_data.get(k).map_or(false, |w| {
                    v.len() == w.len() && v.iter().zip(w).all(|(a, b)| a.approx_eq(b, tolerance))
                })
            })
    }
}

// ── MeshBuilder ──────────────────────────────────────────────────────────────

/// Programmatic mesh construction; validation happens in [`MeshBuilder::build`].
#[derive(Debug, Clone)]
pub struct MeshBuilder {
    points:     Points,
    cells:      Vec<CellBlock>,
    point_data: DataMap,
    cell_data:  CellDataMap,
    field_data: DataMap,
}

impl MeshBuilder {
    pub fn cells(mut self, block: CellBlock) -> Self {
        self.cells.push(block);
        self
    }

    pub fn point_data(mut self, name: impl Into<String>, array: impl Into<DataArray>) -> Self {
        self.point_data.insert(name.into(), array.into());
        self
    }

    pub fn cell_data(mut self, name: impl Into<String>, arrays: Vec<DataArray>) -> Self {
        self.cell_data.insert(name.into(), arrays);
        self
    }

    pub fn field_data(mut self, name: impl Into<String>, array: impl Into<DataArray>) -> Self {
        self.field_data.insert(name.into(), array.into());
        self
    }

    pub fn build(self) -> Result<Mesh> {
        Mesh::new(self.points, self.cells, self.point_data, self.cell_data, self.field_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Points {
        Points::from_xyz(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]])
    }

    #[test]
    fn dangling_index_is_a_shape_error() {
        let quad = CellBlock::new(CellType::Quad, vec![vec![0, 1, 2, 4]]).unwrap();
        let err = Mesh::builder(unit_square()).cells(quad).build().unwrap_err();
        assert!(matches!(err, MeshError::DataShape(_)), "{err}");
    }

    #[test]
    fn point_data_length_is_checked() {
        let err = Mesh::builder(unit_square())
            .point_data("temperature", vec![0.0, 1.0, 1.0])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn cell_data_must_align_with_blocks() {
        let tri = CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2]]).unwrap();
        let line = CellBlock::new(CellType::Line, vec![vec![0, 1], vec![1, 2]]).unwrap();

        let missing_block = Mesh::builder(unit_square())
            .cells(tri.clone())
            .cells(line.clone())
            .cell_data("id", vec![DataArray::from(vec![1i32])])
            .build();
        assert!(matches!(missing_block, Err(MeshError::DataShape(_))));

        let wrong_len = Mesh::builder(unit_square())
            .cells(tri.clone())
            .cells(line.clone())
            .cell_data("id", vec![DataArray::from(vec![1i32]), DataArray::from(vec![2i32])])
            .build();
        assert!(matches!(wrong_len, Err(MeshError::DataShape(_))));

        let ok = Mesh::builder(unit_square())
            .cells(tri)
            .cells(line)
            .cell_data("id", vec![DataArray::from(vec![1i32]), DataArray::from(vec![2i32, 3])])
            .build()
            .unwrap();
        assert_eq!(ok.num_cells(), 3);
    }

    #[test]
    fn points_only_mesh_is_valid() {
        let mesh = Mesh::builder(unit_square()).build().unwrap();
        assert_eq!(mesh.num_cells(), 0);
        assert!(mesh.get_cells_flat().is_empty());
        assert_eq!(mesh.get_cells_flat().offsets, vec![0]);
    }

    #[test]
    fn flat_projection_follows_block_order() {
        let mesh = Mesh::builder(unit_square())
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2]]).unwrap())
            .cells(CellBlock::new(CellType::Polygon, vec![vec![0, 1, 2, 3]]).unwrap())
            .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 2, 3]]).unwrap())
            .build()
            .unwrap();
        let flat = mesh.get_cells_flat();
        assert_eq!(flat.types, vec![CellType::Triangle, CellType::Polygon, CellType::Triangle]);
        assert_eq!(flat.offsets, vec![0, 3, 7, 10]);
        assert_eq!(flat.cell(2), &[0, 2, 3]);

        let tris: Vec<_> = mesh.cells_of_type(CellType::Triangle).collect();
        assert_eq!(tris.len(), 2);
        let again = mesh.cells_of_type(CellType::Triangle);
        assert_eq!(again.clone().count(), again.count());
        assert_eq!(mesh.cell_counts(), vec![(CellType::Triangle, 2), (CellType::Polygon, 1)]);
        assert!(mesh.has_repeated_cell_types());
    }

    #[test]
    fn bad_dimension_is_rejected() {
        assert!(Points::new(vec![0.0; 8], 4).is_err());
        assert!(Points::new(vec![0.0; 5], 2).is_err());
        assert_eq!(Points::new(vec![0.0; 6], 2).unwrap().len(), 3);
    }
}
