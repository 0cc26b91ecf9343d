//! Cell types and homogeneous cell blocks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MeshError, Result};

/// Topological kind of a cell. Names follow the usual meshio spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Vertex,
    Line,
    Line3,
    Triangle,
    Triangle6,
    Quad,
    Quad8,
    Quad9,
    Tetra,
    Tetra10,
    Pyramid,
    Pyramid13,
    Wedge,
    Wedge15,
    Hexahedron,
    Hexahedron20,
    Hexahedron27,
    /// Variable-arity 2D cell; blocks of polygons carry an offsets table.
    Polygon,
}

impl CellType {
    pub const ALL: [CellType; 18] = [
        CellType::Vertex,
        CellType::Line,
        CellType::Line3,
        CellType::Triangle,
        CellType::Triangle6,
        CellType::Quad,
        CellType::Quad8,
        CellType::Quad9,
        CellType::Tetra,
        CellType::Tetra10,
        CellType::Pyramid,
        CellType::Pyramid13,
        CellType::Wedge,
        CellType::Wedge15,
        CellType::Hexahedron,
        CellType::Hexahedron20,
        CellType::Hexahedron27,
        CellType::Polygon,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CellType::Vertex       => "vertex",
            CellType::Line         => "line",
            CellType::Line3        => "line3",
            CellType::Triangle     => "triangle",
            CellType::Triangle6    => "triangle6",
            CellType::Quad         => "quad",
            CellType::Quad8        => "quad8",
            CellType::Quad9        => "quad9",
            CellType::Tetra        => "tetra",
            CellType::Tetra10      => "tetra10",
            CellType::Pyramid      => "pyramid",
            CellType::Pyramid13    => "pyramid13",
            CellType::Wedge        => "wedge",
            CellType::Wedge15      => "wedge15",
            CellType::Hexahedron   => "hexahedron",
            CellType::Hexahedron20 => "hexahedron20",
            CellType::Hexahedron27 => "hexahedron27",
            CellType::Polygon      => "polygon",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Vertices per cell, or `None` for variable-arity kinds.
    pub fn num_nodes(self) -> Option<usize> {
        match self {
            CellType::Vertex       => Some(1),
            CellType::Line         => Some(2),
            CellType::Line3        => Some(3),
            CellType::Triangle     => Some(3),
            CellType::Triangle6    => Some(6),
            CellType::Quad         => Some(4),
            CellType::Quad8        => Some(8),
            CellType::Quad9        => Some(9),
            CellType::Tetra        => Some(4),
            CellType::Tetra10      => Some(10),
            CellType::Pyramid      => Some(5),
            CellType::Pyramid13    => Some(13),
            CellType::Wedge        => Some(6),
            CellType::Wedge15      => Some(15),
            CellType::Hexahedron   => Some(8),
            CellType::Hexahedron20 => Some(20),
            CellType::Hexahedron27 => Some(27),
            CellType::Polygon      => None,
        }
    }

    pub fn is_variable_arity(self) -> bool {
        self.num_nodes().is_none()
    }

    pub fn is_higher_order(self) -> bool {
        matches!(
            self,
            CellType::Line3
                | CellType::Triangle6
                | CellType::Quad8
                | CellType::Quad9
                | CellType::Tetra10
                | CellType::Pyramid13
                | CellType::Wedge15
                | CellType::Hexahedron20
                | CellType::Hexahedron27
        )
    }

    pub fn dimension(self) -> u8 {
        match self {
            CellType::Vertex => 0,
            CellType::Line | CellType::Line3 => 1,
            CellType::Triangle
            | CellType::Triangle6
            | CellType::Quad
            | CellType::Quad8
            | CellType::Quad9
            | CellType::Polygon => 2,
            _ => 3,
        }
    }

    /// Fewest distinct vertices a non-degenerate cell of this kind can have.
    ///
    /// Collapsed cells (a quad with one repeated corner, a hexahedron folded
    /// into a wedge) stay legal; anything below the simplex of the same
    /// dimension is not.
    pub fn min_distinct_vertices(self) -> usize {
        self.dimension() as usize + 1
    }

    /// Legacy VTK cell type id.
    pub fn vtk_id(self) -> u8 {
        match self {
            CellType::Vertex       => 1,
            CellType::Line         => 3,
            CellType::Triangle     => 5,
            CellType::Polygon      => 7,
            CellType::Quad         => 9,
            CellType::Tetra        => 10,
            CellType::Hexahedron   => 12,
            CellType::Wedge        => 13,
            CellType::Pyramid      => 14,
            CellType::Line3        => 21,
            CellType::Triangle6    => 22,
            CellType::Quad8        => 23,
            CellType::Tetra10      => 24,
            CellType::Hexahedron20 => 25,
            CellType::Wedge15      => 26,
            CellType::Pyramid13    => 27,
            CellType::Quad9        => 28,
            CellType::Hexahedron27 => 29,
        }
    }

    pub fn from_vtk_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.vtk_id() == id)
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── CellBlock ────────────────────────────────────────────────────────────────

/// A run of cells sharing one [`CellType`].
///
/// Connectivity is stored flat with a CSR offsets table of length
/// `num_cells + 1`, so fixed- and variable-arity blocks share one layout.
/// Indices are not checked against a point count here; that is the mesh's
/// job at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellBlock {
    cell_type:    CellType,
    connectivity: Vec<usize>,
    offsets:      Vec<usize>,
}

impl CellBlock {
    /// Build a block from one index list per cell.
    pub fn new(cell_type: CellType, cells: Vec<Vec<usize>>) -> Result<Self> {
        let mut offsets = Vec::with_capacity(cells.len() + 1);
        offsets.push(0);
        let mut connectivity = Vec::with_capacity(cells.iter().map(Vec::len).sum());
        for cell in cells {
            connectivity.extend(cell);
            offsets.push(connectivity.len());
        }
        Self::from_parts(cell_type, connectivity, Some(offsets))
    }

    /// Build a block from flat connectivity.
    ///
    /// Fixed-arity kinds may omit `offsets`; the stride is implied by the
    /// type. Variable-arity kinds must supply them.
    pub fn from_parts(
        cell_type:    CellType,
        connectivity: Vec<usize>,
        offsets:      Option<Vec<usize>>,
    ) -> Result<Self> {
        let offsets = match (cell_type.num_nodes(), offsets) {
            (Some(stride), None) => {
                if connectivity.len() % stride != 0 {
                    return Err(MeshError::topology(format!(
                        "{} connectivity of length {} is not a multiple of {stride}",
                        cell_type,
                        connectivity.len()
                    )));
                }
                (0..=connectivity.len() / stride).map(|i| i * stride).collect()
            }
            (None, None) => {
                return Err(MeshError::topology(format!(
                    "{cell_type} cells need per-cell lengths"
                )));
            }
            (_, Some(offsets)) => offsets,
        };

        if offsets.first() != Some(&0) || offsets.last() != Some(&connectivity.len()) {
            return Err(MeshError::topology(format!(
                "{cell_type} offsets must start at 0 and end at {}",
                connectivity.len()
            )));
        }
        for (i, pair) in offsets.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(MeshError::topology(format!(
                    "{cell_type} offsets decrease at cell {i}"
                )));
            }
            let len = pair[1] - pair[0];
            match cell_type.num_nodes() {
                Some(n) if n != len => {
                    return Err(MeshError::topology(format!(
                        "{cell_type} cell {i} has {len} vertices, expected {n}"
                    )));
                }
                None if len < 3 => {
                    return Err(MeshError::topology(format!(
                        "{cell_type} cell {i} has {len} vertices, at least 3 required"
                    )));
                }
                _ => {}
            }
        }

        Ok(Self { cell_type, connectivity, offsets })
    }

    pub fn cell_type(&self) -> CellType { self.cell_type }

    pub fn len(&self) -> usize { self.offsets.len() - 1 }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Flat vertex indices of every cell, in order.
    pub fn connectivity(&self) -> &[usize] { &self.connectivity }

    /// CSR offsets, `len() + 1` entries.
    pub fn offsets(&self) -> &[usize] { &self.offsets }

    pub fn cell(&self, i: usize) -> &[usize] {
        &self.connectivity[self.offsets[i]..self.offsets[i + 1]]
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[usize]> + Clone + '_ {
        self.offsets.windows(2).map(move |w| &self.connectivity[w[0]..w[1]])
    }

    /// Largest vertex index used, if any.
    pub fn max_index(&self) -> Option<usize> {
        self.connectivity.iter().copied().max()
    }

    /// Fail on the first cell whose distinct vertices fall below the minimum
    /// for its type.
    pub fn check_degenerate(&self) -> Result<()> {
        let min = self.cell_type.min_distinct_vertices();
        let mut scratch: Vec<usize> = Vec::new();
        for (i, cell) in self.iter().enumerate() {
            scratch.clear();
            scratch.extend_from_slice(cell);
            scratch.sort_unstable();
            scratch.dedup();
            if scratch.len() < min {
                return Err(MeshError::topology(format!(
                    "{} cell {i} {:?} has {} distinct vertices, at least {min} required",
                    self.cell_type,
                    cell,
                    scratch.len()
                )));
            }
        }
        Ok(())
    }

    /// Concatenate same-type blocks. Callers guarantee the types match.
    pub(crate) fn concat<'a>(cell_type: CellType, blocks: impl IntoIterator<Item = &'a CellBlock>) -> Self {
        let mut connectivity = Vec::new();
        let mut offsets = vec![0];
        for block in blocks {
            debug_assert_eq!(block.cell_type, cell_type);
            for cell in block.iter() {
                connectivity.extend_from_slice(cell);
                offsets.push(connectivity.len());
            }
        }
        Self { cell_type, connectivity, offsets }
    }

    /// Cells `range` of this block as a new block.
    pub(crate) fn slice(&self, start: usize, end: usize) -> Self {
        let base = self.offsets[start];
        let connectivity = self.connectivity[base..self.offsets[end]].to_vec();
        let offsets = self.offsets[start..=end].iter().map(|o| o - base).collect();
        Self { cell_type: self.cell_type, connectivity, offsets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_arity_block_checks_vertex_count() {
        let err = CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2], vec![0, 1]]).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTopology(_)));

        let err = CellBlock::from_parts(CellType::Quad, vec![0, 1, 2, 3, 4], None).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTopology(_)));

        let block = CellBlock::from_parts(CellType::Quad, vec![0, 1, 2, 3, 1, 2, 4, 5], None).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block.cell(1), &[1, 2, 4, 5]);
    }

    #[test]
    fn polygons_need_offsets() {
        let err = CellBlock::from_parts(CellType::Polygon, vec![0, 1, 2, 3], None).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTopology(_)));

        let block = CellBlock::from_parts(
            CellType::Polygon,
            vec![0, 1, 2, 0, 2, 3, 4],
            Some(vec![0, 3, 7]),
        )
        .unwrap();
        let cells: Vec<&[usize]> = block.iter().collect();
        assert_eq!(cells, vec![&[0, 1, 2][..], &[0, 2, 3, 4][..]]);

        let err = CellBlock::new(CellType::Polygon, vec![vec![0, 1]]).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTopology(_)));
    }

    #[test]
    fn collapsed_quad_is_allowed_but_sliver_is_not() {
        let collapsed = CellBlock::new(CellType::Quad, vec![vec![0, 1, 2, 2]]).unwrap();
        assert!(collapsed.check_degenerate().is_ok());

        let sliver = CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2], vec![3, 3, 4]]).unwrap();
        let err = sliver.check_degenerate().unwrap_err();
        assert!(err.to_string().contains("cell 1"));
    }

    #[test]
    fn vtk_ids_are_unique() {
        for t in CellType::ALL {
            assert_eq!(CellType::from_vtk_id(t.vtk_id()), Some(t));
            assert_eq!(CellType::from_name(t.name()), Some(t));
        }
    }

    #[test]
    fn slice_rebases_offsets() {
        let block = CellBlock::new(CellType::Polygon, vec![vec![0, 1, 2], vec![2, 3, 4, 5], vec![5, 6, 7]]).unwrap();
        let tail = block.slice(1, 3);
        assert_eq!(tail.offsets(), &[0, 4, 7]);
        assert_eq!(tail.cell(1), &[5, 6, 7]);
    }
}
