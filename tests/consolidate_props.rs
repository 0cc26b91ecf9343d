use meshconv::consolidate::{consolidate, partition, split_runs};
use meshconv::{CellBlock, CellType, DataArray, Mesh, Points};
use proptest::prelude::*;

const KINDS: [CellType; 4] = [CellType::Vertex, CellType::Line, CellType::Triangle, CellType::Quad];
const NUM_POINTS: usize = 6;

/// A block of 1-3 cells with distinct corners, plus one `id` per cell.
fn block(cell_type: CellType) -> impl Strategy<Value = (CellBlock, DataArray)> {
    let n = cell_type.num_nodes().unwrap_or(3);
    prop::collection::vec((0..NUM_POINTS, any::<i32>()), 1..4).prop_map(move |cells| {
        let conn = cells.iter().map(|&(s, _)| (0..n).map(|k| (s + k) % NUM_POINTS).collect()).collect();
        let ids: Vec<i32> = cells.iter().map(|&(_, id)| id).collect();
        (CellBlock::new(cell_type, conn).unwrap(), DataArray::from(ids))
    })
}

fn assemble(parts: Vec<(CellBlock, DataArray)>) -> Mesh {
    let rows: Vec<[f64; 3]> = (0..NUM_POINTS).map(|i| [i as f64, (i * i) as f64, 0.5]).collect();
    let mut builder = Mesh::builder(Points::from_xyz(&rows));
    let mut ids = Vec::with_capacity(parts.len());
    for (cells, id) in parts {
        builder = builder.cells(cells);
        ids.push(id);
    }
    if !ids.is_empty() {
        builder = builder.cell_data("id", ids);
    }
    builder.build().unwrap()
}

fn mesh_of(types: Vec<CellType>) -> BoxedStrategy<Mesh> {
    types.into_iter().map(block).collect::<Vec<_>>().prop_map(assemble).boxed()
}

/// Any block sequence, types possibly repeated and interleaved.
fn any_mesh() -> impl Strategy<Value = Mesh> {
    prop::collection::vec(prop::sample::select(KINDS.to_vec()), 0..7).prop_flat_map(mesh_of)
}

/// Each type in at most one block, in arbitrary order.
fn distinct_mesh() -> impl Strategy<Value = Mesh> {
    prop::sample::subsequence(KINDS.to_vec(), 0..=KINDS.len()).prop_shuffle().prop_flat_map(mesh_of)
}

fn connectivity_of(mesh: &Mesh, t: CellType) -> Vec<usize> {
    mesh.cells_of_type(t).flat_map(|b| b.connectivity().iter().copied()).collect()
}

proptest! {
    #[test]
    fn consolidation_is_idempotent(mesh in any_mesh()) {
        let once = consolidate(&mesh).unwrap();
        prop_assert!(!once.has_repeated_cell_types());
        prop_assert_eq!(consolidate(&once).unwrap(), once);
    }

    #[test]
    fn consolidation_keeps_cells_in_type_order(mesh in any_mesh()) {
        let merged = consolidate(&mesh).unwrap();
        prop_assert_eq!(merged.num_cells(), mesh.num_cells());
        prop_assert_eq!(merged.cell_types(), mesh.cell_types());
        prop_assert_eq!(merged.cell_counts(), mesh.cell_counts());
        for t in mesh.cell_types() {
            prop_assert_eq!(connectivity_of(&merged, t), connectivity_of(&mesh, t));
        }
    }

    #[test]
    fn cell_data_follows_its_cells(mesh in any_mesh()) {
        let merged = consolidate(&mesh).unwrap();
        let flat_before = partition(&mesh).unwrap();
        let flat_after = partition(&merged).unwrap();
        // Pair every cell with its id, then compare per type.
        for t in mesh.cell_types() {
            let pairs = |p: &meshconv::consolidate::Partitioned| -> Vec<(Vec<usize>, Option<i64>)> {
                (0..p.cells.len())
                    .filter(|&i| p.cells.types[i] == t)
                    .map(|i| (p.cells.cell(i).to_vec(), p.cell_data["id"].values().get_i64(i)))
                    .collect()
            };
            prop_assert_eq!(pairs(&flat_after), pairs(&flat_before));
        }
    }

    #[test]
    fn partition_ignores_consolidation_of_distinct_types(mesh in distinct_mesh()) {
        prop_assert_eq!(partition(&consolidate(&mesh).unwrap()).unwrap(), partition(&mesh).unwrap());
    }

    #[test]
    fn split_runs_inverts_partition(mesh in any_mesh()) {
        let merged = consolidate(&mesh).unwrap();
        let flat = partition(&merged).unwrap();
        let rebuilt = split_runs(
            merged.points().clone(),
            &flat.cells,
            &flat.cell_data,
            merged.point_data().clone(),
            merged.field_data().clone(),
        )
        .unwrap();
        prop_assert_eq!(rebuilt, merged);
    }
}
