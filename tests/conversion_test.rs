use meshconv::codec::CodecId;
use meshconv::format::mcb::section_codec;
use meshconv::format::meshjson::MeshJsonFormat;
use meshconv::format::{Capabilities, Input, MeshFormat, Output, Precision};
use meshconv::{
    ops, CellBlock, CellType, ConvertOptions, Converter, DataArray, FormatRegistry, Mesh, MeshError, Points,
    ReadError, WriteError, WriteOptions,
};
use std::path::Path;
use tempfile::tempdir;

fn unit_square() -> Mesh {
    let points = Points::from_xyz(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]);
    Mesh::builder(points)
        .cells(CellBlock::new(CellType::Quad, vec![vec![0, 1, 2, 3]]).unwrap())
        .point_data("temperature", vec![0.0, 1.5, 3.0, -0.25])
        .build()
        .unwrap()
}

fn five_points() -> Mesh {
    let rows: Vec<[f64; 3]> = (0..5).map(|i| [i as f64, 0.5 * i as f64, 0.0]).collect();
    Mesh::builder(Points::from_xyz(&rows)).build().unwrap()
}

fn tet_with_skin() -> Mesh {
    let points = Points::from_xyz(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
    Mesh::builder(points)
        .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 2, 1], vec![0, 1, 3]]).unwrap())
        .cells(CellBlock::new(CellType::Tetra, vec![vec![0, 1, 2, 3]]).unwrap())
        .cell_data("ugrid:ref", vec![DataArray::from(vec![4i32, 7]), DataArray::from(vec![0i32])])
        .build()
        .unwrap()
}

/// Write then read through the real files, using each format's default options.
fn round_trip(conv: &Converter<'_>, mesh: &Mesh, path: &Path) -> Result<Mesh, MeshError> {
    conv.write(mesh, path, None, &WriteOptions::default())?;
    Ok(conv.read(path, None)?.0)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn unit_square_needs_a_quad_capable_format() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let mesh = unit_square();

    let stl = dir.path().join("square.stl");
    match round_trip(&conv, &mesh, &stl) {
        Err(MeshError::UnsupportedFeature(e)) => assert_eq!(e.format, "stl"),
        other => panic!("expected an unsupported feature, got {other:?}"),
    }
    assert!(!stl.exists());

    for name in ["square.json", "square.vtk", "square.mcb"] {
        let back = round_trip(&conv, &mesh, &dir.path().join(name)).unwrap();
        assert_eq!(back.cells(), mesh.cells(), "{name}");
        assert_eq!(back.point_data()["temperature"], mesh.point_data()["temperature"], "{name}");
        assert_eq!(back, mesh, "{name}");
    }
}

#[test]
fn points_only_mesh_needs_point_cloud_support() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let mesh = five_points();

    for name in ["cloud.json", "cloud.vtk", "cloud.mcb"] {
        let back = round_trip(&conv, &mesh, &dir.path().join(name)).unwrap();
        assert_eq!(back.num_points(), 5, "{name}");
        assert_eq!(back.num_cells(), 0, "{name}");
        assert_eq!(back, mesh, "{name}");
    }
    let err = round_trip(&conv, &mesh, &dir.path().join("cloud.stl")).unwrap_err();
    assert!(matches!(err, MeshError::UnsupportedFeature(_)), "{err}");
}

#[test]
fn round_trips_through_every_format() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let mesh = tet_with_skin();

    for name in ["tet.json", "tet.vtk", "tet.mcb", "tet.ugrid", "tet.lb8.ugrid", "tet.r4.ugrid"] {
        let path = dir.path().join(name);
        let back = round_trip(&conv, &mesh, &path).unwrap();
        let format = reg.resolve_output(None, &path).unwrap();
        let tolerance = format.precision(Some(&path)).tolerance();
        assert!(back.approx_eq(&mesh, tolerance), "{name}");
    }

    // STL numbers points by first use, so keep corners in that order.
    let skin = Mesh::builder(mesh.points().clone())
        .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2], vec![0, 3, 1], vec![1, 3, 2]]).unwrap())
        .build()
        .unwrap();
    let back = round_trip(&conv, &skin, &dir.path().join("skin.stl")).unwrap();
    assert!(back.approx_eq(&skin, Precision::Float32.tolerance()));
}

#[test]
fn flat_layout_merges_repeated_blocks_for_stl() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let points = Points::from_xyz(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]]);
    let mesh = Mesh::builder(points)
        .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 1, 2]]).unwrap())
        .cells(CellBlock::new(CellType::Triangle, vec![vec![0, 2, 3]]).unwrap())
        .build()
        .unwrap();
    let back = round_trip(&conv, &mesh, &dir.path().join("two.stl")).unwrap();
    assert_eq!(back.cells().len(), 1);
    assert_eq!(back.cells()[0].connectivity(), &[0, 1, 2, 0, 2, 3]);
}

// ── Capability gate ──────────────────────────────────────────────────────────

/// meshjson bytes behind a format that admits a single cell type only.
struct SingleType;

impl MeshFormat for SingleType {
    fn name(&self) -> &'static str { "single" }

    fn extensions(&self) -> &'static [&'static str] { &["single"] }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ASCII | Capabilities::POINT_DATA | Capabilities::CELL_DATA | Capabilities::REPEATED_CELL_TYPES
    }

    fn detect(&self, _head: &[u8]) -> bool { false }

    fn read(&self, input: &Input<'_>) -> Result<Mesh, ReadError> {
        MeshJsonFormat.read(input)
    }

    fn write(&self, mesh: &Mesh, out: &mut Output<'_>, options: &WriteOptions) -> Result<(), WriteError> {
        MeshJsonFormat.write(mesh, out, options)
    }
}

#[test]
fn two_cell_types_fail_without_mixed_support() {
    let mut reg = FormatRegistry::with_builtin();
    reg.register(SingleType).unwrap();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();

    let err = round_trip(&conv, &tet_with_skin(), &dir.path().join("mixed.single")).unwrap_err();
    match err {
        MeshError::UnsupportedFeature(e) => {
            assert_eq!(e.format, "single");
            assert!(e.feature.contains("mixed cell types"), "{}", e.feature);
        }
        other => panic!("unexpected error {other}"),
    }
    let back = round_trip(&conv, &unit_square(), &dir.path().join("square.single")).unwrap();
    assert_eq!(back, unit_square());
}

// ── Operations ───────────────────────────────────────────────────────────────

#[test]
fn compress_and_decompress_keep_the_mesh() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let path = dir.path().join("tet.mcb");
    let mesh = tet_with_skin();
    conv.write(&mesh, &path, None, &WriteOptions::default()).unwrap();
    assert_eq!(section_codec(&std::fs::read(&path).unwrap()), Some(CodecId::None));

    let packed = dir.path().join("tet.zst.mcb");
    ops::compress(&conv, &path, Some(&packed), CodecId::Zstd, 9).unwrap();
    assert_eq!(section_codec(&std::fs::read(&packed).unwrap()), Some(CodecId::Zstd));
    assert_eq!(conv.read(&packed, None).unwrap().0, mesh);

    ops::decompress(&conv, &packed, None).unwrap();
    assert_eq!(section_codec(&std::fs::read(&packed).unwrap()), Some(CodecId::None));
    assert_eq!(conv.read(&packed, None).unwrap().0, mesh);
}

#[test]
fn ascii_and_binary_rewrite_in_place() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let path = dir.path().join("square.vtk");
    let mesh = unit_square();
    conv.write(&mesh, &path, None, &WriteOptions::default()).unwrap();

    ops::binary(&conv, &path).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.windows(7).any(|w| w == b"\nBINARY"));
    assert_eq!(conv.read(&path, None).unwrap().0, mesh);

    ops::ascii(&conv, &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\nASCII\n"));
    assert_eq!(conv.read(&path, None).unwrap().0, mesh);
}

#[test]
fn ugrid_encoding_follows_the_file_name() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let path = dir.path().join("tet.ugrid");
    conv.write(&tet_with_skin(), &path, None, &WriteOptions::default()).unwrap();
    assert!(matches!(ops::binary(&conv, &path), Err(MeshError::Write(_))));
    assert!(conv.read(&path, None).is_ok());
}

#[test]
fn info_summarises_a_file() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let path = dir.path().join("tet.mcb");
    conv.write(&tet_with_skin(), &path, None, &WriteOptions::default()).unwrap();

    let summary = ops::info(&conv, &path, None).unwrap();
    assert_eq!(summary.format, "mcb");
    assert_eq!(summary.cells, vec![(CellType::Triangle, 2), (CellType::Tetra, 1)]);
    assert_eq!(summary.cell_data, vec!["ugrid:ref".to_owned()]);
}

#[test]
fn convert_honours_explicit_formats_and_config() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let input = dir.path().join("square.json");
    conv.write(&unit_square(), &input, None, &WriteOptions::default()).unwrap();

    let output = dir.path().join("square.dat");
    let options = ConvertOptions::from_json(r#"{ "output_format": "vtk", "encoding": "binary" }"#).unwrap();
    ops::convert(&conv, &input, &output, &options).unwrap();
    let (back, format) = conv.read(&output, None).unwrap();
    assert_eq!(format.name(), "vtk");
    assert_eq!(back, unit_square());
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[test]
fn unknown_formats_are_reported() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let input = dir.path().join("square.json");
    conv.write(&unit_square(), &input, None, &WriteOptions::default()).unwrap();

    let err = ops::convert(&conv, &input, &dir.path().join("square.obj"), &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, MeshError::UnknownFormat(_)), "{err}");

    let options = ConvertOptions { input_format: Some("gmsh".into()), ..ConvertOptions::default() };
    let err = ops::convert(&conv, &input, &dir.path().join("square.vtk"), &options).unwrap_err();
    assert!(matches!(err, MeshError::UnknownFormat(_)), "{err}");
}

#[test]
fn dangling_indices_surface_as_data_shape() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let path = dir.path().join("dangling.json");
    std::fs::write(
        &path,
        r#"{"format":"meshjson","version":1,"points":{"dim":2,"coords":[0,0,1,0]},"cells":[{"type":"line","connectivity":[0,5]}]}"#,
    )
    .unwrap();

    match conv.read(&path, None) {
        Err(MeshError::DataShape(msg)) => assert!(msg.contains("meshjson"), "{msg}"),
        other => panic!("expected a data shape error, got {:?}", other.map(|(m, _)| m)),
    }
}

#[test]
fn malformed_input_reports_where() {
    let reg = FormatRegistry::with_builtin();
    let conv = Converter::new(&reg);
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.vtk");
    std::fs::write(&path, "# vtk DataFile Version 4.2\nbroken\nASCII\nDATASET UNSTRUCTURED_GRID\nPOINTS 2 double\n0 0 0\n1 x 0\n").unwrap();

    match conv.read(&path, None) {
        Err(MeshError::Read(e)) => {
            assert_eq!(e.format, "vtk");
            assert!(e.to_string().contains("line 7"), "{e}");
        }
        other => panic!("expected a read error, got {:?}", other.map(|(m, _)| m)),
    }
}
