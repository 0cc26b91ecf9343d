//! Conversion pipeline: resolve → read → reshape → write.
//!
//! ```no_run
//! use meshconv::config::ConvertOptions;
//! use meshconv::engine::Converter;
//!
//! Converter::global().convert("in.vtk", "out.ugrid", &ConvertOptions::default())?;
//! # Ok::<(), meshconv::MeshError>(())
//! ```
//!
//! Everything up to the final write is pure: a mesh the target cannot hold
//! is refused before a single byte reaches the destination. The writer
//! renders into memory and the file is written in one go.

use log::{debug, info};
use std::borrow::Cow;
use std::path::Path;

use crate::codec::CodecId;
use crate::config::ConvertOptions;
use crate::consolidate::{consolidate, partition};
use crate::error::{MeshError, Result, UnsupportedFeatureError, WriteError};
use crate::format::registry::{self, FormatRegistry};
use crate::format::{Capabilities, Encoding, Input, MeshFormat, Output, WriteOptions};
use crate::mesh::Mesh;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MeshError + '_ {
    move |source| MeshError::Io { path: path.display().to_string(), source }
}

// ── Capability gate ──────────────────────────────────────────────────────────

fn names<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(|n| format!("`{n}`")).collect::<Vec<_>>().join(", ")
}

/// Refuse anything in `mesh` or `options` the format's capabilities rule out.
fn check_capabilities(
    format:  &dyn MeshFormat,
    mesh:    &Mesh,
    options: &WriteOptions,
) -> std::result::Result<(), UnsupportedFeatureError> {
    let caps = format.capabilities();
    let refuse = |feature: String| Err(UnsupportedFeatureError::new(format.name(), feature));

    let types = mesh.cell_types();
    if types.len() > 1 && !caps.contains(Capabilities::MIXED_CELL_TYPES) {
        let list: Vec<_> = types.iter().map(|t| t.name()).collect();
        return refuse(format!("mixed cell types ({})", list.join(", ")));
    }
    if let Some(allowed) = format.cell_types() {
        if let Some(t) = types.iter().find(|t| !allowed.contains(*t)) {
            return refuse(format!("{t} cells"));
        }
    }
    if mesh.num_cells() == 0 && !caps.contains(Capabilities::POINT_CLOUD) {
        return refuse("a mesh without cells".into());
    }
    if !caps.contains(Capabilities::POLYGONS) && types.iter().any(|t| t.is_variable_arity()) {
        return refuse("polygon cells".into());
    }
    if !caps.contains(Capabilities::HIGHER_ORDER_CELLS) {
        if let Some(t) = types.iter().find(|t| t.is_higher_order()) {
            return refuse(format!("higher-order {t} cells"));
        }
    }
    if mesh.points().dim() == 2 && !caps.contains(Capabilities::POINTS_2D) {
        return refuse("2D points".into());
    }
    if !mesh.point_data().is_empty() && !caps.contains(Capabilities::POINT_DATA) {
        return refuse(format!("point data ({})", names(mesh.point_data().keys())));
    }
    if !mesh.cell_data().is_empty() && !caps.contains(Capabilities::CELL_DATA) {
        return refuse(format!("cell data ({})", names(mesh.cell_data().keys())));
    }
    if !mesh.field_data().is_empty() && !caps.contains(Capabilities::FIELD_DATA) {
        return refuse(format!("field data ({})", names(mesh.field_data().keys())));
    }

    match options.encoding {
        Some(Encoding::Ascii) if !caps.contains(Capabilities::ASCII) => return refuse("ASCII encoding".into()),
        Some(Encoding::Binary) if !caps.contains(Capabilities::BINARY) => return refuse("binary encoding".into()),
        _ => {}
    }
    match options.compression {
        Some(codec) if codec != CodecId::None && !caps.contains(Capabilities::COMPRESSION) => {
            refuse(format!("{} compression", codec.name()))
        }
        _ => Ok(()),
    }
}

/// A reshaping step failed because the data cannot be merged; from the
/// caller's point of view the target simply cannot represent it.
fn reshape_error(format: &dyn MeshFormat, err: MeshError) -> MeshError {
    match err {
        MeshError::DataShape(msg) => {
            UnsupportedFeatureError::new(format.name(), format!("this cell data layout: {msg}")).into()
        }
        other => other,
    }
}

// ── Converter ────────────────────────────────────────────────────────────────

/// Drives conversions against one registry.
#[derive(Clone, Copy)]
pub struct Converter<'r> {
    registry: &'r FormatRegistry,
}

impl Converter<'static> {
    /// Converter over the process-wide registry.
    pub fn global() -> Self {
        Self::new(registry::global())
    }
}

impl<'r> Converter<'r> {
    pub fn new(registry: &'r FormatRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r FormatRegistry {
        self.registry
    }

    /// Decode in-memory bytes. `path` only feeds format resolution and
    /// name-dependent variants.
    pub fn read_bytes(
        &self,
        bytes:  &[u8],
        path:   Option<&Path>,
        format: Option<&str>,
    ) -> Result<(Mesh, &'r dyn MeshFormat)> {
        let format = self.registry.resolve_input(format, path, bytes)?;
        let mesh = format.read(&Input::new(bytes, path))?;
        info!(
            "read {} mesh: {} points, {} cells in {} blocks",
            format.name(),
            mesh.num_points(),
            mesh.num_cells(),
            mesh.cells().len()
        );
        Ok((mesh, format))
    }

    pub fn read<P: AsRef<Path>>(&self, path: P, format: Option<&str>) -> Result<(Mesh, &'r dyn MeshFormat)> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(io_error(path))?;
        self.read_bytes(&bytes, Some(path), format)
    }

    /// Fit a mesh to a target format without writing anything.
    ///
    /// Returns the mesh itself when it already fits, or a consolidated copy
    /// when the format cannot hold repeated cell types. Anything else the
    /// format cannot represent is an [`UnsupportedFeatureError`].
    pub fn prepare<'m>(
        &self,
        mesh:    &'m Mesh,
        format:  &dyn MeshFormat,
        options: &WriteOptions,
    ) -> Result<Cow<'m, Mesh>> {
        check_capabilities(format, mesh, options)?;
        let caps = format.capabilities();

        let mut mesh = Cow::Borrowed(mesh);
        if mesh.has_repeated_cell_types() && !caps.contains(Capabilities::REPEATED_CELL_TYPES) {
            debug!("consolidating {} blocks for {}", mesh.cells().len(), format.name());
            mesh = Cow::Owned(consolidate(&mesh).map_err(|e| reshape_error(format, e))?);
        }
        if !mesh.cell_data().is_empty() && !caps.contains(Capabilities::PER_BLOCK_CELL_DATA) {
            partition(&mesh).map_err(|e| reshape_error(format, e))?;
        }
        format.check(&mesh)?;
        Ok(mesh)
    }

    /// Run [`Converter::prepare`] and render the result in memory.
    pub fn render(
        &self,
        mesh:    &Mesh,
        format:  &dyn MeshFormat,
        path:    Option<&Path>,
        options: &WriteOptions,
    ) -> Result<Vec<u8>> {
        let mesh = self.prepare(mesh, format, options)?;
        let mut buf = Vec::new();
        format.write(&mesh, &mut Output::new(&mut buf, path), options)?;
        Ok(buf)
    }

    /// Write a mesh to `path`, resolving the format from `format` or the
    /// path's extension.
    pub fn write<P: AsRef<Path>>(
        &self,
        mesh:    &Mesh,
        path:    P,
        format:  Option<&str>,
        options: &WriteOptions,
    ) -> Result<&'r dyn MeshFormat> {
        let path = path.as_ref();
        let format = self.registry.resolve_output(format, path)?;
        let bytes = self.render(mesh, format, Some(path), options)?;
        std::fs::write(path, &bytes)
            .map_err(|e| WriteError::new(format.name(), format!("{}: {e}", path.display())))?;
        info!("wrote {} ({} bytes, {})", path.display(), bytes.len(), format.name());
        Ok(format)
    }

    pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input:   P,
        output:  Q,
        options: &ConvertOptions,
    ) -> Result<()> {
        let write_options = options.write_options()?;
        let (mesh, _) = self.read(input, options.input_format.as_deref())?;
        self.write(&mesh, output, options.output_format.as_deref(), &write_options)?;
        Ok(())
    }
}
