//! Format registry: name → plug-in, with extension and content fallbacks.
//!
//! # Lookup order
//! 1. explicit format name (always wins, even against a contradicting
//!    extension);
//! 2. file extension, case-insensitive;
//! 3. magic-byte sniffing of the first [`SNIFF_LEN`] bytes, in registration
//!    order.
//!
//! # Lifetime
//! A registry is filled once and then only read. The process-wide instance
//! is installed with [`init`] before the first conversion; [`global`] falls
//! back to the built-in set when the host never called `init`. There is no
//! way to register into an installed registry.

use log::debug;
use once_cell::sync::OnceCell;
use std::path::Path;

use super::{mcb::McbFormat, meshjson::MeshJsonFormat, stl::StlFormat, ugrid::UgridFormat, vtk::VtkFormat};
use super::MeshFormat;
use crate::error::{MeshError, Result};

/// Bytes inspected by content sniffing.
pub const SNIFF_LEN: usize = 256;

static GLOBAL: OnceCell<FormatRegistry> = OnceCell::new();

#[derive(Default)]
pub struct FormatRegistry {
    formats: Vec<Box<dyn MeshFormat>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every bundled format.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.formats.push(Box::new(MeshJsonFormat));
        reg.formats.push(Box::new(McbFormat));
        reg.formats.push(Box::new(VtkFormat));
        reg.formats.push(Box::new(UgridFormat));
        reg.formats.push(Box::new(StlFormat));
        reg
    }

    /// Add a format. Names must be unique.
    pub fn register<F: MeshFormat + 'static>(&mut self, format: F) -> Result<()> {
        if self.formats.iter().any(|f| f.name() == format.name()) {
            return Err(MeshError::Config(format!("format `{}` is already registered", format.name())));
        }
        debug!("registering mesh format `{}`", format.name());
        self.formats.push(Box::new(format));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn MeshFormat> + '_ {
        self.formats.iter().map(|f| f.as_ref())
    }

    pub fn get(&self, name: &str) -> Result<&dyn MeshFormat> {
        let wanted = name.to_lowercase();
        self.iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| MeshError::UnknownFormat(format!("no format named `{name}`")))
    }

    pub fn by_extension(&self, path: &Path) -> Option<&dyn MeshFormat> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        self.iter().find(|f| f.extensions().iter().any(|e| *e == ext))
    }

    pub fn sniff(&self, bytes: &[u8]) -> Option<&dyn MeshFormat> {
        let head = &bytes[..bytes.len().min(SNIFF_LEN)];
        self.iter().find(|f| f.detect(head))
    }

    /// Resolve the format of an existing file.
    pub fn resolve_input(&self, explicit: Option<&str>, path: Option<&Path>, bytes: &[u8]) -> Result<&dyn MeshFormat> {
        if let Some(name) = explicit {
            return self.get(name);
        }
        if let Some(format) = path.and_then(|p| self.by_extension(p)) {
            debug!("input format `{}` chosen by extension", format.name());
            return Ok(format);
        }
        if let Some(format) = self.sniff(bytes) {
            debug!("input format `{}` chosen by content", format.name());
            return Ok(format);
        }
        Err(MeshError::UnknownFormat(match path {
            Some(p) => format!("cannot determine format of {}", p.display()),
            None    => "cannot determine input format".to_owned(),
        }))
    }

    /// Resolve the format of a file about to be written (nothing to sniff).
    pub fn resolve_output(&self, explicit: Option<&str>, path: &Path) -> Result<&dyn MeshFormat> {
        if let Some(name) = explicit {
            return self.get(name);
        }
        self.by_extension(path).ok_or_else(|| {
            MeshError::UnknownFormat(format!("cannot determine format of {} from its extension", path.display()))
        })
    }
}

/// Install the process-wide registry. Must run before any conversion that
/// relies on [`global`]; fails if a registry is already installed.
pub fn init(registry: FormatRegistry) -> Result<&'static FormatRegistry> {
    GLOBAL
        .set(registry)
        .map_err(|_| MeshError::Config("format registry is already initialized".into()))?;
    GLOBAL
        .get()
        .ok_or_else(|| MeshError::Config("format registry failed to initialize".into()))
}

/// The process-wide registry, installing the built-in set on first use if
/// [`init`] was never called.
pub fn global() -> &'static FormatRegistry {
    GLOBAL.get_or_init(FormatRegistry::with_builtin)
}
