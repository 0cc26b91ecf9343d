//! Error taxonomy shared by the mesh model, the plug-in formats and the
//! conversion engine.
//!
//! Plug-ins return the narrow error types ([`ReadError`], [`WriteError`],
//! [`UnsupportedFeatureError`]); the engine surfaces everything through
//! [`MeshError`] without rewording or downgrading it. A reader that decodes
//! data breaking a model invariant reports it through [`ReadError::invalid_mesh`];
//! converting that into a [`MeshError`] restores the model kind with the
//! format name attached.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::codec::CodecError;

pub type Result<T, E = MeshError> = std::result::Result<T, E>;

// ── Location ─────────────────────────────────────────────────────────────────

/// Where in the source a parser gave up, when the parser knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Line(usize),
    Offset(u64),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Line(line)     => write!(f, "line {line}"),
            Location::Offset(offset) => write!(f, "byte offset {offset}"),
        }
    }
}

// ── Plug-in errors ───────────────────────────────────────────────────────────

/// Malformed source bytes for the detected format.
#[derive(Debug)]
pub struct ReadError {
    pub format:   String,
    pub location: Option<Location>,
    pub message:  String,
    /// Model error behind the failure, for invariant violations.
    pub cause:    Option<Box<MeshError>>,
}

impl ReadError {
    pub fn new(format: &str, message: impl Into<String>) -> Self {
        Self { format: format.to_owned(), location: None, message: message.into(), cause: None }
    }

    pub fn at_line(format: &str, line: usize, message: impl Into<String>) -> Self {
        Self { location: Some(Location::Line(line)), ..Self::new(format, message) }
    }

    pub fn at_offset(format: &str, offset: u64, message: impl Into<String>) -> Self {
        Self { location: Some(Location::Offset(offset)), ..Self::new(format, message) }
    }

    /// A model invariant broken by the data a reader decoded.
    pub fn invalid_mesh(format: &str, err: MeshError) -> Self {
        let message = err.to_string();
        Self { cause: Some(Box::new(err)), ..Self::new(format, message) }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "failed to read {} data at {loc}: {}", self.format, self.message),
            None      => write!(f, "failed to read {} data: {}", self.format, self.message),
        }
    }
}

impl std::error::Error for ReadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

/// Failure while serializing a mesh (I/O or an encoder limitation).
#[derive(Error, Debug)]
#[error("failed to write {format} data: {message}")]
pub struct WriteError {
    pub format:  String,
    pub message: String,
}

impl WriteError {
    pub fn new(format: &str, message: impl Into<String>) -> Self {
        Self { format: format.to_owned(), message: message.into() }
    }

    pub fn io(format: &str, err: io::Error) -> Self {
        Self::new(format, err.to_string())
    }
}

/// The target format cannot represent something present in the mesh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("format `{format}` cannot represent {feature}")]
pub struct UnsupportedFeatureError {
    pub format:  String,
    pub feature: String,
}

impl UnsupportedFeatureError {
    pub fn new(format: &str, feature: impl Into<String>) -> Self {
        Self { format: format.to_owned(), feature: feature.into() }
    }
}

// ── Crate-level error ────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum MeshError {
    /// No registry entry matched the explicit name, extension or content.
    #[error("unknown mesh format: {0}")]
    UnknownFormat(String),
    #[error(transparent)]
    Read(ReadError),
    /// A canonical-model invariant was violated while building a mesh.
    #[error("invalid mesh data: {0}")]
    DataShape(String),
    /// Cell connectivity inconsistent with its declared type.
    #[error("invalid cell topology: {0}")]
    InvalidTopology(String),
    #[error(transparent)]
    UnsupportedFeature(#[from] UnsupportedFeatureError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("IO error on {path}: {source}")]
    Io {
        path:   String,
        #[source]
        source: io::Error,
    },
}

impl From<ReadError> for MeshError {
    fn from(err: ReadError) -> Self {
        let at = match err.location {
            Some(loc) => format!("{} data at {loc}", err.format),
            None      => format!("{} data", err.format),
        };
        match err.cause.as_deref() {
            Some(MeshError::DataShape(msg))       => MeshError::DataShape(format!("{msg} (in {at})")),
            Some(MeshError::InvalidTopology(msg)) => MeshError::InvalidTopology(format!("{msg} (in {at})")),
            _                                     => MeshError::Read(err),
        }
    }
}

impl MeshError {
    pub fn data_shape(msg: impl Into<String>) -> Self {
        MeshError::DataShape(msg.into())
    }

    pub fn topology(msg: impl Into<String>) -> Self {
        MeshError::InvalidTopology(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_mentions_location() {
        let err = ReadError::at_line("vtk", 12, "bad token");
        assert_eq!(err.to_string(), "failed to read vtk data at line 12: bad token");
        let err = ReadError::at_offset("mcb", 40, "truncated section");
        assert!(err.to_string().contains("byte offset 40"));
        let err = ReadError::new("stl", "empty file");
        assert_eq!(err.to_string(), "failed to read stl data: empty file");
    }

    #[test]
    fn invalid_mesh_keeps_model_message() {
        let err = ReadError::invalid_mesh("ugrid", MeshError::data_shape("3 values for 2 points"));
        assert_eq!(err.to_string(), "failed to read ugrid data: invalid mesh data: 3 values for 2 points");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn model_kind_survives_conversion() {
        let err = MeshError::from(ReadError::invalid_mesh("ugrid", MeshError::data_shape("3 values for 2 points")));
        match err {
            MeshError::DataShape(msg) => assert_eq!(msg, "3 values for 2 points (in ugrid data)"),
            other => panic!("expected a data shape error, got {other}"),
        }

        let err = MeshError::from(ReadError::invalid_mesh("vtk", MeshError::topology("triangle needs 3 nodes")));
        assert!(matches!(&err, MeshError::InvalidTopology(m) if m.ends_with("(in vtk data)")), "{err}");

        let err = MeshError::from(ReadError::at_line("vtk", 3, "bad token"));
        assert!(matches!(err, MeshError::Read(ref e) if e.cause.is_none()), "{err}");
    }
}
