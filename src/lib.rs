//! Mesh format conversion through one canonical in-memory mesh.
//!
//! Every reader produces a [`Mesh`] and every writer consumes one; the
//! [`engine::Converter`] reshapes meshes between the typed-block and flat
//! cell layouts and refuses what a target format cannot represent.

pub mod cell;
pub mod codec;
pub mod config;
pub mod consolidate;
pub mod data;
pub mod engine;
pub mod error;
pub mod format;
pub mod mesh;
pub mod ops;

pub use cell::{CellBlock, CellType};
pub use config::ConvertOptions;
pub use data::{ArrayValues, DType, DataArray};
pub use engine::Converter;
pub use error::{MeshError, ReadError, Result, UnsupportedFeatureError, WriteError};
pub use format::{Capabilities, Encoding, FormatRegistry, MeshFormat, WriteOptions};
pub use mesh::{Mesh, MeshBuilder, Points};
