//! Conversion settings, loadable from a JSON file.
//!
//! ```json
//! { "output_format": "mcb", "compression": "zstd", "level": 9 }
//! ```
//!
//! Every field is optional; missing ones keep [`ConvertOptions::default`].
//! Command-line flags override whatever the file sets.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{MeshError, Result};
use crate::format::{Encoding, WriteOptions};

// ── ConvertOptions ───────────────────────────────────────────────────────────

/// Configuration for [`crate::engine::Converter::convert`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertOptions {
    /// Registry name; wins over extension and content sniffing.
    pub input_format:  Option<String>,
    pub output_format: Option<String>,
    /// `None` keeps the target format's default encoding.
    pub encoding:      Option<Encoding>,
    /// Codec name (`zstd`, `lz4`, `brotli`, `lzma`, `none`).
    pub compression:   Option<String>,
    pub level:         i32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            input_format:  None,
            output_format: None,
            encoding:      None,
            compression:   None,
            level:         DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl ConvertOptions {
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text).map_err(|e| MeshError::Config(e.to_string()))?;
        options.codec()?;
        Ok(options)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| MeshError::Io { path: path.display().to_string(), source })?;
        Self::from_json(&text).map_err(|e| match e {
            MeshError::Config(msg) => MeshError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// The configured codec, if any.
    pub fn codec(&self) -> Result<Option<CodecId>> {
        self.compression
            .as_deref()
            .map(|name| {
                CodecId::from_name(name).ok_or_else(|| MeshError::Config(format!("unknown codec `{name}`")))
            })
            .transpose()
    }

    pub fn write_options(&self) -> Result<WriteOptions> {
        Ok(WriteOptions { encoding: self.encoding, compression: self.codec()?, level: self.level })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let options = ConvertOptions::from_json(r#"{ "output_format": "vtk", "encoding": "binary" }"#).unwrap();
        assert_eq!(options.output_format.as_deref(), Some("vtk"));
        assert_eq!(options.encoding, Some(Encoding::Binary));
        assert_eq!(options.level, DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(options.write_options().unwrap().compression, None);
    }

    #[test]
    fn unknown_keys_and_codecs_are_config_errors() {
        assert!(matches!(ConvertOptions::from_json(r#"{ "codec": "zstd" }"#), Err(MeshError::Config(_))));
        assert!(matches!(ConvertOptions::from_json(r#"{ "compression": "gzip" }"#), Err(MeshError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "compression": "lz4", "level": 1 }}"#).unwrap();
        let options = ConvertOptions::from_file(file.path()).unwrap();
        let write = options.write_options().unwrap();
        assert_eq!(write.compression, Some(CodecId::Lz4));
        assert_eq!(write.level, 1);

        let missing = ConvertOptions::from_file("/nonexistent/meshconv.json").unwrap_err();
        assert!(matches!(missing, MeshError::Io { .. }));
    }
}
