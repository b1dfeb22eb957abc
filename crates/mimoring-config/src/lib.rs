//! TOML-loadable construction parameters for a buffer, mirroring the
//! `ObsidianConfig`/`OnyxConfig` load-from-path pattern: one struct with
//! serde defaults for the optional knobs, one `ConfigError` distinguishing
//! "couldn't read the file" from "couldn't parse it".

use std::path::Path;

use mimoring_dtype::{DtypeError, ScalarType, StructuredDtype};
use serde::Deserialize;

/// One named field of a buffer's data record, as written in TOML.
#[derive(Clone, Debug, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub scalar: ScalarSpec,
}

/// TOML-facing mirror of [`mimoring_dtype::ScalarType`] (serde can't derive
/// `Deserialize` for the library's own enum without pulling a serde
/// dependency into `mimoring-dtype`, which has no other use for one).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarSpec {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Bytes(u16),
}

impl From<ScalarSpec> for ScalarType {
    fn from(spec: ScalarSpec) -> Self {
        match spec {
            ScalarSpec::I8 => ScalarType::I8,
            ScalarSpec::U8 => ScalarType::U8,
            ScalarSpec::I16 => ScalarType::I16,
            ScalarSpec::U16 => ScalarType::U16,
            ScalarSpec::I32 => ScalarType::I32,
            ScalarSpec::U32 => ScalarType::U32,
            ScalarSpec::I64 => ScalarType::I64,
            ScalarSpec::U64 => ScalarType::U64,
            ScalarSpec::F32 => ScalarType::F32,
            ScalarSpec::F64 => ScalarType::F64,
            ScalarSpec::Bytes(n) => ScalarType::Bytes(n),
        }
    }
}

/// Construction parameters for one buffer, as loaded from a TOML file.
#[derive(Clone, Debug, Deserialize)]
pub struct BufferSpec {
    pub name: String,

    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: String,

    pub slot_count: usize,

    pub data_length: usize,

    pub fields: Vec<FieldSpec>,

    #[serde(default = "defaults::overwrite")]
    pub overwrite: bool,

    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid dtype in config: {0}")]
    Dtype(#[from] DtypeError),
}

mod defaults {
    pub fn shm_dir() -> String {
        "/tmp".into()
    }

    pub fn overwrite() -> bool {
        true
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl BufferSpec {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let spec: BufferSpec = toml::from_str(&text)?;
        Ok(spec)
    }

    /// Path to this buffer's backing shared-memory file.
    pub fn shm_path(&self) -> String {
        format!("{}/mimoring_{}.shm", self.shm_dir, self.name)
    }

    /// Build the data record layout this spec describes.
    pub fn dtype(&self) -> Result<StructuredDtype, ConfigError> {
        let fields = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), ScalarType::from(f.scalar)));
        Ok(StructuredDtype::new(fields)?)
    }
}
