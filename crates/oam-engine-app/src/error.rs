//! Top-level error type for the binary: wraps every lower-crate error plus the
//! I/O and document-parsing failures that only the ambient wiring can hit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] oam_engine_core::error::CoreError),

    #[error(transparent)]
    Config(#[from] oam_engine_core::config::ConfigError),

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path} as {format}: {source}")]
    Decode {
        path: String,
        format: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("parsing {path} as yaml: {source}")]
    DecodeYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type AppResult<T> = std::result::Result<T, AppError>;
