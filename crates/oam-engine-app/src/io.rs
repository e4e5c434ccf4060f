//! Small file-loading helper shared by the fixture stores and the application
//! document loader: dispatches on file extension between JSON and YAML.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{AppError, AppResult};

pub fn load<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let bytes = std::fs::read(path).map_err(|source| AppError::Io { path: path.display().to_string(), source })?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_slice(&bytes)
            .map_err(|source| AppError::DecodeYaml { path: path.display().to_string(), source }),
        _ => serde_json::from_slice(&bytes)
            .map_err(|source| AppError::Decode { path: path.display().to_string(), format: "json", source }),
    }
}
