//! Persistent storage
//!
//! This module handles the settings file and the model artifact on disk.

pub mod artifact;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Could not determine the application data directory")]
    NoDataDir,
}

/// Get the application data directory
///
/// Uses the platform convention (`~/.local/share/llamachat` on Linux).
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("", "", "llamachat")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}

/// Default location of the model file
pub fn default_model_path() -> PathBuf {
    get_data_dir()
        .map(|d| d.join("models"))
        .unwrap_or_else(|_| PathBuf::from("./models"))
        .join("model-q4_k_m.gguf")
}
