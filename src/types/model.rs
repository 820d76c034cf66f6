//! Model types
//!
//! Describes the on-disk model artifact the engine is loaded from.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A model file on local disk, and where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Path to the GGUF file
    pub path: PathBuf,
    /// Remote source the file is (or would be) downloaded from
    pub source_url: Option<String>,
    /// Whether the file was present when the artifact was resolved
    pub exists: bool,
}

impl ModelArtifact {
    pub fn new(path: impl Into<PathBuf>, source_url: Option<String>) -> Self {
        let path = path.into();
        let exists = path.is_file();
        Self {
            path,
            source_url,
            exists,
        }
    }

    /// File name for log output
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact() {
        let artifact = ModelArtifact::new("/definitely/not/here.gguf", None);
        assert!(!artifact.exists);
        assert_eq!(artifact.display_name(), "here.gguf");
    }

    #[test]
    fn test_existing_artifact() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let artifact = ModelArtifact::new(file.path(), Some("https://example.com/m.gguf".into()));
        assert!(artifact.exists);
    }
}
