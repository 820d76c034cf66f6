//! Engine error taxonomy

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while bringing the engine up or running a completion
///
/// `Clone` so a latched initialization failure can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("Model file not found at {} and no model URL configured", .path.display())]
    MissingArtifact { path: PathBuf },
    #[error("Model download failed: {0}")]
    Download(String),
    #[error("Failed to load model: {0}")]
    EngineConstruction(String),
    #[error("Model smoke test failed: {0}")]
    SmokeTest(String),
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Engine ran out of resources: {0}")]
    ResourceExhausted(String),
    #[error("Engine fault suspected, model was unloaded: {0}")]
    FaultSuspected(String),
    #[error("Generation failed: {0}")]
    Inference(String),
    #[error("Model is not loaded")]
    NotReady,
}

impl EngineError {
    /// Whether an initialization attempt that failed this way may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EngineError::MissingArtifact { .. })
    }

    /// Whether this error means the engine is unavailable rather than a
    /// single request having failed
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::MissingArtifact { .. }
                | EngineError::Download(_)
                | EngineError::EngineConstruction(_)
                | EngineError::SmokeTest(_)
                | EngineError::NotReady
        )
    }

    /// Short machine-readable name
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingArtifact { .. } => "missing_artifact",
            EngineError::Download(_) => "download_failed",
            EngineError::EngineConstruction(_) => "engine_construction_failed",
            EngineError::SmokeTest(_) => "smoke_test_failed",
            EngineError::Timeout(_) => "timeout",
            EngineError::ResourceExhausted(_) => "resource_exhausted",
            EngineError::FaultSuspected(_) => "fault_suspected",
            EngineError::Inference(_) => "inference_failed",
            EngineError::NotReady => "not_ready",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact_is_fatal() {
        let err = EngineError::MissingArtifact {
            path: PathBuf::from("/models/m.gguf"),
        };
        assert!(!err.is_retryable());
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "Model file not found at /models/m.gguf and no model URL configured"
        );
    }

    #[test]
    fn test_init_failures_are_retryable() {
        assert!(EngineError::Download("503".into()).is_retryable());
        assert!(EngineError::EngineConstruction("bad magic".into()).is_retryable());
        assert!(EngineError::SmokeTest("empty".into()).is_retryable());
    }

    #[test]
    fn test_request_failures_are_not_unavailability() {
        assert!(!EngineError::Timeout(Duration::from_secs(1)).is_unavailable());
        assert!(!EngineError::Inference("x".into()).is_unavailable());
        assert_eq!(EngineError::ResourceExhausted("oom".into()).kind(), "resource_exhausted");
    }
}
