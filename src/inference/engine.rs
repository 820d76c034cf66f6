//! Engine handle abstraction
//!
//! The lifecycle manager only ever talks to the native engine through these
//! two traits, so tests can substitute scripted engines.

use crate::inference::error::EngineError;
use crate::inference::prompt::RenderedPrompt;
use crate::types::config::EngineOptions;
use crate::types::generation::SamplingParams;
use crate::types::model::ModelArtifact;

/// Raw output of one native completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A loaded model
///
/// `complete` blocks the calling thread for the whole generation and must
/// only be called from the inference worker pool.
pub trait EngineHandle: Send + Sync {
    fn complete(
        &self,
        prompt: &RenderedPrompt,
        params: &SamplingParams,
    ) -> Result<Completion, EngineError>;

    /// Release whatever memory the engine can give back without unloading.
    fn reclaim(&self) {}
}

/// Builds engine handles from a local artifact
pub trait EngineFactory: Send + Sync {
    /// Blocking; loads the weights.
    fn load(
        &self,
        artifact: &ModelArtifact,
        options: &EngineOptions,
    ) -> Result<Box<dyn EngineHandle>, EngineError>;
}
