//! Configuration types
//!
//! Engine construction options derived from the persisted settings.

use serde::{Deserialize, Serialize};

/// Options handed to the engine factory when loading a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Context window size in tokens
    pub context_length: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// CPU threads used for evaluation
    pub threads: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            context_length: 2048,
            gpu_layers: 35,
            threads: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = EngineOptions::default();
        assert_eq!(options.context_length, 2048);
        assert_eq!(options.gpu_layers, 35);
        assert_eq!(options.threads, 8);
    }

    #[test]
    fn test_options_serialization() {
        let options = EngineOptions::default();
        let json = serde_json::to_string(&options).expect("Failed to serialize");
        let deserialized: EngineOptions = serde_json::from_str(&json).expect("Failed to deserialize");
        assert_eq!(options, deserialized);
    }
}
