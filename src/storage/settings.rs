//! Settings storage
//!
//! Loads, validates and persists the service settings. The settings are read
//! once at startup and then handed around as a read-only value.

use crate::inference::retry::RetryPolicy;
use crate::storage::{default_model_path, get_data_dir, StorageError};
use crate::types::config::EngineOptions;
use crate::types::generation::SamplingParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Local path of the GGUF model file
    pub model_path: PathBuf,
    /// Where to download the model from when it is missing
    pub model_url: Option<String>,
    /// Context window size
    pub context_length: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// CPU threads used by the engine
    pub threads: u32,
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    pub top_p: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Penalty applied to recently generated tokens
    pub repeat_penalty: f32,
    /// Address the HTTP server binds to
    pub host: String,
    pub port: u16,
    /// Wall-clock budget for a single completion
    pub request_timeout_secs: u64,
    /// Retries after the first failed initialization attempt
    pub max_retries: u32,
    /// Backoff grows as `backoff_base ^ attempt` seconds
    pub backoff_base: f64,
    /// Size of the blocking inference worker pool
    pub inference_workers: usize,
    /// Start loading the model as soon as the server starts
    pub preload: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            model_url: None,
            context_length: 2048,
            gpu_layers: 35,
            threads: 8,
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
            repeat_penalty: 1.1,
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 120,
            max_retries: 3,
            backoff_base: 2.0,
            inference_workers: 1,
            preload: true,
        }
    }
}

impl Settings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        if self.model_path.as_os_str().is_empty() {
            self.model_path = default_model_path();
            tracing::warn!("Empty model path, using default {:?}", self.model_path);
        }

        if self
            .model_url
            .as_deref()
            .is_some_and(|url| url.trim().is_empty())
        {
            self.model_url = None;
        }

        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        if self.top_k == 0 {
            self.top_k = 40;
        }

        if self.repeat_penalty <= 0.0 {
            self.repeat_penalty = 1.0;
        }

        let valid_context_sizes = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072];
        if !valid_context_sizes.contains(&self.context_length) {
            self.context_length = *valid_context_sizes
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_length as i64).abs())
                .unwrap_or(&2048);
        }

        self.max_tokens = self.max_tokens.max(1);
        // Can't generate more than the context allows
        if self.max_tokens > self.context_length {
            self.max_tokens = self.context_length / 2;
        }

        self.threads = self.threads.max(1);
        self.inference_workers = self.inference_workers.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);

        if !self.backoff_base.is_finite() || self.backoff_base < 1.0 {
            self.backoff_base = 2.0;
        }

        if self.port == 0 {
            tracing::warn!("Port 0 is not usable, falling back to 8000");
            self.port = 8000;
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            context_length: self.context_length,
            gpu_layers: self.gpu_layers,
            threads: self.threads,
        }
    }

    /// Sampling defaults used when a request leaves a field unset
    pub fn sampling_defaults(&self) -> SamplingParams {
        SamplingParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repeat_penalty: self.repeat_penalty,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Get the default settings file path
pub fn default_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings(path: &Path) -> Settings {
    match load_settings_internal(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            let mut settings = Settings::default();
            settings.validate();
            settings
        }
    }
}

fn load_settings_internal(path: &Path) -> Result<Settings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found at {:?}, using defaults", path);
        let mut settings = Settings::default();
        settings.validate();
        return Ok(settings);
    }

    let json = fs::read_to_string(path)?;
    let mut settings: Settings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.context_length, 2048);
        assert_eq!(settings.gpu_layers, 35);
        assert_eq!(settings.threads, 8);
        assert_eq!(settings.temperature, 0.7);
        assert_eq!(settings.top_p, 0.95);
        assert_eq!(settings.top_k, 40);
        assert_eq!(settings.repeat_penalty, 1.1);
        assert_eq!(settings.port, 8000);
        assert!(settings.model_url.is_none());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();

        settings.temperature = 5.0;
        settings.top_p = 2.0;
        settings.top_k = 0;
        settings.validate();
        assert_eq!(settings.temperature, 2.0);
        assert_eq!(settings.top_p, 1.0);
        assert_eq!(settings.top_k, 40);

        settings.context_length = 3000;
        settings.validate();
        assert_eq!(settings.context_length, 2048);

        settings.max_tokens = 100_000;
        settings.validate();
        assert_eq!(settings.max_tokens, 1024);

        settings.model_url = Some("   ".to_string());
        settings.port = 0;
        settings.backoff_base = 0.5;
        settings.validate();
        assert!(settings.model_url.is_none());
        assert_eq!(settings.port, 8000);
        assert_eq!(settings.backoff_base, 2.0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"threads": 4, "model_url": "TheBloke/Llama-2-7B-GGUF/m.gguf"}"#).unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.threads, 4);
        assert_eq!(settings.context_length, 2048);
        assert_eq!(
            settings.model_url.as_deref(),
            Some("TheBloke/Llama-2-7B-GGUF/m.gguf")
        );
    }

    #[test]
    fn test_corrupted_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.port, 8000);
    }

    #[test]
    fn test_settings_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = Settings::default();
        settings.gpu_layers = 0;
        settings.model_path = PathBuf::from("/models/llama.gguf");

        save_settings(&settings, &path).unwrap();
        let loaded = load_settings(&path);

        assert_eq!(loaded.gpu_layers, 0);
        assert_eq!(loaded.model_path, PathBuf::from("/models/llama.gguf"));
    }

    #[test]
    fn test_derived_values() {
        let settings = Settings::default();
        assert_eq!(settings.request_timeout(), Duration::from_secs(120));
        assert_eq!(settings.bind_addr(), "0.0.0.0:8000");
        assert_eq!(settings.engine_options().gpu_layers, 35);
        assert_eq!(settings.sampling_defaults().max_tokens, 2048);
    }
}
