//! llama.cpp engine adapter
//!
//! Wraps `llama-cpp-2`. The backend is initialized once per process; each
//! completion gets a fresh context so nothing but the weights outlives a call.

use std::num::NonZeroU32;
use std::time::{SystemTime, UNIX_EPOCH};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::DecodeError;
use once_cell::sync::OnceCell;

use crate::inference::engine::{Completion, EngineFactory, EngineHandle};
use crate::inference::error::EngineError;
use crate::inference::prompt::RenderedPrompt;
use crate::types::config::EngineOptions;
use crate::types::generation::SamplingParams;
use crate::types::model::ModelArtifact;

/// Tokens considered by the repeat penalty
const PENALTY_LAST_N: i32 = 64;

static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    BACKEND.get_or_try_init(|| {
        LlamaBackend::init().map_err(|e| {
            EngineError::EngineConstruction(format!("Failed to initialize llama backend: {}", e))
        })
    })
}

/// Loads GGUF models through llama.cpp
#[derive(Debug, Default)]
pub struct LlamaEngineFactory;

impl EngineFactory for LlamaEngineFactory {
    fn load(
        &self,
        artifact: &ModelArtifact,
        options: &EngineOptions,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        let backend = backend()?;
        let params = LlamaModelParams::default().with_n_gpu_layers(options.gpu_layers);

        let model = LlamaModel::load_from_file(backend, &artifact.path, &params).map_err(|e| {
            EngineError::EngineConstruction(format!("{}: {}", artifact.path.display(), e))
        })?;

        tracing::info!(
            "Loaded {} ({} parameters, trained context {})",
            artifact.display_name(),
            model.n_params(),
            model.n_ctx_train()
        );

        Ok(Box::new(LlamaHandle {
            model,
            options: *options,
        }))
    }
}

/// A loaded llama.cpp model
///
/// Keeps the default no-op `reclaim`: the KV cache and compute buffers live
/// in the per-call context, which is already dropped by the time an
/// exhaustion error reaches the manager. Only the weights remain.
pub struct LlamaHandle {
    model: LlamaModel,
    options: EngineOptions,
}

impl LlamaHandle {
    fn sampler(params: &SamplingParams) -> LlamaSampler {
        let penalties =
            LlamaSampler::penalties(PENALTY_LAST_N, params.repeat_penalty, 0.0, 0.0);
        if params.temperature <= 0.0 {
            return LlamaSampler::chain_simple([penalties, LlamaSampler::greedy()]);
        }
        LlamaSampler::chain_simple([
            penalties,
            LlamaSampler::top_k(params.top_k as i32),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(seed()),
        ])
    }
}

fn seed() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0)
}

fn decode_error(stage: &str, e: DecodeError) -> EngineError {
    match e {
        DecodeError::NoKvCacheSlot => EngineError::Inference(format!(
            "{}: failed to find a free slot in the KV cache",
            stage
        )),
        other => EngineError::Inference(format!("{}: {}", stage, other)),
    }
}

impl EngineHandle for LlamaHandle {
    fn complete(
        &self,
        prompt: &RenderedPrompt,
        params: &SamplingParams,
    ) -> Result<Completion, EngineError> {
        let backend = backend()?;
        let n_ctx = self.options.context_length;
        let threads = self.options.threads as i32;

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx)
            .with_n_threads(threads)
            .with_n_threads_batch(threads);
        let mut ctx = self
            .model
            .new_context(backend, ctx_params)
            .map_err(|e| EngineError::Inference(format!("failed to allocate context: {}", e)))?;

        let tokens = self
            .model
            .str_to_token(&prompt.text, AddBos::Always)
            .map_err(|e| EngineError::Inference(format!("Failed to tokenize prompt: {}", e)))?;
        let prompt_tokens = tokens.len() as u32;
        if prompt_tokens >= n_ctx {
            return Err(EngineError::Inference(format!(
                "Prompt of {} tokens does not fit the {} token context",
                prompt_tokens, n_ctx
            )));
        }
        let budget = params.max_tokens.min(n_ctx - prompt_tokens);

        let mut batch = LlamaBatch::new(n_ctx as usize, 1);
        let last = tokens.len() as i32 - 1;
        for (pos, token) in (0_i32..).zip(tokens.iter()) {
            batch
                .add(*token, pos, &[0], pos == last)
                .map_err(|e| EngineError::Inference(format!("Failed to batch prompt: {}", e)))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| decode_error("Failed to decode prompt", e))?;

        let mut sampler = Self::sampler(params);
        let mut output: Vec<u8> = Vec::new();
        let mut position = batch.n_tokens();
        let mut generated = 0u32;

        while generated < budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                break;
            }
            generated += 1;

            let piece = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| EngineError::Inference(format!("Failed to detokenize: {}", e)))?;
            output.extend_from_slice(&piece);
            if prompt.hits_stop(&String::from_utf8_lossy(&output)) {
                break;
            }

            batch.clear();
            batch
                .add(token, position, &[0], true)
                .map_err(|e| EngineError::Inference(format!("Failed to batch token: {}", e)))?;
            position += 1;
            ctx.decode(&mut batch)
                .map_err(|e| decode_error("Failed to decode token", e))?;
        }

        Ok(Completion {
            text: String::from_utf8_lossy(&output).into_owned(),
            prompt_tokens,
            completion_tokens: generated,
        })
    }
}
