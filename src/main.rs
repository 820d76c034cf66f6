//! llamachat server entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use llamachat::inference::{EngineFactory, LifecycleManager, ManagerConfig};
use llamachat::server::{self, AppState};
use llamachat::storage::artifact::HttpArtifactFetcher;
use llamachat::storage::settings::{
    default_settings_path, load_settings, save_settings, Settings,
};

/// Chat API backed by a local llama.cpp model
#[derive(Debug, Parser)]
#[command(name = "llamachat", version)]
struct Cli {
    /// Settings file (JSON); defaults to the platform data directory
    #[arg(long, env = "SETTINGS_FILE")]
    settings_file: Option<PathBuf>,

    #[arg(long, env = "MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// URL or HuggingFace reference to download the model from
    #[arg(long, env = "MODEL_URL")]
    model_url: Option<String>,

    #[arg(long, env = "CONTEXT_LENGTH")]
    context_length: Option<u32>,

    #[arg(long, env = "GPU_LAYERS")]
    gpu_layers: Option<u32>,

    #[arg(long, env = "THREADS")]
    threads: Option<u32>,

    #[arg(long, env = "MAX_TOKENS")]
    max_tokens: Option<u32>,

    #[arg(long, env = "TEMPERATURE")]
    temperature: Option<f32>,

    #[arg(long, env = "TOP_P")]
    top_p: Option<f32>,

    #[arg(long, env = "TOP_K")]
    top_k: Option<u32>,

    #[arg(long, env = "REPEAT_PENALTY")]
    repeat_penalty: Option<f32>,

    #[arg(long, env = "HOST")]
    host: Option<String>,

    #[arg(long, env = "PORT")]
    port: Option<u16>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    #[arg(long, env = "MAX_RETRIES")]
    max_retries: Option<u32>,

    #[arg(long, env = "BACKOFF_BASE")]
    backoff_base: Option<f64>,

    #[arg(long, env = "INFERENCE_WORKERS")]
    inference_workers: Option<usize>,

    /// Load the model at startup instead of on the first request
    #[arg(long, env = "PRELOAD")]
    preload: Option<bool>,
}

impl Cli {
    /// Apply command line and environment overrides on top of the file
    fn apply(self, settings: &mut Settings) {
        macro_rules! overlay {
            ($cli:ident => $settings:ident: $($field:ident),* $(,)?) => {
                $(if let Some(value) = $cli.$field {
                    $settings.$field = value;
                })*
            };
        }
        overlay!(self => settings:
            model_path,
            context_length,
            gpu_layers,
            threads,
            max_tokens,
            temperature,
            top_p,
            top_k,
            repeat_penalty,
            host,
            port,
            request_timeout_secs,
            max_retries,
            backoff_base,
            inference_workers,
            preload,
        );
        if self.model_url.is_some() {
            settings.model_url = self.model_url;
        }
        settings.validate();
    }
}

#[cfg(feature = "llama")]
fn engine_factory() -> Result<Arc<dyn EngineFactory>, String> {
    Ok(Arc::new(llamachat::inference::llama::LlamaEngineFactory))
}

#[cfg(not(feature = "llama"))]
fn engine_factory() -> Result<Arc<dyn EngineFactory>, String> {
    Err("built without an inference backend; rebuild with `--features llama`".to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("llamachat=info,tower_http=info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("Error starting server: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings_path = match &cli.settings_file {
        Some(path) => path.clone(),
        None => default_settings_path()?,
    };
    let mut settings = load_settings(&settings_path);
    if !settings_path.exists() {
        // First start: write the defaults out so there is a file to edit
        match save_settings(&settings, &settings_path) {
            Ok(()) => tracing::info!("Wrote default settings to {:?}", settings_path),
            Err(e) => tracing::warn!("Could not write default settings: {}", e),
        }
    }
    cli.apply(&mut settings);

    tracing::info!("Model path: {:?}", settings.model_path);
    tracing::info!("Model URL: {:?}", settings.model_url);
    tracing::info!(
        "Context length {}, GPU layers {}, threads {}",
        settings.context_length,
        settings.gpu_layers,
        settings.threads
    );

    let factory = engine_factory()?;
    let fetcher = Arc::new(HttpArtifactFetcher::new()?);
    let manager = LifecycleManager::new(ManagerConfig::from(&settings), fetcher, factory);

    if settings.preload {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.ensure_ready().await {
                tracing::error!("Model preload failed: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(settings.bind_addr()).await?;
    let state = AppState::new(manager, settings.request_timeout());
    server::serve(listener, state).await?;
    Ok(())
}
