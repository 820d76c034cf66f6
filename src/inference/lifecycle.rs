//! Engine lifecycle manager
//!
//! Owns the one engine handle of the process. Initialization (fetch the
//! artifact, load it, smoke-test it) is single-flight: the caller that finds
//! the engine `Uninitialized` starts a background attempt, and every caller,
//! including that one, waits on the same watch channel for the outcome.
//!
//! State moves `Uninitialized -> Initializing -> Ready | Failed`. A failed
//! attempt is retried with exponential backoff until the retry budget is
//! spent, after which `Failed` is latched until [`LifecycleManager::reset`].
//! Every reset bumps an epoch so an attempt that was running across the reset
//! can neither install its handle nor overwrite the new state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};

use crate::inference::engine::{EngineFactory, EngineHandle};
use crate::inference::error::EngineError;
use crate::inference::faults::{classify, FailureClass};
use crate::inference::pool::{PoolError, WorkerPool};
use crate::inference::prompt::RenderedPrompt;
use crate::inference::retry::RetryPolicy;
use crate::storage::artifact::ArtifactFetcher;
use crate::storage::settings::Settings;
use crate::system::resources::get_resource_usage;
use crate::types::config::EngineOptions;
use crate::types::generation::{GenerationRequest, GenerationResult, SamplingParams, Usage};

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(EngineError),
}

impl EngineState {
    /// Collapsed label used by the health endpoints
    pub fn label(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "starting",
            EngineState::Initializing => "initializing",
            EngineState::Ready => "ready",
            EngineState::Failed(_) => "error",
        }
    }
}

/// Point-in-time view of the manager for health reporting
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Failed attempts in the current initialization episode
    pub attempts: u32,
    /// Most recent initialization error, kept while retrying
    pub last_error: Option<EngineError>,
}

/// Everything the manager needs from the settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub model_path: PathBuf,
    pub model_url: Option<String>,
    pub engine: EngineOptions,
    pub sampling: SamplingParams,
    pub retry: RetryPolicy,
    pub workers: usize,
}

impl From<&Settings> for ManagerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            model_path: settings.model_path.clone(),
            model_url: settings.model_url.clone(),
            engine: settings.engine_options(),
            sampling: settings.sampling_defaults(),
            retry: settings.retry_policy(),
            workers: settings.inference_workers,
        }
    }
}

/// Parameters of the post-load smoke test
const SMOKE_TEST_PROMPT: &str = "Hello";
const SMOKE_TEST_PARAMS: SamplingParams = SamplingParams {
    max_tokens: 1,
    temperature: 0.0,
    top_p: 1.0,
    top_k: 1,
    repeat_penalty: 1.0,
};

struct Slot {
    state: EngineState,
    handle: Option<Arc<dyn EngineHandle>>,
    attempts: u32,
    last_error: Option<EngineError>,
    epoch: u64,
}

struct Inner {
    config: ManagerConfig,
    fetcher: Arc<dyn ArtifactFetcher>,
    factory: Arc<dyn EngineFactory>,
    pool: WorkerPool,
    slot: watch::Sender<Slot>,
    init_lock: Mutex<()>,
}

/// Owner of the engine handle
///
/// Cheap to clone; all clones share the same engine.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    pub fn new(
        config: ManagerConfig,
        fetcher: Arc<dyn ArtifactFetcher>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        let (slot, _) = watch::channel(Slot {
            state: EngineState::Uninitialized,
            handle: None,
            attempts: 0,
            last_error: None,
            epoch: 0,
        });
        let pool = WorkerPool::new(config.workers);
        Self {
            inner: Arc::new(Inner {
                config,
                fetcher,
                factory,
                pool,
                slot,
                init_lock: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.slot.borrow().state.clone()
    }

    pub fn status(&self) -> EngineStatus {
        let slot = self.inner.slot.borrow();
        EngineStatus {
            state: slot.state.clone(),
            attempts: slot.attempts,
            last_error: slot.last_error.clone(),
        }
    }

    /// Bring the engine to `Ready`, or report why it can't be
    ///
    /// Returns at once when `Ready` or latched `Failed`. Otherwise joins the
    /// in-flight initialization, starting one if none is running.
    pub async fn ensure_ready(&self) -> Result<(), EngineError> {
        loop {
            let mut rx = self.inner.slot.subscribe();

            let mut started = None;
            self.inner.slot.send_if_modified(|slot| {
                if slot.state == EngineState::Uninitialized {
                    slot.state = EngineState::Initializing;
                    started = Some(slot.epoch);
                    true
                } else {
                    false
                }
            });

            if let Some(epoch) = started {
                tracing::info!(epoch, "Starting model initialization");
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.run_initialization(epoch).await });
            }

            let outcome = {
                let slot = rx
                    .wait_for(|slot| slot.state != EngineState::Initializing)
                    .await
                    .map_err(|_| EngineError::NotReady)?;
                slot.state.clone()
            };

            match outcome {
                EngineState::Ready => return Ok(()),
                EngineState::Failed(err) => return Err(err),
                // reset() landed while we were waiting; start over
                EngineState::Uninitialized | EngineState::Initializing => continue,
            }
        }
    }

    /// Run one completion against the ready engine
    ///
    /// `timeout` bounds the caller's wait for the native call, not the
    /// call itself: a timed-out completion keeps running on its worker
    /// until it finishes on its own.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        timeout: Duration,
    ) -> Result<GenerationResult, EngineError> {
        self.ensure_ready().await?;

        let (handle, epoch) = {
            let slot = self.inner.slot.borrow();
            match (&slot.state, &slot.handle) {
                (EngineState::Ready, Some(handle)) => (handle.clone(), slot.epoch),
                _ => return Err(EngineError::NotReady),
            }
        };

        let prompt = RenderedPrompt::render(&request.input);
        let params = request.sampling(&self.inner.config.sampling);

        let job_handle = handle.clone();
        let job_prompt = prompt.clone();
        let started = Instant::now();
        let job = self
            .inner
            .pool
            .run(move || job_handle.complete(&job_prompt, &params));

        match tokio::time::timeout(timeout, job).await {
            Err(_) => {
                tracing::warn!(
                    "Generation exceeded {:?}; the engine call continues in the background",
                    timeout
                );
                Err(EngineError::Timeout(timeout))
            }
            Ok(Err(PoolError::Panicked(message))) => {
                tracing::error!("Engine call panicked: {}", message);
                self.reset_epoch(epoch);
                Err(EngineError::FaultSuspected(message))
            }
            Ok(Err(PoolError::Closed)) => Err(EngineError::NotReady),
            Ok(Ok(Ok(completion))) => {
                tracing::debug!(
                    "Generated {} tokens in {:?}",
                    completion.completion_tokens,
                    started.elapsed()
                );
                Ok(GenerationResult {
                    text: prompt.finish(&completion.text),
                    usage: Usage::new(completion.prompt_tokens, completion.completion_tokens),
                })
            }
            Ok(Ok(Err(err))) => Err(self.recover_from(err, handle.as_ref(), epoch)),
        }
    }

    /// Drop the engine and return to `Uninitialized`
    pub fn reset(&self) {
        let mut released = None;
        self.inner.slot.send_modify(|slot| released = clear_slot(slot));
        log_reset(released);
    }

    /// Reset only if no other reset happened since `epoch`
    fn reset_epoch(&self, epoch: u64) {
        let mut released = None;
        let reset = self.inner.slot.send_if_modified(|slot| {
            if slot.epoch != epoch {
                return false;
            }
            released = clear_slot(slot);
            true
        });
        if reset {
            log_reset(released);
        }
    }

    fn recover_from(&self, err: EngineError, handle: &dyn EngineHandle, epoch: u64) -> EngineError {
        let message = match &err {
            EngineError::Inference(message) => message.clone(),
            other => other.to_string(),
        };

        match classify(&message) {
            FailureClass::Fault => {
                tracing::error!("Engine fault suspected, resetting: {}", message);
                self.reset_epoch(epoch);
                EngineError::FaultSuspected(message)
            }
            FailureClass::ResourceExhausted => {
                tracing::warn!("Engine out of resources: {}", message);
                reclaim_memory(handle);
                EngineError::ResourceExhausted(message)
            }
            FailureClass::Other => {
                tracing::warn!("Generation failed: {}", message);
                err
            }
        }
    }
}

/// Start a new epoch with no engine, handing back the old handle
fn clear_slot(slot: &mut Slot) -> Option<Arc<dyn EngineHandle>> {
    slot.epoch += 1;
    slot.state = EngineState::Uninitialized;
    slot.attempts = 0;
    slot.last_error = None;
    slot.handle.take()
}

fn log_reset(released: Option<Arc<dyn EngineHandle>>) {
    tracing::info!(
        "Engine reset{}",
        if released.is_some() { ", model unloaded" } else { "" }
    );
    // Dropped outside the watch lock; this may unload the model.
    drop(released);
}

impl Inner {
    fn current_epoch(&self) -> u64 {
        self.slot.borrow().epoch
    }

    async fn run_initialization(self: Arc<Self>, epoch: u64) {
        let _exclusive = self.init_lock.lock().await;
        let mut guard = AttemptGuard {
            slot: &self.slot,
            epoch,
            armed: true,
        };

        let mut failures = 0u32;
        loop {
            if self.current_epoch() != epoch {
                tracing::debug!(epoch, "Initialization superseded by reset");
                guard.disarm();
                return;
            }

            let started = Instant::now();
            match self.initialize_once().await {
                Ok(handle) => {
                    let installed = self.slot.send_if_modified(|slot| {
                        if slot.epoch != epoch {
                            return false;
                        }
                        slot.state = EngineState::Ready;
                        slot.handle = Some(handle.clone());
                        slot.attempts = 0;
                        slot.last_error = None;
                        true
                    });
                    if installed {
                        tracing::info!("Model ready after {:?}", started.elapsed());
                    } else {
                        tracing::debug!(epoch, "Discarding model loaded across a reset");
                    }
                    guard.disarm();
                    return;
                }
                Err(err) => {
                    failures += 1;
                    let delay = if err.is_retryable() {
                        self.config.retry.delay_for(failures)
                    } else {
                        None
                    };

                    let current = self.slot.send_if_modified(|slot| {
                        if slot.epoch != epoch {
                            return false;
                        }
                        slot.attempts = failures;
                        slot.last_error = Some(err.clone());
                        if delay.is_none() {
                            slot.state = EngineState::Failed(err.clone());
                            true
                        } else {
                            false
                        }
                    });
                    if !current && self.current_epoch() != epoch {
                        guard.disarm();
                        return;
                    }

                    match delay {
                        Some(delay) => {
                            tracing::warn!(
                                "Initialization attempt {} failed: {}; retrying in {:?}",
                                failures,
                                err,
                                delay
                            );
                            let mut rx = self.slot.subscribe();
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = rx.wait_for(|slot| slot.epoch != epoch) => {
                                    tracing::debug!(epoch, "Backoff cut short by reset");
                                    guard.disarm();
                                    return;
                                }
                            }
                        }
                        None => {
                            tracing::error!(
                                "Initialization failed after {} attempt(s): {}",
                                failures,
                                err
                            );
                            guard.disarm();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Fetch, load and smoke-test once
    async fn initialize_once(&self) -> Result<Arc<dyn EngineHandle>, EngineError> {
        let artifact = self
            .fetcher
            .ensure(&self.config.model_path, self.config.model_url.as_deref())
            .await?;

        tracing::info!(
            "Loading {} (context {}, gpu layers {}, threads {})",
            artifact.display_name(),
            self.config.engine.context_length,
            self.config.engine.gpu_layers,
            self.config.engine.threads
        );

        let factory = self.factory.clone();
        let options = self.config.engine;
        tokio::task::spawn_blocking(move || -> Result<Arc<dyn EngineHandle>, EngineError> {
            let handle = factory.load(&artifact, &options)?;
            let smoke = RenderedPrompt::instruction(SMOKE_TEST_PROMPT);
            match handle.complete(&smoke, &SMOKE_TEST_PARAMS) {
                Ok(_) => Ok(Arc::from(handle)),
                // `handle` is dropped here, before the error is reported
                Err(e) => Err(EngineError::SmokeTest(e.to_string())),
            }
        })
        .await
        .map_err(|e| EngineError::EngineConstruction(format!("Model loader crashed: {}", e)))?
    }
}

/// Latches `Failed` if an initialization attempt ends without reporting,
/// e.g. when its task is cancelled at runtime shutdown or panics.
struct AttemptGuard<'a> {
    slot: &'a watch::Sender<Slot>,
    epoch: u64,
    armed: bool,
}

impl AttemptGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let epoch = self.epoch;
        self.slot.send_if_modified(|slot| {
            if slot.epoch != epoch || slot.state != EngineState::Initializing {
                return false;
            }
            tracing::error!("Initialization abandoned");
            slot.handle = None;
            slot.state = EngineState::Failed(EngineError::EngineConstruction(
                "initialization was abandoned".to_string(),
            ));
            true
        });
    }
}

/// Best-effort memory reclamation after an exhaustion failure
fn reclaim_memory(handle: &dyn EngineHandle) {
    let before = get_resource_usage();
    handle.reclaim();
    let after = get_resource_usage();
    if before.is_known() && after.is_known() {
        tracing::info!(
            "Memory reclamation: {} MB -> {} MB used of {} MB",
            before.ram_used_mb,
            after.ram_used_mb,
            after.ram_total_mb
        );
    }
}
