//! LLM inference engine
//!
//! The lifecycle manager and everything it needs to load a model, guard its
//! use and recover from failures. The llama.cpp adapter is compiled in with
//! the `llama` feature.

pub mod engine;
pub mod error;
pub mod faults;
pub mod lifecycle;
#[cfg(feature = "llama")]
pub mod llama;
pub mod pool;
pub mod prompt;
pub mod retry;

pub use engine::{Completion, EngineFactory, EngineHandle};
pub use error::EngineError;
pub use lifecycle::{EngineState, EngineStatus, LifecycleManager, ManagerConfig};
