//! llamachat library
//!
//! Chat HTTP service backed by a locally loaded llama.cpp model.

pub mod inference;
pub mod server;
pub mod storage;
pub mod system;
pub mod types;
