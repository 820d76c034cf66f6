//! Shared type definitions
//!
//! This module contains the data types passed between the HTTP layer, the
//! lifecycle manager and the inference engine.

pub mod config;
pub mod generation;
pub mod message;
pub mod model;
