//! System utilities
//!
//! This module provides resource monitoring used around memory reclamation.

pub mod resources;
