//! # annodex-core
//!
//! Core types, traits, and abstractions for the annodex annotation index.
//!
//! This crate provides the foundational data structures, the pure scoring
//! functions, and the repository trait definitions that the other annodex
//! crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod scoring;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use scoring::{
    direct_contribution, isa_contribution, mapping_contribution, DirectEvidenceKind,
};
pub use traits::*;
