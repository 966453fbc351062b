//! # annodex-pipeline
//!
//! Stage engines and per-resource orchestration for the annodex
//! annotation index.
//!
//! This crate provides:
//! - Is-a closure and cross-ontology mapping expansion
//! - Evidence aggregation with additive scoring
//! - The concept frequency rollup
//! - A sequential per-resource runner with progress events
//!
//! ## Example
//!
//! ```ignore
//! use annodex_pipeline::{AnnotationPipeline, PipelineConfig};
//! use annodex_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let pipeline = AnnotationPipeline::new(db, PipelineConfig::from_env(), resource_id, 42);
//!
//! // Listen for stage events
//! let mut events = pipeline.events();
//!
//! let summary = pipeline.run().await?;
//! println!("processed {} rows", summary.total_rows());
//! ```

pub mod aggregation;
pub mod config;
pub mod expansion;
pub mod report;
pub mod rollup;
pub mod runner;

// Re-export core types
pub use annodex_core::*;

// Re-export pipeline types
pub use aggregation::AggregationEngine;
pub use config::PipelineConfig;
pub use expansion::ExpansionEngine;
pub use report::StageReport;
pub use rollup::ConceptFrequencyRollup;
pub use runner::{AnnotationPipeline, PipelineEvent, PipelineRunner, ResourceRun, RunSummary};
