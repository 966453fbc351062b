//! Default values shared across the annodex crates.
//!
//! Scoring weights carry the canonical values used when an orchestrator
//! does not supply its own profile; the batch sizes are sized for the
//! millions-of-rows workloads the pipeline is built for.

/// Weight of a tagger hit on a concept's preferred term.
pub const PREFERRED_TERM_WEIGHT: f64 = 10.0;

/// Weight of an externally reported hit.
pub const REPORTED_WEIGHT: f64 = 8.0;

/// Weight of a tagger hit on a synonym.
pub const SYNONYM_WEIGHT: f64 = 7.0;

/// Weight of a cross-ontology mapping expansion.
pub const MAPPING_WEIGHT: f64 = 7.0;

/// Exponential decay rate over is-a distance.
pub const ISA_DECAY_FACTOR: f64 = 0.2;

/// Context weight when a resource's structure does not specify one.
pub const CONTEXT_WEIGHT: f64 = 1.0;

/// Rows consumed per stage-transition transaction.
pub const PIPELINE_BATCH_SIZE: i64 = 5_000;

/// Rows per INSERT batch during a bulk hit-file load.
pub const BULK_LOAD_CHUNK_SIZE: usize = 2_000;

/// Capacity of the pipeline event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;
