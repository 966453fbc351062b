//! Structured logging schema and field name constants for annodex.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A resource run was abandoned, requires operator attention |
//! | WARN  | Recoverable issue (transient retry, skipped record) |
//! | INFO  | Stage completions with row counts and timings |
//! | DEBUG | Batch-level decisions and intermediate counts |
//! | TRACE | Per-row data (individual hits, contributions) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "pipeline"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "reference_cache", "expansion", "aggregation", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "isa_closure_expansion", "aggregate_direct", "recompute"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Resource whose pipeline run the event belongs to.
pub const RESOURCE_ID: &str = "resource_id";

/// Element being operated on.
pub const ELEMENT_ID: &str = "element_id";

/// Concept being operated on.
pub const CONCEPT_ID: &str = "concept_id";

/// Ontology affected by a deletion cascade.
pub const ONTOLOGY_ID: &str = "ontology_id";

/// Workflow stage a batch was consumed from.
pub const STAGE: &str = "stage";

/// Reference-data snapshot stamp in use.
pub const DICTIONARY_VERSION: &str = "dictionary_version";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Rows processed by a stage-transition or rollup operation.
pub const ROW_COUNT: &str = "row_count";

/// Rows per stage-transition transaction.
pub const BATCH_SIZE: &str = "batch_size";

/// Lines skipped during a bulk hit-file load.
pub const SKIPPED_COUNT: &str = "skipped_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
