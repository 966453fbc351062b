//! Core traits for annodex abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability. Repositories take
//! their connection handle at construction rather than holding hidden
//! shared state, so test doubles can stand in anywhere.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// DIRECT EVIDENCE STORE
// =============================================================================

/// Store of first-order annotation evidence.
#[async_trait]
pub trait DirectAnnotationRepository: Send + Sync {
    /// Record one tagger hit. Returns whether a row was actually added:
    /// a duplicate of an existing evidence tuple is silently rejected, and
    /// any other failure is logged and reported as `false` rather than
    /// raised.
    #[allow(clippy::too_many_arguments)]
    async fn add_tagger_hit(
        &self,
        element_id: i64,
        concept_id: i64,
        context_id: i64,
        term_id: i64,
        span_from: i32,
        span_to: i32,
        dictionary_version: i64,
    ) -> bool;

    /// Record one externally reported hit (no term, no span). Same
    /// duplicate semantics as [`add_tagger_hit`](Self::add_tagger_hit).
    async fn add_reported_hit(
        &self,
        element_id: i64,
        concept_id: i64,
        context_id: i64,
        dictionary_version: i64,
    ) -> bool;

    /// Ingest a tagger hit file in one pass. Returns rows actually added.
    async fn bulk_load(&self, path: &Path, dictionary_version: i64) -> Result<u64>;

    /// Count rows currently at the given stage.
    async fn count_at_stage(&self, stage: DirectStage) -> Result<i64>;

    /// Remove all rows whose concept belongs to one of the given
    /// ontologies, at any stage. Returns rows removed.
    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64>;

    /// Remove all rows whose concept belongs to the given ontology.
    async fn delete_by_ontology(&self, ontology_id: i64) -> Result<u64> {
        self.delete_by_ontologies(&[ontology_id]).await
    }
}

// =============================================================================
// AGGREGATION STORE
// =============================================================================

/// Store of cumulative (element, concept) scores.
#[async_trait]
pub trait AggregationRepository: Send + Sync {
    /// Current row count, for progress tracking.
    async fn number_of_entries(&self) -> Result<i64>;

    /// Fetch the record for one (element, concept) pair, if present.
    async fn fetch(&self, element_id: i64, concept_id: i64) -> Result<Option<AggregationRecord>>;

    /// Remove all rows whose concept belongs to one of the given
    /// ontologies. Returns rows removed.
    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64>;

    /// Remove all rows whose concept belongs to the given ontology.
    async fn delete_by_ontology(&self, ontology_id: i64) -> Result<u64> {
        self.delete_by_ontologies(&[ontology_id]).await
    }
}

// =============================================================================
// CONCEPT FREQUENCY STORE
// =============================================================================

/// Derived per-concept rollup over the aggregation table.
#[async_trait]
pub trait ConceptFrequencyRepository: Send + Sync {
    /// Truncate and fully repopulate the rollup from the aggregation
    /// table. Returns concepts written.
    async fn recompute(&self) -> Result<u64>;

    /// Fetch the rollup row for one concept, if present.
    async fn fetch(&self, concept_id: i64) -> Result<Option<ConceptFrequencyRecord>>;

    /// Remove all rows for concepts of the given ontologies. Returns rows
    /// removed.
    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64>;

    /// Remove the rollup rows of one ontology's concepts.
    async fn delete_by_ontology(&self, ontology_id: i64) -> Result<u64> {
        self.delete_by_ontologies(&[ontology_id]).await
    }
}

// =============================================================================
// ELEMENT & STRUCTURE REGISTRATION
// =============================================================================

/// Input boundary for content producers: element identity resolution and
/// resource structure registration.
#[async_trait]
pub trait ElementRepository: Send + Sync {
    /// Resolve (resource, local element id) to the internal id, creating
    /// the element on first sight.
    async fn resolve(&self, resource_id: i64, local_id: &str) -> Result<i64>;

    /// Register or update the context slots of a resource's schema.
    /// Returns the contexts as stored.
    async fn register_structure(
        &self,
        resource_id: i64,
        contexts: &[ContextSpec],
    ) -> Result<Vec<Context>>;
}
