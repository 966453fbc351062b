//! Read-through snapshot of slowly-changing reference data.
//!
//! The cache is rebuilt from the reference tables at the start of every
//! pipeline run; it is never patched incrementally. The whole load runs in
//! one REPEATABLE READ, READ ONLY transaction so a run never observes
//! another run's half-written reference data, and any failure aborts the
//! load outright: scoring against a partial snapshot is worse than failing
//! loudly.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tracing::info;

use annodex_core::{
    ConceptAffinity, Context, Error, IsaAncestor, MappedConcept, Result, TermEntry,
};

/// Memory-resident snapshot of contexts, terms, concept ownership, is-a
/// closure edges and cross-ontology mappings.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    contexts: HashMap<i64, Context>,
    terms: HashMap<i64, TermEntry>,
    concept_ontology: HashMap<i64, i64>,
    isa_ancestors: HashMap<i64, Vec<IsaAncestor>>,
    mappings: HashMap<i64, Vec<MappedConcept>>,
    loaded_at_utc: Option<DateTime<Utc>>,
}

impl ReferenceCache {
    /// Look up a context by id.
    pub fn context(&self, context_id: i64) -> Option<&Context> {
        self.contexts.get(&context_id)
    }

    /// Look up a term by id.
    pub fn term(&self, term_id: i64) -> Option<&TermEntry> {
        self.terms.get(&term_id)
    }

    /// The ontology a concept belongs to.
    pub fn concept_ontology(&self, concept_id: i64) -> Option<i64> {
        self.concept_ontology.get(&concept_id).copied()
    }

    /// All is-a ancestors of a concept, with their closure distance.
    pub fn ancestors(&self, concept_id: i64) -> &[IsaAncestor] {
        self.isa_ancestors
            .get(&concept_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All cross-ontology mappings of a concept.
    pub fn mappings(&self, concept_id: i64) -> &[MappedConcept] {
        self.mappings
            .get(&concept_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// When this snapshot was taken, if it came from the database.
    pub fn loaded_at_utc(&self) -> Option<DateTime<Utc>> {
        self.loaded_at_utc
    }

    /// Number of contexts in the snapshot.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Number of terms in the snapshot.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Number of concepts with at least one is-a ancestor.
    pub fn expandable_concept_count(&self) -> usize {
        self.isa_ancestors.len()
    }
}

/// Builder for assembling a [`ReferenceCache`] by hand, used by the
/// snapshot loader and by engine tests that run without a database.
#[derive(Debug, Default)]
pub struct ReferenceCacheBuilder {
    cache: ReferenceCache,
}

impl ReferenceCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(mut self, context: Context) -> Self {
        self.cache.contexts.insert(context.id, context);
        self
    }

    pub fn term(mut self, term: TermEntry) -> Self {
        self.cache.terms.insert(term.id, term);
        self
    }

    pub fn concept(mut self, concept_id: i64, ontology_id: i64) -> Self {
        self.cache.concept_ontology.insert(concept_id, ontology_id);
        self
    }

    pub fn isa_edge(mut self, concept_id: i64, parent_concept_id: i64, level: i32) -> Self {
        self.cache
            .isa_ancestors
            .entry(concept_id)
            .or_default()
            .push(IsaAncestor {
                parent_concept_id,
                level,
            });
        self
    }

    pub fn mapping(mut self, concept_id: i64, mapped_concept_id: i64, mapping_type: &str) -> Self {
        self.cache
            .mappings
            .entry(concept_id)
            .or_default()
            .push(MappedConcept {
                mapped_concept_id,
                mapping_type: mapping_type.to_string(),
            });
        self
    }

    pub fn loaded_at(mut self, at: DateTime<Utc>) -> Self {
        self.cache.loaded_at_utc = Some(at);
        self
    }

    pub fn build(self) -> ReferenceCache {
        self.cache
    }
}

/// PostgreSQL loader for the reference snapshot.
pub struct PgReferenceRepository {
    pool: Pool<Postgres>,
}

impl PgReferenceRepository {
    /// Create a new PgReferenceRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Load a consistent snapshot of all reference tables.
    ///
    /// Every failure maps to [`Error::ReferenceLoad`]; callers must treat
    /// that as fatal for the run.
    pub async fn load_snapshot(&self) -> Result<ReferenceCache> {
        let start = Instant::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::ReferenceLoad(format!("begin snapshot transaction: {e}")))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::ReferenceLoad(format!("set snapshot isolation: {e}")))?;

        let mut builder = ReferenceCacheBuilder::new().loaded_at(Utc::now());

        let rows = sqlx::query(
            "SELECT id, resource_id, name, weight, affinity, ontology_id FROM context",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| Error::ReferenceLoad(format!("contexts: {e}")))?;
        for row in rows {
            let affinity_kind: String = row.get("affinity");
            let affinity = ConceptAffinity::from_parts(&affinity_kind, row.get("ontology_id"))
                .map_err(|e| Error::ReferenceLoad(format!("context affinity: {e}")))?;
            builder = builder.context(Context {
                id: row.get("id"),
                resource_id: row.get("resource_id"),
                name: row.get("name"),
                weight: row.get("weight"),
                affinity,
            });
        }

        let rows = sqlx::query("SELECT id, concept_id, is_preferred FROM term")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| Error::ReferenceLoad(format!("terms: {e}")))?;
        for row in rows {
            builder = builder.term(TermEntry {
                id: row.get("id"),
                concept_id: row.get("concept_id"),
                is_preferred: row.get("is_preferred"),
            });
        }

        let rows = sqlx::query("SELECT id, ontology_id FROM concept")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| Error::ReferenceLoad(format!("concepts: {e}")))?;
        for row in rows {
            builder = builder.concept(row.get("id"), row.get("ontology_id"));
        }

        let rows = sqlx::query("SELECT concept_id, parent_concept_id, level FROM isa_edge")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| Error::ReferenceLoad(format!("isa edges: {e}")))?;
        for row in rows {
            builder = builder.isa_edge(
                row.get("concept_id"),
                row.get("parent_concept_id"),
                row.get("level"),
            );
        }

        let rows =
            sqlx::query("SELECT concept_id, mapped_concept_id, mapping_type FROM concept_mapping")
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| Error::ReferenceLoad(format!("concept mappings: {e}")))?;
        for row in rows {
            let mapping_type: String = row.get("mapping_type");
            builder = builder.mapping(
                row.get("concept_id"),
                row.get("mapped_concept_id"),
                &mapping_type,
            );
        }

        tx.commit()
            .await
            .map_err(|e| Error::ReferenceLoad(format!("commit snapshot read: {e}")))?;

        let cache = builder.build();
        info!(
            subsystem = "db",
            component = "reference_cache",
            op = "load_snapshot",
            context_count = cache.context_count(),
            term_count = cache.term_count(),
            expandable_concepts = cache.expandable_concept_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Reference snapshot loaded"
        );
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_lookups() {
        let cache = ReferenceCache::default();
        assert!(cache.context(1).is_none());
        assert!(cache.term(1).is_none());
        assert!(cache.ancestors(1).is_empty());
        assert!(cache.mappings(1).is_empty());
        assert!(cache.loaded_at_utc().is_none());
    }

    #[test]
    fn test_builder_assembles_lookups() {
        let cache = ReferenceCacheBuilder::new()
            .context(Context {
                id: 1,
                resource_id: 1,
                name: "title".to_string(),
                weight: 2.0,
                affinity: ConceptAffinity::FreeText,
            })
            .term(TermEntry {
                id: 10,
                concept_id: 20,
                is_preferred: true,
            })
            .concept(20, 3)
            .isa_edge(20, 21, 1)
            .isa_edge(20, 22, 2)
            .mapping(20, 30, "exact")
            .build();

        assert_eq!(cache.context(1).unwrap().weight, 2.0);
        assert!(cache.term(10).unwrap().is_preferred);
        assert_eq!(cache.concept_ontology(20), Some(3));
        assert_eq!(cache.ancestors(20).len(), 2);
        assert_eq!(cache.mappings(20).len(), 1);
        assert_eq!(cache.mappings(20)[0].mapping_type, "exact");
        assert_eq!(cache.expandable_concept_count(), 1);
    }
}
