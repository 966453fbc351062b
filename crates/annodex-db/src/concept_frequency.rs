//! Concept frequency rollup repository.
//!
//! A derived, disposable view over the aggregation table: recompute always
//! truncates and repopulates in one transaction, so the rollup is either
//! the old consistent state or the new one, never a mix.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use tracing::info;

use annodex_core::{ConceptFrequencyRecord, ConceptFrequencyRepository, Error, Result};

/// PostgreSQL implementation of ConceptFrequencyRepository.
pub struct PgConceptFrequencyRepository {
    pool: Pool<Postgres>,
}

impl PgConceptFrequencyRepository {
    /// Create a new PgConceptFrequencyRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConceptFrequencyRepository for PgConceptFrequencyRepository {
    async fn recompute(&self) -> Result<u64> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("TRUNCATE concept_frequency")
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let result = sqlx::query(
            "INSERT INTO concept_frequency (concept_id, element_count, score_sum)
             SELECT concept_id, COUNT(DISTINCT element_id), SUM(score)
             FROM aggregation
             GROUP BY concept_id",
        )
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "concept_frequency",
            op = "recompute",
            row_count = result.rows_affected(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Concept frequency rollup rebuilt"
        );
        Ok(result.rows_affected())
    }

    async fn fetch(&self, concept_id: i64) -> Result<Option<ConceptFrequencyRecord>> {
        let row = sqlx::query(
            "SELECT concept_id, element_count, score_sum FROM concept_frequency
             WHERE concept_id = $1",
        )
        .bind(concept_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| ConceptFrequencyRecord {
            concept_id: row.get("concept_id"),
            element_count: row.get("element_count"),
            score_sum: row.get("score_sum"),
        }))
    }

    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM concept_frequency
             WHERE concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))",
        )
        .bind(ontology_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "concept_frequency",
            op = "delete_by_ontologies",
            row_count = result.rows_affected(),
            "Concept frequency rows removed for retired ontologies"
        );
        Ok(result.rows_affected())
    }
}
