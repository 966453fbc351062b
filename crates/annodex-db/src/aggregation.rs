//! Aggregation repository: one cumulative score per (element, concept).
//!
//! Scores merge additively: a new contribution is always added to the
//! existing score, never replaces it. The only way a score goes away is
//! the explicit ontology deletion cascade.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::info;

use annodex_core::{AggregationRecord, AggregationRepository, Error, Result};

/// One scoring contribution bound for the aggregation table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub element_id: i64,
    pub concept_id: i64,
    pub score: f64,
}

/// PostgreSQL implementation of AggregationRepository.
pub struct PgAggregationRepository {
    pool: Pool<Postgres>,
}

impl PgAggregationRepository {
    /// Create a new PgAggregationRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Additively upsert a batch of contributions within the enclosing
    /// transaction. Callers pre-merge duplicates of the same key: the
    /// statement touches each (element, concept) row at most once.
    pub async fn upsert_contributions_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        contributions: &[Contribution],
    ) -> Result<u64> {
        if contributions.is_empty() {
            return Ok(0);
        }
        let element_ids: Vec<i64> = contributions.iter().map(|c| c.element_id).collect();
        let concept_ids: Vec<i64> = contributions.iter().map(|c| c.concept_id).collect();
        let scores: Vec<f64> = contributions.iter().map(|c| c.score).collect();

        let result = sqlx::query(
            "INSERT INTO aggregation (element_id, concept_id, score)
             SELECT * FROM UNNEST($1::bigint[], $2::bigint[], $3::double precision[])
             ON CONFLICT (element_id, concept_id)
                 DO UPDATE SET score = aggregation.score + EXCLUDED.score",
        )
        .bind(&element_ids)
        .bind(&concept_ids)
        .bind(&scores)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AggregationRepository for PgAggregationRepository {
    async fn number_of_entries(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM aggregation")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count.0)
    }

    async fn fetch(&self, element_id: i64, concept_id: i64) -> Result<Option<AggregationRecord>> {
        let row = sqlx::query(
            "SELECT element_id, concept_id, score FROM aggregation
             WHERE element_id = $1 AND concept_id = $2",
        )
        .bind(element_id)
        .bind(concept_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| AggregationRecord {
            element_id: row.get("element_id"),
            concept_id: row.get("concept_id"),
            score: row.get("score"),
        }))
    }

    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM aggregation
             WHERE concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))",
        )
        .bind(ontology_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "aggregation",
            op = "delete_by_ontologies",
            row_count = result.rows_affected(),
            "Aggregation rows removed for retired ontologies"
        );
        Ok(result.rows_affected())
    }
}
