//! Expanded annotation evidence repository.
//!
//! Derived evidence lives in two tables sharing the pending-aggregation
//! lifecycle: is-a closure expansions and cross-ontology mapping
//! expansions. Full-payload uniqueness on both tables absorbs the
//! re-inserts a crashed run produces when it redoes an expansion batch.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::info;

use annodex_core::{
    Error, ExpandedStage, IsaExpandedAnnotation, MapExpandedAnnotation, NewIsaExpansion,
    NewMapExpansion, Result,
};

/// PostgreSQL repository over both expanded evidence tables.
pub struct PgExpandedAnnotationRepository {
    pool: Pool<Postgres>,
}

impl PgExpandedAnnotationRepository {
    /// Create a new PgExpandedAnnotationRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a batch of is-a expansions within the enclosing transaction.
    /// Rows already present (crash redo) are absorbed.
    pub async fn insert_isa_batch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[NewIsaExpansion],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let element_ids: Vec<i64> = rows.iter().map(|r| r.element_id).collect();
        let concept_ids: Vec<i64> = rows.iter().map(|r| r.concept_id).collect();
        let context_ids: Vec<i64> = rows.iter().map(|r| r.context_id).collect();
        let child_ids: Vec<i64> = rows.iter().map(|r| r.child_concept_id).collect();
        let levels: Vec<i32> = rows.iter().map(|r| r.parent_level).collect();

        let result = sqlx::query(
            "INSERT INTO isa_expanded_annotation
                 (element_id, concept_id, context_id, child_concept_id, parent_level, stage)
             SELECT x.element_id, x.concept_id, x.context_id, x.child_concept_id,
                    x.parent_level, $6::text
             FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[], $5::int[])
                  AS x(element_id, concept_id, context_id, child_concept_id, parent_level)
             ON CONFLICT DO NOTHING",
        )
        .bind(&element_ids)
        .bind(&concept_ids)
        .bind(&context_ids)
        .bind(&child_ids)
        .bind(&levels)
        .bind(ExpandedStage::Pending.as_str())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Insert a batch of mapping expansions within the enclosing transaction.
    pub async fn insert_map_batch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[NewMapExpansion],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let element_ids: Vec<i64> = rows.iter().map(|r| r.element_id).collect();
        let concept_ids: Vec<i64> = rows.iter().map(|r| r.concept_id).collect();
        let context_ids: Vec<i64> = rows.iter().map(|r| r.context_id).collect();
        let source_ids: Vec<i64> = rows.iter().map(|r| r.source_concept_id).collect();
        let mapping_types: Vec<String> = rows.iter().map(|r| r.mapping_type.clone()).collect();

        let result = sqlx::query(
            "INSERT INTO map_expanded_annotation
                 (element_id, concept_id, context_id, source_concept_id, mapping_type, stage)
             SELECT x.element_id, x.concept_id, x.context_id, x.source_concept_id,
                    x.mapping_type, $6::text
             FROM UNNEST($1::bigint[], $2::bigint[], $3::bigint[], $4::bigint[], $5::text[])
                  AS x(element_id, concept_id, context_id, source_concept_id, mapping_type)
             ON CONFLICT DO NOTHING",
        )
        .bind(&element_ids)
        .bind(&concept_ids)
        .bind(&context_ids)
        .bind(&source_ids)
        .bind(&mapping_types)
        .bind(ExpandedStage::Pending.as_str())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Fetch one batch of is-a rows at `stage`, locked for the enclosing
    /// transaction.
    pub async fn fetch_isa_batch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stage: ExpandedStage,
        limit: i64,
    ) -> Result<Vec<IsaExpandedAnnotation>> {
        let rows = sqlx::query(
            "SELECT id, element_id, concept_id, context_id, child_concept_id, parent_level, stage
             FROM isa_expanded_annotation
             WHERE stage = $1
             ORDER BY id
             LIMIT $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(stage.as_str())
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let stage: String = row.get("stage");
                Ok(IsaExpandedAnnotation {
                    id: row.get("id"),
                    element_id: row.get("element_id"),
                    concept_id: row.get("concept_id"),
                    context_id: row.get("context_id"),
                    child_concept_id: row.get("child_concept_id"),
                    parent_level: row.get("parent_level"),
                    stage: ExpandedStage::parse_str(&stage)?,
                })
            })
            .collect()
    }

    /// Fetch one batch of mapping rows at `stage`, locked for the
    /// enclosing transaction.
    pub async fn fetch_map_batch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stage: ExpandedStage,
        limit: i64,
    ) -> Result<Vec<MapExpandedAnnotation>> {
        let rows = sqlx::query(
            "SELECT id, element_id, concept_id, context_id, source_concept_id, mapping_type, stage
             FROM map_expanded_annotation
             WHERE stage = $1
             ORDER BY id
             LIMIT $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(stage.as_str())
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;

        rows.into_iter()
            .map(|row| {
                let stage: String = row.get("stage");
                Ok(MapExpandedAnnotation {
                    id: row.get("id"),
                    element_id: row.get("element_id"),
                    concept_id: row.get("concept_id"),
                    context_id: row.get("context_id"),
                    source_concept_id: row.get("source_concept_id"),
                    mapping_type: row.get("mapping_type"),
                    stage: ExpandedStage::parse_str(&stage)?,
                })
            })
            .collect()
    }

    /// Advance is-a rows between stages; see the direct repository for the
    /// stage-guard discipline.
    pub async fn advance_isa_stage_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[i64],
        from: ExpandedStage,
        to: ExpandedStage,
    ) -> Result<u64> {
        Self::advance_tx(tx, "isa_expanded_annotation", ids, from, to).await
    }

    /// Advance mapping rows between stages.
    pub async fn advance_map_stage_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[i64],
        from: ExpandedStage,
        to: ExpandedStage,
    ) -> Result<u64> {
        Self::advance_tx(tx, "map_expanded_annotation", ids, from, to).await
    }

    async fn advance_tx(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        ids: &[i64],
        from: ExpandedStage,
        to: ExpandedStage,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let query = format!("UPDATE {table} SET stage = $1 WHERE id = ANY($2) AND stage = $3");
        let result = sqlx::query(&query)
            .bind(to.as_str())
            .bind(ids)
            .bind(from.as_str())
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let advanced = result.rows_affected();
        if advanced != ids.len() as u64 {
            return Err(Error::Pipeline(format!(
                "{table} stage advance {} -> {} touched {} of {} rows",
                from.as_str(),
                to.as_str(),
                advanced,
                ids.len()
            )));
        }
        Ok(advanced)
    }

    /// Count is-a rows at the given stage.
    pub async fn count_isa_at_stage(&self, stage: ExpandedStage) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM isa_expanded_annotation WHERE stage = $1")
                .bind(stage.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count.0)
    }

    /// Count mapping rows at the given stage.
    pub async fn count_map_at_stage(&self, stage: ExpandedStage) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM map_expanded_annotation WHERE stage = $1")
                .bind(stage.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count.0)
    }
}

#[async_trait]
pub trait ExpandedAnnotationCascade: Send + Sync {
    /// Remove every expanded row that references any concept of the given
    /// ontologies, on either side of the derivation.
    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64>;

    /// Remove every expanded row referencing the given ontology.
    async fn delete_by_ontology(&self, ontology_id: i64) -> Result<u64> {
        self.delete_by_ontologies(&[ontology_id]).await
    }
}

#[async_trait]
impl ExpandedAnnotationCascade for PgExpandedAnnotationRepository {
    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64> {
        let isa = sqlx::query(
            "DELETE FROM isa_expanded_annotation
             WHERE concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))
                OR child_concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))",
        )
        .bind(ontology_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let map = sqlx::query(
            "DELETE FROM map_expanded_annotation
             WHERE concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))
                OR source_concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))",
        )
        .bind(ontology_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let removed = isa.rows_affected() + map.rows_affected();
        info!(
            subsystem = "db",
            component = "expanded_annotation",
            op = "delete_by_ontologies",
            row_count = removed,
            "Expanded evidence removed for retired ontologies"
        );
        Ok(removed)
    }
}
