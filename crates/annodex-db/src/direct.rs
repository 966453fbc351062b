//! Direct annotation evidence repository.
//!
//! Holds first-order matches (tagger hits and externally reported hits)
//! keyed by the exact evidence tuple. Duplicate evidence is rejected by
//! the unique evidence key and swallowed at the insert site; the stage
//! column tracks each row's progress through the pipeline.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use tokio::io::AsyncBufReadExt;
use tracing::{debug, info, warn};

use annodex_core::{
    defaults, DirectAnnotation, DirectAnnotationRepository, DirectStage, Error, Result,
};

use crate::index_control::IndexControl;
use crate::retry::with_transient_retry;

/// One parsed record of a tagger hit file:
/// `(term_id, span_from, span_to, element_id, context_id)` tab-separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BulkHit {
    term_id: i64,
    span_from: i32,
    span_to: i32,
    element_id: i64,
    context_id: i64,
}

/// Parse one line of a tagger hit file. Returns None on malformed input.
fn parse_hit_line(line: &str) -> Option<BulkHit> {
    let mut fields = line.split('\t');
    let hit = BulkHit {
        term_id: fields.next()?.trim().parse().ok()?,
        span_from: fields.next()?.trim().parse().ok()?,
        span_to: fields.next()?.trim().parse().ok()?,
        element_id: fields.next()?.trim().parse().ok()?,
        context_id: fields.next()?.trim().parse().ok()?,
    };
    if fields.next().is_some() {
        return None;
    }
    Some(hit)
}

/// PostgreSQL implementation of DirectAnnotationRepository.
pub struct PgDirectAnnotationRepository {
    pool: Pool<Postgres>,
    index_control: IndexControl,
}

impl PgDirectAnnotationRepository {
    /// Create a new PgDirectAnnotationRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        let index_control = IndexControl::new(pool.clone());
        Self {
            pool,
            index_control,
        }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<DirectAnnotation> {
        let stage: String = row.get("stage");
        Ok(DirectAnnotation {
            id: row.get("id"),
            element_id: row.get("element_id"),
            concept_id: row.get("concept_id"),
            context_id: row.get("context_id"),
            term_id: row.get("term_id"),
            span_from: row.get("span_from"),
            span_to: row.get("span_to"),
            dictionary_version: row.get("dictionary_version"),
            stage: DirectStage::parse_str(&stage)?,
            created_at_utc: row.get("created_at_utc"),
        })
    }

    /// Fetch one batch of rows sitting at `stage`, locking them for the
    /// enclosing transaction. Rows another transaction already holds are
    /// skipped, so a row is consumed by exactly one transition at a time.
    pub async fn fetch_batch_at_stage_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        stage: DirectStage,
        limit: i64,
    ) -> Result<Vec<DirectAnnotation>> {
        let rows = sqlx::query(
            "SELECT id, element_id, concept_id, context_id, term_id, span_from, span_to,
                    dictionary_version, stage, created_at_utc
             FROM direct_annotation
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

        rows.into_iter().map(Self::parse_row).collect()
    }

    /// Advance the given rows from one stage to the next within the
    /// enclosing transaction. The stage guard in the WHERE clause makes
    /// re-runs skip rows already past `from`; a count mismatch means a row
    /// changed under us and fails the unit before anything commits.
    pub async fn advance_stage_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ids: &[i64],
        from: DirectStage,
        to: DirectStage,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE direct_annotation SET stage = $1 WHERE id = ANY($2) AND stage = $3",
        )
        .bind(to.as_str())
        .bind(ids)
        .bind(from.as_str())
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        let advanced = result.rows_affected();
        if advanced != ids.len() as u64 {
            return Err(Error::Pipeline(format!(
                "stage advance {} -> {} touched {} of {} rows",
                from.as_str(),
                to.as_str(),
                advanced,
                ids.len()
            )));
        }
        Ok(advanced)
    }

    /// Stream-load a tagger hit file, resolving concepts through the term
    /// table. Returns (rows added, lines skipped).
    async fn load_hit_file(&self, path: &Path, dictionary_version: i64) -> Result<(u64, u64)> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::BulkLoad(format!("open {}: {e}", path.display()))
        })?;
        let mut lines = tokio::io::BufReader::new(file).lines();

        let mut chunk: Vec<BulkHit> = Vec::with_capacity(defaults::BULK_LOAD_CHUNK_SIZE);
        let mut added = 0u64;
        let mut skipped = 0u64;
        let mut line_no = 0u64;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::BulkLoad(format!("read {}: {e}", path.display())))?
        {
            line_no += 1;
            if line.is_empty() {
                continue;
            }
            match parse_hit_line(&line) {
                Some(hit) => chunk.push(hit),
                None => {
                    skipped += 1;
                    warn!(
                        subsystem = "db",
                        component = "direct_annotation",
                        op = "bulk_load",
                        line = line_no,
                        "Skipping malformed hit record"
                    );
                }
            }
            if chunk.len() >= defaults::BULK_LOAD_CHUNK_SIZE {
                added += with_transient_retry("bulk_load_chunk", || {
                    self.insert_hit_chunk(&chunk, dictionary_version)
                })
                .await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            added += with_transient_retry("bulk_load_chunk", || {
                self.insert_hit_chunk(&chunk, dictionary_version)
            })
            .await?;
        }
        Ok((added, skipped))
    }

    /// Insert one chunk of parsed hits. Hits whose term id is unknown to
    /// the reference tables drop out of the join; duplicates of existing
    /// evidence are absorbed by the evidence key.
    async fn insert_hit_chunk(&self, chunk: &[BulkHit], dictionary_version: i64) -> Result<u64> {
        let term_ids: Vec<i64> = chunk.iter().map(|h| h.term_id).collect();
        let span_froms: Vec<i32> = chunk.iter().map(|h| h.span_from).collect();
        let span_tos: Vec<i32> = chunk.iter().map(|h| h.span_to).collect();
        let element_ids: Vec<i64> = chunk.iter().map(|h| h.element_id).collect();
        let context_ids: Vec<i64> = chunk.iter().map(|h| h.context_id).collect();

        let result = sqlx::query(
            "INSERT INTO direct_annotation
                 (element_id, concept_id, context_id, term_id, span_from, span_to,
                  dictionary_version, stage)
             SELECT x.element_id, t.concept_id, x.context_id, x.term_id,
                    x.span_from, x.span_to, $6::bigint, $7::text
             FROM UNNEST($1::bigint[], $2::int[], $3::int[], $4::bigint[], $5::bigint[])
                  AS x(term_id, span_from, span_to, element_id, context_id)
             JOIN term t ON t.id = x.term_id
             ON CONFLICT ON CONSTRAINT direct_annotation_evidence_key DO NOTHING",
        )
        .bind(&term_ids)
        .bind(&span_froms)
        .bind(&span_tos)
        .bind(&element_ids)
        .bind(&context_ids)
        .bind(dictionary_version)
        .bind(DirectStage::Tagged.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "direct_annotation",
            op = "bulk_load",
            batch_size = chunk.len(),
            row_count = result.rows_affected(),
            "Hit chunk inserted"
        );
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DirectAnnotationRepository for PgDirectAnnotationRepository {
    async fn add_tagger_hit(
        &self,
        element_id: i64,
        concept_id: i64,
        context_id: i64,
        term_id: i64,
        span_from: i32,
        span_to: i32,
        dictionary_version: i64,
    ) -> bool {
        let result = sqlx::query(
            "INSERT INTO direct_annotation
                 (element_id, concept_id, context_id, term_id, span_from, span_to,
                  dictionary_version, stage)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT ON CONSTRAINT direct_annotation_evidence_key DO NOTHING",
        )
        .bind(element_id)
        .bind(concept_id)
        .bind(context_id)
        .bind(term_id)
        .bind(span_from)
        .bind(span_to)
        .bind(dictionary_version)
        .bind(DirectStage::Tagged.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => done.rows_affected() == 1,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "direct_annotation",
                    op = "add_tagger_hit",
                    element_id,
                    concept_id,
                    error = %e,
                    "Failed to record tagger hit"
                );
                false
            }
        }
    }

    async fn add_reported_hit(
        &self,
        element_id: i64,
        concept_id: i64,
        context_id: i64,
        dictionary_version: i64,
    ) -> bool {
        let result = sqlx::query(
            "INSERT INTO direct_annotation
                 (element_id, concept_id, context_id, dictionary_version, stage)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT ON CONSTRAINT direct_annotation_evidence_key DO NOTHING",
        )
        .bind(element_id)
        .bind(concept_id)
        .bind(context_id)
        .bind(dictionary_version)
        .bind(DirectStage::Tagged.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => done.rows_affected() == 1,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "direct_annotation",
                    op = "add_reported_hit",
                    element_id,
                    concept_id,
                    error = %e,
                    "Failed to record reported hit"
                );
                false
            }
        }
    }

    async fn bulk_load(&self, path: &Path, dictionary_version: i64) -> Result<u64> {
        let start = Instant::now();

        self.index_control.drop_secondary().await?;
        let outcome = self.load_hit_file(path, dictionary_version).await;
        // Rebuild before surfacing the load result: read-heavy stages must
        // never see the table without its indexes.
        let rebuild = self.index_control.rebuild_secondary().await;

        let (added, skipped) = outcome?;
        rebuild?;

        info!(
            subsystem = "db",
            component = "direct_annotation",
            op = "bulk_load",
            dictionary_version,
            row_count = added,
            skipped_count = skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Bulk hit load complete"
        );
        Ok(added)
    }

    async fn count_at_stage(&self, stage: DirectStage) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM direct_annotation WHERE stage = $1")
                .bind(stage.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count.0)
    }

    async fn delete_by_ontologies(&self, ontology_ids: &[i64]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM direct_annotation
             WHERE concept_id IN (SELECT id FROM concept WHERE ontology_id = ANY($1))",
        )
        .bind(ontology_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "direct_annotation",
            op = "delete_by_ontologies",
            row_count = result.rows_affected(),
            "Direct evidence removed for retired ontologies"
        );
        Ok(result.rows_affected())
    }
}
