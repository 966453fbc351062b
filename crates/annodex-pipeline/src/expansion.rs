//! Expansion engine: derives expanded evidence from direct annotations.
//!
//! Each operation loops over batches of direct rows at its input stage.
//! One batch is one transaction holding select, derived-row insert, and
//! stage advance: if any insert fails, the transaction rolls back and no
//! row advances, so expansion evidence is never silently lost. Re-running
//! after a crash redoes at most one batch; the uniqueness constraints on
//! the expanded tables absorb the resulting re-inserts.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use annodex_core::{
    DirectAnnotation, DirectStage, Error, NewIsaExpansion, NewMapExpansion, Result,
};
use annodex_db::{with_transient_retry, Database, ReferenceCache};

use crate::report::StageReport;

/// Derive is-a expansion rows for one batch of direct annotations.
fn isa_rows_for(batch: &[DirectAnnotation], cache: &ReferenceCache) -> Vec<NewIsaExpansion> {
    let mut rows = Vec::new();
    for ann in batch {
        for ancestor in cache.ancestors(ann.concept_id) {
            rows.push(NewIsaExpansion {
                element_id: ann.element_id,
                concept_id: ancestor.parent_concept_id,
                context_id: ann.context_id,
                child_concept_id: ann.concept_id,
                parent_level: ancestor.level,
            });
        }
    }
    rows
}

/// Derive mapping expansion rows for one batch of direct annotations.
fn map_rows_for(batch: &[DirectAnnotation], cache: &ReferenceCache) -> Vec<NewMapExpansion> {
    let mut rows = Vec::new();
    for ann in batch {
        for mapping in cache.mappings(ann.concept_id) {
            rows.push(NewMapExpansion {
                element_id: ann.element_id,
                concept_id: mapping.mapped_concept_id,
                context_id: ann.context_id,
                source_concept_id: ann.concept_id,
                mapping_type: mapping.mapping_type.clone(),
            });
        }
    }
    rows
}

/// Walks direct evidence through the two expansion transitions.
pub struct ExpansionEngine {
    db: Database,
    cache: Arc<ReferenceCache>,
    batch_size: i64,
}

impl ExpansionEngine {
    /// Create a new engine over the given database and reference snapshot.
    pub fn new(db: Database, cache: Arc<ReferenceCache>, batch_size: i64) -> Self {
        Self {
            db,
            cache,
            batch_size,
        }
    }

    /// Expand every direct annotation still awaiting is-a closure.
    ///
    /// Consumes rows at `Tagged`, writes one pending is-a row per
    /// (element, ancestor, context, child, level), and advances the
    /// consumed rows to `IsaExpanded`.
    pub async fn isa_closure_expansion(&self) -> Result<StageReport> {
        let start = Instant::now();
        let mut total = 0u64;

        loop {
            let processed =
                with_transient_retry("isa_closure_expansion", || self.isa_batch()).await?;
            if processed == 0 {
                break;
            }
            total += processed;
            debug!(
                subsystem = "pipeline",
                component = "expansion",
                op = "isa_closure_expansion",
                row_count = processed,
                "Expansion batch committed"
            );
        }

        info!(
            subsystem = "pipeline",
            component = "expansion",
            op = "isa_closure_expansion",
            row_count = total,
            duration_ms = start.elapsed().as_millis() as u64,
            "Is-a closure expansion complete"
        );
        Ok(StageReport::new(
            "isa_closure_expansion",
            total,
            start.elapsed(),
        ))
    }

    async fn isa_batch(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await.map_err(Error::Database)?;
        let batch = self
            .db
            .direct
            .fetch_batch_at_stage_tx(&mut tx, DirectStage::Tagged, self.batch_size)
            .await?;
        if batch.is_empty() {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(0);
        }

        let rows = isa_rows_for(&batch, &self.cache);
        self.db.expanded.insert_isa_batch_tx(&mut tx, &rows).await?;

        let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
        self.db
            .direct
            .advance_stage_tx(&mut tx, &ids, DirectStage::Tagged, DirectStage::IsaExpanded)
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(batch.len() as u64)
    }

    /// Expand every direct annotation still awaiting mapping expansion.
    ///
    /// Consumes rows at `IsaExpanded`, writes one pending mapping row per
    /// (element, mapped concept, context, source, type), and advances the
    /// consumed rows to `MappingExpanded`.
    pub async fn mapping_expansion(&self) -> Result<StageReport> {
        let start = Instant::now();
        let mut total = 0u64;

        loop {
            let processed =
                with_transient_retry("mapping_expansion", || self.mapping_batch()).await?;
            if processed == 0 {
                break;
            }
            total += processed;
            debug!(
                subsystem = "pipeline",
                component = "expansion",
                op = "mapping_expansion",
                row_count = processed,
                "Expansion batch committed"
            );
        }

        info!(
            subsystem = "pipeline",
            component = "expansion",
            op = "mapping_expansion",
            row_count = total,
            duration_ms = start.elapsed().as_millis() as u64,
            "Mapping expansion complete"
        );
        Ok(StageReport::new("mapping_expansion", total, start.elapsed()))
    }

    async fn mapping_batch(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await.map_err(Error::Database)?;
        let batch = self
            .db
            .direct
            .fetch_batch_at_stage_tx(&mut tx, DirectStage::IsaExpanded, self.batch_size)
            .await?;
        if batch.is_empty() {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(0);
        }

        let rows = map_rows_for(&batch, &self.cache);
        self.db.expanded.insert_map_batch_tx(&mut tx, &rows).await?;

        let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
        self.db
            .direct
            .advance_stage_tx(
                &mut tx,
                &ids,
                DirectStage::IsaExpanded,
                DirectStage::MappingExpanded,
            )
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(batch.len() as u64)
    }
}
