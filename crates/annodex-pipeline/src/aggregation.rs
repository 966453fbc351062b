//! Aggregation engine: folds evidence into cumulative scores.
//!
//! Each operation consumes one evidence table at its input stage, computes
//! contributions with the pure scoring functions, pre-merges duplicates of
//! the same (element, concept) key, and upserts additively. The batch
//! select, the upsert, and the stage advance share one transaction, so a
//! contribution is applied exactly once per evidence row.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use annodex_core::{
    direct_contribution, isa_contribution, mapping_contribution, ConceptAffinity,
    DirectAnnotation, DirectEvidenceKind, DirectStage, Error, ExpandedStage,
    IsaExpandedAnnotation, MapExpandedAnnotation, Result, WeightProfile,
};
use annodex_db::{with_transient_retry, Contribution, Database, ReferenceCache};

use crate::report::StageReport;

type MergeMap = BTreeMap<(i64, i64), f64>;

fn merged_contributions(map: MergeMap) -> Vec<Contribution> {
    map.into_iter()
        .map(|((element_id, concept_id), score)| Contribution {
            element_id,
            concept_id,
            score,
        })
        .collect()
}

/// Resolve a context for scoring. An unknown context means the snapshot
/// does not match the evidence, which must fail the run loudly.
fn scored_context_weight(
    cache: &ReferenceCache,
    context_id: i64,
    row_id: i64,
) -> Result<Option<f64>> {
    let context = cache.context(context_id).ok_or_else(|| {
        Error::Pipeline(format!(
            "annotation {row_id} references unknown context {context_id}"
        ))
    })?;
    if matches!(context.affinity, ConceptAffinity::NotScored) {
        return Ok(None);
    }
    Ok(Some(context.weight))
}

/// Fold one batch of direct annotations into merged contributions.
fn fold_direct(
    batch: &[DirectAnnotation],
    cache: &ReferenceCache,
    weights: &WeightProfile,
) -> Result<Vec<Contribution>> {
    let mut merged = MergeMap::new();
    for ann in batch {
        let Some(context_weight) = scored_context_weight(cache, ann.context_id, ann.id)? else {
            continue;
        };
        let kind = match ann.term_id {
            None => DirectEvidenceKind::Reported,
            Some(term_id) => match cache.term(term_id) {
                Some(t) if t.is_preferred => DirectEvidenceKind::PreferredTerm,
                // A tagger hit never downgrades to "reported" just because
                // its term left the dictionary; it scores as a synonym.
                _ => DirectEvidenceKind::Synonym,
            },
        };
        let contribution = direct_contribution(weights, context_weight, kind);
        *merged.entry((ann.element_id, ann.concept_id)).or_insert(0.0) += contribution;
    }
    Ok(merged_contributions(merged))
}

/// Fold one batch of is-a expansions into merged contributions, keyed by
/// the ancestor concept.
fn fold_isa(
    batch: &[IsaExpandedAnnotation],
    cache: &ReferenceCache,
    weights: &WeightProfile,
) -> Result<Vec<Contribution>> {
    let mut merged = MergeMap::new();
    for ann in batch {
        let Some(context_weight) = scored_context_weight(cache, ann.context_id, ann.id)? else {
            continue;
        };
        let contribution = isa_contribution(weights, context_weight, ann.parent_level);
        *merged.entry((ann.element_id, ann.concept_id)).or_insert(0.0) += contribution;
    }
    Ok(merged_contributions(merged))
}

/// Fold one batch of mapping expansions into merged contributions, keyed
/// by the mapped concept.
fn fold_map(
    batch: &[MapExpandedAnnotation],
    cache: &ReferenceCache,
    weights: &WeightProfile,
) -> Result<Vec<Contribution>> {
    let mut merged = MergeMap::new();
    for ann in batch {
        let Some(context_weight) = scored_context_weight(cache, ann.context_id, ann.id)? else {
            continue;
        };
        let contribution = mapping_contribution(weights, context_weight);
        *merged.entry((ann.element_id, ann.concept_id)).or_insert(0.0) += contribution;
    }
    Ok(merged_contributions(merged))
}

/// Folds direct and expanded evidence into the aggregation table.
pub struct AggregationEngine {
    db: Database,
    cache: Arc<ReferenceCache>,
    weights: WeightProfile,
    batch_size: i64,
}

impl AggregationEngine {
    /// Create a new engine over the given database and reference snapshot.
    pub fn new(
        db: Database,
        cache: Arc<ReferenceCache>,
        weights: WeightProfile,
        batch_size: i64,
    ) -> Self {
        Self {
            db,
            cache,
            weights,
            batch_size,
        }
    }

    /// Score every direct annotation that finished both expansions.
    /// Consumes rows at `MappingExpanded` and advances them to
    /// `Aggregated`.
    pub async fn aggregate_direct(&self) -> Result<StageReport> {
        let start = Instant::now();
        let mut total = 0u64;

        loop {
            let processed = with_transient_retry("aggregate_direct", || self.direct_batch()).await?;
            if processed == 0 {
                break;
            }
            total += processed;
            self.log_batch("aggregate_direct", processed);
        }

        self.log_complete("aggregate_direct", total, &start);
        Ok(StageReport::new("aggregate_direct", total, start.elapsed()))
    }

    /// Score every pending is-a expansion.
    pub async fn aggregate_isa_expanded(&self) -> Result<StageReport> {
        let start = Instant::now();
        let mut total = 0u64;

        loop {
            let processed =
                with_transient_retry("aggregate_isa_expanded", || self.isa_batch()).await?;
            if processed == 0 {
                break;
            }
            total += processed;
            self.log_batch("aggregate_isa_expanded", processed);
        }

        self.log_complete("aggregate_isa_expanded", total, &start);
        Ok(StageReport::new(
            "aggregate_isa_expanded",
            total,
            start.elapsed(),
        ))
    }

    /// Score every pending mapping expansion.
    pub async fn aggregate_map_expanded(&self) -> Result<StageReport> {
        let start = Instant::now();
        let mut total = 0u64;

        loop {
            let processed =
                with_transient_retry("aggregate_map_expanded", || self.map_batch()).await?;
            if processed == 0 {
                break;
            }
            total += processed;
            self.log_batch("aggregate_map_expanded", processed);
        }

        self.log_complete("aggregate_map_expanded", total, &start);
        Ok(StageReport::new(
            "aggregate_map_expanded",
            total,
            start.elapsed(),
        ))
    }

    fn log_batch(&self, operation: &'static str, processed: u64) {
        debug!(
            subsystem = "pipeline",
            component = "aggregation",
            op = operation,
            row_count = processed,
            "Scoring batch committed"
        );
    }

    fn log_complete(&self, operation: &'static str, total: u64, start: &Instant) {
        info!(
            subsystem = "pipeline",
            component = "aggregation",
            op = operation,
            row_count = total,
            duration_ms = start.elapsed().as_millis() as u64,
            "Aggregation operation complete"
        );
    }

    async fn direct_batch(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await.map_err(Error::Database)?;
        let batch = self
            .db
            .direct
            .fetch_batch_at_stage_tx(&mut tx, DirectStage::MappingExpanded, self.batch_size)
            .await?;
        if batch.is_empty() {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(0);
        }

        let contributions = fold_direct(&batch, &self.cache, &self.weights)?;
        self.db
            .aggregation
            .upsert_contributions_tx(&mut tx, &contributions)
            .await?;

        let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
        self.db
            .direct
            .advance_stage_tx(
                &mut tx,
                &ids,
                DirectStage::MappingExpanded,
                DirectStage::Aggregated,
            )
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(batch.len() as u64)
    }

    async fn isa_batch(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await.map_err(Error::Database)?;
        let batch = self
            .db
            .expanded
            .fetch_isa_batch_tx(&mut tx, ExpandedStage::Pending, self.batch_size)
            .await?;
        if batch.is_empty() {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(0);
        }

        let contributions = fold_isa(&batch, &self.cache, &self.weights)?;
        self.db
            .aggregation
            .upsert_contributions_tx(&mut tx, &contributions)
            .await?;

        let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
        self.db
            .expanded
            .advance_isa_stage_tx(&mut tx, &ids, ExpandedStage::Pending, ExpandedStage::Aggregated)
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(batch.len() as u64)
    }

    async fn map_batch(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await.map_err(Error::Database)?;
        let batch = self
            .db
            .expanded
            .fetch_map_batch_tx(&mut tx, ExpandedStage::Pending, self.batch_size)
            .await?;
        if batch.is_empty() {
            tx.rollback().await.map_err(Error::Database)?;
            return Ok(0);
        }

        let contributions = fold_map(&batch, &self.cache, &self.weights)?;
        self.db
            .aggregation
            .upsert_contributions_tx(&mut tx, &contributions)
            .await?;

        let ids: Vec<i64> = batch.iter().map(|a| a.id).collect();
        self.db
            .expanded
            .advance_map_stage_tx(&mut tx, &ids, ExpandedStage::Pending, ExpandedStage::Aggregated)
            .await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(batch.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annodex_db::ReferenceCacheBuilder;
    use annodex_core::{Context, TermEntry};
    use chrono::Utc;

    fn weights() -> WeightProfile {
        WeightProfile::default()
    }

    fn cache() -> ReferenceCache {
        ReferenceCacheBuilder::new()
            .context(Context {
                id: 1,
                resource_id: 1,
                name: "title".to_string(),
                weight: 2.0,
                affinity: ConceptAffinity::FreeText,
            })
            .context(Context {
                id: 2,
                resource_id: 1,
                name: "keywords".to_string(),
                weight: 1.5,
                affinity: ConceptAffinity::NotScored,
            })
            .term(TermEntry {
                id: 100,
                concept_id: 10,
                is_preferred: true,
            })
            .term(TermEntry {
                id: 101,
                concept_id: 10,
                is_preferred: false,
            })
            .build()
    }

    fn direct(id: i64, context_id: i64, term_id: Option<i64>) -> DirectAnnotation {
        DirectAnnotation {
            id,
            element_id: 1000,
            concept_id: 10,
            context_id,
            term_id,
            span_from: term_id.map(|_| 0),
            span_to: term_id.map(|_| 4),
            dictionary_version: 1,
            stage: DirectStage::MappingExpanded,
            created_at_utc: Utc::now(),
        }
    }

    #[test]
    fn test_fold_direct_preferred_term() {
        let out = fold_direct(&[direct(1, 1, Some(100))], &cache(), &weights()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 20.0);
    }

    #[test]
    fn test_fold_direct_reported() {
        let out = fold_direct(&[direct(1, 1, None)], &cache(), &weights()).unwrap();
        assert_eq!(out[0].score, 16.0);
    }

    #[test]
    fn test_fold_direct_synonym() {
        let out = fold_direct(&[direct(1, 1, Some(101))], &cache(), &weights()).unwrap();
        assert_eq!(out[0].score, 14.0);
    }

    #[test]
    fn test_fold_direct_unknown_term_scores_as_synonym() {
        let out = fold_direct(&[direct(1, 1, Some(999))], &cache(), &weights()).unwrap();
        assert_eq!(out[0].score, 14.0);
    }

    #[test]
    fn test_fold_direct_merges_same_key() {
        let batch = vec![direct(1, 1, Some(100)), direct(2, 1, None)];
        let out = fold_direct(&batch, &cache(), &weights()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 36.0);
    }

    #[test]
    fn test_fold_direct_skips_not_scored_context() {
        let out = fold_direct(&[direct(1, 2, Some(100))], &cache(), &weights()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_fold_direct_unknown_context_is_fatal() {
        let err = fold_direct(&[direct(1, 42, Some(100))], &cache(), &weights()).unwrap_err();
        assert!(err.to_string().contains("unknown context"));
    }

    #[test]
    fn test_fold_isa_level_decay() {
        let ann = IsaExpandedAnnotation {
            id: 1,
            element_id: 1000,
            concept_id: 11,
            context_id: 1,
            child_concept_id: 10,
            parent_level: 1,
            stage: ExpandedStage::Pending,
        };
        let out = fold_isa(&[ann], &cache(), &weights()).unwrap();
        // floor(10 * e^-0.2 + 1) * 2.0 = 9 * 2.0
        assert_eq!(out[0].score, 18.0);
    }

    #[test]
    fn test_fold_map_contribution() {
        let ann = MapExpandedAnnotation {
            id: 1,
            element_id: 1000,
            concept_id: 30,
            context_id: 1,
            source_concept_id: 10,
            mapping_type: "exact".to_string(),
            stage: ExpandedStage::Pending,
        };
        let out = fold_map(&[ann], &cache(), &weights()).unwrap();
        // 7.0 * 2.0
        assert_eq!(out[0].score, 14.0);
    }

    #[test]
    fn test_merged_keys_are_distinct_pairs() {
        let mut batch = vec![direct(1, 1, Some(100))];
        let mut other = direct(2, 1, Some(100));
        other.element_id = 2000;
        batch.push(other);
        let out = fold_direct(&batch, &cache(), &weights()).unwrap();
        assert_eq!(out.len(), 2);
    }
}
