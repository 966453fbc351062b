//! Concept frequency rollup stage.

use std::time::Instant;

use tracing::info;

use annodex_core::{ConceptFrequencyRepository, Result};
use annodex_db::{with_transient_retry, Database};

use crate::report::StageReport;

/// Rebuilds the per-concept frequency view from the aggregation table.
pub struct ConceptFrequencyRollup {
    db: Database,
}

impl ConceptFrequencyRollup {
    /// Create a new rollup stage over the given database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Truncate and repopulate the rollup. The repository runs the swap in
    /// one transaction, so readers see either the old view or the new one.
    pub async fn recompute(&self) -> Result<StageReport> {
        let start = Instant::now();
        let rows = with_transient_retry("concept_frequency_recompute", || {
            self.db.concept_frequency.recompute()
        })
        .await?;

        info!(
            subsystem = "pipeline",
            component = "rollup",
            op = "concept_frequency_recompute",
            row_count = rows,
            duration_ms = start.elapsed().as_millis() as u64,
            "Concept frequency rollup complete"
        );
        Ok(StageReport::new(
            "concept_frequency_recompute",
            rows,
            start.elapsed(),
        ))
    }
}
