//! Secondary-index control around heavy bulk writes.
//!
//! Dropping the non-unique secondary indexes of the direct evidence table
//! before a large load and rebuilding them afterwards trades one index
//! rebuild for millions of incremental index updates. The unique evidence
//! key is NOT touched: it is load-bearing for duplicate suppression during
//! the load itself. Index state must be restored before any read-heavy
//! stage runs against the table.

use std::time::Instant;

use sqlx::{Pool, Postgres};
use tracing::info;

use annodex_core::{Error, Result};

/// Non-unique secondary indexes of `direct_annotation`, paired with the
/// DDL that rebuilds them. Kept in sync with the schema migration.
const SECONDARY_INDEXES: &[(&str, &str)] = &[
    (
        "direct_annotation_stage_idx",
        "CREATE INDEX IF NOT EXISTS direct_annotation_stage_idx ON direct_annotation (stage)",
    ),
    (
        "direct_annotation_concept_idx",
        "CREATE INDEX IF NOT EXISTS direct_annotation_concept_idx ON direct_annotation (concept_id)",
    ),
];

/// Drops and rebuilds the secondary indexes of the direct evidence table.
#[derive(Clone)]
pub struct IndexControl {
    pool: Pool<Postgres>,
}

impl IndexControl {
    /// Create a new IndexControl with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Drop the secondary indexes ahead of a bulk load.
    pub async fn drop_secondary(&self) -> Result<()> {
        let start = Instant::now();
        for (name, _) in SECONDARY_INDEXES {
            sqlx::query(&format!("DROP INDEX IF EXISTS {name}"))
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        }
        info!(
            subsystem = "db",
            component = "index_control",
            op = "drop_secondary",
            db_table = "direct_annotation",
            duration_ms = start.elapsed().as_millis() as u64,
            "Secondary indexes dropped for bulk load"
        );
        Ok(())
    }

    /// Rebuild the secondary indexes after a bulk load.
    pub async fn rebuild_secondary(&self) -> Result<()> {
        let start = Instant::now();
        for (_, ddl) in SECONDARY_INDEXES {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        }
        info!(
            subsystem = "db",
            component = "index_control",
            op = "rebuild_secondary",
            db_table = "direct_annotation",
            duration_ms = start.elapsed().as_millis() as u64,
            "Secondary indexes rebuilt"
        );
        Ok(())
    }
}
