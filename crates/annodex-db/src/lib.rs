//! # annodex-db
//!
//! PostgreSQL persistence layer for the annodex annotation index.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for every evidence store
//! - The reference snapshot cache loaded once per pipeline run
//! - Transient-failure retry and bulk-load index control
//!
//! ## Example
//!
//! ```rust,ignore
//! use annodex_db::Database;
//! use annodex_core::DirectAnnotationRepository;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/annodex").await?;
//!
//!     let inserted = db.direct.add_reported_hit(1, 2, 3, 42).await;
//!     println!("inserted: {inserted}");
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod concept_frequency;
pub mod direct;
pub mod elements;
pub mod expanded;
pub mod index_control;
pub mod pool;
pub mod reference;
pub mod retry;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use TestDatabase
pub mod test_fixtures;

// Re-export core types
pub use annodex_core::*;

// Re-export repository implementations
pub use aggregation::{Contribution, PgAggregationRepository};
pub use concept_frequency::PgConceptFrequencyRepository;
pub use direct::PgDirectAnnotationRepository;
pub use elements::PgElementRepository;
pub use expanded::{ExpandedAnnotationCascade, PgExpandedAnnotationRepository};
pub use index_control::IndexControl;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use reference::{PgReferenceRepository, ReferenceCache, ReferenceCacheBuilder};
pub use retry::{is_transient, with_transient_retry};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Reference snapshot loader.
    pub reference: PgReferenceRepository,
    /// Element identity and structure registration.
    pub elements: PgElementRepository,
    /// Direct annotation evidence store.
    pub direct: PgDirectAnnotationRepository,
    /// Expanded (derived) annotation evidence store.
    pub expanded: PgExpandedAnnotationRepository,
    /// Cumulative (element, concept) scores.
    pub aggregation: PgAggregationRepository,
    /// Per-concept frequency rollup.
    pub concept_frequency: PgConceptFrequencyRepository,
    /// Secondary-index control for bulk loads.
    pub index_control: IndexControl,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            reference: PgReferenceRepository::new(pool.clone()),
            elements: PgElementRepository::new(pool.clone()),
            direct: PgDirectAnnotationRepository::new(pool.clone()),
            expanded: PgExpandedAnnotationRepository::new(pool.clone()),
            aggregation: PgAggregationRepository::new(pool.clone()),
            concept_frequency: PgConceptFrequencyRepository::new(pool.clone()),
            index_control: IndexControl::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Cascade an ontology retirement across every store: direct and
    /// expanded evidence, aggregation scores, and the frequency rollup.
    /// Returns total rows removed.
    pub async fn delete_ontologies(&self, ontology_ids: &[i64]) -> Result<u64> {
        use annodex_core::{
            AggregationRepository, ConceptFrequencyRepository, DirectAnnotationRepository,
        };

        let mut removed = 0u64;
        removed += self.direct.delete_by_ontologies(ontology_ids).await?;
        removed += ExpandedAnnotationCascade::delete_by_ontologies(&self.expanded, ontology_ids)
            .await?;
        removed += self.aggregation.delete_by_ontologies(ontology_ids).await?;
        removed += self
            .concept_frequency
            .delete_by_ontologies(ontology_ids)
            .await?;
        Ok(removed)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
