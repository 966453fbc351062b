//! Element identity and resource structure registration.
//!
//! The input boundary for content producers: elements resolve to internal
//! ids on first sight, and a resource's context slots (name, weight,
//! affinity) are registered or updated between runs. Context weights never
//! change mid-run; the cache snapshot pins them for the duration.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use annodex_core::{ConceptAffinity, Context, ContextSpec, ElementRepository, Error, Result};

/// PostgreSQL implementation of ElementRepository.
pub struct PgElementRepository {
    pool: Pool<Postgres>,
}

impl PgElementRepository {
    /// Create a new PgElementRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create a resource by name if absent, returning its id.
    pub async fn ensure_resource(&self, name: &str) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO resource (name) VALUES ($1)
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("id"))
    }
}

#[async_trait]
impl ElementRepository for PgElementRepository {
    async fn resolve(&self, resource_id: i64, local_id: &str) -> Result<i64> {
        // The no-op DO UPDATE makes the insert return the existing id on
        // conflict instead of returning nothing.
        let row = sqlx::query(
            "INSERT INTO element (resource_id, local_id) VALUES ($1, $2)
             ON CONFLICT (resource_id, local_id) DO UPDATE SET local_id = EXCLUDED.local_id
             RETURNING id",
        )
        .bind(resource_id)
        .bind(local_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("id"))
    }

    async fn register_structure(
        &self,
        resource_id: i64,
        contexts: &[ContextSpec],
    ) -> Result<Vec<Context>> {
        for spec in contexts {
            if spec.weight <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "context {} has non-positive weight {}",
                    spec.name, spec.weight
                )));
            }
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut stored = Vec::with_capacity(contexts.len());

        for spec in contexts {
            let row = sqlx::query(
                "INSERT INTO context (resource_id, name, weight, affinity, ontology_id)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (resource_id, name) DO UPDATE
                     SET weight = EXCLUDED.weight,
                         affinity = EXCLUDED.affinity,
                         ontology_id = EXCLUDED.ontology_id
                 RETURNING id",
            )
            .bind(resource_id)
            .bind(&spec.name)
            .bind(spec.weight)
            .bind(spec.affinity.kind_str())
            .bind(spec.affinity.ontology_id())
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;

            stored.push(Context {
                id: row.get("id"),
                resource_id,
                name: spec.name.clone(),
                weight: spec.weight,
                affinity: spec.affinity,
            });
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(stored)
    }
}
