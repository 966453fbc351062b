//! Per-resource pipeline orchestration.
//!
//! One resource's stages run strictly sequentially; each stage operation
//! only ever touches rows still at its input stage, so a run may be
//! re-invoked or aborted between batch units without corrupting markers.
//! The multi-resource runner isolates failures: an abandoned resource run
//! never stops the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{error, info};

use annodex_core::{defaults, Result};
use annodex_db::Database;

use crate::aggregation::AggregationEngine;
use crate::config::PipelineConfig;
use crate::expansion::ExpansionEngine;
use crate::report::StageReport;
use crate::rollup::ConceptFrequencyRollup;

/// Event emitted while a pipeline run progresses.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage operation started.
    StageStarted {
        resource_id: i64,
        operation: &'static str,
    },
    /// A stage operation finished.
    StageCompleted {
        resource_id: i64,
        operation: &'static str,
        rows_processed: u64,
        duration_ms: u64,
    },
    /// A whole resource run finished.
    ResourceCompleted { resource_id: i64, duration_ms: u64 },
    /// A resource run was abandoned.
    ResourceFailed { resource_id: i64, error: String },
}

/// Outcome of one resource run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub resource_id: i64,
    pub dictionary_version: i64,
    pub reports: Vec<StageReport>,
    pub duration: Duration,
}

impl RunSummary {
    /// Total rows consumed across all stages of the run.
    pub fn total_rows(&self) -> u64 {
        self.reports.iter().map(|r| r.rows_processed).sum()
    }
}

/// The annotation pipeline for one resource.
pub struct AnnotationPipeline {
    db: Database,
    config: PipelineConfig,
    resource_id: i64,
    dictionary_version: i64,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl AnnotationPipeline {
    /// Create a pipeline for one resource run.
    pub fn new(
        db: Database,
        config: PipelineConfig,
        resource_id: i64,
        dictionary_version: i64,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self::with_events(db, config, resource_id, dictionary_version, event_tx)
    }

    /// Create a pipeline publishing onto an existing event channel.
    pub fn with_events(
        db: Database,
        config: PipelineConfig,
        resource_id: i64,
        dictionary_version: i64,
        event_tx: broadcast::Sender<PipelineEvent>,
    ) -> Self {
        Self {
            db,
            config,
            resource_id,
            dictionary_version,
            event_tx,
        }
    }

    /// Get a receiver for pipeline events.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Run every stage for this resource, strictly in order:
    /// snapshot refresh, is-a expansion, mapping expansion, the three
    /// scoring folds, and the frequency rollup.
    ///
    /// A reference snapshot failure aborts before any scoring; any stage
    /// failure propagates after the preceding stages' work has committed,
    /// which a later re-run picks up where it stopped.
    pub async fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        info!(
            subsystem = "pipeline",
            component = "runner",
            op = "run",
            resource_id = self.resource_id,
            dictionary_version = self.dictionary_version,
            "Annotation pipeline run started"
        );

        // Reference data can change between runs; the snapshot is rebuilt
        // every time, never patched.
        let cache = Arc::new(self.db.reference.load_snapshot().await?);

        let expansion = ExpansionEngine::new(self.db.clone(), cache.clone(), self.config.batch_size);
        let aggregation = AggregationEngine::new(
            self.db.clone(),
            cache,
            self.config.weights,
            self.config.batch_size,
        );
        let rollup = ConceptFrequencyRollup::new(self.db.clone());

        let mut reports = Vec::with_capacity(6);
        self.run_stage(&mut reports, "isa_closure_expansion", expansion.isa_closure_expansion())
            .await?;
        self.run_stage(&mut reports, "mapping_expansion", expansion.mapping_expansion())
            .await?;
        self.run_stage(&mut reports, "aggregate_direct", aggregation.aggregate_direct())
            .await?;
        self.run_stage(
            &mut reports,
            "aggregate_isa_expanded",
            aggregation.aggregate_isa_expanded(),
        )
        .await?;
        self.run_stage(
            &mut reports,
            "aggregate_map_expanded",
            aggregation.aggregate_map_expanded(),
        )
        .await?;
        self.run_stage(
            &mut reports,
            "concept_frequency_recompute",
            rollup.recompute(),
        )
        .await?;

        let duration = start.elapsed();
        let summary = RunSummary {
            resource_id: self.resource_id,
            dictionary_version: self.dictionary_version,
            reports,
            duration,
        };

        info!(
            subsystem = "pipeline",
            component = "runner",
            op = "run",
            resource_id = self.resource_id,
            row_count = summary.total_rows(),
            duration_ms = duration.as_millis() as u64,
            "Annotation pipeline run complete"
        );
        let _ = self.event_tx.send(PipelineEvent::ResourceCompleted {
            resource_id: self.resource_id,
            duration_ms: duration.as_millis() as u64,
        });
        Ok(summary)
    }

    async fn run_stage<F>(
        &self,
        reports: &mut Vec<StageReport>,
        operation: &'static str,
        stage: F,
    ) -> Result<()>
    where
        F: std::future::Future<Output = Result<StageReport>>,
    {
        let _ = self.event_tx.send(PipelineEvent::StageStarted {
            resource_id: self.resource_id,
            operation,
        });

        match stage.await {
            Ok(report) => {
                let _ = self.event_tx.send(PipelineEvent::StageCompleted {
                    resource_id: self.resource_id,
                    operation,
                    rows_processed: report.rows_processed,
                    duration_ms: report.duration_ms(),
                });
                reports.push(report);
                Ok(())
            }
            Err(e) => {
                error!(
                    subsystem = "pipeline",
                    component = "runner",
                    op = operation,
                    resource_id = self.resource_id,
                    error = %e,
                    "Pipeline stage failed"
                );
                Err(e)
            }
        }
    }
}

/// One resource to process, with the reference stamp its evidence was
/// produced against.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRun {
    pub resource_id: i64,
    pub dictionary_version: i64,
}

/// Drives the pipelines of several resources, one after another.
pub struct PipelineRunner {
    db: Database,
    config: PipelineConfig,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineRunner {
    /// Create a runner over the given database.
    pub fn new(db: Database, config: PipelineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            db,
            config,
            event_tx,
        }
    }

    /// Get a receiver for events across all resource runs.
    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Run every resource's pipeline. A failing resource is logged,
    /// reported on the event channel, and abandoned; the remaining
    /// resources still run. Returns one outcome per requested resource,
    /// in order.
    pub async fn run_all(&self, runs: &[ResourceRun]) -> Vec<(i64, Result<RunSummary>)> {
        let mut outcomes = Vec::with_capacity(runs.len());
        for run in runs {
            let pipeline = AnnotationPipeline::with_events(
                self.db.clone(),
                self.config.clone(),
                run.resource_id,
                run.dictionary_version,
                self.event_tx.clone(),
            );
            let outcome = pipeline.run().await;
            if let Err(e) = &outcome {
                error!(
                    subsystem = "pipeline",
                    component = "runner",
                    op = "run_all",
                    resource_id = run.resource_id,
                    error = %e,
                    "Resource run abandoned"
                );
                let _ = self.event_tx.send(PipelineEvent::ResourceFailed {
                    resource_id: run.resource_id,
                    error: e.to_string(),
                });
            }
            outcomes.push((run.resource_id, outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_event_clone() {
        let event = PipelineEvent::StageCompleted {
            resource_id: 1,
            operation: "aggregate_direct",
            rows_processed: 42,
            duration_ms: 7,
        };
        match event.clone() {
            PipelineEvent::StageCompleted {
                resource_id,
                operation,
                rows_processed,
                duration_ms,
            } => {
                assert_eq!(resource_id, 1);
                assert_eq!(operation, "aggregate_direct");
                assert_eq!(rows_processed, 42);
                assert_eq!(duration_ms, 7);
            }
            _ => panic!("Wrong event variant"),
        }
    }

    #[test]
    fn test_run_summary_total_rows() {
        let summary = RunSummary {
            resource_id: 1,
            dictionary_version: 3,
            reports: vec![
                StageReport::new("a", 10, Duration::from_millis(1)),
                StageReport::new("b", 5, Duration::from_millis(1)),
            ],
            duration: Duration::from_millis(2),
        };
        assert_eq!(summary.total_rows(), 15);
    }
}
