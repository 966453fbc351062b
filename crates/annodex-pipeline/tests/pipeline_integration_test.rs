//! End-to-end pipeline integration tests.
//!
//! Seeds reference data and raw hits, runs every stage through the
//! per-resource pipeline, and checks the cumulative scores, the stage
//! markers, idempotent re-runs, and the ontology retirement cascade.

use annodex_core::{
    AggregationRepository, ConceptAffinity, ConceptFrequencyRepository,
    DirectAnnotationRepository, DirectStage, ExpandedStage,
};
use annodex_db::test_fixtures::TestDatabase;
use annodex_pipeline::{AnnotationPipeline, PipelineConfig};

struct Fixture {
    child_concept: i64,
    parent_concept: i64,
    mapped_concept: i64,
    mapped_ontology: i64,
    element_id: i64,
    resource_id: i64,
}

/// One element annotated with concept `child` twice: a preferred-term
/// tagger hit in a weight-2.0 context and a reported hit in a weight-1.0
/// context. `child` has one level-1 ancestor and one "exact" mapping into
/// a second ontology.
async fn seed_pipeline_fixture(t: &TestDatabase) -> Fixture {
    let source_ontology = t.seed_ontology("GO").await;
    let mapped_ontology = t.seed_ontology("MSH").await;

    let child_concept = t.seed_concept(source_ontology, "GO:0007165").await;
    let parent_concept = t.seed_concept(source_ontology, "GO:0008150").await;
    let mapped_concept = t.seed_concept(mapped_ontology, "D015398").await;

    let term_id = t.seed_term(child_concept, "signal transduction", true).await;
    t.seed_isa_edge(child_concept, parent_concept, 1).await;
    t.seed_mapping(child_concept, mapped_concept, "exact").await;

    let resource_id = t.seed_resource("GEO").await;
    let title_context = t
        .seed_context(resource_id, "title", 2.0, ConceptAffinity::FreeText)
        .await;
    let abstract_context = t
        .seed_context(resource_id, "abstract", 1.0, ConceptAffinity::FreeText)
        .await;
    let element_id = t.seed_element(resource_id, "GSE1000").await;

    assert!(
        t.db.direct
            .add_tagger_hit(element_id, child_concept, title_context, term_id, 0, 19, 1)
            .await
    );
    assert!(
        t.db.direct
            .add_reported_hit(element_id, child_concept, abstract_context, 1)
            .await
    );

    Fixture {
        child_concept,
        parent_concept,
        mapped_concept,
        mapped_ontology,
        element_id,
        resource_id,
    }
}

fn pipeline(t: &TestDatabase, resource_id: i64) -> AnnotationPipeline {
    AnnotationPipeline::new(
        t.db.clone(),
        PipelineConfig::default().with_batch_size(100),
        resource_id,
        1,
    )
}

async fn score(t: &TestDatabase, element_id: i64, concept_id: i64) -> f64 {
    t.db.aggregation
        .fetch(element_id, concept_id)
        .await
        .unwrap()
        .expect("aggregation record must exist")
        .score
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_full_run_scores_every_evidence_path() {
    let t = TestDatabase::new().await;
    let f = seed_pipeline_fixture(&t).await;

    let summary = pipeline(&t, f.resource_id).run().await.unwrap();
    assert_eq!(summary.total_rows(), 2 + 2 + 2 + 2 + 2 + 3);

    // Direct: preferred term 10*2.0 plus reported 8*1.0.
    assert_eq!(score(&t, f.element_id, f.child_concept).await, 28.0);
    // Is-a level 1: floor(10*e^-0.2 + 1) = 9, over both contexts.
    assert_eq!(score(&t, f.element_id, f.parent_concept).await, 27.0);
    // Mapping: 7 over both contexts.
    assert_eq!(score(&t, f.element_id, f.mapped_concept).await, 21.0);

    assert_eq!(t.db.aggregation.number_of_entries().await.unwrap(), 3);

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_every_row_ends_at_its_terminal_stage() {
    let t = TestDatabase::new().await;
    let f = seed_pipeline_fixture(&t).await;

    pipeline(&t, f.resource_id).run().await.unwrap();

    for stage in [
        DirectStage::Tagged,
        DirectStage::IsaExpanded,
        DirectStage::MappingExpanded,
    ] {
        assert_eq!(t.db.direct.count_at_stage(stage).await.unwrap(), 0);
    }
    assert_eq!(
        t.db.direct
            .count_at_stage(DirectStage::Aggregated)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        t.db.expanded
            .count_isa_at_stage(ExpandedStage::Pending)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        t.db.expanded
            .count_isa_at_stage(ExpandedStage::Aggregated)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        t.db.expanded
            .count_map_at_stage(ExpandedStage::Aggregated)
            .await
            .unwrap(),
        2
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_rerun_never_double_counts() {
    let t = TestDatabase::new().await;
    let f = seed_pipeline_fixture(&t).await;

    pipeline(&t, f.resource_id).run().await.unwrap();
    let first = score(&t, f.element_id, f.child_concept).await;

    // All rows sit past their input stages now; a re-invocation must be a
    // no-op for scores.
    let summary = pipeline(&t, f.resource_id).run().await.unwrap();
    let rerun_rows: u64 = summary
        .reports
        .iter()
        .filter(|r| r.operation != "concept_frequency_recompute")
        .map(|r| r.rows_processed)
        .sum();
    assert_eq!(rerun_rows, 0);

    assert_eq!(score(&t, f.element_id, f.child_concept).await, first);
    assert_eq!(score(&t, f.element_id, f.parent_concept).await, 27.0);
    assert_eq!(t.db.aggregation.number_of_entries().await.unwrap(), 3);

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_rollup_matches_aggregation() {
    let t = TestDatabase::new().await;
    let f = seed_pipeline_fixture(&t).await;

    pipeline(&t, f.resource_id).run().await.unwrap();

    let child = t
        .db
        .concept_frequency
        .fetch(f.child_concept)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(child.element_count, 1);
    assert_eq!(child.score_sum, 28.0);

    let parent = t
        .db
        .concept_frequency
        .fetch(f.parent_concept)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.element_count, 1);
    assert_eq!(parent.score_sum, 27.0);

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_retiring_an_ontology_cascades_everywhere() {
    let t = TestDatabase::new().await;
    let f = seed_pipeline_fixture(&t).await;

    pipeline(&t, f.resource_id).run().await.unwrap();
    assert_eq!(t.db.aggregation.number_of_entries().await.unwrap(), 3);

    t.db.delete_ontologies(&[f.mapped_ontology]).await.unwrap();

    assert_eq!(t.db.aggregation.number_of_entries().await.unwrap(), 2);
    assert!(t
        .db
        .aggregation
        .fetch(f.element_id, f.mapped_concept)
        .await
        .unwrap()
        .is_none());
    assert!(t
        .db
        .concept_frequency
        .fetch(f.mapped_concept)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        t.db.expanded
            .count_map_at_stage(ExpandedStage::Aggregated)
            .await
            .unwrap(),
        0
    );
    // The untouched ontology keeps its evidence.
    assert_eq!(score(&t, f.element_id, f.child_concept).await, 28.0);
    assert_eq!(score(&t, f.element_id, f.parent_concept).await, 27.0);

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_not_scored_context_is_stored_but_never_scored() {
    let t = TestDatabase::new().await;

    let ontology_id = t.seed_ontology("GO").await;
    let concept_id = t.seed_concept(ontology_id, "GO:1").await;
    let resource_id = t.seed_resource("GEO").await;
    let context_id = t
        .seed_context(resource_id, "raw_metadata", 3.0, ConceptAffinity::NotScored)
        .await;
    let element_id = t.seed_element(resource_id, "GSE1").await;

    assert!(
        t.db.direct
            .add_reported_hit(element_id, concept_id, context_id, 1)
            .await
    );

    pipeline(&t, resource_id).run().await.unwrap();

    // The evidence row was consumed by the pipeline but produced no score.
    assert_eq!(
        t.db.direct
            .count_at_stage(DirectStage::Aggregated)
            .await
            .unwrap(),
        1
    );
    assert_eq!(t.db.aggregation.number_of_entries().await.unwrap(), 0);

    t.cleanup().await;
}
