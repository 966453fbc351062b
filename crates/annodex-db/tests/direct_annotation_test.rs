//! Integration tests for the direct evidence store.
//!
//! Covers duplicate suppression over the evidence key (including reported
//! hits with NULL term and span), bulk hit-file ingestion, and the
//! per-ontology deletion cascade.
//!
//! These tests need a live PostgreSQL; run with a `DATABASE_URL` pointing
//! at a scratch database and `cargo test -- --ignored`.

use std::io::Write;

use annodex_db::test_fixtures::TestDatabase;
use annodex_db::{ConceptAffinity, DirectAnnotationRepository, DirectStage};

struct Seeded {
    concept_id: i64,
    term_id: i64,
    context_id: i64,
    element_id: i64,
}

async fn seed_basic(t: &TestDatabase) -> Seeded {
    let ontology_id = t.seed_ontology("GO").await;
    let concept_id = t.seed_concept(ontology_id, "GO:0008150").await;
    let term_id = t.seed_term(concept_id, "biological process", true).await;
    let resource_id = t.seed_resource("GEO").await;
    let context_id = t
        .seed_context(resource_id, "title", 2.0, ConceptAffinity::FreeText)
        .await;
    let element_id = t.seed_element(resource_id, "GSE1000").await;
    Seeded {
        concept_id,
        term_id,
        context_id,
        element_id,
    }
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_duplicate_tagger_hit_adds_exactly_one_row() {
    let t = TestDatabase::new().await;
    let s = seed_basic(&t).await;

    let first = t
        .db
        .direct
        .add_tagger_hit(s.element_id, s.concept_id, s.context_id, s.term_id, 0, 18, 1)
        .await;
    let second = t
        .db
        .direct
        .add_tagger_hit(s.element_id, s.concept_id, s.context_id, s.term_id, 0, 18, 1)
        .await;

    assert!(first);
    assert!(!second);
    assert_eq!(
        t.db.direct.count_at_stage(DirectStage::Tagged).await.unwrap(),
        1
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_different_span_is_new_evidence() {
    let t = TestDatabase::new().await;
    let s = seed_basic(&t).await;

    assert!(
        t.db.direct
            .add_tagger_hit(s.element_id, s.concept_id, s.context_id, s.term_id, 0, 18, 1)
            .await
    );
    assert!(
        t.db.direct
            .add_tagger_hit(s.element_id, s.concept_id, s.context_id, s.term_id, 30, 48, 1)
            .await
    );
    assert_eq!(
        t.db.direct.count_at_stage(DirectStage::Tagged).await.unwrap(),
        2
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_duplicate_reported_hit_suppressed_despite_null_term() {
    let t = TestDatabase::new().await;
    let s = seed_basic(&t).await;

    let first = t
        .db
        .direct
        .add_reported_hit(s.element_id, s.concept_id, s.context_id, 1)
        .await;
    let second = t
        .db
        .direct
        .add_reported_hit(s.element_id, s.concept_id, s.context_id, 1)
        .await;

    assert!(first);
    assert!(!second);
    assert_eq!(
        t.db.direct.count_at_stage(DirectStage::Tagged).await.unwrap(),
        1
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_reported_and_tagger_hits_are_distinct_evidence() {
    let t = TestDatabase::new().await;
    let s = seed_basic(&t).await;

    assert!(
        t.db.direct
            .add_reported_hit(s.element_id, s.concept_id, s.context_id, 1)
            .await
    );
    assert!(
        t.db.direct
            .add_tagger_hit(s.element_id, s.concept_id, s.context_id, s.term_id, 0, 18, 1)
            .await
    );
    assert_eq!(
        t.db.direct.count_at_stage(DirectStage::Tagged).await.unwrap(),
        2
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_bulk_load_dedups_and_skips_bad_records() {
    let t = TestDatabase::new().await;
    let s = seed_basic(&t).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    // Two good records (the second repeats the first), one record with an
    // unknown term, one malformed line.
    writeln!(
        file,
        "{}\t0\t18\t{}\t{}",
        s.term_id, s.element_id, s.context_id
    )
    .unwrap();
    writeln!(
        file,
        "{}\t0\t18\t{}\t{}",
        s.term_id, s.element_id, s.context_id
    )
    .unwrap();
    writeln!(
        file,
        "{}\t20\t30\t{}\t{}",
        s.term_id, s.element_id, s.context_id
    )
    .unwrap();
    writeln!(file, "999999\t0\t5\t{}\t{}", s.element_id, s.context_id).unwrap();
    writeln!(file, "not\ta\tvalid\trecord").unwrap();
    file.flush().unwrap();

    let added = t.db.direct.bulk_load(file.path(), 1).await.unwrap();
    assert_eq!(added, 2);
    assert_eq!(
        t.db.direct.count_at_stage(DirectStage::Tagged).await.unwrap(),
        2
    );

    t.cleanup().await;
}

#[tokio::test]
#[ignore = "requires migrated database"]
async fn test_delete_by_ontology_leaves_other_ontologies_alone() {
    let t = TestDatabase::new().await;

    let retired = t.seed_ontology("OLD").await;
    let kept = t.seed_ontology("NEW").await;
    let retired_concept = t.seed_concept(retired, "OLD:1").await;
    let kept_concept = t.seed_concept(kept, "NEW:1").await;
    let resource_id = t.seed_resource("CT").await;
    let context_id = t
        .seed_context(resource_id, "summary", 1.0, ConceptAffinity::FreeText)
        .await;
    let element_id = t.seed_element(resource_id, "NCT0001").await;

    assert!(
        t.db.direct
            .add_reported_hit(element_id, retired_concept, context_id, 1)
            .await
    );
    assert!(
        t.db.direct
            .add_reported_hit(element_id, kept_concept, context_id, 1)
            .await
    );

    let removed = t.db.direct.delete_by_ontologies(&[retired]).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(
        t.db.direct.count_at_stage(DirectStage::Tagged).await.unwrap(),
        1
    );

    t.cleanup().await;
}
