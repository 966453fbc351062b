//! Data model for the annotation index.
//!
//! Reference entities (resources, contexts, ontologies, concepts, terms)
//! are written by the ontology-lifecycle manager and only read here.
//! Evidence entities (direct and expanded annotations) carry a forward-only
//! workflow stage marker that tracks how far each row has progressed
//! through expansion and aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// REFERENCE ENTITIES
// =============================================================================

/// One content source feeding the index (e.g. a gene-expression repository).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    /// Short unique name, e.g. "GEO" or "CT".
    pub name: String,
}

/// One ontology version loaded into the reference tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ontology {
    pub id: i64,
    pub acronym: String,
}

/// One ontology concept; identity is (ontology, local concept id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: i64,
    pub ontology_id: i64,
    pub local_id: String,
}

/// A surface term attached to a concept.
///
/// `is_preferred` marks the concept's preferred label as opposed to a
/// synonym; the distinction drives the direct-annotation weight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TermEntry {
    pub id: i64,
    pub concept_id: i64,
    pub is_preferred: bool,
}

/// How a context's content relates to ontology concepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptAffinity {
    /// Free text, annotated by the external term tagger.
    FreeText,
    /// Content kept as evidence but excluded from scoring.
    NotScored,
    /// Values are local concept ids of one fixed ontology.
    FixedOntology(i64),
}

impl ConceptAffinity {
    /// Database string for the affinity kind (the ontology id is stored in
    /// its own nullable column).
    pub fn kind_str(&self) -> &'static str {
        match self {
            ConceptAffinity::FreeText => "free_text",
            ConceptAffinity::NotScored => "not_scored",
            ConceptAffinity::FixedOntology(_) => "fixed_ontology",
        }
    }

    /// The fixed ontology id, if any.
    pub fn ontology_id(&self) -> Option<i64> {
        match self {
            ConceptAffinity::FixedOntology(id) => Some(*id),
            _ => None,
        }
    }

    /// Rebuild an affinity from its database representation.
    pub fn from_parts(kind: &str, ontology_id: Option<i64>) -> Result<Self> {
        match (kind, ontology_id) {
            ("free_text", _) => Ok(ConceptAffinity::FreeText),
            ("not_scored", _) => Ok(ConceptAffinity::NotScored),
            ("fixed_ontology", Some(id)) => Ok(ConceptAffinity::FixedOntology(id)),
            ("fixed_ontology", None) => Err(Error::InvalidInput(
                "fixed_ontology affinity without an ontology id".to_string(),
            )),
            (other, _) => Err(Error::InvalidInput(format!(
                "unknown concept affinity: {other}"
            ))),
        }
    }
}

/// A named content slot of a resource's schema (e.g. "title", "abstract").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub id: i64,
    pub resource_id: i64,
    pub name: String,
    /// Positive multiplier applied to every contribution from this slot.
    pub weight: f64,
    pub affinity: ConceptAffinity,
}

/// Context description supplied by a content producer when registering a
/// resource's structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSpec {
    pub name: String,
    pub weight: f64,
    pub affinity: ConceptAffinity,
}

/// One content unit of a resource; identity is (resource, local element id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: i64,
    pub resource_id: i64,
    pub local_id: String,
}

/// One is-a ancestor of a concept, taken from the precomputed closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsaAncestor {
    pub parent_concept_id: i64,
    /// Distance in the is-a closure, always >= 1.
    pub level: i32,
}

/// One cross-ontology mapping edge of a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedConcept {
    pub mapped_concept_id: i64,
    /// Open-ended category, e.g. "exact" or "inter-cui"; carried as text.
    pub mapping_type: String,
}

// =============================================================================
// WORKFLOW STAGES
// =============================================================================

/// Forward-only progress marker on a direct annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectStage {
    /// Fresh evidence, no expansion applied yet.
    Tagged,
    /// Is-a closure expansion has consumed this row.
    IsaExpanded,
    /// Cross-ontology mapping expansion has consumed this row.
    MappingExpanded,
    /// Scoring has folded this row into the aggregation.
    Aggregated,
}

impl DirectStage {
    /// Convert stage to its database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectStage::Tagged => "tagged",
            DirectStage::IsaExpanded => "isa_expanded",
            DirectStage::MappingExpanded => "mapping_expanded",
            DirectStage::Aggregated => "aggregated",
        }
    }

    /// Parse a stage from its database string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "tagged" => Ok(DirectStage::Tagged),
            "isa_expanded" => Ok(DirectStage::IsaExpanded),
            "mapping_expanded" => Ok(DirectStage::MappingExpanded),
            "aggregated" => Ok(DirectStage::Aggregated),
            other => Err(Error::InvalidInput(format!(
                "unknown direct annotation stage: {other}"
            ))),
        }
    }

    /// The stage a transition out of this one lands on, if any.
    pub fn next(&self) -> Option<DirectStage> {
        match self {
            DirectStage::Tagged => Some(DirectStage::IsaExpanded),
            DirectStage::IsaExpanded => Some(DirectStage::MappingExpanded),
            DirectStage::MappingExpanded => Some(DirectStage::Aggregated),
            DirectStage::Aggregated => None,
        }
    }
}

/// Forward-only progress marker on an expanded annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpandedStage {
    /// Derived evidence waiting to be folded into the aggregation.
    Pending,
    /// Scoring has consumed this row.
    Aggregated,
}

impl ExpandedStage {
    /// Convert stage to its database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpandedStage::Pending => "pending",
            ExpandedStage::Aggregated => "aggregated",
        }
    }

    /// Parse a stage from its database string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ExpandedStage::Pending),
            "aggregated" => Ok(ExpandedStage::Aggregated),
            other => Err(Error::InvalidInput(format!(
                "unknown expanded annotation stage: {other}"
            ))),
        }
    }
}

// =============================================================================
// EVIDENCE ENTITIES
// =============================================================================

/// A first-order match between an element and a concept.
///
/// Tagger hits carry a term id and span; reported hits carry neither.
/// Rows are unique over (element, concept, context, term, span); a
/// duplicate insert is rejected, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectAnnotation {
    pub id: i64,
    pub element_id: i64,
    pub concept_id: i64,
    pub context_id: i64,
    pub term_id: Option<i64>,
    pub span_from: Option<i32>,
    pub span_to: Option<i32>,
    /// Reference-data snapshot stamp this annotation was produced against.
    pub dictionary_version: i64,
    pub stage: DirectStage,
    pub created_at_utc: DateTime<Utc>,
}

impl DirectAnnotation {
    /// Whether this is an externally reported hit (no free-text span).
    pub fn is_reported(&self) -> bool {
        self.term_id.is_none()
    }
}

/// An annotation derived by walking the is-a closure up from a direct one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsaExpandedAnnotation {
    pub id: i64,
    pub element_id: i64,
    /// The ancestor concept being credited.
    pub concept_id: i64,
    pub context_id: i64,
    /// The concept that was directly annotated.
    pub child_concept_id: i64,
    /// Distance between child and ancestor, always >= 1.
    pub parent_level: i32,
    pub stage: ExpandedStage,
}

/// An annotation derived through a cross-ontology mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapExpandedAnnotation {
    pub id: i64,
    pub element_id: i64,
    /// The mapped concept being credited.
    pub concept_id: i64,
    pub context_id: i64,
    /// The concept that was directly annotated.
    pub source_concept_id: i64,
    pub mapping_type: String,
    pub stage: ExpandedStage,
}

/// Derived evidence, either is-a or mapping based.
///
/// Both variants share the pending-aggregation lifecycle; they differ only
/// in their provenance payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpandedAnnotation {
    Isa(IsaExpandedAnnotation),
    Mapping(MapExpandedAnnotation),
}

impl ExpandedAnnotation {
    /// The element being credited.
    pub fn element_id(&self) -> i64 {
        match self {
            ExpandedAnnotation::Isa(a) => a.element_id,
            ExpandedAnnotation::Mapping(a) => a.element_id,
        }
    }

    /// The derived concept being credited.
    pub fn concept_id(&self) -> i64 {
        match self {
            ExpandedAnnotation::Isa(a) => a.concept_id,
            ExpandedAnnotation::Mapping(a) => a.concept_id,
        }
    }

    /// The context the original evidence came from.
    pub fn context_id(&self) -> i64 {
        match self {
            ExpandedAnnotation::Isa(a) => a.context_id,
            ExpandedAnnotation::Mapping(a) => a.context_id,
        }
    }
}

/// New is-a expansion row, produced by the expansion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIsaExpansion {
    pub element_id: i64,
    pub concept_id: i64,
    pub context_id: i64,
    pub child_concept_id: i64,
    pub parent_level: i32,
}

/// New mapping expansion row, produced by the expansion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMapExpansion {
    pub element_id: i64,
    pub concept_id: i64,
    pub context_id: i64,
    pub source_concept_id: i64,
    pub mapping_type: String,
}

/// Cumulative score for one (element, concept) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub element_id: i64,
    pub concept_id: i64,
    /// Additive, never negative, never reset except by explicit deletion.
    pub score: f64,
}

/// Per-concept rollup over the aggregation table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConceptFrequencyRecord {
    pub concept_id: i64,
    pub element_count: i64,
    pub score_sum: f64,
}

// =============================================================================
// WEIGHT PROFILE
// =============================================================================

/// Named scoring constants supplied per pipeline run, immutable during it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    /// Weight of an externally reported hit (no free-text span).
    pub reported_weight: f64,
    /// Weight of a tagger hit on a concept's preferred term.
    pub preferred_term_weight: f64,
    /// Weight of a tagger hit on a synonym.
    pub synonym_weight: f64,
    /// Weight of a cross-ontology mapping expansion.
    pub mapping_weight: f64,
    /// Exponential decay rate over is-a distance.
    pub isa_decay_factor: f64,
}

impl Default for WeightProfile {
    fn default() -> Self {
        Self {
            reported_weight: defaults::REPORTED_WEIGHT,
            preferred_term_weight: defaults::PREFERRED_TERM_WEIGHT,
            synonym_weight: defaults::SYNONYM_WEIGHT,
            mapping_weight: defaults::MAPPING_WEIGHT,
            isa_decay_factor: defaults::ISA_DECAY_FACTOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_stage_round_trip() {
        for stage in [
            DirectStage::Tagged,
            DirectStage::IsaExpanded,
            DirectStage::MappingExpanded,
            DirectStage::Aggregated,
        ] {
            assert_eq!(DirectStage::parse_str(stage.as_str()).unwrap(), stage);
        }
    }

    #[test]
    fn test_direct_stage_unknown() {
        assert!(DirectStage::parse_str("done").is_err());
    }

    #[test]
    fn test_direct_stage_order_is_forward_only() {
        assert_eq!(DirectStage::Tagged.next(), Some(DirectStage::IsaExpanded));
        assert_eq!(
            DirectStage::IsaExpanded.next(),
            Some(DirectStage::MappingExpanded)
        );
        assert_eq!(
            DirectStage::MappingExpanded.next(),
            Some(DirectStage::Aggregated)
        );
        assert_eq!(DirectStage::Aggregated.next(), None);
    }

    #[test]
    fn test_expanded_stage_round_trip() {
        for stage in [ExpandedStage::Pending, ExpandedStage::Aggregated] {
            assert_eq!(ExpandedStage::parse_str(stage.as_str()).unwrap(), stage);
        }
    }

    #[test]
    fn test_affinity_round_trip() {
        let free = ConceptAffinity::FreeText;
        assert_eq!(
            ConceptAffinity::from_parts(free.kind_str(), free.ontology_id()).unwrap(),
            free
        );

        let fixed = ConceptAffinity::FixedOntology(7);
        assert_eq!(
            ConceptAffinity::from_parts(fixed.kind_str(), fixed.ontology_id()).unwrap(),
            fixed
        );
    }

    #[test]
    fn test_affinity_fixed_requires_ontology() {
        assert!(ConceptAffinity::from_parts("fixed_ontology", None).is_err());
    }

    #[test]
    fn test_affinity_unknown_kind() {
        assert!(ConceptAffinity::from_parts("mystery", None).is_err());
    }

    #[test]
    fn test_reported_hit_has_no_term() {
        let ann = DirectAnnotation {
            id: 1,
            element_id: 10,
            concept_id: 20,
            context_id: 30,
            term_id: None,
            span_from: None,
            span_to: None,
            dictionary_version: 1,
            stage: DirectStage::Tagged,
            created_at_utc: Utc::now(),
        };
        assert!(ann.is_reported());
    }

    #[test]
    fn test_expanded_annotation_accessors() {
        let isa = ExpandedAnnotation::Isa(IsaExpandedAnnotation {
            id: 1,
            element_id: 5,
            concept_id: 6,
            context_id: 7,
            child_concept_id: 8,
            parent_level: 2,
            stage: ExpandedStage::Pending,
        });
        assert_eq!(isa.element_id(), 5);
        assert_eq!(isa.concept_id(), 6);
        assert_eq!(isa.context_id(), 7);

        let map = ExpandedAnnotation::Mapping(MapExpandedAnnotation {
            id: 2,
            element_id: 9,
            concept_id: 10,
            context_id: 11,
            source_concept_id: 12,
            mapping_type: "exact".to_string(),
            stage: ExpandedStage::Pending,
        });
        assert_eq!(map.element_id(), 9);
        assert_eq!(map.concept_id(), 10);
    }

    #[test]
    fn test_weight_profile_default() {
        let w = WeightProfile::default();
        assert_eq!(w.preferred_term_weight, 10.0);
        assert_eq!(w.reported_weight, 8.0);
        assert_eq!(w.synonym_weight, 7.0);
        assert_eq!(w.mapping_weight, 7.0);
        assert_eq!(w.isa_decay_factor, 0.2);
    }
}
