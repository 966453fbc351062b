//! Pure scoring functions for annotation evidence.
//!
//! Every contribution is `base * context_weight` where the base depends on
//! the kind of evidence. Keeping the arithmetic here, outside any SQL,
//! lets the engines fold contributions over a batch cursor and keeps the
//! formulas testable without a live database.

use crate::models::{TermEntry, WeightProfile};

/// How a direct annotation matched its concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectEvidenceKind {
    /// Externally reported, no free-text span.
    Reported,
    /// Tagger hit on the concept's preferred term.
    PreferredTerm,
    /// Tagger hit on a synonym.
    Synonym,
}

impl DirectEvidenceKind {
    /// Classify a hit from its resolved term entry. A tagger hit whose
    /// term is absent from the reference snapshot counts as a synonym:
    /// the span is real evidence, only the preferred flag is lost.
    pub fn from_term(term: Option<&TermEntry>) -> Self {
        match term {
            None => DirectEvidenceKind::Reported,
            Some(t) if t.is_preferred => DirectEvidenceKind::PreferredTerm,
            Some(_) => DirectEvidenceKind::Synonym,
        }
    }
}

/// Contribution of one direct annotation.
pub fn direct_contribution(
    weights: &WeightProfile,
    context_weight: f64,
    kind: DirectEvidenceKind,
) -> f64 {
    let base = match kind {
        DirectEvidenceKind::Reported => weights.reported_weight,
        DirectEvidenceKind::PreferredTerm => weights.preferred_term_weight,
        DirectEvidenceKind::Synonym => weights.synonym_weight,
    };
    base * context_weight
}

/// Contribution of one is-a expanded annotation.
///
/// `floor(10 * e^(-decay * level) + 1) * context_weight`: non-negative,
/// strictly decreasing in `parent_level`, 11x the context weight at level 0
/// and approaching 1x as the distance grows.
pub fn isa_contribution(weights: &WeightProfile, context_weight: f64, parent_level: i32) -> f64 {
    let decayed = 10.0 * (-weights.isa_decay_factor * parent_level as f64).exp();
    (decayed + 1.0).floor() * context_weight
}

/// Contribution of one mapping expanded annotation.
pub fn mapping_contribution(weights: &WeightProfile, context_weight: f64) -> f64 {
    weights.mapping_weight * context_weight
}
