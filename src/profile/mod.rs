//! User trait profile: extraction, merging, and the per-owner pipeline.
//!
//! A trait is a short labeled fact about the user ("morning runner",
//! "mentors juniors") with a category, keywords, an optional intensity
//! qualifier, and a confidence score. Traits accumulate across interview
//! turns; the label is the identity key, not the id.

pub mod extractor;
pub mod merge;
pub mod queue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use extractor::{ExtractionProposals, TraitExtractor};
pub use merge::{merge_proposals, MergeOutcome, TraitProposal};
pub use queue::{ExtractionJob, ExtractionQueue};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TraitCategory {
    Personality,
    Hobby,
    Skill,
    Work,
    Value,
    Lifestyle,
    Experience,
    #[default]
    Other,
}

impl TraitCategory {
    pub const ALL: [TraitCategory; 8] = [
        TraitCategory::Personality,
        TraitCategory::Hobby,
        TraitCategory::Skill,
        TraitCategory::Work,
        TraitCategory::Value,
        TraitCategory::Lifestyle,
        TraitCategory::Experience,
        TraitCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraitCategory::Personality => "personality",
            TraitCategory::Hobby => "hobby",
            TraitCategory::Skill => "skill",
            TraitCategory::Work => "work",
            TraitCategory::Value => "value",
            TraitCategory::Lifestyle => "lifestyle",
            TraitCategory::Experience => "experience",
            TraitCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<TraitCategory> {
        match s.trim().to_lowercase().as_str() {
            "personality" => Some(TraitCategory::Personality),
            "hobby" => Some(TraitCategory::Hobby),
            "skill" => Some(TraitCategory::Skill),
            "work" => Some(TraitCategory::Work),
            "value" => Some(TraitCategory::Value),
            "lifestyle" => Some(TraitCategory::Lifestyle),
            "experience" => Some(TraitCategory::Experience),
            "other" => Some(TraitCategory::Other),
            _ => None,
        }
    }

    /// Lenient parse for model output. Anything unrecognized lands in Other.
    pub fn parse_or_other(s: &str) -> TraitCategory {
        Self::parse(s).unwrap_or(TraitCategory::Other)
    }

    /// Example intensity qualifiers, weakest to strongest, offered to the
    /// extraction prompt.
    pub fn intensity_ladder(&self) -> &'static [&'static str] {
        match self {
            TraitCategory::Skill => {
                &["dabbling", "some experience", "confident", "seasoned", "professional"]
            }
            TraitCategory::Hobby => &["curious", "enjoys", "loves", "hooked", "devoted"],
            TraitCategory::Personality => &["slightly", "somewhat", "fairly", "very", "extremely"],
            _ => &["a little", "moderately", "quite", "strongly", "intensely"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTrait {
    pub id: String,
    pub label: String,
    pub category: TraitCategory,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub intensity: Option<String>,
    pub confidence: f32,
    pub source_turn_index: usize,
    pub extracted_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Derived projection of a trait set. Always recomputed from the traits,
/// never edited directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitsSummary {
    pub total_count: usize,
    pub category_breakdown: BTreeMap<TraitCategory, usize>,
    pub top_traits: Vec<String>,
}

/// Build the summary for a trait set: total, per-category counts, and the
/// top three labels by confidence (first extracted wins ties).
pub fn summarize(traits: &[UserTrait]) -> TraitsSummary {
    let mut category_breakdown: BTreeMap<TraitCategory, usize> = BTreeMap::new();
    for t in traits {
        *category_breakdown.entry(t.category).or_insert(0) += 1;
    }

    let mut ranked: Vec<&UserTrait> = traits.iter().collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    TraitsSummary {
        total_count: traits.len(),
        category_breakdown,
        top_traits: ranked.iter().take(3).map(|t| t.label.clone()).collect(),
    }
}

#[cfg(test)]
pub(crate) fn test_trait(label: &str, category: TraitCategory, confidence: f32) -> UserTrait {
    UserTrait {
        id: uuid::Uuid::new_v4().to_string(),
        label: label.to_string(),
        category,
        keywords: Vec::new(),
        intensity: None,
        confidence,
        source_turn_index: 0,
        extracted_at: Utc::now(),
        updated_at: None,
    }
}
