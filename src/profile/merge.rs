//! Pure merge of extraction proposals into an owner's trait set.
//!
//! The label is the identity key: within one set, labels are unique
//! case-insensitively. Ids are stable handles assigned here on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TraitCategory, UserTrait};

/// One trait proposed by the extraction model. `id` is set when the model
/// claims to refine an existing trait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitProposal {
    #[serde(default)]
    pub id: Option<String>,
    pub label: String,
    #[serde(default)]
    pub category: TraitCategory,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub intensity: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub traits: Vec<UserTrait>,
    pub new_ids: Vec<String>,
    pub updated_ids: Vec<String>,
    pub skipped: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.new_ids.is_empty() || !self.updated_ids.is_empty()
    }
}

/// Apply one extraction batch to an existing trait set.
///
/// Updated proposals are applied first, then new ones, each list in order.
/// An update whose id matches nothing is demoted to a new proposal; a new
/// proposal whose label already exists (case-insensitive) becomes an update
/// of that entry instead. Updates refresh keywords, intensity, confidence
/// and timestamps; the stored label and category stay as first seen.
pub fn merge_proposals(
    existing: &[UserTrait],
    updated: &[TraitProposal],
    new: &[TraitProposal],
    turn_index: usize,
    now: DateTime<Utc>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        traits: existing.to_vec(),
        new_ids: Vec::new(),
        updated_ids: Vec::new(),
        skipped: 0,
    };

    for proposal in updated {
        if !is_valid(proposal) {
            outcome.skipped += 1;
            continue;
        }

        let matched = proposal
            .id
            .as_ref()
            .and_then(|id| outcome.traits.iter().position(|t| &t.id == id));

        match matched {
            Some(pos) => apply_update(&mut outcome, pos, proposal, now),
            // The model referenced an id we do not know. Keep the fact but
            // run it through label dedup like any new proposal.
            None => apply_new(&mut outcome, proposal, turn_index, now),
        }
    }

    for proposal in new {
        if !is_valid(proposal) {
            outcome.skipped += 1;
            continue;
        }
        apply_new(&mut outcome, proposal, turn_index, now);
    }

    outcome
}

fn is_valid(proposal: &TraitProposal) -> bool {
    !proposal.label.trim().is_empty()
        && proposal.confidence.is_finite()
        && (0.0..=1.0).contains(&proposal.confidence)
}

fn same_label(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn apply_update(outcome: &mut MergeOutcome, pos: usize, proposal: &TraitProposal, now: DateTime<Utc>) {
    let entry = &mut outcome.traits[pos];
    entry.keywords = proposal.keywords.clone();
    entry.intensity = proposal.intensity.clone();
    entry.confidence = proposal.confidence;
    entry.extracted_at = now;
    entry.updated_at = Some(now);

    let id = entry.id.clone();
    // A trait inserted earlier in this same batch counts as new, not updated.
    if !outcome.new_ids.contains(&id) && !outcome.updated_ids.contains(&id) {
        outcome.updated_ids.push(id);
    }
}

fn apply_new(
    outcome: &mut MergeOutcome,
    proposal: &TraitProposal,
    turn_index: usize,
    now: DateTime<Utc>,
) {
    if let Some(pos) = outcome
        .traits
        .iter()
        .position(|t| same_label(&t.label, &proposal.label))
    {
        apply_update(outcome, pos, proposal, now);
        return;
    }

    let trait_entry = UserTrait {
        id: Uuid::new_v4().to_string(),
        label: proposal.label.trim().to_string(),
        category: proposal.category,
        keywords: proposal.keywords.clone(),
        intensity: proposal.intensity.clone(),
        confidence: proposal.confidence,
        source_turn_index: turn_index,
        extracted_at: now,
        updated_at: None,
    };
    outcome.new_ids.push(trait_entry.id.clone());
    outcome.traits.push(trait_entry);
}
