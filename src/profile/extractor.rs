//! Per-turn trait extraction against the text-completion service.
//!
//! The extractor sees one user/interviewer exchange plus the traits already
//! on file, and asks the model to propose brand-new traits or updates to
//! existing ones by id. Transport failures surface as errors so the caller
//! can report them; a response that merely fails to parse proposes nothing.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::llm_client::{parse_json_response, Message, TextCompletion};
use crate::profile::{TraitCategory, TraitProposal, UserTrait};

/// What one extraction call proposes. Both lists may be empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionProposals {
    #[serde(default)]
    pub new_traits: Vec<TraitProposal>,
    #[serde(default)]
    pub updated_traits: Vec<TraitProposal>,
}

impl ExtractionProposals {
    pub fn is_empty(&self) -> bool {
        self.new_traits.is_empty() && self.updated_traits.is_empty()
    }
}

pub struct TraitExtractor {
    llm: Arc<dyn TextCompletion>,
    model: Option<String>,
}

impl TraitExtractor {
    pub fn new(llm: Arc<dyn TextCompletion>, model: Option<String>) -> Self {
        Self { llm, model }
    }

    /// Ask the model what this exchange reveals about the user.
    ///
    /// Returns `Err` only when the request itself fails; an answer we
    /// cannot parse is logged and treated as an empty proposal set.
    pub async fn propose(
        &self,
        user_turn: &str,
        assistant_turn: &str,
        turn_index: usize,
        existing: &[UserTrait],
    ) -> Result<ExtractionProposals> {
        let prompt = build_extraction_prompt(user_turn, assistant_turn, existing);
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt,
        }];

        let response = self.llm.complete(messages, self.model.as_deref()).await?;

        match parse_json_response::<ExtractionProposals>(&response) {
            Ok(proposals) => Ok(proposals),
            Err(e) => {
                tracing::warn!(
                    "Trait extraction response for turn {} was not parseable: {}",
                    turn_index,
                    e
                );
                Ok(ExtractionProposals::default())
            }
        }
    }
}

fn build_extraction_prompt(user_turn: &str, assistant_turn: &str, existing: &[UserTrait]) -> String {
    let mut context = String::new();

    context.push_str("## Known Traits\n");
    if existing.is_empty() {
        context.push_str("None yet.\n");
    } else {
        for t in existing {
            context.push_str(&format!(
                "- id={} label=\"{}\" category={} confidence={:.2}\n",
                t.id,
                t.label,
                t.category.as_str(),
                t.confidence
            ));
        }
    }

    context.push_str("\n## Latest Exchange\n");
    context.push_str(&format!(
        "Interviewer: {}\nUser: {}\n",
        assistant_turn, user_turn
    ));

    let categories = TraitCategory::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You maintain a trait profile of the user based on an ongoing interview.\n\n{}\n\
         Rules:\n\
         1. Propose traits only about the user, and only what this exchange actually supports.\n\
         2. Category must be one of: {}.\n\
         3. If an exchange refines a known trait, return it under updated_traits with its id instead of adding a duplicate.\n\
         4. confidence is a number from 0.0 to 1.0.\n\
         5. intensity is optional; use a short qualifier such as \"{}\" for skills or \"{}\" for hobbies.\n\
         6. Return empty lists when the exchange reveals nothing new.\n\n\
         IMPORTANT: Respond with ONLY a JSON object:\n\
         {{\"new_traits\": [{{\"label\": \"trail running\", \"category\": \"hobby\", \"keywords\": [\"outdoors\"], \"intensity\": \"hooked\", \"confidence\": 0.8}}], \"updated_traits\": [{{\"id\": \"<existing id>\", \"label\": \"trail running\", \"category\": \"hobby\", \"keywords\": [], \"confidence\": 0.9}}]}}",
        context,
        categories,
        TraitCategory::Skill.intensity_ladder().join("\", \""),
        TraitCategory::Hobby.intensity_ladder().join("\", \"")
    )
}
