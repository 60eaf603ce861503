//! Post-interview categorization of deep-dive entries.
//!
//! Runs once, after the session reaches completion, over every collected
//! question/answer pair in a single batch request. Categorization is
//! advisory: any failure leaves the entries exactly as they were.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::interview::state::DynamicEntry;
use crate::llm_client::{parse_json_response, Message, TextCompletion};
use crate::profile::TraitCategory;

pub struct EntryCategorizer {
    llm: Arc<dyn TextCompletion>,
    model: Option<String>,
}

impl EntryCategorizer {
    pub fn new(llm: Arc<dyn TextCompletion>, model: Option<String>) -> Self {
        Self { llm, model }
    }

    /// Assign a category to every entry. Entries the model skips fall back
    /// to `other`; a malformed or failed response changes nothing.
    pub async fn categorize(&self, dynamic: &mut BTreeMap<u32, DynamicEntry>) {
        if dynamic.is_empty() {
            return;
        }

        let prompt = build_categorize_prompt(dynamic);
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt,
        }];

        let response = match self.llm.complete(messages, self.model.as_deref()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Entry categorization request failed: {}", e);
                return;
            }
        };

        let assignments: BTreeMap<String, String> = match parse_json_response(&response) {
            Ok(assignments) => assignments,
            Err(e) => {
                tracing::warn!("Entry categorization response was not a JSON map: {}", e);
                return;
            }
        };

        for (index, entry) in dynamic.values_mut().enumerate() {
            let category = assignments
                .get(&index.to_string())
                .map(|raw| TraitCategory::parse_or_other(raw))
                .unwrap_or(TraitCategory::Other);
            entry.category = Some(category);
        }
    }
}

fn build_categorize_prompt(dynamic: &BTreeMap<u32, DynamicEntry>) -> String {
    let mut listing = String::new();
    for (index, entry) in dynamic.values().enumerate() {
        listing.push_str(&format!(
            "{}. Q: {}\n   A: {}\n",
            index, entry.question, entry.answer
        ));
    }

    let categories = TraitCategory::ALL
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Assign each numbered interview answer to exactly one category.\n\n\
         ## Answers\n{}\n\
         Valid categories: {}\n\n\
         IMPORTANT: Respond with ONLY a JSON object mapping each entry number to one category, like:\n\
         {{\"0\": \"hobby\", \"1\": \"work\"}}",
        listing, categories
    )
}
