//! Pure derivation of interview state from conversation history.
//!
//! State is never stored incrementally: every request re-reduces the full
//! history, so a retried request cannot double-advance the step counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::modes::{mode_config, FixedFieldKind, InterviewMode, ModeConfig};
use crate::profile::TraitCategory;

/// Upper bound for the deterministic fallback when name normalization
/// strips an answer down to nothing.
const NAME_MAX_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One deep-dive exchange. `category` stays empty until the batch
/// classifier runs at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicEntry {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: Option<TraitCategory>,
}

/// Everything the interview has collected: fixed fields by name, deep-dive
/// entries keyed contiguously from 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedState {
    pub fixed: BTreeMap<String, String>,
    pub dynamic: BTreeMap<u32, DynamicEntry>,
}

/// Pre-known fixed values for a returning user. Only honored when it
/// covers every fixed field of the mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedProfile {
    #[serde(default)]
    pub fixed: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedFieldUpdate {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterviewState {
    pub mode: InterviewMode,
    pub collected: CollectedState,
    pub current_step: u32,
    pub total_steps: Option<u32>,
    pub fixed_phase_complete: bool,
    pub is_completed: bool,
    /// Set when the latest user turn resolved a fixed field, so callers can
    /// reflect it immediately instead of waiting for completion.
    pub resolved_this_turn: Option<FixedFieldUpdate>,
}

impl InterviewState {
    pub fn deep_steps_done(&self) -> u32 {
        self.collected.dynamic.len() as u32
    }
}

/// Reduce a conversation history to its canonical state under a mode.
pub fn derive_state(
    history: &[ConversationTurn],
    mode: InterviewMode,
    seed: Option<&SeedProfile>,
) -> InterviewState {
    let cfg = mode_config(mode);

    if let Some(seed) = seed {
        if covers_all_fixed(seed, &cfg) {
            return derive_seeded(history, &cfg, seed);
        }
    }

    let user_positions: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, t)| t.role == Role::User)
        .map(|(i, _)| i)
        .collect();
    let fixed_len = cfg.fixed_fields.len();

    let mut collected = CollectedState::default();
    let mut resolved_this_turn = None;

    // Fixed phase: one user turn per field, strictly in order. A field is
    // never revisited once the step counter has moved past it.
    let filled = user_positions.len().min(fixed_len);
    for (i, field) in cfg.fixed_fields.iter().take(filled).enumerate() {
        let turn = &history[user_positions[i]];
        let value = extract_fixed_value(field.kind, &turn.text);
        if i + 1 == user_positions.len() {
            resolved_this_turn = Some(FixedFieldUpdate {
                field: field.name.to_string(),
                value: value.clone(),
            });
        }
        collected.fixed.insert(field.name.to_string(), value);
    }

    // Deep dive: every later user turn answers the nearest preceding
    // assistant turn in the full history.
    let mut key: u32 = 1;
    for &pos in user_positions.iter().skip(fixed_len) {
        let question = nearest_preceding_assistant(history, pos)
            .map(|t| extract_question(&t.text))
            .unwrap_or_default();
        collected.dynamic.insert(
            key,
            DynamicEntry {
                question,
                answer: history[pos].text.clone(),
                category: None,
            },
        );
        key += 1;
    }

    let current_step = user_positions.len() as u32;
    finish_state(cfg, collected, current_step, resolved_this_turn)
}

/// Seeded branch: the fixed phase is already complete, and every user turn
/// pairs with the assistant turn at the same index of the filtered
/// assistant subsequence.
fn derive_seeded(
    history: &[ConversationTurn],
    cfg: &ModeConfig,
    seed: &SeedProfile,
) -> InterviewState {
    let mut collected = CollectedState::default();
    for field in &cfg.fixed_fields {
        if let Some(value) = seed.fixed.get(field.name) {
            collected.fixed.insert(field.name.to_string(), value.clone());
        }
    }

    let user_turns: Vec<&ConversationTurn> =
        history.iter().filter(|t| t.role == Role::User).collect();
    let assistant_turns: Vec<&ConversationTurn> = history
        .iter()
        .filter(|t| t.role == Role::Assistant)
        .collect();

    for (i, turn) in user_turns.iter().enumerate() {
        let question = assistant_turns
            .get(i)
            .map(|t| extract_question(&t.text))
            .unwrap_or_default();
        collected.dynamic.insert(
            (i + 1) as u32,
            DynamicEntry {
                question,
                answer: turn.text.clone(),
                category: None,
            },
        );
    }

    let current_step = cfg.fixed_len() + user_turns.len() as u32;
    finish_state(cfg.clone(), collected, current_step, None)
}

fn finish_state(
    cfg: ModeConfig,
    collected: CollectedState,
    current_step: u32,
    resolved_this_turn: Option<FixedFieldUpdate>,
) -> InterviewState {
    let total_steps = cfg.total_steps();
    InterviewState {
        mode: cfg.mode,
        fixed_phase_complete: current_step >= cfg.fixed_len(),
        is_completed: total_steps.map_or(false, |total| current_step >= total),
        collected,
        current_step,
        total_steps,
        resolved_this_turn,
    }
}

fn covers_all_fixed(seed: &SeedProfile, cfg: &ModeConfig) -> bool {
    cfg.fixed_fields.iter().all(|f| {
        seed.fixed
            .get(f.name)
            .map_or(false, |v| !v.trim().is_empty())
    })
}

fn nearest_preceding_assistant(
    history: &[ConversationTurn],
    pos: usize,
) -> Option<&ConversationTurn> {
    history[..pos].iter().rev().find(|t| t.role == Role::Assistant)
}

fn extract_fixed_value(kind: FixedFieldKind, text: &str) -> String {
    match kind {
        FixedFieldKind::PersonName => normalize_person_name(text),
        FixedFieldKind::FreeText => text.to_string(),
    }
}

/// Take the first sentence of an assistant turn that contains a question
/// mark. If no sentence does, the whole turn is the question, verbatim.
pub fn extract_question(text: &str) -> String {
    let mut sentence = String::new();
    for ch in text.chars() {
        sentence.push(ch);
        if matches!(ch, '.' | '!' | '?' | '。' | '！' | '？' | '\n') {
            if sentence.contains('?') || sentence.contains('？') {
                return sentence.trim().to_string();
            }
            sentence.clear();
        }
    }
    text.to_string()
}

/// Strip the phrases people wrap around their name ("call me ...",
/// trailing "thanks") and hand back just the name. Falls back to a bounded
/// slice of the raw answer rather than ever returning nothing.
pub fn normalize_person_name(raw: &str) -> String {
    let mut name = raw.trim().to_string();

    let leading = [
        r"(?i)^please call me\s+",
        r"(?i)^you can call me\s+",
        r"(?i)^just call me\s+",
        r"(?i)^call me\s+",
        r"(?i)^my name is\s+",
        r"(?i)^my name's\s+",
        r"(?i)^everyone calls me\s+",
        r"(?i)^i'm\s+",
        r"(?i)^i am\s+",
        r"(?i)^it's\s+",
        r"(?i)^it is\s+",
        r"(?i)^this is\s+",
    ];
    for pattern in &leading {
        if let Ok(re) = regex_lite::Regex::new(pattern) {
            if let Some(m) = re.find(&name) {
                name = name[m.end()..].to_string();
                break;
            }
        }
    }

    if let Ok(re) = regex_lite::Regex::new(r"(?i)[\s,]*(please|thanks|thank you)?[\s.,!?！？。]*$") {
        name = re.replace(&name, "").to_string();
    }

    let name = name.trim();
    if name.is_empty() {
        fallback_name(raw)
    } else {
        name.to_string()
    }
}

fn fallback_name(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | '！' | '？' | '。'))
        .trim()
        .chars()
        .take(NAME_MAX_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(pairs: &[(&str, &str)]) -> Vec<ConversationTurn> {
        let mut history = Vec::new();
        for (question, answer) in pairs {
            history.push(ConversationTurn::assistant(*question));
            history.push(ConversationTurn::user(*answer));
        }
        history
    }

    #[test]
    fn derivation_is_deterministic() {
        let history = exchange(&[
            ("What should I call you?", "Call me Kai"),
            ("What do you do for work?", "I build bridges."),
            ("What does a typical day look like?", "Early site visits, then drawings."),
        ]);

        let first = derive_state(&history, InterviewMode::FirstMeeting, None);
        let second = derive_state(&history, InterviewMode::FirstMeeting, None);
        assert_eq!(first, second);
    }

    #[test]
    fn call_me_kai_resolves_the_name_field() {
        let history = exchange(&[("What should I call you?", "Call me Kai")]);

        let state = derive_state(&history, InterviewMode::FirstMeeting, None);

        assert_eq!(state.collected.fixed.get("preferred_name").map(String::as_str), Some("Kai"));
        assert_eq!(state.current_step, 1);
        assert!(!state.fixed_phase_complete);
        assert_eq!(
            state.resolved_this_turn,
            Some(FixedFieldUpdate {
                field: "preferred_name".to_string(),
                value: "Kai".to_string(),
            })
        );
    }

    #[test]
    fn fixed_fields_fill_strictly_in_order() {
        let one_answer = exchange(&[("What should I call you?", "Maya")]);
        let state = derive_state(&one_answer, InterviewMode::FirstMeeting, None);
        assert!(state.collected.fixed.contains_key("preferred_name"));
        assert!(!state.collected.fixed.contains_key("occupation"));

        let two_answers = exchange(&[
            ("What should I call you?", "Maya"),
            ("What do you do?", "Letterpress printing."),
        ]);
        let state = derive_state(&two_answers, InterviewMode::FirstMeeting, None);
        assert!(state.collected.fixed.contains_key("preferred_name"));
        assert!(state.collected.fixed.contains_key("occupation"));
        assert_eq!(state.current_step, 2);
    }

    #[test]
    fn free_text_fields_pass_through_unchanged() {
        let history = exchange(&[
            ("What should I call you?", "Ana"),
            ("What do you do?", "I herd alpacas and do their taxes. "),
        ]);

        let state = derive_state(&history, InterviewMode::FirstMeeting, None);
        assert_eq!(
            state.collected.fixed.get("occupation").map(String::as_str),
            Some("I herd alpacas and do their taxes. ")
        );
    }

    #[test]
    fn fixed_phase_complete_iff_step_reaches_fixed_len() {
        // FirstMeeting has two fixed fields.
        for answers in 0..5usize {
            let pairs: Vec<(&str, &str)> = (0..answers).map(|_| ("Question?", "answer")).collect();
            let history = exchange(&pairs);
            let state = derive_state(&history, InterviewMode::FirstMeeting, None);
            assert_eq!(
                state.fixed_phase_complete,
                state.current_step >= 2,
                "mismatch at {} answers",
                answers
            );
        }
    }

    #[test]
    fn deep_dive_pairs_with_nearest_preceding_assistant_turn() {
        let history = vec![
            ConversationTurn::assistant("What should I call you?"),
            ConversationTurn::user("Kai"),
            ConversationTurn::assistant("Nice. What do you do for work?"),
            ConversationTurn::user("I restore pianos."),
            ConversationTurn::assistant("Lovely. What does a typical day look like for you?"),
            ConversationTurn::user("Tuning in the morning, glue in the afternoon."),
        ];

        let state = derive_state(&history, InterviewMode::FirstMeeting, None);

        let entry = state.collected.dynamic.get(&1).expect("first deep-dive entry");
        assert_eq!(entry.question, "What does a typical day look like for you?");
        assert_eq!(entry.answer, "Tuning in the morning, glue in the afternoon.");
        assert!(entry.category.is_none());
    }

    #[test]
    fn question_extraction_takes_first_question_sentence() {
        assert_eq!(
            extract_question("Thanks for that. What drives you? And why?"),
            "What drives you?"
        );
        assert_eq!(extract_question("今日は楽しかったですね。明日は何をしますか？続けて！"), "明日は何をしますか？");
    }

    #[test]
    fn question_extraction_falls_back_to_whole_turn() {
        assert_eq!(
            extract_question("Tell me more about that."),
            "Tell me more about that."
        );
    }

    #[test]
    fn consecutive_user_turns_share_their_question() {
        let history = vec![
            ConversationTurn::assistant("What should I call you?"),
            ConversationTurn::user("Kai"),
            ConversationTurn::assistant("What do you do?"),
            ConversationTurn::user("Carpenter."),
            ConversationTurn::assistant("What has been keeping you busy lately?"),
            ConversationTurn::user("A staircase commission."),
            ConversationTurn::user("Also teaching my kid to whittle."),
        ];

        let state = derive_state(&history, InterviewMode::FirstMeeting, None);
        let first = &state.collected.dynamic[&1];
        let second = &state.collected.dynamic[&2];
        assert_eq!(first.question, second.question);
        assert_ne!(first.answer, second.answer);
    }

    #[test]
    fn dynamic_keys_are_contiguous_from_one() {
        let pairs: Vec<(&str, &str)> = (0..6).map(|_| ("Next question?", "an answer")).collect();
        let history = exchange(&pairs);

        let state = derive_state(&history, InterviewMode::FirstMeeting, None);
        let keys: Vec<u32> = state.collected.dynamic.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3, 4]);
    }

    #[test]
    fn bounded_mode_completes_at_total_steps() {
        let pairs: Vec<(&str, &str)> = (0..7).map(|_| ("Q?", "a")).collect();
        let complete = derive_state(&exchange(&pairs), InterviewMode::FirstMeeting, None);
        assert!(complete.is_completed);
        assert_eq!(complete.total_steps, Some(7));

        let pairs: Vec<(&str, &str)> = (0..6).map(|_| ("Q?", "a")).collect();
        let in_progress = derive_state(&exchange(&pairs), InterviewMode::FirstMeeting, None);
        assert!(!in_progress.is_completed);
    }

    #[test]
    fn endless_mode_never_completes_from_turn_count() {
        let pairs: Vec<(&str, &str)> = (0..50).map(|_| ("Q?", "a")).collect();
        let state = derive_state(&exchange(&pairs), InterviewMode::Endless, None);

        assert!(!state.is_completed);
        assert_eq!(state.total_steps, None);
        assert_eq!(state.current_step, 50);
    }

    #[test]
    fn full_seed_skips_the_fixed_phase() {
        let mut seed = SeedProfile::default();
        seed.fixed.insert("preferred_name".to_string(), "Kai".to_string());
        seed.fixed.insert("occupation".to_string(), "Piano restorer".to_string());

        let history = exchange(&[
            ("What does a typical day look like for you?", "Tuning, mostly."),
            ("When do you feel most like yourself?", "At the workbench."),
        ]);

        let state = derive_state(&history, InterviewMode::FirstMeeting, Some(&seed));

        assert!(state.fixed_phase_complete);
        assert_eq!(state.current_step, 4); // 2 fixed (seeded) + 2 deep-dive
        assert_eq!(state.collected.fixed.get("preferred_name").map(String::as_str), Some("Kai"));
        assert_eq!(state.collected.dynamic.len(), 2);
        assert_eq!(
            state.collected.dynamic[&1].question,
            "What does a typical day look like for you?"
        );
        assert!(state.resolved_this_turn.is_none());
    }

    #[test]
    fn seeded_branch_pairs_by_filtered_index() {
        let mut seed = SeedProfile::default();
        seed.fixed.insert("preferred_name".to_string(), "Kai".to_string());

        // User opens the conversation: the first answer pairs with the
        // first assistant turn even though it came afterwards.
        let history = vec![
            ConversationTurn::user("Lately I keep thinking about rivers."),
            ConversationTurn::assistant("What draws you to them?"),
            ConversationTurn::user("The way they never hold still."),
        ];

        let state = derive_state(&history, InterviewMode::Endless, Some(&seed));

        assert_eq!(state.collected.dynamic[&1].question, "What draws you to them?");
        assert_eq!(state.collected.dynamic[&2].question, "");
        assert_eq!(state.current_step, 3); // 1 seeded fixed + 2 answers
    }

    #[test]
    fn partial_seed_is_ignored() {
        let mut seed = SeedProfile::default();
        seed.fixed.insert("preferred_name".to_string(), "Kai".to_string());
        // FirstMeeting also needs occupation, so the seed does not apply.

        let history = exchange(&[("What should I call you?", "Maya")]);
        let state = derive_state(&history, InterviewMode::FirstMeeting, Some(&seed));

        assert_eq!(state.collected.fixed.get("preferred_name").map(String::as_str), Some("Maya"));
        assert_eq!(state.current_step, 1);
        assert!(!state.fixed_phase_complete);
    }

    #[test]
    fn empty_history_reduces_to_the_initial_state() {
        let state = derive_state(&[], InterviewMode::Values, None);
        assert_eq!(state.current_step, 0);
        assert!(state.collected.fixed.is_empty());
        assert!(state.collected.dynamic.is_empty());
        assert!(!state.fixed_phase_complete);
        assert!(!state.is_completed);
        assert!(state.resolved_this_turn.is_none());
    }

    #[test]
    fn step_counter_never_decreases_as_history_grows() {
        let pairs: Vec<(&str, &str)> = (0..8).map(|_| ("Q?", "a")).collect();
        let history = exchange(&pairs);

        let mut previous = 0;
        for prefix in 0..=history.len() {
            let state = derive_state(&history[..prefix], InterviewMode::FirstMeeting, None);
            assert!(state.current_step >= previous);
            previous = state.current_step;
        }
    }

    #[test]
    fn name_normalization_strips_wrappers() {
        assert_eq!(normalize_person_name("Call me Kai"), "Kai");
        assert_eq!(normalize_person_name("My name is Maya Lin"), "Maya Lin");
        assert_eq!(normalize_person_name("I'm Sam, thanks!"), "Sam");
        assert_eq!(normalize_person_name("it's Jo."), "Jo");
        assert_eq!(normalize_person_name("You can call me Ana, please"), "Ana");
        assert_eq!(normalize_person_name("Kai"), "Kai");
    }

    #[test]
    fn name_normalization_never_returns_empty_for_nonblank_input() {
        // Everything strippable: falls back to the raw answer, bounded.
        let noisy = normalize_person_name("thanks!");
        assert!(!noisy.is_empty());

        let long_ramble = "x".repeat(200);
        let bounded = normalize_person_name(&long_ramble);
        assert!(bounded.chars().count() <= 48);
        assert!(!bounded.is_empty());
    }
}
