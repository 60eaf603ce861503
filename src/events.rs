use crate::profile::UserTrait;

/// How long clients should keep freshly changed traits visually highlighted.
pub const TRAIT_HIGHLIGHT_MS: u64 = 3000;

/// Domain events broadcast to connected clients. Advisory only; nothing in
/// the turn or extraction pipelines blocks on delivery.
#[derive(Debug, Clone)]
pub enum StudioEvent {
    FixedFieldCollected {
        session_id: String,
        field: String,
        value: String,
    },
    TraitsChanged {
        owner_id: String,
        /// The full merged set, so clients never render against a stale copy.
        traits: Vec<UserTrait>,
        new_ids: Vec<String>,
        updated_ids: Vec<String>,
        highlight_ms: u64,
    },
    ExtractionFailed {
        owner_id: String,
        turn_index: usize,
        error: String,
    },
    InterviewCompleted {
        session_id: String,
        mode: String,
        entry_count: usize,
    },
    OutputGenerated {
        output_id: String,
        user_id: String,
        kind: String,
    },
}
