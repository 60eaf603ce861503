//! The interview pipeline: mode policy, stateless state derivation,
//! instruction construction, post-completion categorization, and the engine
//! that ties them to the text service.

pub mod categorize;
pub mod engine;
pub mod interviewers;
pub mod modes;
pub mod prompt;
pub mod state;

pub use engine::{InterviewEngine, TurnOutcome, TurnRequest};
pub use interviewers::Interviewer;
pub use modes::{mode_config, InterviewMode, ModeConfig};
pub use state::{
    derive_state, CollectedState, ConversationTurn, DynamicEntry, FixedFieldUpdate,
    InterviewState, Role, SeedProfile,
};
