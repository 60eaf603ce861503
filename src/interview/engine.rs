//! Turn orchestration: derive state, hand the latest exchange to the
//! extraction queue, categorize on completion, and produce the reply.
//!
//! The engine persists nothing. Saving a finished interview is the caller's
//! explicit follow-up.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::events::StudioEvent;
use crate::interview::categorize::EntryCategorizer;
use crate::interview::interviewers::Interviewer;
use crate::interview::modes::{mode_config, InterviewMode};
use crate::interview::prompt::build_turn_instruction;
use crate::interview::state::{
    derive_state, CollectedState, ConversationTurn, FixedFieldUpdate, Role, SeedProfile,
};
use crate::llm_client::{strip_thinking_tags, Message, TextCompletion};
use crate::profile::{ExtractionJob, ExtractionQueue};

/// One fully validated turn. The transport resolves mode strings and
/// interviewer ids before building this.
pub struct TurnRequest {
    pub history: Vec<ConversationTurn>,
    pub mode: InterviewMode,
    pub interviewer: Interviewer,
    /// Conversation identity, used for turn-scoped notifications.
    pub session_id: String,
    /// Trait-collection owner: the signed-in user id, or the session id for
    /// a guest.
    pub owner_id: String,
    pub force_complete: bool,
    pub seed_profile: Option<SeedProfile>,
}

pub struct TurnOutcome {
    pub reply: String,
    pub is_completed: bool,
    /// Populated only once the interview is complete (or force-completed).
    pub collected: Option<CollectedState>,
    pub fixed_field_update: Option<FixedFieldUpdate>,
}

pub struct InterviewEngine {
    llm: Arc<dyn TextCompletion>,
    categorizer: EntryCategorizer,
    queue: Arc<ExtractionQueue>,
    events: flume::Sender<StudioEvent>,
}

impl InterviewEngine {
    pub fn new(
        llm: Arc<dyn TextCompletion>,
        categorizer: EntryCategorizer,
        queue: Arc<ExtractionQueue>,
        events: flume::Sender<StudioEvent>,
    ) -> Self {
        Self {
            llm,
            categorizer,
            queue,
            events,
        }
    }

    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnOutcome> {
        let cfg = mode_config(req.mode);
        let mut state = derive_state(&req.history, req.mode, req.seed_profile.as_ref());
        let completed = state.is_completed || req.force_complete;

        // Side channel: extraction runs behind the reply, never ahead of it.
        self.enqueue_extraction(&req);

        if completed {
            self.categorizer
                .categorize(&mut state.collected.dynamic)
                .await;
        }

        let instruction = build_turn_instruction(&req.interviewer, &cfg, &state, completed);
        let mut messages = Vec::with_capacity(req.history.len() + 1);
        messages.push(Message {
            role: "system".to_string(),
            content: instruction,
        });
        for turn in &req.history {
            messages.push(Message {
                role: turn.role.as_str().to_string(),
                content: turn.text.clone(),
            });
        }

        let reply = self
            .llm
            .complete(messages, None)
            .await
            .context("Interview reply generation failed")?;
        let reply = strip_thinking_tags(&reply);

        if let Some(update) = &state.resolved_this_turn {
            let _ = self.events.send(StudioEvent::FixedFieldCollected {
                session_id: req.session_id.clone(),
                field: update.field.clone(),
                value: update.value.clone(),
            });
        }
        if completed {
            let _ = self.events.send(StudioEvent::InterviewCompleted {
                session_id: req.session_id.clone(),
                mode: req.mode.as_str().to_string(),
                entry_count: state.collected.dynamic.len(),
            });
        }

        let fixed_field_update = state.resolved_this_turn.take();
        Ok(TurnOutcome {
            reply,
            is_completed: completed,
            collected: completed.then_some(state.collected),
            fixed_field_update,
        })
    }

    /// Hand the latest user turn and the question it answered to the
    /// per-owner extraction queue. No-op when the history does not end on a
    /// user turn.
    fn enqueue_extraction(&self, req: &TurnRequest) {
        let last = match req.history.last() {
            Some(last) if last.role == Role::User => last,
            _ => return,
        };

        let assistant_turn = req.history[..req.history.len() - 1]
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.text.clone())
            .unwrap_or_default();

        self.queue.enqueue(ExtractionJob {
            owner_id: req.owner_id.clone(),
            user_turn: last.text.clone(),
            assistant_turn,
            turn_index: req.history.len() - 1,
        });
    }
}
