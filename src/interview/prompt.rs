//! Instruction construction for the interviewer's next turn.
//!
//! The instruction rides as the system message ahead of the conversation
//! history. Nothing here affects state derivation.

use super::interviewers::Interviewer;
use super::modes::ModeConfig;
use super::state::InterviewState;

/// Build the system instruction for one turn. `closing` is set when the
/// session has completed (by step count or by force) and the reply should
/// wrap up instead of asking anything new.
pub fn build_turn_instruction(
    persona: &Interviewer,
    cfg: &ModeConfig,
    state: &InterviewState,
    closing: bool,
) -> String {
    let mut instruction = String::new();

    instruction.push_str(&format!(
        "You are {}, an interviewer getting to know one person in a relaxed one-on-one conversation.\n\
         Character: {}\n\
         Tone: {}\n\n",
        persona.name, persona.character, persona.tone
    ));

    instruction.push_str("Rules:\n");
    instruction.push_str("1. Stay in character and keep the tone above.\n");
    instruction.push_str("2. Keep each reply to two or three sentences.\n");
    instruction.push_str("3. React briefly to what they just said before anything else.\n");
    let mut rule = 4;
    for style in &persona.style {
        instruction.push_str(&format!("{}. {}\n", rule, style));
        rule += 1;
    }
    instruction.push_str(&format!("{}. Next step: {}\n", rule, step_instruction(cfg, state, closing)));

    instruction.push_str(&format!("\nSession focus: {}.\n", cfg.focus));

    let progress = match state.total_steps {
        Some(total) => format!("{} / {} steps complete", state.current_step, total),
        None => format!("{} answers so far, open-ended session", state.current_step),
    };
    instruction.push_str(&format!("\nProgress: {}\n", progress));

    instruction
}

fn step_instruction(cfg: &ModeConfig, state: &InterviewState, closing: bool) -> String {
    if closing {
        return "The interview is finished. Thank them warmly for everything they shared and close the conversation. Do not ask another question.".to_string();
    }

    let mut instruction = if !state.fixed_phase_complete {
        // Safe: fixed_phase_complete is false only while current_step is
        // below the fixed field count.
        match cfg.fixed_fields.get(state.current_step as usize) {
            Some(field) => format!("Ask {}.", field.ask),
            None => "Continue the conversation naturally.".to_string(),
        }
    } else {
        let mut text = format!(
            "Ask one open question that explores {}. Exactly one question, no multi-part questions.",
            cfg.focus
        );
        if let Some(group) = cfg.question_group(state.deep_steps_done()) {
            text.push_str(&format!(
                " For this stretch of the conversation, take inspiration from: {}",
                group.questions.join(" / ")
            ));
        }
        text
    };

    if let Some(total) = state.total_steps {
        if state.current_step + 1 >= total {
            instruction.push_str(
                " This is the final question. Once they answer, let them know the interview is wrapping up and thank them.",
            );
        }
    }

    instruction
}
