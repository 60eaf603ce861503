//! Interview modes and their step policies.
//!
//! A mode fixes which structured fields are collected first, how many
//! deep-dive steps follow (or unbounded for endless sessions), and which
//! example questions the interviewer draws from as the session progresses.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterviewMode {
    FirstMeeting,
    Values,
    Hobbies,
    Endless,
}

impl InterviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewMode::FirstMeeting => "first_meeting",
            InterviewMode::Values => "values",
            InterviewMode::Hobbies => "hobbies",
            InterviewMode::Endless => "endless",
        }
    }

    /// Strict parse for caller-supplied mode ids.
    pub fn parse(s: &str) -> Option<InterviewMode> {
        match s.trim().to_lowercase().as_str() {
            "first_meeting" => Some(InterviewMode::FirstMeeting),
            "values" => Some(InterviewMode::Values),
            "hobbies" => Some(InterviewMode::Hobbies),
            "endless" => Some(InterviewMode::Endless),
            _ => None,
        }
    }

    /// Total resolution for stored records. Unknown ids fall back to the
    /// default bounded mode instead of wedging old sessions.
    pub fn resolve(s: &str) -> InterviewMode {
        Self::parse(s).unwrap_or(InterviewMode::FirstMeeting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedFieldKind {
    /// Answer goes through name normalization before being stored.
    PersonName,
    /// Answer is stored as given.
    FreeText,
}

#[derive(Debug, Clone)]
pub struct FixedField {
    pub name: &'static str,
    pub ask: &'static str,
    pub kind: FixedFieldKind,
}

/// Example questions for one stretch of the deep-dive phase. Active once
/// `after_step` deep-dive answers have been collected.
#[derive(Debug, Clone)]
pub struct QuestionGroup {
    pub label: &'static str,
    pub after_step: u32,
    pub questions: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct ModeConfig {
    pub mode: InterviewMode,
    pub focus: &'static str,
    pub fixed_fields: Vec<FixedField>,
    /// None means unbounded: the session only ends on an explicit
    /// force-complete signal.
    pub deep_dive_steps: Option<u32>,
    pub question_bank: Vec<QuestionGroup>,
}

impl ModeConfig {
    pub fn fixed_len(&self) -> u32 {
        self.fixed_fields.len() as u32
    }

    pub fn is_unbounded(&self) -> bool {
        self.deep_dive_steps.is_none()
    }

    pub fn total_steps(&self) -> Option<u32> {
        self.deep_dive_steps.map(|deep| self.fixed_len() + deep)
    }

    /// Pick the question group for the current stretch of the deep dive:
    /// the highest threshold not exceeding the number of answers collected
    /// so far. Selection never affects state transitions.
    pub fn question_group(&self, deep_steps_done: u32) -> Option<&QuestionGroup> {
        self.question_bank
            .iter()
            .filter(|g| g.after_step <= deep_steps_done)
            .max_by_key(|g| g.after_step)
    }
}

fn preferred_name_field() -> FixedField {
    FixedField {
        name: "preferred_name",
        ask: "what they would like to be called",
        kind: FixedFieldKind::PersonName,
    }
}

pub fn mode_config(mode: InterviewMode) -> ModeConfig {
    match mode {
        InterviewMode::FirstMeeting => ModeConfig {
            mode,
            focus: "a broad get-to-know-you conversation about who they are day to day",
            fixed_fields: vec![
                preferred_name_field(),
                FixedField {
                    name: "occupation",
                    ask: "what they do for work or study",
                    kind: FixedFieldKind::FreeText,
                },
            ],
            deep_dive_steps: Some(5),
            question_bank: vec![
                QuestionGroup {
                    label: "warmup",
                    after_step: 0,
                    questions: vec![
                        "What does a typical day look like for you?",
                        "What has been keeping you busy lately?",
                    ],
                },
                QuestionGroup {
                    label: "values",
                    after_step: 2,
                    questions: vec![
                        "What do you care about most in how you spend your time?",
                        "When do you feel most like yourself?",
                    ],
                },
                QuestionGroup {
                    label: "episodes",
                    after_step: 3,
                    questions: vec![
                        "Is there a moment from the past year you find yourself retelling?",
                    ],
                },
                QuestionGroup {
                    label: "closing",
                    after_step: 4,
                    questions: vec!["What are you looking forward to next?"],
                },
            ],
        },
        InterviewMode::Values => ModeConfig {
            mode,
            focus: "what they believe in, what guides their decisions, and why",
            fixed_fields: vec![preferred_name_field()],
            deep_dive_steps: Some(6),
            question_bank: vec![
                QuestionGroup {
                    label: "warmup",
                    after_step: 0,
                    questions: vec!["What is a decision from the last year you are proud of?"],
                },
                QuestionGroup {
                    label: "convictions",
                    after_step: 2,
                    questions: vec![
                        "What is something you would never compromise on?",
                        "What belief of yours has changed over the years?",
                    ],
                },
                QuestionGroup {
                    label: "tension",
                    after_step: 4,
                    questions: vec![
                        "Tell me about a time two things you value pulled against each other.",
                    ],
                },
                QuestionGroup {
                    label: "closing",
                    after_step: 5,
                    questions: vec!["What do you hope people say about you when you leave the room?"],
                },
            ],
        },
        InterviewMode::Hobbies => ModeConfig {
            mode,
            focus: "the things they do for joy and how those fit into their life",
            fixed_fields: vec![preferred_name_field()],
            deep_dive_steps: Some(4),
            question_bank: vec![
                QuestionGroup {
                    label: "warmup",
                    after_step: 0,
                    questions: vec!["What do you do to recharge?"],
                },
                QuestionGroup {
                    label: "depth",
                    after_step: 1,
                    questions: vec![
                        "How did you first get into it?",
                        "What does a really good session look like?",
                    ],
                },
                QuestionGroup {
                    label: "sharing",
                    after_step: 3,
                    questions: vec!["Who do you share it with, if anyone?"],
                },
            ],
        },
        InterviewMode::Endless => ModeConfig {
            mode,
            focus: "an open-ended conversation that follows wherever their answers lead",
            fixed_fields: vec![preferred_name_field()],
            deep_dive_steps: None,
            question_bank: vec![
                QuestionGroup {
                    label: "drift",
                    after_step: 0,
                    questions: vec!["What is on your mind these days?"],
                },
                QuestionGroup {
                    label: "deeper",
                    after_step: 4,
                    questions: vec![
                        "What is something you have been meaning to figure out about yourself?",
                    ],
                },
                QuestionGroup {
                    label: "reflective",
                    after_step: 8,
                    questions: vec![
                        "Looking back over everything we have talked about, what surprised you?",
                    ],
                },
            ],
        },
    }
}
