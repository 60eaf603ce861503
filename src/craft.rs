//! Artifact generation from a finished profile: a one-line personal tagline
//! or a magazine-style interview article. Generation of each kind is rate
//! limited to once per 24-hour window, keyed on the newest non-archived
//! output of that kind.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{GeneratedOutput, InterviewRecord, StudioDatabase};
use crate::events::StudioEvent;
use crate::llm_client::{Message, TextCompletion};
use crate::profile::UserTrait;

pub const GENERATION_WINDOW_HOURS: i64 = 24;
pub const MIN_TRAITS_FOR_TAGLINE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Tagline,
    Article,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Tagline => "tagline",
            OutputKind::Article => "article",
        }
    }

    pub fn parse(s: &str) -> Option<OutputKind> {
        match s.trim().to_lowercase().as_str() {
            "tagline" => Some(OutputKind::Tagline),
            "article" => Some(OutputKind::Article),
            _ => None,
        }
    }

    pub fn from_db(raw: &str) -> Self {
        Self::parse(raw).unwrap_or(OutputKind::Tagline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Active,
    Archived,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStatus::Active => "active",
            OutputStatus::Archived => "archived",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "archived" => OutputStatus::Archived,
            _ => OutputStatus::Active,
        }
    }
}

/// True when a new output of this kind may be generated at `now`. The window
/// closes for exactly 24 hours from the latest output's creation and reopens
/// at the boundary itself.
pub fn can_generate(latest: Option<&GeneratedOutput>, now: DateTime<Utc>) -> bool {
    match latest {
        None => true,
        Some(output) => now - output.created_at >= Duration::hours(GENERATION_WINDOW_HOURS),
    }
}

pub fn next_available_at(latest: &GeneratedOutput) -> DateTime<Utc> {
    latest.created_at + Duration::hours(GENERATION_WINDOW_HOURS)
}

/// Why a generation request was turned down without touching the text
/// service. Hard failures (store, LLM) surface as errors instead.
#[derive(Debug, Clone)]
pub enum CraftOutcome {
    Generated(GeneratedOutput),
    RateLimited { next_available_at: DateTime<Utc> },
    NotEnoughTraits { have: usize, need: usize },
}

pub struct CraftStudio {
    llm: Arc<dyn TextCompletion>,
    model: Option<String>,
    db: Arc<StudioDatabase>,
    events: flume::Sender<StudioEvent>,
}

impl CraftStudio {
    pub fn new(
        llm: Arc<dyn TextCompletion>,
        model: Option<String>,
        db: Arc<StudioDatabase>,
        events: flume::Sender<StudioEvent>,
    ) -> Self {
        Self {
            llm,
            model,
            db,
            events,
        }
    }

    /// Generate a one-line tagline from the user's trait set.
    pub async fn generate_tagline(&self, user_id: &str) -> Result<CraftOutcome> {
        if let Some(denied) = self.rate_check(user_id, OutputKind::Tagline)? {
            return Ok(denied);
        }

        let traits = self.db.load_traits(user_id)?;
        if traits.len() < MIN_TRAITS_FOR_TAGLINE {
            return Ok(CraftOutcome::NotEnoughTraits {
                have: traits.len(),
                need: MIN_TRAITS_FOR_TAGLINE,
            });
        }

        let prompt = build_tagline_prompt(&traits);
        let response = self.complete(prompt).await?;
        let content = clean_tagline(&response);
        if content.is_empty() {
            bail!("Tagline generation returned empty text");
        }

        self.persist(user_id, OutputKind::Tagline, content, traits)
            .map(CraftOutcome::Generated)
    }

    /// Generate a three-part magazine-style article from a saved interview.
    pub async fn generate_article(
        &self,
        user_id: &str,
        interview: &InterviewRecord,
    ) -> Result<CraftOutcome> {
        if let Some(denied) = self.rate_check(user_id, OutputKind::Article)? {
            return Ok(denied);
        }

        let traits = self.db.load_traits(user_id)?;
        let prompt = build_article_prompt(interview);
        let response = self.complete(prompt).await?;
        let content = response.trim().to_string();
        if content.is_empty() {
            bail!("Article generation returned empty text");
        }

        self.persist(user_id, OutputKind::Article, content, traits)
            .map(CraftOutcome::Generated)
    }

    fn rate_check(&self, user_id: &str, kind: OutputKind) -> Result<Option<CraftOutcome>> {
        let latest = self.db.latest_output(user_id, kind)?;
        if let Some(latest) = &latest {
            if !can_generate(Some(latest), Utc::now()) {
                return Ok(Some(CraftOutcome::RateLimited {
                    next_available_at: next_available_at(latest),
                }));
            }
        }
        Ok(None)
    }

    async fn complete(&self, prompt: String) -> Result<String> {
        let messages = vec![Message {
            role: "user".to_string(),
            content: prompt,
        }];
        self.llm.complete(messages, self.model.as_deref()).await
    }

    fn persist(
        &self,
        user_id: &str,
        kind: OutputKind,
        content: String,
        traits: Vec<UserTrait>,
    ) -> Result<GeneratedOutput> {
        let output = GeneratedOutput {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            content,
            status: OutputStatus::Active,
            traits,
            created_at: Utc::now(),
        };
        self.db.save_output(&output)?;

        let _ = self.events.send(StudioEvent::OutputGenerated {
            output_id: output.id.clone(),
            user_id: output.user_id.clone(),
            kind: kind.as_str().to_string(),
        });

        Ok(output)
    }
}

fn build_tagline_prompt(traits: &[UserTrait]) -> String {
    let mut context = String::new();

    context.push_str("## Trait Profile\n");
    let mut ranked: Vec<&UserTrait> = traits.iter().collect();
    ranked.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    for t in ranked {
        context.push_str(&format!(
            "- {} ({}{}, confidence {:.2})",
            t.label,
            t.category.as_str(),
            t.intensity
                .as_deref()
                .map(|i| format!(", {}", i))
                .unwrap_or_default(),
            t.confidence
        ));
        if !t.keywords.is_empty() {
            context.push_str(&format!(" [{}]", t.keywords.join(", ")));
        }
        context.push('\n');
    }

    format!(
        "You write personal catch copy.\n\n{}\n\
         Write one short, punchy tagline that captures what makes this person distinct.\n\
         Under 20 words, present tense, no clichés.\n\
         Return ONLY the tagline itself. No quotes, no explanation.",
        context
    )
}

fn build_article_prompt(interview: &InterviewRecord) -> String {
    let mut context = String::new();

    context.push_str("## Interview\n");
    for (field, value) in &interview.collected.fixed {
        context.push_str(&format!("{}: {}\n", field, value));
    }
    for (index, entry) in interview.collected.dynamic.values().enumerate() {
        context.push_str(&format!(
            "{}. Q: {}\n   A: {}\n",
            index + 1,
            entry.question,
            entry.answer
        ));
    }

    format!(
        "You are a magazine writer. Turn the interview below into a short profile piece about this person, written in warm third person.\n\n{}\n\
         Structure the article in three parts, with no headings:\n\
         1. An introduction of who they are (100-200 characters).\n\
         2. The heart of the conversation, weaving their answers together (500-1000 characters).\n\
         3. A closing impression (200-300 characters).\n\
         Total length 800-1500 characters. Return ONLY the article text.",
        context
    )
}

fn clean_tagline(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    line.trim_matches(|c| c == '"' || c == '\u{201C}' || c == '\u{201D}')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{test_trait, TraitCategory};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct ScriptedCompletion {
        response: Result<String, String>,
    }

    impl ScriptedCompletion {
        fn ok(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response.to_string()),
            })
        }
    }

    #[async_trait]
    impl TextCompletion for ScriptedCompletion {
        async fn complete(&self, _messages: Vec<Message>, _model: Option<&str>) -> Result<String> {
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow!("{e}")),
            }
        }
    }

    fn latest_at(created_at: DateTime<Utc>) -> GeneratedOutput {
        GeneratedOutput {
            id: "o1".to_string(),
            user_id: "u1".to_string(),
            kind: OutputKind::Tagline,
            content: "old".to_string(),
            status: OutputStatus::Active,
            traits: vec![],
            created_at,
        }
    }

    fn studio(dir: &TempDir, response: &str) -> (CraftStudio, Arc<StudioDatabase>) {
        let db = Arc::new(StudioDatabase::new(dir.path().join("studio.db")).expect("db init"));
        let (tx, _rx) = flume::unbounded();
        (
            CraftStudio::new(ScriptedCompletion::ok(response), None, db.clone(), tx),
            db,
        )
    }

    fn seed_traits(db: &StudioDatabase, owner: &str, count: usize) {
        let labels = ["runner", "patient", "carpenter", "early riser"];
        let traits: Vec<UserTrait> = labels
            .iter()
            .take(count)
            .map(|l| test_trait(l, TraitCategory::Personality, 0.7))
            .collect();
        let summary = crate::profile::summarize(&traits);
        db.save_traits(owner, &traits, &summary).expect("seed traits");
    }

    #[test]
    fn window_is_open_with_no_prior_output() {
        assert!(can_generate(None, Utc::now()));
    }

    #[test]
    fn window_closes_for_a_day_and_reopens_at_the_boundary() {
        let t = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).single().expect("timestamp");
        let latest = latest_at(t);

        assert!(!can_generate(Some(&latest), t));
        assert!(!can_generate(
            Some(&latest),
            t + Duration::hours(24) - Duration::seconds(1)
        ));
        assert!(can_generate(Some(&latest), t + Duration::hours(24)));
        assert!(can_generate(Some(&latest), t + Duration::days(3)));
    }

    #[test]
    fn next_available_is_one_window_after_creation() {
        let t = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).single().expect("timestamp");
        assert_eq!(next_available_at(&latest_at(t)), t + Duration::hours(24));
    }

    #[test]
    fn tagline_cleanup_strips_quotes_and_extra_lines() {
        assert_eq!(clean_tagline("\"Builds quiet things.\"\n\nHope it fits!"), "Builds quiet things.");
        assert_eq!(clean_tagline("  \n Plain line \n"), "Plain line");
        assert_eq!(clean_tagline(""), "");
    }

    #[tokio::test]
    async fn tagline_requires_three_traits() {
        let dir = TempDir::new().expect("tempdir");
        let (studio, db) = studio(&dir, "A tagline.");
        seed_traits(&db, "u1", 2);

        match studio.generate_tagline("u1").await.expect("outcome") {
            CraftOutcome::NotEnoughTraits { have, need } => {
                assert_eq!(have, 2);
                assert_eq!(need, 3);
            }
            other => panic!("expected trait gate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn tagline_generates_then_rate_limits() {
        let dir = TempDir::new().expect("tempdir");
        let (studio, db) = studio(&dir, "\"Runs before the city wakes.\"");
        seed_traits(&db, "u1", 3);

        let generated = match studio.generate_tagline("u1").await.expect("outcome") {
            CraftOutcome::Generated(output) => output,
            other => panic!("expected generation, got {:?}", other),
        };
        assert_eq!(generated.content, "Runs before the city wakes.");
        assert_eq!(generated.kind, OutputKind::Tagline);
        assert_eq!(generated.traits.len(), 3);

        match studio.generate_tagline("u1").await.expect("outcome") {
            CraftOutcome::RateLimited { next_available_at } => {
                assert_eq!(next_available_at, generated.created_at + Duration::hours(24));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn archiving_the_latest_output_reopens_the_window() {
        let dir = TempDir::new().expect("tempdir");
        let (studio, db) = studio(&dir, "Another line.");
        seed_traits(&db, "u1", 3);

        let first = match studio.generate_tagline("u1").await.expect("outcome") {
            CraftOutcome::Generated(output) => output,
            other => panic!("expected generation, got {:?}", other),
        };
        db.archive_output(&first.id).expect("archive");

        match studio.generate_tagline("u1").await.expect("outcome") {
            CraftOutcome::Generated(_) => {}
            other => panic!("expected generation after archive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn article_prompt_is_built_from_the_saved_interview() {
        let dir = TempDir::new().expect("tempdir");
        let (studio, _db) = studio(&dir, "A short article about Kai, long enough to keep.");

        let mut interview = InterviewRecord {
            id: "i1".to_string(),
            user_id: Some("u1".to_string()),
            mode: "first_meeting".to_string(),
            interviewer: "aya".to_string(),
            status: "completed".to_string(),
            collected: Default::default(),
            messages: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        interview
            .collected
            .fixed
            .insert("preferred_name".to_string(), "Kai".to_string());

        match studio.generate_article("u1", &interview).await.expect("outcome") {
            CraftOutcome::Generated(output) => {
                assert_eq!(output.kind, OutputKind::Article);
                assert!(!output.content.is_empty());
            }
            other => panic!("expected generation, got {:?}", other),
        }
    }
}
