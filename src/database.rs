use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use crate::craft::{OutputKind, OutputStatus};
use crate::interview::state::{CollectedState, ConversationTurn};
use crate::profile::{TraitsSummary, UserTrait};

/// A completed (or force-completed) interview session as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub mode: String,
    pub interviewer: String,
    pub status: String,
    pub collected: CollectedState,
    pub messages: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A generated artifact (tagline, article) with the trait snapshot it was
/// built from. Archived outputs stay on disk but drop out of listings and
/// rate-limit lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub id: String,
    pub user_id: String,
    pub kind: OutputKind,
    pub content: String,
    pub status: OutputStatus,
    pub traits: Vec<UserTrait>,
    pub created_at: DateTime<Utc>,
}

pub struct StudioDatabase {
    conn: Mutex<Connection>,
}

impl StudioDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Create the database schema
    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS interviews (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                mode TEXT NOT NULL,
                interviewer TEXT NOT NULL,
                status TEXT NOT NULL,
                fixed_json TEXT NOT NULL,
                dynamic_json TEXT NOT NULL,
                messages_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_interviews_user_created ON interviews(user_id, created_at DESC)",
            [],
        )?;

        // One trait document per owner, summary stored alongside so readers
        // never recompute it.
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS user_traits (
                owner_id TEXT PRIMARY KEY,
                traits_json TEXT NOT NULL,
                summary_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS outputs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                traits_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_outputs_user_kind_created ON outputs(user_id, kind, created_at DESC)",
            [],
        )?;

        Ok(())
    }

    // ---- interviews ----

    pub fn save_interview(&self, record: &InterviewRecord) -> Result<()> {
        let fixed_json = serde_json::to_string(&record.collected.fixed)
            .context("Failed to serialize fixed fields")?;
        let dynamic_json = serde_json::to_string(&record.collected.dynamic)
            .context("Failed to serialize dynamic entries")?;
        let messages_json = serde_json::to_string(&record.messages)
            .context("Failed to serialize interview messages")?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO interviews (id, user_id, mode, interviewer, status, fixed_json, dynamic_json, messages_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.user_id,
                record.mode,
                record.interviewer,
                record.status,
                fixed_json,
                dynamic_json,
                messages_json,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_interview(&self, id: &str) -> Result<Option<InterviewRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, mode, interviewer, status, fixed_json, dynamic_json, messages_json, created_at, updated_at
             FROM interviews
             WHERE id = ?1",
        )?;

        let record = stmt
            .query_row([id], Self::interview_from_row)
            .optional()?;
        Ok(record)
    }

    /// All interviews for one user, newest first.
    pub fn list_interviews(&self, user_id: &str) -> Result<Vec<InterviewRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, mode, interviewer, status, fixed_json, dynamic_json, messages_json, created_at, updated_at
             FROM interviews
             WHERE user_id = ?1
             ORDER BY created_at DESC",
        )?;

        let records = stmt
            .query_map([user_id], Self::interview_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn interview_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InterviewRecord> {
        let fixed_json: String = row.get(5)?;
        let dynamic_json: String = row.get(6)?;
        let messages_json: String = row.get(7)?;

        Ok(InterviewRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            mode: row.get(2)?,
            interviewer: row.get(3)?,
            status: row.get(4)?,
            collected: CollectedState {
                fixed: serde_json::from_str(&fixed_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                dynamic: serde_json::from_str(&dynamic_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        6,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
            },
            messages: serde_json::from_str(&messages_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            created_at: row.get::<_, String>(8)?.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            updated_at: row.get::<_, String>(9)?.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        })
    }

    // ---- traits ----

    pub fn save_traits(
        &self,
        owner_id: &str,
        traits: &[UserTrait],
        summary: &TraitsSummary,
    ) -> Result<()> {
        let traits_json =
            serde_json::to_string(traits).context("Failed to serialize trait set")?;
        let summary_json =
            serde_json::to_string(summary).context("Failed to serialize trait summary")?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_traits (owner_id, traits_json, summary_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![owner_id, traits_json, summary_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// The owner's traits, or an empty set if nothing has been extracted yet.
    pub fn load_traits(&self, owner_id: &str) -> Result<Vec<UserTrait>> {
        Ok(self
            .load_traits_with_summary(owner_id)?
            .map(|(traits, _)| traits)
            .unwrap_or_default())
    }

    pub fn load_traits_with_summary(
        &self,
        owner_id: &str,
    ) -> Result<Option<(Vec<UserTrait>, TraitsSummary)>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT traits_json, summary_json FROM user_traits WHERE owner_id = ?1",
        )?;

        let row: Option<(String, String)> = stmt
            .query_row([owner_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        match row {
            Some((traits_json, summary_json)) => {
                let traits = serde_json::from_str(&traits_json)
                    .context("Failed to deserialize trait set")?;
                let summary = serde_json::from_str(&summary_json)
                    .context("Failed to deserialize trait summary")?;
                Ok(Some((traits, summary)))
            }
            None => Ok(None),
        }
    }

    // ---- outputs ----

    pub fn save_output(&self, output: &GeneratedOutput) -> Result<()> {
        let traits_json =
            serde_json::to_string(&output.traits).context("Failed to serialize output traits")?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO outputs (id, user_id, kind, content, status, traits_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                output.id,
                output.user_id,
                output.kind.as_str(),
                output.content,
                output.status.as_str(),
                traits_json,
                output.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Non-archived outputs for one user, newest first, optionally narrowed
    /// to one kind.
    pub fn list_outputs(
        &self,
        user_id: &str,
        kind: Option<OutputKind>,
    ) -> Result<Vec<GeneratedOutput>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, content, status, traits_json, created_at
             FROM outputs
             WHERE user_id = ?1 AND status != 'archived' AND (?2 IS NULL OR kind = ?2)
             ORDER BY created_at DESC",
        )?;

        let outputs = stmt
            .query_map(
                params![user_id, kind.map(|k| k.as_str())],
                Self::output_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(outputs)
    }

    /// The most recent non-archived output of one kind, if any. This is the
    /// timestamp the rate limiter keys on.
    pub fn latest_output(
        &self,
        user_id: &str,
        kind: OutputKind,
    ) -> Result<Option<GeneratedOutput>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, content, status, traits_json, created_at
             FROM outputs
             WHERE user_id = ?1 AND kind = ?2 AND status != 'archived'
             ORDER BY created_at DESC
             LIMIT 1",
        )?;

        let output = stmt
            .query_row(params![user_id, kind.as_str()], Self::output_from_row)
            .optional()?;
        Ok(output)
    }

    /// Mark an output archived. Returns false when the id is unknown.
    pub fn archive_output(&self, id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let changed = conn.execute(
            "UPDATE outputs SET status = 'archived' WHERE id = ?1",
            [id],
        )?;
        Ok(changed > 0)
    }

    fn output_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeneratedOutput> {
        let kind: String = row.get(2)?;
        let status: String = row.get(4)?;
        let traits_json: String = row.get(5)?;

        Ok(GeneratedOutput {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: OutputKind::from_db(&kind),
            content: row.get(3)?,
            status: OutputStatus::from_db(&status),
            traits: serde_json::from_str(&traits_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            created_at: row.get::<_, String>(6)?.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{summarize, test_trait, TraitCategory};
    use chrono::Duration;
    use tempfile::TempDir;

    fn test_db(dir: &TempDir) -> StudioDatabase {
        StudioDatabase::new(dir.path().join("studio.db")).expect("db init")
    }

    fn record(id: &str, user_id: &str, created_at: DateTime<Utc>) -> InterviewRecord {
        InterviewRecord {
            id: id.to_string(),
            user_id: Some(user_id.to_string()),
            mode: "first_meeting".to_string(),
            interviewer: "aya".to_string(),
            status: "completed".to_string(),
            collected: CollectedState::default(),
            messages: vec![
                ConversationTurn::assistant("What should I call you?"),
                ConversationTurn::user("Kai"),
            ],
            created_at,
            updated_at: created_at,
        }
    }

    fn output(id: &str, kind: OutputKind, created_at: DateTime<Utc>) -> GeneratedOutput {
        GeneratedOutput {
            id: id.to_string(),
            user_id: "u1".to_string(),
            kind,
            content: "content".to_string(),
            status: OutputStatus::Active,
            traits: vec![],
            created_at,
        }
    }

    #[test]
    fn interview_roundtrip_preserves_collected_state() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        let mut rec = record("i1", "u1", Utc::now());
        rec.collected
            .fixed
            .insert("preferred_name".to_string(), "Kai".to_string());

        db.save_interview(&rec).expect("save");
        let loaded = db.get_interview("i1").expect("get").expect("present");

        assert_eq!(loaded.collected.fixed["preferred_name"], "Kai");
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.mode, "first_meeting");
    }

    #[test]
    fn unknown_interview_id_is_none() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        assert!(db.get_interview("missing").expect("get").is_none());
    }

    #[test]
    fn interviews_list_newest_first_per_user() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);
        let base = Utc::now();

        db.save_interview(&record("old", "u1", base - Duration::days(2)))
            .expect("save old");
        db.save_interview(&record("new", "u1", base))
            .expect("save new");
        db.save_interview(&record("other", "u2", base))
            .expect("save other user");

        let listed = db.list_interviews("u1").expect("list");
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn traits_roundtrip_with_summary() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        let traits = vec![
            test_trait("runner", TraitCategory::Hobby, 0.8),
            test_trait("patient", TraitCategory::Personality, 0.6),
        ];
        let summary = summarize(&traits);

        db.save_traits("u1", &traits, &summary).expect("save");
        let (loaded, loaded_summary) = db
            .load_traits_with_summary("u1")
            .expect("load")
            .expect("present");

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].label, "runner");
        assert_eq!(loaded_summary, summary);
    }

    #[test]
    fn missing_owner_loads_as_empty_trait_set() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        assert!(db.load_traits("nobody").expect("load").is_empty());
        assert!(db
            .load_traits_with_summary("nobody")
            .expect("load")
            .is_none());
    }

    #[test]
    fn latest_output_skips_archived_and_other_kinds() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);
        let base = Utc::now();

        let mut archived = output("o1", OutputKind::Tagline, base);
        archived.status = OutputStatus::Archived;
        db.save_output(&archived).expect("save archived");
        db.save_output(&output("o2", OutputKind::Tagline, base - Duration::hours(1)))
            .expect("save older active");
        db.save_output(&output("o3", OutputKind::Article, base))
            .expect("save article");

        let latest = db
            .latest_output("u1", OutputKind::Tagline)
            .expect("latest")
            .expect("present");
        assert_eq!(latest.id, "o2");
    }

    #[test]
    fn archive_output_flips_status_and_reports_unknown_ids() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);

        db.save_output(&output("o1", OutputKind::Tagline, Utc::now()))
            .expect("save");

        assert!(db.archive_output("o1").expect("archive"));
        assert!(!db.archive_output("missing").expect("archive unknown"));
        assert!(db
            .latest_output("u1", OutputKind::Tagline)
            .expect("latest")
            .is_none());
        assert!(db.list_outputs("u1", None).expect("list").is_empty());
    }

    #[test]
    fn list_outputs_narrows_by_kind() {
        let dir = TempDir::new().expect("tempdir");
        let db = test_db(&dir);
        let base = Utc::now();

        db.save_output(&output("tag", OutputKind::Tagline, base))
            .expect("save tagline");
        db.save_output(&output("art", OutputKind::Article, base - Duration::hours(1)))
            .expect("save article");

        let all = db.list_outputs("u1", None).expect("list all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "tag");

        let articles = db
            .list_outputs("u1", Some(OutputKind::Article))
            .expect("list articles");
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, "art");
    }
}
