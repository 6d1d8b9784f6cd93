//! Activity log, draft and daily statistics persistence

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{AssistantError, Result};
use crate::models::{Category, DraftProposal};
use crate::state::RunStatistics;

/// Schema DDL run on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS activity_logs (
    id TEXT PRIMARY KEY,
    action_type TEXT NOT NULL,
    description TEXT NOT NULL,
    email_id TEXT,
    status TEXT NOT NULL,
    metadata TEXT,
    processing_time_ms INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activity_type_created
    ON activity_logs(action_type, status, created_at);

CREATE TABLE IF NOT EXISTS email_drafts (
    id TEXT PRIMARY KEY,
    recipient TEXT NOT NULL,
    recipient_name TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    original_email_id TEXT NOT NULL,
    thread_id TEXT,
    response_type TEXT NOT NULL,
    ai_confidence REAL NOT NULL,
    category TEXT NOT NULL,
    priority TEXT NOT NULL,
    provider_draft_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS email_statistics (
    date TEXT PRIMARY KEY,
    emails_processed INTEGER NOT NULL DEFAULT 0,
    drafts_created INTEGER NOT NULL DEFAULT 0,
    spam_deleted INTEGER NOT NULL DEFAULT 0,
    unsubscribe_actions INTEGER NOT NULL DEFAULT 0,
    business_emails INTEGER NOT NULL DEFAULT 0,
    personal_emails INTEGER NOT NULL DEFAULT 0,
    promotional_emails INTEGER NOT NULL DEFAULT 0,
    social_emails INTEGER NOT NULL DEFAULT 0,
    other_emails INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    average_processing_time REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// Longest subject excerpt kept in activity descriptions
const DESCRIPTION_SUBJECT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    SpamDeleted,
    UnsubscribeDetected,
    DraftCreated,
    DraftSaveFailed,
    EmailProcessed,
    EmailProcessingCompleted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::SpamDeleted => "spam_deleted",
            ActivityType::UnsubscribeDetected => "unsubscribe_detected",
            ActivityType::DraftCreated => "draft_created",
            ActivityType::DraftSaveFailed => "draft_save_failed",
            ActivityType::EmailProcessed => "email_processed",
            ActivityType::EmailProcessingCompleted => "email_processing_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Failed => "failed",
        }
    }
}

/// One row of the activity log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub action_type: ActivityType,
    pub description: String,
    pub message_id: Option<String>,
    pub status: ActivityStatus,
    pub metadata: Option<serde_json::Value>,
    pub processing_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(action_type: ActivityType, description: impl Into<String>) -> Self {
        Self {
            action_type,
            description: description.into(),
            message_id: None,
            status: ActivityStatus::Success,
            metadata: None,
            processing_time_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.status = status;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// First 50 characters of a subject, for log descriptions
pub fn subject_excerpt(subject: &str) -> String {
    subject.chars().take(DESCRIPTION_SUBJECT_CHARS).collect()
}

/// Stored draft awaiting approval
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDraft {
    pub id: String,
    pub proposal: DraftProposal,
    pub provider_draft_id: Option<String>,
}

/// Persistence collaborator for a run
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Timestamp of the latest successful `email_processing_completed` record
    async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>>;

    async fn log_activity(&self, record: &ActivityRecord) -> Result<()>;

    /// Returns the stored draft id
    async fn insert_draft(
        &self,
        draft: &DraftProposal,
        provider_draft_id: Option<&str>,
    ) -> Result<String>;

    /// Add the run's counters onto the row for `date`, creating it if needed
    async fn record_daily_statistics(
        &self,
        date: NaiveDate,
        stats: &RunStatistics,
        elapsed_seconds: f64,
    ) -> Result<()>;
}

#[async_trait]
impl<T: ActivityStore + ?Sized> ActivityStore for Arc<T> {
    async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>> {
        (**self).last_successful_run().await
    }

    async fn log_activity(&self, record: &ActivityRecord) -> Result<()> {
        (**self).log_activity(record).await
    }

    async fn insert_draft(
        &self,
        draft: &DraftProposal,
        provider_draft_id: Option<&str>,
    ) -> Result<String> {
        (**self).insert_draft(draft, provider_draft_id).await
    }

    async fn record_daily_statistics(
        &self,
        date: NaiveDate,
        stats: &RunStatistics,
        elapsed_seconds: f64,
    ) -> Result<()> {
        (**self)
            .record_daily_statistics(date, stats, elapsed_seconds)
            .await
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    // Fixed-width UTC so lexical MAX() matches chronological order
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a snake/lowercase enum stored as its serde name
fn enum_from_str<T: serde::de::DeserializeOwned>(raw: String) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(raw))?)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AssistantError::PersistenceError(format!("Bad timestamp {:?}: {}", raw, e)))
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| AssistantError::PersistenceError("Store lock poisoned".to_string()))?;
        f(&conn).map_err(|e| AssistantError::PersistenceError(e.to_string()))
    }

    /// Drafts in creation order
    pub fn drafts(&self) -> Result<Vec<StoredDraft>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, recipient, recipient_name, subject, body, original_email_id,
                        thread_id, response_type, ai_confidence, category, priority,
                        provider_draft_id
                 FROM email_drafts ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, f64>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, Option<String>>(11)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(
                |(id, recipient, recipient_name, subject, body, original, thread, response_type, confidence, category, priority, provider)|
                 -> Result<StoredDraft> {
                    Ok(StoredDraft {
                        id,
                        proposal: DraftProposal {
                            recipient,
                            recipient_name,
                            subject,
                            body,
                            original_message_id: original,
                            thread_id: thread.unwrap_or_default(),
                            response_type: enum_from_str(response_type)?,
                            confidence,
                            category: enum_from_str(category)?,
                            priority: enum_from_str(priority)?,
                        },
                        provider_draft_id: provider,
                    })
                },
            )
            .collect()
    }

    /// Activity records of one type, oldest first
    pub fn activities(&self, action_type: ActivityType) -> Result<Vec<ActivityRecord>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT description, email_id, status, metadata, processing_time_ms, created_at
                 FROM activity_logs WHERE action_type = ?1 ORDER BY created_at, rowid",
            )?;
            let rows = stmt
                .query_map(params![action_type.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(description, message_id, status, metadata, ms, created_at)| -> Result<ActivityRecord> {
                Ok(ActivityRecord {
                    action_type,
                    description,
                    message_id,
                    status: if status == "success" {
                        ActivityStatus::Success
                    } else {
                        ActivityStatus::Failed
                    },
                    metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                    processing_time_ms: ms.map(|v| v.max(0) as u64),
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    /// Statistics row for one day, if any run recorded it
    pub fn daily_totals(&self, date: NaiveDate) -> Result<Option<DailyTotals>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT emails_processed, drafts_created, spam_deleted, unsubscribe_actions,
                        business_emails, personal_emails, promotional_emails, social_emails,
                        other_emails, error_count, average_processing_time
                 FROM email_statistics WHERE date = ?1",
                params![date.to_string()],
                |row| {
                    Ok(DailyTotals {
                        emails_processed: row.get(0)?,
                        drafts_created: row.get(1)?,
                        spam_deleted: row.get(2)?,
                        unsubscribe_actions: row.get(3)?,
                        business_emails: row.get(4)?,
                        personal_emails: row.get(5)?,
                        promotional_emails: row.get(6)?,
                        social_emails: row.get(7)?,
                        other_emails: row.get(8)?,
                        error_count: row.get(9)?,
                        average_processing_time: row.get(10)?,
                    })
                },
            )
            .optional()
        })
    }
}

/// Accumulated counters for one calendar day
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DailyTotals {
    pub emails_processed: i64,
    pub drafts_created: i64,
    pub spam_deleted: i64,
    pub unsubscribe_actions: i64,
    pub business_emails: i64,
    pub personal_emails: i64,
    pub promotional_emails: i64,
    pub social_emails: i64,
    pub other_emails: i64,
    pub error_count: i64,
    pub average_processing_time: f64,
}

#[async_trait]
impl ActivityStore for SqliteStore {
    async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(created_at) FROM activity_logs
                 WHERE action_type = ?1 AND status = ?2",
                params![
                    ActivityType::EmailProcessingCompleted.as_str(),
                    ActivityStatus::Success.as_str()
                ],
                |row| row.get(0),
            )
        })?;

        raw.as_deref().map(parse_timestamp).transpose()
    }

    async fn log_activity(&self, record: &ActivityRecord) -> Result<()> {
        let metadata = record
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO activity_logs
                    (id, action_type, description, email_id, status, metadata,
                     processing_time_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    record.action_type.as_str(),
                    record.description,
                    record.message_id,
                    record.status.as_str(),
                    metadata,
                    record.processing_time_ms.map(|ms| ms as i64),
                    timestamp(&record.created_at),
                ],
            )
        })?;
        Ok(())
    }

    async fn insert_draft(
        &self,
        draft: &DraftProposal,
        provider_draft_id: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_drafts
                    (id, recipient, recipient_name, subject, body, original_email_id,
                     thread_id, response_type, ai_confidence, category, priority,
                     provider_draft_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id,
                    draft.recipient,
                    draft.recipient_name,
                    draft.subject,
                    draft.body,
                    draft.original_message_id,
                    draft.thread_id,
                    draft.response_type.as_str(),
                    draft.confidence,
                    draft.category.as_str(),
                    draft.priority.as_str(),
                    provider_draft_id,
                    timestamp(&Utc::now()),
                ],
            )
        })?;
        Ok(id)
    }

    async fn record_daily_statistics(
        &self,
        date: NaiveDate,
        stats: &RunStatistics,
        elapsed_seconds: f64,
    ) -> Result<()> {
        let now = timestamp(&Utc::now());
        let count = |c: Category| stats.category_count(c) as i64;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_statistics
                    (date, emails_processed, drafts_created, spam_deleted, unsubscribe_actions,
                     business_emails, personal_emails, promotional_emails, social_emails,
                     other_emails, error_count, average_processing_time, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                 ON CONFLICT(date) DO UPDATE SET
                    emails_processed = emails_processed + excluded.emails_processed,
                    drafts_created = drafts_created + excluded.drafts_created,
                    spam_deleted = spam_deleted + excluded.spam_deleted,
                    unsubscribe_actions = unsubscribe_actions + excluded.unsubscribe_actions,
                    business_emails = business_emails + excluded.business_emails,
                    personal_emails = personal_emails + excluded.personal_emails,
                    promotional_emails = promotional_emails + excluded.promotional_emails,
                    social_emails = social_emails + excluded.social_emails,
                    other_emails = other_emails + excluded.other_emails,
                    error_count = error_count + excluded.error_count,
                    average_processing_time = excluded.average_processing_time,
                    updated_at = excluded.updated_at",
                params![
                    date.to_string(),
                    stats.processed as i64,
                    stats.drafts_created as i64,
                    stats.spam_deleted as i64,
                    stats.unsubscribe_flags as i64,
                    count(Category::Business),
                    count(Category::Personal),
                    count(Category::Promotional),
                    count(Category::Social),
                    count(Category::Other),
                    stats.errors as i64,
                    elapsed_seconds,
                    now,
                ],
            )
        })?;
        Ok(())
    }
}

/// Store that keeps everything in memory; used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    seeded_last_run: Option<DateTime<Utc>>,
    activities: Vec<ActivityRecord>,
    drafts: Vec<StoredDraft>,
    daily: Vec<(NaiveDate, RunStatistics, f64)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a known last successful run, e.g. read from the real store
    pub fn with_last_run(last_run: Option<DateTime<Utc>>) -> Self {
        let store = Self::default();
        if let Ok(mut state) = store.inner.lock() {
            state.seeded_last_run = last_run;
        }
        store
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| AssistantError::PersistenceError("Store lock poisoned".to_string()))
    }

    pub fn activities(&self) -> Vec<ActivityRecord> {
        self.lock().map(|s| s.activities.clone()).unwrap_or_default()
    }

    pub fn drafts(&self) -> Vec<StoredDraft> {
        self.lock().map(|s| s.drafts.clone()).unwrap_or_default()
    }

    pub fn daily_statistics(&self) -> Vec<(NaiveDate, RunStatistics, f64)> {
        self.lock().map(|s| s.daily.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn last_successful_run(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.lock()?;
        let logged = state
            .activities
            .iter()
            .filter(|a| {
                a.action_type == ActivityType::EmailProcessingCompleted
                    && a.status == ActivityStatus::Success
            })
            .map(|a| a.created_at)
            .max();
        Ok(logged.max(state.seeded_last_run))
    }

    async fn log_activity(&self, record: &ActivityRecord) -> Result<()> {
        self.lock()?.activities.push(record.clone());
        Ok(())
    }

    async fn insert_draft(
        &self,
        draft: &DraftProposal,
        provider_draft_id: Option<&str>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.lock()?.drafts.push(StoredDraft {
            id: id.clone(),
            proposal: draft.clone(),
            provider_draft_id: provider_draft_id.map(str::to_string),
        });
        Ok(id)
    }

    async fn record_daily_statistics(
        &self,
        date: NaiveDate,
        stats: &RunStatistics,
        elapsed_seconds: f64,
    ) -> Result<()> {
        self.lock()?.daily.push((date, stats.clone(), elapsed_seconds));
        Ok(())
    }
}
