use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AssistantError, Result};
use crate::models::Category;

/// Lifecycle of one processing run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Authenticating,
    Fetching,
    Processing,
    Aggregating,
    Completed,
    Failed,
}

impl RunPhase {
    /// Forward-only progression; `Failed` is reachable from any live phase
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Idle, Authenticating)
            | (Authenticating, Fetching)
            | (Fetching, Processing)
            | (Processing, Aggregating)
            | (Aggregating, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }
}

/// Tracks the current phase of a run and when each phase was entered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub phase: RunPhase,
    pub transitions: Vec<(RunPhase, DateTime<Utc>)>,
    pub failure: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            phase: RunPhase::Idle,
            transitions: vec![(RunPhase::Idle, Utc::now())],
            failure: None,
        }
    }

    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(AssistantError::StateError(format!(
                "Invalid run transition {:?} -> {:?}",
                self.phase, next
            )));
        }
        tracing::debug!(run_id = %self.run_id, "Run phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        self.transitions.push((next, Utc::now()));
        Ok(())
    }

    /// Move to `Failed`, keeping the first failure reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        let reason = reason.into();
        tracing::error!(run_id = %self.run_id, phase = ?self.phase, "Run failed: {}", reason);
        self.phase = RunPhase::Failed;
        self.transitions.push((RunPhase::Failed, Utc::now()));
        self.failure.get_or_insert(reason);
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower bound of the fetch window, read once before a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub since: DateTime<Utc>,
    /// False when no successful run exists and the default lookback was used
    pub recorded: bool,
}

impl RunCheckpoint {
    pub fn resolve(
        last_successful_run: Option<DateTime<Utc>>,
        default_lookback_hours: i64,
        now: DateTime<Utc>,
    ) -> Self {
        match last_successful_run {
            Some(since) => Self {
                since,
                recorded: true,
            },
            None => Self {
                since: now - Duration::hours(default_lookback_hours),
                recorded: false,
            },
        }
    }

    /// Whether a message received at `received_at` falls inside the window.
    /// Undated messages are always considered new.
    pub fn admits(&self, received_at: Option<DateTime<Utc>>) -> bool {
        received_at.map_or(true, |t| t > self.since)
    }

    /// Checkpoint to record for a run whose message listing was requested at
    /// `listed_at`. Provider dates carry millisecond resolution, so the mark
    /// sits just below the listing's millisecond and anything arriving from
    /// then on is admitted by the next run.
    pub fn listing_mark(listed_at: DateTime<Utc>) -> DateTime<Utc> {
        listed_at.trunc_subsecs(3) - Duration::milliseconds(1)
    }
}

/// Per-run counters, accumulated in memory and flushed once at the end
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatistics {
    pub started_at: DateTime<Utc>,
    pub processed: usize,
    pub drafts_created: usize,
    pub drafts_skipped: usize,
    pub draft_save_failures: usize,
    pub spam_deleted: usize,
    pub unsubscribe_flags: usize,
    pub categories: BTreeMap<Category, usize>,
    pub errors: usize,
    pub skipped_before_checkpoint: usize,
}

impl RunStatistics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            processed: 0,
            drafts_created: 0,
            drafts_skipped: 0,
            draft_save_failures: 0,
            spam_deleted: 0,
            unsubscribe_flags: 0,
            categories: BTreeMap::new(),
            errors: 0,
            skipped_before_checkpoint: 0,
        }
    }

    pub fn record_category(&mut self, category: Category) {
        *self.categories.entry(category).or_insert(0) += 1;
    }

    pub fn category_count(&self, category: Category) -> usize {
        self.categories.get(&category).copied().unwrap_or(0)
    }

    /// True when the run did nothing at all
    pub fn is_empty(&self) -> bool {
        self.processed == 0
            && self.drafts_created == 0
            && self.spam_deleted == 0
            && self.unsubscribe_flags == 0
            && self.errors == 0
            && self.categories.values().all(|c| *c == 0)
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Machine-readable status written after every run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatus {
    pub last_run: DateTime<Utc>,
    pub success: bool,
    pub next_scheduled: String,
}

impl RunStatus {
    pub fn new(last_run: DateTime<Utc>, success: bool) -> Self {
        Self {
            last_run,
            success,
            next_scheduled: "Managed by scheduler".to_string(),
        }
    }

    /// Save status to disk
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        tracing::debug!("Saved run status to {:?}", path);
        Ok(())
    }

    /// Load status from disk, `None` before the first run
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::info!("No run status file found at {:?}", path);
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(path).await?;
        let status: Self = serde_json::from_str(&json)?;
        Ok(Some(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_happy_path_transitions() {
        let mut state = RunState::new();
        for phase in [
            RunPhase::Authenticating,
            RunPhase::Fetching,
            RunPhase::Processing,
            RunPhase::Aggregating,
            RunPhase::Completed,
        ] {
            state.advance(phase).unwrap();
        }
        assert_eq!(state.phase, RunPhase::Completed);
        assert_eq!(state.transitions.len(), 6);
        assert!(state.failure.is_none());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut state = RunState::new();
        let err = state.advance(RunPhase::Processing).unwrap_err();
        assert!(matches!(err, AssistantError::StateError(_)));

        assert!(!RunPhase::Completed.can_transition_to(RunPhase::Failed));
        assert!(!RunPhase::Failed.can_transition_to(RunPhase::Idle));
        assert!(!RunPhase::Processing.can_transition_to(RunPhase::Fetching));
    }

    #[test]
    fn test_failed_reachable_from_any_live_phase() {
        for phase in [
            RunPhase::Idle,
            RunPhase::Authenticating,
            RunPhase::Fetching,
            RunPhase::Processing,
            RunPhase::Aggregating,
        ] {
            assert!(phase.can_transition_to(RunPhase::Failed));
        }
    }

    #[test]
    fn test_fail_keeps_first_reason() {
        let mut state = RunState::new();
        state.advance(RunPhase::Authenticating).unwrap();
        state.fail("token expired");
        state.fail("second");
        assert_eq!(state.phase, RunPhase::Failed);
        assert_eq!(state.failure.as_deref(), Some("token expired"));
    }

    #[test]
    fn test_checkpoint_resolution() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let fresh = RunCheckpoint::resolve(None, 8, now);
        assert!(!fresh.recorded);
        assert_eq!(fresh.since, Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap());

        let last = Utc.with_ymd_and_hms(2024, 4, 30, 9, 0, 0).unwrap();
        let recorded = RunCheckpoint::resolve(Some(last), 8, now);
        assert!(recorded.recorded);
        assert_eq!(recorded.since, last);
    }

    #[test]
    fn test_checkpoint_admits() {
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let cp = RunCheckpoint {
            since,
            recorded: true,
        };
        assert!(!cp.admits(Some(since)));
        assert!(!cp.admits(Some(since - Duration::minutes(1))));
        assert!(cp.admits(Some(since + Duration::seconds(1))));
        assert!(cp.admits(None));
    }

    #[test]
    fn test_listing_mark_admits_same_millisecond_arrivals() {
        let listed_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + Duration::microseconds(7_450);
        let mark = RunCheckpoint::listing_mark(listed_at);
        assert_eq!(
            mark,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::milliseconds(6)
        );

        let next = RunCheckpoint {
            since: mark,
            recorded: true,
        };
        // Provider time of a message landing in the listing's millisecond
        let arrival = DateTime::from_timestamp_millis(listed_at.timestamp_millis()).unwrap();
        assert!(next.admits(Some(arrival)));
        assert!(next.admits(Some(arrival + Duration::milliseconds(3))));
        assert!(!next.admits(Some(arrival - Duration::milliseconds(1))));
    }

    #[test]
    fn test_statistics_counters() {
        let mut stats = RunStatistics::new(Utc::now());
        assert!(stats.is_empty());

        stats.record_category(Category::Business);
        stats.record_category(Category::Business);
        stats.record_category(Category::Social);

        assert_eq!(stats.category_count(Category::Business), 2);
        assert_eq!(stats.category_count(Category::Other), 0);
        assert!(!stats.is_empty());
    }

    #[test]
    fn test_statistics_category_serialization() {
        let mut stats = RunStatistics::new(Utc::now());
        stats.record_category(Category::Promotional);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["categories"]["promotional"], 1);
    }

    #[tokio::test]
    async fn test_status_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("status.json");

        assert!(RunStatus::load(&path).await.unwrap().is_none());

        let status = RunStatus::new(Utc::now(), false);
        status.save(&path).await.unwrap();

        let loaded = RunStatus::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, status);
        assert_eq!(loaded.next_scheduled, "Managed by scheduler");

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\"success\": false"));
    }
}
