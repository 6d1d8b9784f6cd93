//! One processing run: checkpoint, fetch, classify, draft, plan, execute, aggregate

use chrono::{DateTime, Utc};
use google_gmail1::api::Message;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::client::{build_incremental_query, MailClient, ReplyMessage, Session};
use crate::config::Config;
use crate::drafter::ResponseDrafter;
use crate::error::{AssistantError, Result};
use crate::models::{CanonicalMessage, ClassificationResult, DraftProposal};
use crate::normalizer;
use crate::planner::{group_into_batches, Action, ActionBatch, ActionKind, ActionPlanner, BatchKey};
use crate::rate_limiter::RateLimiter;
use crate::report::RunReport;
use crate::state::{RunCheckpoint, RunPhase, RunState, RunStatistics};
use crate::store::{subject_excerpt, ActivityRecord, ActivityStatus, ActivityStore, ActivityType};

/// Progress notifications for a CLI progress bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Listed { total: usize },
    Fetched { done: usize, total: usize },
    Processed { done: usize, total: usize },
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Spam verdict details kept until the trash batch has run
struct SpamNote {
    subject: String,
    score: f64,
    reasons: Vec<String>,
}

/// Mutable bookkeeping for a single run
struct RunContext {
    state: RunState,
    stats: RunStatistics,
    actions: Vec<Action>,
    drafts: Vec<DraftProposal>,
    spam_notes: HashMap<String, SpamNote>,
    time_limit_reached: bool,
    listed_at: Option<DateTime<Utc>>,
}

/// Orchestrates runs against a mail client and an activity store
pub struct RunCoordinator<C, S> {
    client: C,
    store: S,
    config: Config,
    classifier: Classifier,
    drafter: ResponseDrafter,
    planner: ActionPlanner,
    rate_limiter: RateLimiter,
    progress: Option<ProgressCallback>,
}

impl<C, S> RunCoordinator<C, S>
where
    C: MailClient,
    S: ActivityStore,
{
    pub fn new(client: C, store: S, config: Config) -> Self {
        let rate_limiter = RateLimiter::from_millis(config.processing_limits.rate_limit_delay_ms);
        Self {
            classifier: Classifier::new(&config),
            drafter: ResponseDrafter::new(&config.ai_response),
            planner: ActionPlanner::new(&config.labels),
            client,
            store,
            config,
            rate_limiter,
            progress: None,
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn dry_run(&self) -> bool {
        self.config.execution.dry_run
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(cb) = &self.progress {
            cb(event);
        }
    }

    /// Execute one full run. Always returns a report; failures are recorded
    /// in it rather than returned.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut ctx = RunContext {
            state: RunState::new(),
            stats: RunStatistics::new(started_at),
            actions: Vec::new(),
            drafts: Vec::new(),
            spam_notes: HashMap::new(),
            time_limit_reached: false,
            listed_at: None,
        };

        info!(run_id = %ctx.state.run_id, dry_run = self.dry_run(), "Starting email processing run");

        let mut checkpoint = None;
        let mut batches = Vec::new();
        let mut advanced_to = None;

        let outcome = self
            .run_phases(&mut ctx, started_at, clock, &mut checkpoint, &mut batches, &mut advanced_to)
            .await;

        if let Err(e) = outcome {
            ctx.state.fail(e.to_string());
            self.log(
                ActivityRecord::new(
                    ActivityType::EmailProcessingCompleted,
                    format!("Processing run failed: {}", e),
                )
                .status(ActivityStatus::Failed)
                .metadata(json!({ "statistics": &ctx.stats })),
            )
            .await;
        }

        let report = RunReport {
            run_id: ctx.state.run_id.clone(),
            started_at,
            completed_at: Utc::now(),
            final_phase: ctx.state.phase,
            failure: ctx.state.failure.clone(),
            dry_run: self.dry_run(),
            checkpoint,
            checkpoint_advanced_to: advanced_to,
            time_limit_reached: ctx.time_limit_reached,
            statistics: ctx.stats,
            actions: ctx.actions,
            batches,
            drafts: ctx.drafts,
        };

        if report.success() {
            info!(
                processed = report.statistics.processed,
                errors = report.statistics.errors,
                "Email processing run completed"
            );
        }
        report
    }

    async fn run_phases(
        &self,
        ctx: &mut RunContext,
        started_at: DateTime<Utc>,
        clock: Instant,
        checkpoint_out: &mut Option<RunCheckpoint>,
        batches_out: &mut Vec<ActionBatch>,
        advanced_to: &mut Option<DateTime<Utc>>,
    ) -> Result<()> {
        // The checkpoint is read once, before anything else happens
        let last_run = self.store.last_successful_run().await?;
        let checkpoint = RunCheckpoint::resolve(
            last_run,
            self.config.storage.default_lookback_hours,
            started_at,
        );
        *checkpoint_out = Some(checkpoint);
        debug!(since = %checkpoint.since, recorded = checkpoint.recorded, "Resolved run checkpoint");

        ctx.state.advance(RunPhase::Authenticating)?;
        self.rate_limiter.acquire().await;
        let session = self.client.ensure_session().await.map_err(|e| match e {
            AssistantError::AuthError(_) => e,
            other => AssistantError::AuthError(other.to_string()),
        })?;
        info!("Authenticated as {}", session.email_address.as_deref().unwrap_or("me"));

        ctx.state.advance(RunPhase::Fetching)?;
        let messages = self.fetch(&session, &checkpoint, ctx).await?;

        ctx.state.advance(RunPhase::Processing)?;
        let total = messages.len();
        let time_budget =
            Duration::from_secs(self.config.processing_limits.max_processing_time_minutes * 60);

        for (index, raw) in messages.into_iter().enumerate() {
            if clock.elapsed() >= time_budget {
                warn!(
                    remaining = total - index,
                    "Processing time limit reached, deferring remaining messages"
                );
                ctx.time_limit_reached = true;
                break;
            }

            let message_id = raw.id.clone().unwrap_or_else(|| "unknown".to_string());
            if let Err(e) = self.process_message(&session, raw, &checkpoint, ctx).await {
                error!(message_id = %message_id, "Error processing email: {}", e);
                ctx.stats.errors += 1;
            }
            self.notify(ProgressEvent::Processed {
                done: index + 1,
                total,
            });
        }

        *batches_out = group_into_batches(&ctx.actions, self.config.processing_limits.batch_size);
        if self.dry_run() {
            // Nothing is sent; report what the batches would have done
            ctx.stats.spam_deleted = ctx.spam_notes.len();
        } else {
            self.execute_batches(&session, batches_out, ctx).await;
        }

        ctx.state.advance(RunPhase::Aggregating)?;
        let completed_at = Utc::now();
        let elapsed = ctx.stats.elapsed_seconds(completed_at);

        if let Err(e) = self
            .store
            .record_daily_statistics(completed_at.date_naive(), &ctx.stats, elapsed)
            .await
        {
            warn!("Failed to update daily statistics: {}", e);
        }

        // Mail arriving after the listing belongs to the next run; a run cut
        // short re-covers its own window
        let new_checkpoint = match ctx.listed_at {
            Some(listed_at) if !ctx.time_limit_reached => RunCheckpoint::listing_mark(listed_at),
            _ => started_at,
        };

        if self.dry_run() {
            info!("Dry run: checkpoint left at {}", checkpoint.since);
        } else {
            self.store
                .log_activity(
                    &ActivityRecord::new(
                        ActivityType::EmailProcessingCompleted,
                        format!(
                            "Processing run completed: {} emails processed",
                            ctx.stats.processed
                        ),
                    )
                    .metadata(json!({ "statistics": &ctx.stats, "elapsed_seconds": elapsed }))
                    .at(new_checkpoint),
                )
                .await
                .map_err(|e| {
                    AssistantError::PersistenceError(format!("Could not record checkpoint: {}", e))
                })?;
            *advanced_to = Some(new_checkpoint);
        }

        ctx.state.advance(RunPhase::Completed)?;
        Ok(())
    }

    /// List and download messages in the checkpoint window. Listing failure is
    /// fatal; a single message failing to download is not.
    async fn fetch(
        &self,
        session: &Session,
        checkpoint: &RunCheckpoint,
        ctx: &mut RunContext,
    ) -> Result<Vec<Message>> {
        let query = build_incremental_query(checkpoint.since);
        let max = self.config.processing_limits.max_emails_per_run;

        self.rate_limiter.acquire().await;
        ctx.listed_at = Some(Utc::now());
        let ids = self.client.list_message_ids(session, &query, max).await?;
        let ids: Vec<String> = ids.into_iter().take(max).collect();
        info!("Found {} new emails to process", ids.len());
        self.notify(ProgressEvent::Listed { total: ids.len() });

        let total = ids.len();
        let mut messages = Vec::with_capacity(total);
        for (index, id) in ids.iter().enumerate() {
            self.rate_limiter.acquire().await;
            match self.client.get_message(session, id).await {
                Ok(msg) => messages.push(msg),
                Err(e) if e.is_fatal_to_run() => return Err(e),
                Err(e) => {
                    warn!(message_id = %id, "Skipping message that failed to fetch: {}", e);
                    ctx.stats.errors += 1;
                }
            }
            self.notify(ProgressEvent::Fetched {
                done: index + 1,
                total,
            });
        }

        Ok(messages)
    }

    async fn process_message(
        &self,
        session: &Session,
        raw: Message,
        checkpoint: &RunCheckpoint,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let timer = Instant::now();
        let message = normalizer::normalize(raw)?;

        if !checkpoint.admits(message.received_at) {
            debug!(message_id = %message.id, "Message predates checkpoint, skipping");
            ctx.stats.skipped_before_checkpoint += 1;
            return Ok(());
        }

        let classification = self.classifier.classify(&message);
        let planned = self.planner.plan(&message, &classification);

        if classification.spam.is_spam {
            debug!(
                message_id = %message.id,
                score = classification.spam.score,
                "Spam detected: {}",
                classification.spam.reason_text()
            );
            ctx.spam_notes.insert(
                message.id.clone(),
                SpamNote {
                    subject: message.subject.clone(),
                    score: classification.spam.score,
                    reasons: classification.spam.reasons.clone(),
                },
            );
            ctx.actions.extend(planned);
            ctx.stats.processed += 1;
            return Ok(());
        }

        ctx.stats.record_category(classification.category);
        ctx.actions.extend(planned);

        if classification.unsubscribe.has_unsubscribe
            && self.config.unsubscribe_detection.flag_for_review
        {
            ctx.stats.unsubscribe_flags += 1;
            self.log(
                ActivityRecord::new(
                    ActivityType::UnsubscribeDetected,
                    format!(
                        "Unsubscribe opportunity found: {}",
                        subject_excerpt(&message.subject)
                    ),
                )
                .message(&message.id)
                .metadata(json!({ "links": &classification.unsubscribe.links })),
            )
            .await;
        }

        if self.config.ai_response.enabled && classification.category.wants_reply() {
            self.draft_reply(session, &message, &classification, ctx).await;
        }

        self.log(
            ActivityRecord::new(
                ActivityType::EmailProcessed,
                format!("Processed email: {}", subject_excerpt(&message.subject)),
            )
            .message(&message.id)
            .metadata(json!({
                "category": classification.category,
                "spam_score": classification.spam.score,
                "has_unsubscribe": classification.unsubscribe.has_unsubscribe,
                "priority": classification.priority,
            }))
            .processing_time_ms(timer.elapsed().as_millis() as u64),
        )
        .await;

        ctx.stats.processed += 1;
        Ok(())
    }

    /// Draft, store and optionally push a reply. Failures here never fail the message.
    async fn draft_reply(
        &self,
        session: &Session,
        message: &CanonicalMessage,
        classification: &ClassificationResult,
        ctx: &mut RunContext,
    ) {
        let Some(proposal) = self.drafter.draft(message, classification) else {
            return;
        };

        if ctx.stats.drafts_created >= self.config.processing_limits.max_drafts_per_run {
            debug!(message_id = %message.id, "Draft limit reached, skipping");
            ctx.stats.drafts_skipped += 1;
            return;
        }

        if self.dry_run() {
            ctx.actions.push(Action::new(&message.id, ActionKind::CreateDraft));
            ctx.stats.drafts_created += 1;
            ctx.drafts.push(proposal);
            return;
        }

        match self.save_draft(session, message, &proposal).await {
            Ok(draft_id) => {
                ctx.actions.push(Action::new(&message.id, ActionKind::CreateDraft));
                ctx.stats.drafts_created += 1;
                self.log(
                    ActivityRecord::new(
                        ActivityType::DraftCreated,
                        format!(
                            "Created draft response for: {}",
                            subject_excerpt(&message.subject)
                        ),
                    )
                    .message(&message.id)
                    .metadata(json!({
                        "draft_id": draft_id,
                        "confidence": proposal.confidence,
                        "response_type": proposal.response_type,
                    })),
                )
                .await;
                ctx.drafts.push(proposal);
            }
            Err(e) => {
                warn!(message_id = %message.id, "Failed to save draft: {}", e);
                ctx.stats.draft_save_failures += 1;
                self.log(
                    ActivityRecord::new(
                        ActivityType::DraftSaveFailed,
                        format!("Draft save failed for: {}", subject_excerpt(&message.subject)),
                    )
                    .message(&message.id)
                    .status(ActivityStatus::Failed)
                    .metadata(json!({ "error": e.to_string() })),
                )
                .await;
            }
        }
    }

    async fn save_draft(
        &self,
        session: &Session,
        message: &CanonicalMessage,
        proposal: &DraftProposal,
    ) -> Result<String> {
        let provider_draft_id = if self.config.ai_response.require_approval {
            None
        } else {
            let in_reply_to = message
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("Message-ID"))
                .map(|(_, v)| v.as_str());
            let reply = ReplyMessage::from_proposal(proposal, in_reply_to);
            self.rate_limiter.acquire().await;
            Some(self.client.create_draft(session, &reply).await?)
        };

        self.store
            .insert_draft(proposal, provider_draft_id.as_deref())
            .await
    }

    async fn execute_batches(&self, session: &Session, batches: &[ActionBatch], ctx: &mut RunContext) {
        for batch in batches {
            match &batch.key {
                BatchKey::Trash => {
                    // No batch trash endpoint; one call per message
                    for id in &batch.message_ids {
                        self.rate_limiter.acquire().await;
                        match self.client.trash_message(session, id).await {
                            Ok(()) => {
                                ctx.stats.spam_deleted += 1;
                                self.log_spam_deleted(id, ctx).await;
                            }
                            Err(e) => {
                                error!(message_id = %id, "Failed to trash spam: {}", e);
                                ctx.stats.errors += 1;
                            }
                        }
                    }
                }
                key => {
                    let (add, remove) = key.label_changes();
                    self.rate_limiter.acquire().await;
                    match self
                        .client
                        .batch_modify_labels(session, &batch.message_ids, &add, &remove)
                        .await
                    {
                        Ok(n) => debug!("Applied {} to {} messages", key, n),
                        Err(e) => {
                            error!("Batch {} failed for {} messages: {}", key, batch.message_ids.len(), e);
                            ctx.stats.errors += batch.message_ids.len();
                        }
                    }
                }
            }
        }
    }

    async fn log_spam_deleted(&self, id: &str, ctx: &RunContext) {
        let Some(note) = ctx.spam_notes.get(id) else {
            return;
        };
        self.log(
            ActivityRecord::new(
                ActivityType::SpamDeleted,
                format!("Deleted spam email: {}", subject_excerpt(&note.subject)),
            )
            .message(id)
            .metadata(json!({ "spam_score": note.score, "reasons": &note.reasons })),
        )
        .await;
    }

    /// Activity log writes are best effort
    async fn log(&self, record: ActivityRecord) {
        if let Err(e) = self.store.log_activity(&record).await {
            warn!(
                action = record.action_type.as_str(),
                "Failed to write activity record: {}", e
            );
        }
    }
}
