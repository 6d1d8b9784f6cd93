//! Run summaries

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::models::{Category, DraftProposal};
use crate::planner::{Action, ActionBatch, ActionKind};
use crate::state::{RunCheckpoint, RunPhase, RunStatistics};

/// Outcome of one run, produced whether or not the run succeeded
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub final_phase: RunPhase,
    pub failure: Option<String>,
    pub dry_run: bool,
    pub checkpoint: Option<RunCheckpoint>,
    /// New checkpoint written by this run, if any
    pub checkpoint_advanced_to: Option<DateTime<Utc>>,
    /// Stopped early because the run hit its time budget
    pub time_limit_reached: bool,
    pub statistics: RunStatistics,
    pub actions: Vec<Action>,
    pub batches: Vec<ActionBatch>,
    pub drafts: Vec<DraftProposal>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.final_phase == RunPhase::Completed
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.statistics.elapsed_seconds(self.completed_at)
    }

    pub fn count_actions(&self, kind: fn(&ActionKind) -> bool) -> usize {
        self.actions.iter().filter(|a| kind(&a.kind)).count()
    }

    /// Plain-text summary for logs and the summary file
    pub fn to_text(&self) -> String {
        let stats = &self.statistics;
        let mut out = String::new();

        out.push_str(&format!(
            "Email Processing Summary - {}{}\n\n",
            self.completed_at.format("%Y-%m-%d %H:%M"),
            if self.dry_run { " (DRY RUN)" } else { "" }
        ));

        out.push_str("Processing Statistics:\n");
        out.push_str(&format!("- Emails processed: {}\n", stats.processed));
        out.push_str(&format!("- Drafts created: {}\n", stats.drafts_created));
        if stats.drafts_skipped > 0 {
            out.push_str(&format!("- Drafts skipped (limit): {}\n", stats.drafts_skipped));
        }
        if stats.draft_save_failures > 0 {
            out.push_str(&format!("- Draft save failures: {}\n", stats.draft_save_failures));
        }
        out.push_str(&format!("- Spam deleted: {}\n", stats.spam_deleted));
        out.push_str(&format!("- Unsubscribe actions: {}\n", stats.unsubscribe_flags));
        out.push_str(&format!("- Errors: {}\n", stats.errors));
        if stats.skipped_before_checkpoint > 0 {
            out.push_str(&format!(
                "- Already processed (before checkpoint): {}\n",
                stats.skipped_before_checkpoint
            ));
        }
        out.push('\n');

        out.push_str("Categories:\n");
        for category in Category::ALL {
            out.push_str(&format!(
                "- {}: {}\n",
                capitalize(category.as_str()),
                stats.category_count(category)
            ));
        }
        out.push('\n');

        out.push_str(&format!("Processing time: {:.1} seconds\n", self.elapsed_seconds()));

        if self.time_limit_reached {
            out.push_str("Time limit reached; remaining messages deferred to the next run\n");
        }
        if let Some(reason) = &self.failure {
            out.push_str(&format!("Run failed: {}\n", reason));
        }

        out
    }

    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let stats = &self.statistics;
        let mut md = String::new();

        if self.dry_run {
            md.push_str("# Mailbox Assistant Report (DRY RUN)\n\n");
            md.push_str("> **DRY RUN MODE** - No changes were made. This report shows what WOULD happen.\n\n");
        } else {
            md.push_str("# Mailbox Assistant Report\n\n");
        }
        md.push_str(&format!(
            "Generated: {}\n\n",
            self.completed_at.format("%Y-%m-%d %H:%M:%S")
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Run ID:** {}\n", self.run_id));
        md.push_str(&format!(
            "- **Status:** {}\n",
            if self.success() { "completed" } else { "failed" }
        ));
        if let Some(cp) = &self.checkpoint {
            md.push_str(&format!(
                "- **Window start:** {}{}\n",
                cp.since.format("%Y-%m-%d %H:%M:%S"),
                if cp.recorded { "" } else { " (default lookback)" }
            ));
        }
        md.push_str(&format!("- **Emails processed:** {}\n", stats.processed));
        md.push_str(&format!("- **Processing time:** {:.1} seconds\n\n", self.elapsed_seconds()));

        md.push_str("## Categories\n\n");
        md.push_str("| Category | Emails |\n");
        md.push_str("|----------|--------|\n");
        for category in Category::ALL {
            md.push_str(&format!("| {} | {} |\n", category, stats.category_count(category)));
        }
        md.push('\n');

        if !self.batches.is_empty() {
            md.push_str(if self.dry_run {
                "## Planned Batches\n\n"
            } else {
                "## Batches Executed\n\n"
            });
            for batch in &self.batches {
                md.push_str(&format!("- `{}` on {} messages\n", batch.key, batch.message_ids.len()));
            }
            md.push('\n');
        }

        if !self.drafts.is_empty() {
            md.push_str("## Drafts Awaiting Approval\n\n");
            md.push_str("| Recipient | Subject | Confidence |\n");
            md.push_str("|-----------|---------|------------|\n");
            for draft in &self.drafts {
                md.push_str(&format!(
                    "| {} | {} | {:.2} |\n",
                    draft.recipient_name,
                    draft.subject.replace('|', "\\|"),
                    draft.confidence
                ));
            }
            md.push('\n');
        }

        if let Some(reason) = &self.failure {
            md.push_str(&format!("## Failure\n\n{}\n", reason));
        }

        md
    }

    /// Write the text summary to `dir/summary_YYYYMMDD_HHMM.txt`
    pub async fn save_summary(&self, dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!(
            "summary_{}.txt",
            self.completed_at.format("%Y%m%d_%H%M")
        ));
        tokio::fs::write(&path, self.to_text()).await?;
        Ok(path)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
