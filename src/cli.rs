//! Command-line interface

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth;
use crate::classifier::Classifier;
use crate::client::{GmailMailClient, MailClient};
use crate::config::Config;
use crate::coordinator::{ProgressCallback, ProgressEvent, RunCoordinator};
use crate::drafter::ResponseDrafter;
use crate::error::Result;
use crate::models::{CanonicalMessage, ClassificationResult, DraftProposal};
use crate::report::RunReport;
use crate::state::RunStatus;
use crate::store::{ActivityStore, DailyTotals, MemoryStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "gmail-assistant")]
#[command(version)]
#[command(about = "Classifies new Gmail messages, trashes spam and drafts replies", long_about = None)]
pub struct Cli {
    /// Path to configuration file (.toml or .json)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-assistant/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Process messages received since the last successful run
    Run {
        /// Dry run mode (no mailbox changes, nothing persisted)
        #[arg(long)]
        dry_run: bool,

        /// Override processing_limits.max_emails_per_run
        #[arg(long)]
        max_emails: Option<usize>,
    },

    /// Show the outcome of the last run
    Status,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Classify a message offline and show the reply that would be drafted
    Classify {
        /// From header, e.g. "Jane Doe <jane@example.com>"
        #[arg(long)]
        from: String,

        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        body: String,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a `MultiProgress` with the log writer so log lines print above the bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }

    /// Progress callback driving a single bar through fetch and processing
    pub fn run_progress(&self) -> (ProgressBar, ProgressCallback) {
        let pb = self.add_progress_bar(0, "Fetching messages...");
        let bar = pb.clone();
        let callback: ProgressCallback = Arc::new(move |event| match event {
            ProgressEvent::Listed { total } => {
                bar.set_length(total as u64);
                bar.set_position(0);
            }
            ProgressEvent::Fetched { done, .. } => bar.set_position(done as u64),
            ProgressEvent::Processed { done, total } => {
                if done == 1 {
                    bar.set_message("Processing messages...");
                }
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            }
        });
        (pb, callback)
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration and apply command-line overrides
pub async fn load_config(path: &Path, dry_run: bool, max_emails: Option<usize>) -> Result<Config> {
    let mut config = Config::load(path).await?;
    if dry_run {
        config.execution.dry_run = true;
    }
    if let Some(max) = max_emails {
        config.processing_limits.max_emails_per_run = max;
    }
    config.validate()?;
    Ok(config)
}

/// Run one processing pass against the live mailbox.
///
/// Returns `Err` only when the run could not start; a run that started and
/// failed comes back as a report with `success() == false`.
pub async fn run_pipeline(
    cli: &Cli,
    dry_run: bool,
    max_emails: Option<usize>,
    multi: MultiProgress,
) -> Result<RunReport> {
    let reporter = ProgressReporter::with_multi_progress(multi);

    let config_spinner = reporter.add_spinner("Loading configuration...");
    let config = load_config(&cli.config, dry_run, max_emails).await?;
    reporter.finish_spinner(
        &config_spinner,
        &format!(
            "Configuration loaded (max {} emails, {} drafts)",
            config.processing_limits.max_emails_per_run, config.processing_limits.max_drafts_per_run
        ),
    );

    // A run that cannot reach its store still leaves a failed status behind
    let store = if config.execution.dry_run {
        None
    } else {
        match SqliteStore::open(&config.storage.database_path) {
            Ok(store) => Some(store),
            Err(e) => {
                record_status(&config, false).await;
                return Err(e);
            }
        }
    };

    let auth_spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = match auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await {
        Ok(hub) => hub,
        Err(e) => {
            auth_spinner.finish_and_clear();
            if store.is_some() {
                record_status(&config, false).await;
            }
            return Err(e);
        }
    };
    reporter.finish_spinner(&auth_spinner, "Gmail API authenticated");
    let client = GmailMailClient::new(hub);

    let (pb, progress) = reporter.run_progress();

    let report = match store {
        Some(store) => execute(client, store, config.clone(), progress).await,
        None => {
            let store = MemoryStore::with_last_run(recorded_last_run(&config).await);
            execute(client, store, config.clone(), progress).await
        }
    };
    pb.finish_and_clear();

    if !report.dry_run {
        record_status(&config, report.success()).await;
        match report.save_summary(&config.storage.summary_dir).await {
            Ok(path) => info!("Summary written to {:?}", path),
            Err(e) => warn!("Failed to write summary file: {}", e),
        }
    }

    Ok(report)
}

async fn execute<C, S>(client: C, store: S, config: Config, progress: ProgressCallback) -> RunReport
where
    C: MailClient,
    S: ActivityStore,
{
    RunCoordinator::new(client, store, config)
        .with_progress(progress)
        .run()
        .await
}

/// Last successful run from the on-disk store, read without writing anything
async fn recorded_last_run(config: &Config) -> Option<chrono::DateTime<Utc>> {
    if !config.storage.database_path.exists() {
        return None;
    }
    let store = SqliteStore::open(&config.storage.database_path).ok()?;
    match store.last_successful_run().await {
        Ok(last) => last,
        Err(e) => {
            warn!("Could not read last run from store: {}", e);
            None
        }
    }
}

async fn record_status(config: &Config, success: bool) {
    let status = RunStatus::new(Utc::now(), success);
    if let Err(e) = status.save(&config.storage.status_file).await {
        warn!("Failed to write status file: {}", e);
    }
}

/// Last run status plus today's totals from the store
pub struct StatusOverview {
    pub status: Option<RunStatus>,
    pub last_successful_run: Option<chrono::DateTime<Utc>>,
    pub today: Option<DailyTotals>,
}

pub async fn load_status(config: &Config) -> Result<StatusOverview> {
    let status = RunStatus::load(&config.storage.status_file).await?;

    let (last_successful_run, today) = if config.storage.database_path.exists() {
        let store = SqliteStore::open(&config.storage.database_path)?;
        (
            store.last_successful_run().await?,
            store.daily_totals(Utc::now().date_naive())?,
        )
    } else {
        (None, None)
    };

    Ok(StatusOverview {
        status,
        last_successful_run,
        today,
    })
}

/// Classify a hand-written message without touching the mailbox
pub fn classify_offline(
    config: &Config,
    from: &str,
    subject: &str,
    body: &str,
) -> (ClassificationResult, Option<DraftProposal>) {
    let mut headers = BTreeMap::new();
    headers.insert("From".to_string(), from.to_string());
    headers.insert("Subject".to_string(), subject.to_string());

    let message = CanonicalMessage {
        id: "offline".to_string(),
        thread_id: "offline".to_string(),
        labels: Vec::new(),
        sender: from.to_string(),
        recipient: String::new(),
        subject: subject.to_string(),
        body: body.to_string(),
        headers,
        snippet: body.chars().take(100).collect(),
        size_estimate: body.len() as u64,
        received_at: Some(Utc::now()),
    };

    let classification = Classifier::new(config).classify(&message);
    let draft = if config.ai_response.enabled
        && !classification.spam.is_spam
        && classification.category.wants_reply()
    {
        ResponseDrafter::new(&config.ai_response).draft(&message, &classification)
    } else {
        None
    };

    (classification, draft)
}
