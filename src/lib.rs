//! Gmail Assistant
//!
//! Polls a Gmail mailbox for messages received since the last successful run,
//! classifies each one with keyword heuristics, trashes spam, labels the rest,
//! flags unsubscribe opportunities and drafts templated replies.
//!
//! # Overview
//!
//! - **Classification**: pure, configuration-driven category, spam,
//!   unsubscribe, priority and response-type checks
//! - **Drafting**: fixed reply templates with per-type confidence
//! - **Planning**: provider actions grouped into batched calls
//! - **Checkpointing**: each run covers the window since the previous
//!   successful run, so reruns are incremental
//! - **Persistence**: activity log, drafts and daily statistics in SQLite
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_assistant::{auth, Config, GmailMailClient, RunCoordinator, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-assistant/token.json".as_ref(),
//!     )
//!     .await?;
//!
//!     let store = SqliteStore::open(&config.storage.database_path)?;
//!     let report = RunCoordinator::new(GmailMailClient::new(hub), store, config)
//!         .run()
//!         .await;
//!
//!     println!("{}", report.to_text());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Mail provider trait and the Gmail implementation
//! - [`normalizer`] - Provider messages to canonical messages
//! - [`classifier`] - Keyword-heuristic classification
//! - [`drafter`] - Templated reply drafting
//! - [`planner`] - Action planning and batching
//! - [`coordinator`] - One processing run end to end
//! - [`store`] - Activity log, drafts and statistics persistence
//! - [`state`] - Run phases, checkpoint and statistics
//! - [`report`] - Run summaries
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod drafter;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod planner;
pub mod rate_limiter;
pub mod report;
pub mod state;
pub mod store;

pub use error::{AssistantError, Result};

pub use models::{
    CanonicalMessage, Category, ClassificationResult, DraftProposal, Priority, ResponseType,
    SpamVerdict, UnsubscribeVerdict,
};

pub use config::{Config, ProcessingLimits, Sensitivity};

pub use classifier::Classifier;
pub use drafter::ResponseDrafter;
pub use planner::{group_into_batches, Action, ActionBatch, ActionKind, ActionPlanner, BatchKey};

pub use client::{GmailMailClient, MailClient, ReplyMessage, Session};
pub use store::{ActivityRecord, ActivityStore, ActivityType, MemoryStore, SqliteStore};

pub use coordinator::{ProgressEvent, RunCoordinator};
pub use report::RunReport;
pub use state::{RunCheckpoint, RunPhase, RunState, RunStatistics, RunStatus};

pub use rate_limiter::RateLimiter;
