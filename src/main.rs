use anyhow::Result;
use clap::Parser;
use gmail_assistant::cli::{self, Cli, Commands, LogFormat};
use gmail_assistant::client::{GmailMailClient, MailClient};
use gmail_assistant::config::Config;
use gmail_assistant::error::AssistantError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let Ok(mut buffer) = self.buffer.lock() else {
            return Ok(());
        };
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        display_error(&e);
        eprintln!("\nFor help, run: gmail-assistant --help");
        process::exit(1);
    }
}

fn init_tracing(cli: &Cli, multi: &Arc<MultiProgress>) {
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_assistant=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gmail_assistant=info,warn"))
    };

    match cli.log_format {
        // Scheduled runs ship logs to a collector; no progress bars to dodge
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(MultiProgressMakeWriter {
                multi: Arc::clone(multi),
            })
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init(),
    }
}

async fn run() -> Result<()> {
    // Several dependencies pull in different rustls crypto providers
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let multi_progress = Arc::new(MultiProgress::new());
    if cli.log_format == LogFormat::Json {
        multi_progress.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    init_tracing(&cli, &multi_progress);

    match &cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authenticating with Gmail API...");

            if *force && gmail_assistant::auth::clear_token_cache(&cli.token_cache).await? {
                println!("Removed existing token cache");
            }

            let hub =
                gmail_assistant::auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache)
                    .await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let session = GmailMailClient::new(hub).ensure_session().await?;
            println!(
                "Connected to account: {}",
                session.email_address.unwrap_or_default()
            );

            Ok(())
        }

        Commands::Run {
            dry_run,
            max_emails,
        } => {
            tracing::info!("Starting email processing run");
            if *dry_run {
                println!("Running in DRY RUN mode - no changes will be made");
            }

            let report =
                cli::run_pipeline(&cli, *dry_run, *max_emails, (*multi_progress).clone()).await?;

            println!("\n========================================");
            print!("{}", report.to_text());
            println!("========================================");
            if report.dry_run {
                println!("\n{}", report.to_markdown());
            }

            if report.success() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "Run {} failed: {}",
                    report.run_id,
                    report.failure.as_deref().unwrap_or("unknown reason")
                ))
            }
        }

        Commands::Status => {
            let config = Config::load(&cli.config).await?;
            let overview = cli::load_status(&config).await?;

            println!("\n========================================");
            println!("Assistant Status");
            println!("========================================");
            match &overview.status {
                Some(status) => {
                    println!("Last run: {}", status.last_run.format("%Y-%m-%d %H:%M:%S"));
                    println!("Success: {}", status.success);
                    println!("Next scheduled: {}", status.next_scheduled);
                }
                None => println!("No runs recorded yet (status file: {:?})", config.storage.status_file),
            }
            if let Some(last) = overview.last_successful_run {
                println!("Checkpoint: {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(today) = &overview.today {
                println!("\nToday:");
                println!("  Emails processed: {}", today.emails_processed);
                println!("  Drafts created: {}", today.drafts_created);
                println!("  Spam deleted: {}", today.spam_deleted);
                println!("  Unsubscribe flags: {}", today.unsubscribe_actions);
                println!("  Errors: {}", today.error_count);
            }
            println!("========================================");

            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(AssistantError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nPlease edit this file to customize your settings.");
            println!("Key settings to review:");
            println!("  - processing_limits.max_emails_per_run: Messages handled per run");
            println!("  - spam_detection.sensitivity: 'low', 'medium' or 'high'");
            println!("  - ai_response.require_approval: Keep drafts local until reviewed");
            println!("  - storage.database_path: Activity log and statistics database");

            Ok(())
        }

        Commands::Classify {
            from,
            subject,
            body,
        } => {
            let config = Config::load(&cli.config).await?;
            let (classification, draft) = cli::classify_offline(&config, from, subject, body);

            println!("Category: {}", classification.category);
            println!("Priority: {}", classification.priority);
            println!(
                "Spam: {} (score {:.2})",
                classification.spam.is_spam, classification.spam.score
            );
            if !classification.spam.reasons.is_empty() {
                println!("  Reasons: {}", classification.spam.reason_text());
            }
            println!("Unsubscribe: {}", classification.unsubscribe.has_unsubscribe);
            for link in &classification.unsubscribe.links {
                println!("  - {}", link);
            }
            println!("Response type: {}", classification.response_type);

            match draft {
                Some(draft) => {
                    println!("\nDraft (confidence {:.2}):", draft.confidence);
                    println!("Subject: {}", draft.subject);
                    println!("\n{}", draft.body);
                }
                None => println!("\nNo draft would be created"),
            }

            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(err) = error.downcast_ref::<AssistantError>() {
        match err {
            AssistantError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is valid.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: gmail-assistant auth --force");
            }
            AssistantError::ApiError(_)
            | AssistantError::NetworkError(_)
            | AssistantError::ServerError { .. } => {
                eprintln!("\nHint: This may be a temporary API error.");
                eprintln!("      Try running the command again.");
            }
            AssistantError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Increase processing_limits.rate_limit_delay_ms in config.");
            }
            AssistantError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: gmail-assistant init-config --force");
            }
            AssistantError::DatabaseError(_) | AssistantError::PersistenceError(_) => {
                eprintln!("\nHint: Check that storage.database_path is writable.");
            }
            _ => {}
        }
    }
}
