//! Gmail API client with retry logic

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use google_gmail1::api::{BatchModifyMessagesRequest, Draft, Message};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{GmailHub, COMPOSE_SCOPE, MODIFY_SCOPE};
use crate::config::MAX_PROVIDER_BATCH_SIZE;
use crate::error::{AssistantError, Result};
use crate::models::DraftProposal;

/// Largest page the messages.list endpoint serves
const LIST_PAGE_SIZE: usize = 500;

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Validated provider session, passed explicitly to every client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email_address: Option<String>,
    pub validated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(email_address: Option<String>) -> Self {
        Self {
            user_id: "me".to_string(),
            email_address,
            validated_at: Utc::now(),
        }
    }
}

/// Mail provider operations the assistant depends on
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Validate (and refresh if needed) the credentials behind the client
    async fn ensure_session(&self) -> Result<Session>;

    /// Message ids matching `query`, newest first, at most `max_results`
    async fn list_message_ids(
        &self,
        session: &Session,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>>;

    /// Full-format message
    async fn get_message(&self, session: &Session, id: &str) -> Result<Message>;

    /// Add and remove labels on many messages at once; returns how many were modified
    async fn batch_modify_labels(
        &self,
        session: &Session,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize>;

    async fn trash_message(&self, session: &Session, id: &str) -> Result<()>;

    /// Save a reply draft in the mailbox and return its id
    async fn create_draft(&self, session: &Session, reply: &ReplyMessage) -> Result<String>;
}

/// Server-side query for messages newer than `since`.
///
/// The provider resolves `after:` to a whole day.
pub fn build_incremental_query(since: DateTime<Utc>) -> String {
    format!("after:{} -in:sent -in:draft", since.format("%Y/%m/%d"))
}

/// Threaded plain-text reply ready to be encoded as RFC 822
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    /// `Message-ID` header of the message being answered
    pub in_reply_to: Option<String>,
}

impl ReplyMessage {
    pub fn from_proposal(proposal: &DraftProposal, in_reply_to: Option<&str>) -> Self {
        Self {
            to: proposal.recipient.clone(),
            subject: proposal.subject.clone(),
            body: proposal.body.clone(),
            thread_id: Some(proposal.thread_id.clone()).filter(|t| !t.is_empty()),
            in_reply_to: in_reply_to.map(str::to_string),
        }
    }

    pub fn to_rfc822(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("To: {}\r\n", sanitize_header(&self.to)));
        out.push_str(&format!("Subject: {}\r\n", encode_header_value(&self.subject)));
        if let Some(id) = &self.in_reply_to {
            let id = sanitize_header(id);
            out.push_str(&format!("In-Reply-To: {}\r\n", id));
            out.push_str(&format!("References: {}\r\n", id));
        }
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
        out.push_str("\r\n");
        out.push_str(&self.body.replace("\r\n", "\n").replace('\n', "\r\n"));
        out.into_bytes()
    }
}

/// Strip line breaks so a value cannot inject extra headers
fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for non-ASCII header values
fn encode_header_value(value: &str) -> String {
    let value = sanitize_header(value);
    if value.is_ascii() {
        value
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

/// Production client backed by the google-gmail1 hub
pub struct GmailMailClient {
    hub: GmailHub,
    max_retries: u32,
}

impl GmailMailClient {
    pub fn new(hub: GmailHub) -> Self {
        Self {
            hub,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Execute an async operation with exponential backoff retry
async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_permanent() || attempts > max_retries => return Err(e),
            Err(e) => {
                let wait = match &e {
                    AssistantError::RateLimitExceeded { retry_after } => {
                        delay.max(Duration::from_secs(*retry_after))
                    }
                    _ => delay,
                };
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    attempts,
                    max_retries + 1,
                    e,
                    wait
                );
                tokio::time::sleep(wait).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }
}

#[async_trait]
impl MailClient for GmailMailClient {
    async fn ensure_session(&self) -> Result<Session> {
        let profile = with_retry("get_profile", self.max_retries, || async {
            let (_, profile) = self
                .hub
                .users()
                .get_profile("me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(profile)
        })
        .await
        .map_err(|e| match e {
            AssistantError::AuthError(_) => e,
            other => AssistantError::AuthError(format!("Session validation failed: {}", other)),
        })?;

        debug!("Session valid for {:?}", profile.email_address);
        Ok(Session::new(profile.email_address))
    }

    async fn list_message_ids(
        &self,
        session: &Session,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        while all_ids.len() < max_results {
            let page_size = (max_results - all_ids.len()).min(LIST_PAGE_SIZE) as u32;
            let token = page_token.clone();

            let response = with_retry("list_messages", self.max_retries, || {
                let token = token.clone();
                async move {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list(&session.user_id)
                        .q(query)
                        .max_results(page_size);

                    if let Some(token) = token.as_ref() {
                        call = call.page_token(token);
                    }

                    let (_, response) = call.add_scope(MODIFY_SCOPE).doit().await?;
                    Ok(response)
                }
            })
            .await?;

            if let Some(messages) = response.messages {
                all_ids.extend(messages.into_iter().filter_map(|m| m.id));
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        all_ids.truncate(max_results);
        debug!("Query {:?} matched {} messages", query, all_ids.len());
        Ok(all_ids)
    }

    async fn get_message(&self, session: &Session, id: &str) -> Result<Message> {
        with_retry("get_message", self.max_retries, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get(&session.user_id, id)
                .format("full")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(msg)
        })
        .await
        .map_err(|e| match e {
            AssistantError::AuthError(_) => e,
            other => AssistantError::FetchError {
                message_id: id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    async fn batch_modify_labels(
        &self,
        session: &Session,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let add_labels = Some(add_label_ids.to_vec()).filter(|l| !l.is_empty());
        let remove_labels = Some(remove_label_ids.to_vec()).filter(|l| !l.is_empty());
        let mut total_modified = 0;

        for chunk in message_ids.chunks(MAX_PROVIDER_BATCH_SIZE) {
            with_retry("batch_modify_labels", self.max_retries, || async {
                let request = BatchModifyMessagesRequest {
                    ids: Some(chunk.to_vec()),
                    add_label_ids: add_labels.clone(),
                    remove_label_ids: remove_labels.clone(),
                };

                self.hub
                    .users()
                    .messages_batch_modify(request, &session.user_id)
                    .add_scope(MODIFY_SCOPE)
                    .doit()
                    .await?;

                Ok(())
            })
            .await?;

            total_modified += chunk.len();
        }

        Ok(total_modified)
    }

    async fn trash_message(&self, session: &Session, id: &str) -> Result<()> {
        with_retry("trash_message", self.max_retries, || async {
            self.hub
                .users()
                .messages_trash(&session.user_id, id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(())
        })
        .await
    }

    async fn create_draft(&self, session: &Session, reply: &ReplyMessage) -> Result<String> {
        let raw = reply.to_rfc822();
        let mime: mime::Mime = "message/rfc822"
            .parse()
            .map_err(|e| AssistantError::DraftError(format!("Invalid MIME type: {}", e)))?;

        let (_, draft) = with_retry("create_draft", self.max_retries, || {
            let raw = raw.clone();
            let mime = mime.clone();
            async move {
                let draft = Draft {
                    message: Some(Message {
                        thread_id: reply.thread_id.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                };

                let result = self
                    .hub
                    .users()
                    .drafts_create(draft, &session.user_id)
                    .add_scope(COMPOSE_SCOPE)
                    .upload(Cursor::new(raw), mime)
                    .await?;
                Ok(result)
            }
        })
        .await?;

        draft
            .id
            .ok_or_else(|| AssistantError::DraftError("Provider returned a draft without id".to_string()))
    }
}
