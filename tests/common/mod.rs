//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gmail_assistant::client::{MailClient, ReplyMessage, Session};
use gmail_assistant::config::Config;
use gmail_assistant::error::{AssistantError, Result};
use gmail_assistant::rate_limiter::RateLimiter;
use gmail_assistant::{ActivityStore, RunCoordinator};
use google_gmail1::api::{Message, MessagePart, MessagePartBody, MessagePartHeader};
use mockall::mock;
use std::collections::HashSet;
use std::sync::Mutex;

/// Configuration with defaults except for zero provider delay
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.processing_limits.rate_limit_delay_ms = 0;
    config
}

/// Provider message as returned by `messages.get` with `format=full`
pub fn gmail_message(
    id: &str,
    from: &str,
    subject: &str,
    body: &str,
    received_at: DateTime<Utc>,
) -> Message {
    let header = |name: &str, value: &str| MessagePartHeader {
        name: Some(name.to_string()),
        value: Some(value.to_string()),
    };

    Message {
        id: Some(id.to_string()),
        thread_id: Some(format!("thread_{}", id)),
        label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
        snippet: Some(body.chars().take(100).collect()),
        size_estimate: Some(body.len() as i32),
        internal_date: Some(received_at.timestamp_millis()),
        payload: Some(MessagePart {
            mime_type: Some("text/plain".to_string()),
            headers: Some(vec![
                header("From", from),
                header("To", "me@example.com"),
                header("Subject", subject),
                header("Message-ID", &format!("<{}@mail.example.com>", id)),
            ]),
            body: Some(MessagePartBody {
                data: Some(body.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Message received `minutes` ago
pub fn recent_message(id: &str, from: &str, subject: &str, body: &str, minutes: i64) -> Message {
    gmail_message(id, from, subject, body, Utc::now() - Duration::minutes(minutes))
}

pub fn spam_message(id: &str) -> Message {
    recent_message(
        id,
        "Prize Desk <winner@tempmail.org>",
        "CONGRATULATIONS WINNER!!!",
        "Claim now, this offer is for a limited time only.",
        30,
    )
}

pub fn business_question(id: &str) -> Message {
    recent_message(
        id,
        "Jane Doe <jane@corp.com>",
        "Project budget",
        "Could you confirm the numbers by Friday?",
        20,
    )
}

pub fn promotional_message(id: &str) -> Message {
    recent_message(
        id,
        "Shop <deals@shop.com>",
        "Weekend sale",
        "Save 20% this weekend. To unsubscribe visit https://shop.com/unsubscribe?u=1",
        10,
    )
}

/// Coordinator with a limiter that never sleeps
pub fn coordinator<C: MailClient, S: ActivityStore>(
    client: C,
    store: S,
    config: Config,
) -> RunCoordinator<C, S> {
    RunCoordinator::new(client, store, config).with_rate_limiter(RateLimiter::unlimited())
}

/// Recorded `batch_modify_labels` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyCall {
    pub message_ids: Vec<String>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: Vec<Message>,
    fail_get: HashSet<String>,
    fail_trash: HashSet<String>,
    fail_drafts: bool,
    reject_session: bool,
    arriving: Option<(String, String, String, String)>,
    queries: Vec<String>,
    fetched: Vec<String>,
    modify_calls: Vec<ModifyCall>,
    trashed: Vec<String>,
    drafts: Vec<ReplyMessage>,
}

/// In-memory mailbox that records every mutation
#[derive(Debug, Default)]
pub struct FakeMailbox {
    state: Mutex<MailboxState>,
}

impl FakeMailbox {
    pub fn new(messages: Vec<Message>) -> Self {
        let mailbox = Self::default();
        mailbox.state.lock().unwrap().messages = messages;
        mailbox
    }

    pub fn failing_get(self, id: &str) -> Self {
        self.state.lock().unwrap().fail_get.insert(id.to_string());
        self
    }

    pub fn failing_trash(self, id: &str) -> Self {
        self.state.lock().unwrap().fail_trash.insert(id.to_string());
        self
    }

    pub fn failing_drafts(self) -> Self {
        self.state.lock().unwrap().fail_drafts = true;
        self
    }

    pub fn rejecting_session(self) -> Self {
        self.state.lock().unwrap().reject_session = true;
        self
    }

    /// Message delivered to the mailbox while the first download is in flight
    pub fn arriving_during_fetch(self, id: &str, from: &str, subject: &str, body: &str) -> Self {
        self.state.lock().unwrap().arriving = Some((
            id.to_string(),
            from.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        self
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched.clone()
    }

    pub fn modify_calls(&self) -> Vec<ModifyCall> {
        self.state.lock().unwrap().modify_calls.clone()
    }

    pub fn trashed(&self) -> Vec<String> {
        self.state.lock().unwrap().trashed.clone()
    }

    pub fn drafts(&self) -> Vec<ReplyMessage> {
        self.state.lock().unwrap().drafts.clone()
    }

    /// Any call that changes the mailbox
    pub fn mutation_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.modify_calls.len() + state.trashed.len() + state.drafts.len()
    }
}

#[async_trait]
impl MailClient for FakeMailbox {
    async fn ensure_session(&self) -> Result<Session> {
        if self.state.lock().unwrap().reject_session {
            return Err(AssistantError::AuthError("token has been revoked".to_string()));
        }
        Ok(Session::new(Some("me@example.com".to_string())))
    }

    async fn list_message_ids(
        &self,
        _session: &Session,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(query.to_string());
        Ok(state
            .messages
            .iter()
            .filter_map(|m| m.id.clone())
            .take(max_results)
            .collect())
    }

    async fn get_message(&self, _session: &Session, id: &str) -> Result<Message> {
        let mut state = self.state.lock().unwrap();
        state.fetched.push(id.to_string());
        if let Some((id, from, subject, body)) = state.arriving.take() {
            let arrived = gmail_message(&id, &from, &subject, &body, Utc::now());
            state.messages.push(arrived);
        }
        if state.fail_get.contains(id) {
            return Err(AssistantError::FetchError {
                message_id: id.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        state
            .messages
            .iter()
            .find(|m| m.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| AssistantError::MessageNotFound(id.to_string()))
    }

    async fn batch_modify_labels(
        &self,
        _session: &Session,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize> {
        self.state.lock().unwrap().modify_calls.push(ModifyCall {
            message_ids: message_ids.to_vec(),
            add: add_label_ids.to_vec(),
            remove: remove_label_ids.to_vec(),
        });
        Ok(message_ids.len())
    }

    async fn trash_message(&self, _session: &Session, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_trash.contains(id) {
            return Err(AssistantError::Forbidden(id.to_string()));
        }
        state.trashed.push(id.to_string());
        Ok(())
    }

    async fn create_draft(&self, _session: &Session, reply: &ReplyMessage) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_drafts {
            return Err(AssistantError::DraftError("quota exhausted".to_string()));
        }
        state.drafts.push(reply.clone());
        Ok(format!("draft-{}", state.drafts.len()))
    }
}

// Mock implementation of MailClient for expectation-style tests
mock! {
    pub MailClient {}

    #[async_trait::async_trait]
    impl MailClient for MailClient {
        async fn ensure_session(&self) -> Result<Session>;
        async fn list_message_ids(
            &self,
            session: &Session,
            query: &str,
            max_results: usize,
        ) -> Result<Vec<String>>;
        async fn get_message(&self, session: &Session, id: &str) -> Result<Message>;
        async fn batch_modify_labels(
            &self,
            session: &Session,
            message_ids: &[String],
            add_label_ids: &[String],
            remove_label_ids: &[String],
        ) -> Result<usize>;
        async fn trash_message(&self, session: &Session, id: &str) -> Result<()>;
        async fn create_draft(&self, session: &Session, reply: &ReplyMessage) -> Result<String>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gmail_assistant::normalizer::normalize;

    #[test]
    fn test_gmail_message_normalizes() {
        let msg = normalize(business_question("m1")).unwrap();
        assert_eq!(msg.id, "m1");
        assert_eq!(msg.thread_id, "thread_m1");
        assert_eq!(msg.sender, "Jane Doe <jane@corp.com>");
        assert_eq!(msg.body, "Could you confirm the numbers by Friday?");
        assert!(msg.received_at.is_some());
    }

    #[tokio::test]
    async fn test_fake_mailbox_records_calls() {
        let mailbox = FakeMailbox::new(vec![spam_message("s1")]).failing_get("s1");
        let session = mailbox.ensure_session().await.unwrap();

        let ids = mailbox.list_message_ids(&session, "q", 10).await.unwrap();
        assert_eq!(ids, vec!["s1".to_string()]);
        assert!(mailbox.get_message(&session, "s1").await.is_err());

        mailbox.trash_message(&session, "s1").await.unwrap();
        assert_eq!(mailbox.trashed(), vec!["s1".to_string()]);
        assert_eq!(mailbox.queries(), vec!["q".to_string()]);
    }
}
