use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Provider message reduced to the fields the pipeline reads.
///
/// Built once by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub id: String,
    pub thread_id: String,
    pub labels: Vec<String>,
    /// Raw `From` header, display name included
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub snippet: String,
    pub size_estimate: u64,
    /// Provider receive time, when the provider reported one
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Business,
    Personal,
    Promotional,
    Social,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Business,
        Category::Personal,
        Category::Promotional,
        Category::Social,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Business => "business",
            Category::Personal => "personal",
            Category::Promotional => "promotional",
            Category::Social => "social",
            Category::Other => "other",
        }
    }

    /// Categories that are eligible for a drafted reply
    pub fn wants_reply(&self) -> bool {
        matches!(self, Category::Business | Category::Personal)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpamVerdict {
    pub is_spam: bool,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl SpamVerdict {
    pub fn reason_text(&self) -> String {
        if self.reasons.is_empty() {
            "No spam indicators".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UnsubscribeVerdict {
    pub has_unsubscribe: bool,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    NoResponse,
    MeetingResponse,
    QuestionResponse,
    RequestResponse,
    Acknowledgment,
    GeneralResponse,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::NoResponse => "no_response",
            ResponseType::MeetingResponse => "meeting_response",
            ResponseType::QuestionResponse => "question_response",
            ResponseType::RequestResponse => "request_response",
            ResponseType::Acknowledgment => "acknowledgment",
            ResponseType::GeneralResponse => "general_response",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationResult {
    pub message_id: String,
    pub category: Category,
    pub spam: SpamVerdict,
    pub unsubscribe: UnsubscribeVerdict,
    pub priority: Priority,
    pub response_type: ResponseType,
}

/// Proposed reply awaiting approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DraftProposal {
    pub recipient: String,
    pub recipient_name: String,
    pub subject: String,
    pub body: String,
    pub original_message_id: String,
    pub thread_id: String,
    pub response_type: ResponseType,
    pub confidence: f64,
    pub category: Category,
    pub priority: Priority,
}
