//! Templated reply drafting

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::AiResponseConfig;
use crate::models::{CanonicalMessage, ClassificationResult, DraftProposal, ResponseType};

static DISPLAY_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+?)\s*<.+>$").unwrap());

static LOCAL_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^@]+)@").unwrap());

const FALLBACK_NAME: &str = "there";

/// Fixed reply template for one response type
struct Template {
    body: &'static str,
    confidence: f64,
}

fn template_for(response_type: ResponseType) -> Option<Template> {
    let template = match response_type {
        ResponseType::NoResponse => return None,
        ResponseType::MeetingResponse => Template {
            body: "Hi {name},\n\nThank you for your email regarding the meeting. I'll review my calendar and get back to you with my availability shortly.\n\nBest regards",
            confidence: 0.8,
        },
        ResponseType::QuestionResponse => Template {
            body: "Hi {name},\n\nThank you for your question. I'll need to review this and provide you with a detailed response. I'll get back to you within 24 hours.\n\nBest regards",
            confidence: 0.7,
        },
        ResponseType::RequestResponse => Template {
            body: "Hi {name},\n\nI've received your request and will review it carefully. I'll respond with more details soon.\n\nThank you for reaching out.\n\nBest regards",
            confidence: 0.75,
        },
        ResponseType::Acknowledgment => Template {
            body: "Hi {name},\n\nYou're very welcome! I'm glad I could help.\n\nBest regards",
            confidence: 0.9,
        },
        ResponseType::GeneralResponse => Template {
            body: "Hi {name},\n\nThank you for your email. I've received it and will respond appropriately soon.\n\nBest regards",
            confidence: 0.6,
        },
    };
    Some(template)
}

/// Fixed confidence attached to a response type's template
pub fn template_confidence(response_type: ResponseType) -> Option<f64> {
    template_for(response_type).map(|t| t.confidence)
}

/// Produces reply proposals from fixed templates.
///
/// Below-threshold confidence and `NoResponse` both yield `None`; neither is
/// an error.
#[derive(Debug, Clone)]
pub struct ResponseDrafter {
    confidence_threshold: f64,
    max_response_length: usize,
}

impl ResponseDrafter {
    pub fn new(config: &AiResponseConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            max_response_length: config.max_response_length,
        }
    }

    pub fn draft(
        &self,
        message: &CanonicalMessage,
        classification: &ClassificationResult,
    ) -> Option<DraftProposal> {
        let template = template_for(classification.response_type)?;

        if template.confidence < self.confidence_threshold {
            tracing::debug!(
                message_id = %message.id,
                response_type = %classification.response_type,
                confidence = template.confidence,
                threshold = self.confidence_threshold,
                "Draft confidence below threshold"
            );
            return None;
        }

        let name = extract_sender_name(&message.sender);
        let body = truncate_chars(&template.body.replace("{name}", &name), self.max_response_length);

        Some(DraftProposal {
            recipient: message.sender.clone(),
            recipient_name: name,
            subject: format!("Re: {}", message.subject),
            body,
            original_message_id: message.id.clone(),
            thread_id: message.thread_id.clone(),
            response_type: classification.response_type,
            confidence: template.confidence,
            category: classification.category,
            priority: classification.priority,
        })
    }
}

/// Display name for a greeting.
///
/// `"Jane Doe" <jane@x.com>` gives `Jane Doe`; a bare address derives the name
/// from its local part; anything unusable gives `there`.
pub fn extract_sender_name(sender: &str) -> String {
    let sender = sender.trim();

    if let Some(caps) = DISPLAY_NAME.captures(sender) {
        let name = caps[1].replace('"', "");
        let name = name.trim();
        return if name.is_empty() {
            FALLBACK_NAME.to_string()
        } else {
            name.to_string()
        };
    }

    if let Some(caps) = LOCAL_PART.captures(sender) {
        let name = title_case(&caps[1].replace(['.', '_'], " "));
        if name.chars().count() > 1 {
            return name;
        }
    }

    FALLBACK_NAME.to_string()
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
