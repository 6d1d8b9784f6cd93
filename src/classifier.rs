//! Keyword-heuristic message classifier
//!
//! [`Classifier::classify`] is pure: the same message and configuration always
//! yield the same [`ClassificationResult`]. Every check works on lower-cased
//! subject/body text except unsubscribe link extraction, which scans the raw
//! body case-insensitively so extracted URLs keep their original spelling.

use crate::config::{CategorizationConfig, Config, SpamDetectionConfig, UnsubscribeConfig};
use crate::models::{
    CanonicalMessage, Category, ClassificationResult, Priority, ResponseType, SpamVerdict,
    UnsubscribeVerdict,
};
use once_cell::sync::Lazy;
use regex::Regex;

static UNSUBSCRIBE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"]+(?:unsubscribe|opt[_-]?out|remove)[^\s<>"]*"#).unwrap()
});

static UNSUBSCRIBE_MAILTO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)mailto:[^\s<>"]+(?:unsubscribe|remove)[^\s<>"]*"#).unwrap()
});

const URGENT_PHRASES: &[&str] = &["urgent", "immediate", "act now", "limited time"];

const HIGH_PRIORITY_WORDS: &[&str] = &["urgent", "asap", "important", "critical", "emergency"];

const LOW_PRIORITY_WORDS: &[&str] = &["newsletter", "promotion", "marketing", "unsubscribe"];

const AUTOMATED_SENDER_MARKERS: &[&str] = &[
    "noreply",
    "no-reply",
    "donotreply",
    "automated",
    "notification",
];

const MEETING_WORDS: &[&str] = &["meeting", "schedule", "appointment"];

const REQUEST_WORDS: &[&str] = &["request", "need", "help", "assistance"];

const THANKS_WORDS: &[&str] = &["thank", "thanks", "appreciate"];

// Per-signal spam contributions
const KEYWORD_WEIGHT: f64 = 0.2;
const SUSPICIOUS_DOMAIN_WEIGHT: f64 = 0.5;
const CAPS_WEIGHT: f64 = 0.3;
const EXCLAMATION_WEIGHT: f64 = 0.2;
const URGENT_WEIGHT: f64 = 0.3;

/// Lower-cased views shared by the individual checks
struct TextView<'a> {
    subject: String,
    body: String,
    sender: String,
    raw_subject: &'a str,
    raw_body: &'a str,
}

impl<'a> TextView<'a> {
    fn new(message: &'a CanonicalMessage) -> Self {
        Self {
            subject: message.subject.to_lowercase(),
            body: message.body.to_lowercase(),
            sender: message.sender.to_lowercase(),
            raw_subject: &message.subject,
            raw_body: &message.body,
        }
    }

    fn mentions(&self, needle: &str) -> bool {
        self.subject.contains(needle) || self.body.contains(needle)
    }

    fn mentions_any<S: AsRef<str>>(&self, needles: &[S]) -> bool {
        needles.iter().any(|n| self.mentions(&n.as_ref().to_lowercase()))
    }
}

/// Rule-based classifier driven by an explicit configuration value
#[derive(Debug, Clone)]
pub struct Classifier {
    categorization: CategorizationConfig,
    spam: SpamDetectionConfig,
    unsubscribe: UnsubscribeConfig,
}

impl Classifier {
    pub fn new(config: &Config) -> Self {
        Self {
            categorization: config.categorization.clone(),
            spam: config.spam_detection.clone(),
            unsubscribe: config.unsubscribe_detection.clone(),
        }
    }

    pub fn classify(&self, message: &CanonicalMessage) -> ClassificationResult {
        let view = TextView::new(message);

        ClassificationResult {
            message_id: message.id.clone(),
            category: self.category_of(&view),
            spam: self.spam_of(&view),
            unsubscribe: self.unsubscribe_of(&view),
            priority: priority_of(&view),
            response_type: response_type_of(&view),
        }
    }

    pub fn detect_category(&self, message: &CanonicalMessage) -> Category {
        self.category_of(&TextView::new(message))
    }

    pub fn detect_spam(&self, message: &CanonicalMessage) -> SpamVerdict {
        self.spam_of(&TextView::new(message))
    }

    pub fn detect_unsubscribe(&self, message: &CanonicalMessage) -> UnsubscribeVerdict {
        self.unsubscribe_of(&TextView::new(message))
    }

    pub fn determine_priority(&self, message: &CanonicalMessage) -> Priority {
        priority_of(&TextView::new(message))
    }

    pub fn determine_response_type(&self, message: &CanonicalMessage) -> ResponseType {
        response_type_of(&TextView::new(message))
    }

    /// Business, promotional, social (sender only), personal; first match wins.
    fn category_of(&self, view: &TextView<'_>) -> Category {
        let rules = &self.categorization;

        if view.mentions_any(&rules.business_keywords) {
            return Category::Business;
        }
        if view.mentions_any(&rules.promotional_keywords) {
            return Category::Promotional;
        }
        if rules
            .social_keywords
            .iter()
            .any(|k| view.sender.contains(&k.to_lowercase()))
        {
            return Category::Social;
        }
        if view.mentions_any(&rules.personal_keywords) {
            return Category::Personal;
        }

        Category::Other
    }

    fn spam_of(&self, view: &TextView<'_>) -> SpamVerdict {
        if !self.spam.enabled {
            return SpamVerdict::default();
        }

        let mut score = 0.0;
        let mut reasons = Vec::new();

        let keyword_matches = self
            .spam
            .keywords
            .iter()
            .filter(|k| view.mentions(&k.to_lowercase()))
            .count();
        if keyword_matches > 0 {
            score += keyword_matches as f64 * KEYWORD_WEIGHT;
            reasons.push(format!("Contains {} spam keywords", keyword_matches));
        }

        for domain in &self.spam.suspicious_domains {
            if view.sender.contains(&domain.to_lowercase()) {
                score += SUSPICIOUS_DOMAIN_WEIGHT;
                reasons.push(format!("Suspicious sender domain: {}", domain));
            }
        }

        if uppercase_ratio(view.raw_subject) > 0.5 {
            score += CAPS_WEIGHT;
            reasons.push("Excessive capital letters".to_string());
        }

        if view.raw_subject.matches('!').count() > 2 {
            score += EXCLAMATION_WEIGHT;
            reasons.push("Multiple exclamation marks".to_string());
        }

        if view.mentions_any(URGENT_PHRASES) {
            score += URGENT_WEIGHT;
            reasons.push("Contains urgent language".to_string());
        }

        SpamVerdict {
            is_spam: score >= self.spam.sensitivity.threshold(),
            score,
            reasons,
        }
    }

    fn unsubscribe_of(&self, view: &TextView<'_>) -> UnsubscribeVerdict {
        if !self.unsubscribe.enabled {
            return UnsubscribeVerdict::default();
        }

        let has_text = self
            .unsubscribe
            .keywords
            .iter()
            .any(|k| view.body.contains(&k.to_lowercase()));
        if !has_text {
            return UnsubscribeVerdict::default();
        }

        let links: Vec<String> = UNSUBSCRIBE_URL
            .find_iter(view.raw_body)
            .chain(UNSUBSCRIBE_MAILTO.find_iter(view.raw_body))
            .map(|m| m.as_str().to_string())
            .collect();

        UnsubscribeVerdict {
            has_unsubscribe: !links.is_empty(),
            links,
        }
    }
}

/// Share of uppercase letters over all characters of the subject
fn uppercase_ratio(subject: &str) -> f64 {
    let total = subject.chars().count();
    if total == 0 {
        return 0.0;
    }
    let upper = subject.chars().filter(|c| c.is_uppercase()).count();
    upper as f64 / total as f64
}

fn priority_of(view: &TextView<'_>) -> Priority {
    if view.mentions_any(HIGH_PRIORITY_WORDS) {
        Priority::High
    } else if view.mentions_any(LOW_PRIORITY_WORDS) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

fn response_type_of(view: &TextView<'_>) -> ResponseType {
    if AUTOMATED_SENDER_MARKERS
        .iter()
        .any(|m| view.sender.contains(m))
    {
        return ResponseType::NoResponse;
    }
    if view.mentions_any(MEETING_WORDS) {
        return ResponseType::MeetingResponse;
    }
    if view.mentions("?") {
        return ResponseType::QuestionResponse;
    }
    if view.mentions_any(REQUEST_WORDS) {
        return ResponseType::RequestResponse;
    }
    if view.mentions_any(THANKS_WORDS) {
        return ResponseType::Acknowledgment;
    }
    ResponseType::GeneralResponse
}
