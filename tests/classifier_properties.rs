//! Property tests for classification, drafting and planning

use gmail_assistant::config::{Config, Sensitivity};
use gmail_assistant::models::{CanonicalMessage, Category};
use gmail_assistant::{ActionKind, ActionPlanner, Classifier, ResponseDrafter};
use proptest::prelude::*;
use std::collections::BTreeMap;

const VOCABULARY: &[&str] = &[
    "hello",
    "report",
    "meeting",
    "project",
    "invoice",
    "sale",
    "discount",
    "family",
    "birthday",
    "lottery",
    "winner",
    "urgent",
    "act now",
    "thanks",
    "please",
    "need",
    "help",
    "?",
    "!!!",
    "FREE",
    "NOW",
    "unsubscribe",
    "https://news.example.com/unsubscribe?id=7",
    "newsletter",
    "asap",
];

const SENDERS: &[&str] = &[
    "Jane Doe <jane@corp.com>",
    "noreply@service.com",
    "updates@linkedin.com",
    "promo@tempmail.org",
    "friend@home.net",
    "",
];

fn text() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(VOCABULARY), 0..12).prop_map(|words| words.join(" "))
}

fn message() -> impl Strategy<Value = CanonicalMessage> {
    (prop::sample::select(SENDERS), text(), text()).prop_map(|(sender, subject, body)| {
        CanonicalMessage {
            id: "prop".to_string(),
            thread_id: "prop-thread".to_string(),
            labels: vec!["INBOX".to_string()],
            sender: sender.to_string(),
            recipient: "me@example.com".to_string(),
            subject,
            body,
            headers: BTreeMap::new(),
            snippet: String::new(),
            size_estimate: 0,
            received_at: None,
        }
    })
}

fn with_sensitivity(sensitivity: Sensitivity) -> Classifier {
    let mut config = Config::default();
    config.spam_detection.sensitivity = sensitivity;
    Classifier::new(&config)
}

proptest! {
    #[test]
    fn classification_is_deterministic(msg in message()) {
        let classifier = Classifier::new(&Config::default());
        prop_assert_eq!(classifier.classify(&msg), classifier.classify(&msg));
    }

    #[test]
    fn business_keywords_take_precedence(msg in message()) {
        let classifier = Classifier::new(&Config::default());
        let result = classifier.classify(&msg);
        prop_assert!(Category::ALL.contains(&result.category));

        let text = format!("{} {}", msg.subject, msg.body).to_lowercase();
        if ["meeting", "project", "invoice"].iter().any(|k| text.contains(k)) {
            prop_assert_eq!(result.category, Category::Business);
        }
    }

    #[test]
    fn spam_score_never_drops_when_keywords_are_added(
        msg in message(),
        keyword in prop::sample::select(&["lottery", "guaranteed", "risk free", "free money"][..]),
    ) {
        let classifier = Classifier::new(&Config::default());
        let before = classifier.detect_spam(&msg);

        let mut louder = msg.clone();
        louder.body = format!("{} {}", louder.body, keyword);
        let after = classifier.detect_spam(&louder);

        prop_assert!(after.score >= before.score);
        prop_assert!(!before.is_spam || after.is_spam);
    }

    #[test]
    fn higher_sensitivity_flags_at_least_as_much(msg in message()) {
        let low = with_sensitivity(Sensitivity::Low).detect_spam(&msg).is_spam;
        let medium = with_sensitivity(Sensitivity::Medium).detect_spam(&msg).is_spam;
        let high = with_sensitivity(Sensitivity::High).detect_spam(&msg).is_spam;

        prop_assert!(!low || medium);
        prop_assert!(!medium || high);
    }

    #[test]
    fn spam_only_ever_plans_trash(msg in message()) {
        let config = Config::default();
        let classification = Classifier::new(&config).classify(&msg);
        let actions = ActionPlanner::new(&config.labels).plan(&msg, &classification);

        if classification.spam.is_spam {
            prop_assert_eq!(actions.len(), 1);
            prop_assert_eq!(&actions[0].kind, &ActionKind::Trash);
        } else {
            prop_assert!(actions.iter().all(|a| a.kind != ActionKind::Trash));
        }
    }

    #[test]
    fn drafts_respect_threshold_and_length(msg in message(), max_len in 10usize..400) {
        let mut config = Config::default();
        config.ai_response.max_response_length = max_len;
        let classification = Classifier::new(&config).classify(&msg);

        if let Some(draft) = ResponseDrafter::new(&config.ai_response).draft(&msg, &classification) {
            prop_assert!(draft.confidence >= config.ai_response.confidence_threshold);
            prop_assert!(draft.body.chars().count() <= max_len);
            prop_assert!(draft.subject.starts_with("Re: "));
            prop_assert_eq!(draft.response_type, classification.response_type);
        }
    }
}
