//! Provider-side action planning and batching

use std::collections::BTreeMap;
use std::fmt;

use crate::config::LabelConfig;
use crate::models::{CanonicalMessage, Category, ClassificationResult};

/// Label removed by [`ActionKind::MarkRead`]
pub const UNREAD_LABEL: &str = "UNREAD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Add the given provider label ids
    ApplyLabels(Vec<String>),
    Trash,
    MarkRead,
    /// Save the drafted reply; the proposal itself travels separately
    CreateDraft,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ApplyLabels(_) => "apply_labels",
            ActionKind::Trash => "trash",
            ActionKind::MarkRead => "mark_read",
            ActionKind::CreateDraft => "create_draft",
        }
    }

    /// Whether several messages can share one provider call
    pub fn is_batchable(&self) -> bool {
        !matches!(self, ActionKind::CreateDraft)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub message_id: String,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(message_id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            message_id: message_id.into(),
            kind,
        }
    }
}

/// Maps classifier output to provider actions
#[derive(Debug, Clone)]
pub struct ActionPlanner {
    labels: LabelConfig,
}

impl ActionPlanner {
    pub fn new(labels: &LabelConfig) -> Self {
        Self {
            labels: labels.clone(),
        }
    }

    /// Provider label ids for a category, if it has any
    pub fn labels_for(&self, category: Category) -> Option<Vec<String>> {
        match category {
            Category::Business | Category::Personal => Some(vec![self.labels.personal.clone()]),
            Category::Promotional => Some(vec![self.labels.promotions.clone()]),
            Category::Social => Some(vec![self.labels.social.clone()]),
            Category::Other => None,
        }
    }

    /// Spam yields a lone trash action. Unsubscribe verdicts are flagged
    /// elsewhere and never turn into mail actions.
    pub fn plan(
        &self,
        message: &CanonicalMessage,
        classification: &ClassificationResult,
    ) -> Vec<Action> {
        if classification.spam.is_spam {
            return vec![Action::new(&message.id, ActionKind::Trash)];
        }

        let mut actions = Vec::new();
        if let Some(labels) = self.labels_for(classification.category) {
            actions.push(Action::new(&message.id, ActionKind::ApplyLabels(labels)));
        }
        actions
    }
}

/// Grouping key for batched execution: kind plus its sorted parameters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchKey {
    ApplyLabels(Vec<String>),
    Trash,
    MarkRead,
}

impl BatchKey {
    pub fn for_kind(kind: &ActionKind) -> Option<Self> {
        match kind {
            ActionKind::ApplyLabels(labels) => {
                let mut sorted = labels.clone();
                sorted.sort();
                sorted.dedup();
                Some(BatchKey::ApplyLabels(sorted))
            }
            ActionKind::Trash => Some(BatchKey::Trash),
            ActionKind::MarkRead => Some(BatchKey::MarkRead),
            ActionKind::CreateDraft => None,
        }
    }

    /// Labels to add and remove for a label-modify call
    pub fn label_changes(&self) -> (Vec<String>, Vec<String>) {
        match self {
            BatchKey::ApplyLabels(labels) => (labels.clone(), Vec::new()),
            BatchKey::MarkRead => (Vec::new(), vec![UNREAD_LABEL.to_string()]),
            BatchKey::Trash => (Vec::new(), Vec::new()),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKey::ApplyLabels(labels) => write!(f, "apply_labels[{}]", labels.join(",")),
            BatchKey::Trash => f.write_str("trash"),
            BatchKey::MarkRead => f.write_str("mark_read"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionBatch {
    pub key: BatchKey,
    pub message_ids: Vec<String>,
}

/// Merge batchable actions sharing a key, each batch at most `batch_size` ids.
///
/// Batches come out ordered by key; ids keep their planning order and repeats
/// are dropped. Non-batchable actions are ignored.
pub fn group_into_batches(actions: &[Action], batch_size: usize) -> Vec<ActionBatch> {
    let batch_size = batch_size.max(1);
    let mut grouped: BTreeMap<BatchKey, Vec<String>> = BTreeMap::new();

    for action in actions {
        if let Some(key) = BatchKey::for_kind(&action.kind) {
            let ids = grouped.entry(key).or_default();
            if !ids.contains(&action.message_id) {
                ids.push(action.message_id.clone());
            }
        }
    }

    grouped
        .into_iter()
        .flat_map(|(key, ids)| {
            ids.chunks(batch_size)
                .map(|chunk| ActionBatch {
                    key: key.clone(),
                    message_ids: chunk.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}
