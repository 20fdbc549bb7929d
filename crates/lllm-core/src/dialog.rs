// Dialog - ordered conversation state for one Agent Call
//
// The canonical view (`messages`) is what callers persist as "the
// conversation". Pruning never deletes: removed messages move into a
// PrunedSegment so a repaired incident stays auditable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DialogError;
use crate::message::{Message, Usage};

/// Messages removed from the canonical view by one prune
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunedSegment {
    /// Canonical index the segment was cut at
    pub from_index: usize,
    /// Removed messages, in their original order
    pub messages: Vec<Message>,
    /// When the prune happened
    pub pruned_at: DateTime<Utc>,
}

/// One conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    id: Uuid,
    parent_id: Option<Uuid>,
    session: String,
    messages: Vec<Message>,
    #[serde(default)]
    pruned: Vec<PrunedSegment>,
    created_at: DateTime<Utc>,
}

impl Dialog {
    /// Create an empty dialog in the given session
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            parent_id: None,
            session: session.into(),
            messages: Vec::new(),
            pruned: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Dialog this one was forked from
    pub fn parent_id(&self) -> Option<Uuid> {
        self.parent_id
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Canonical messages in conversation order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Segments removed by pruning, oldest first
    pub fn pruned(&self) -> &[PrunedSegment] {
        &self.pruned
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// First message (usually the rendered prompt)
    pub fn head(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// Last message (usually the latest model response)
    pub fn tail(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Append a message to the end
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Branch off a copy of this dialog
    ///
    /// Messages and pruned segments are copied by value; the fork gets a
    /// fresh id and records this dialog as its parent.
    pub fn fork(&self) -> Dialog {
        Dialog {
            id: Uuid::now_v7(),
            parent_id: Some(self.id),
            session: self.session.clone(),
            messages: self.messages.clone(),
            pruned: self.pruned.clone(),
            created_at: Utc::now(),
        }
    }

    /// Remove `messages[from_index..]` from the canonical view
    ///
    /// Returns the number of messages moved into a pruned segment. Pruning at
    /// `len()` is a no-op.
    pub fn prune(&mut self, from_index: usize) -> Result<usize, DialogError> {
        let len = self.messages.len();
        if from_index > len {
            return Err(DialogError::IndexOutOfRange {
                index: from_index,
                len,
            });
        }
        if from_index == len {
            return Ok(0);
        }

        let removed = self.messages.split_off(from_index);
        let count = removed.len();
        self.pruned.push(PrunedSegment {
            from_index,
            messages: removed,
            pruned_at: Utc::now(),
        });
        Ok(count)
    }

    /// Prune from `from_index` and append `new_messages` in one step
    ///
    /// On error the dialog is left untouched.
    pub fn replace_tail(
        &mut self,
        from_index: usize,
        new_messages: impl IntoIterator<Item = Message>,
    ) -> Result<usize, DialogError> {
        let count = self.prune(from_index)?;
        self.messages.extend(new_messages);
        Ok(count)
    }

    /// Total token usage over the canonical messages
    pub fn usage(&self) -> Usage {
        self.messages.iter().map(|m| m.usage).sum()
    }

    /// Total reported cost over the canonical messages (None if nothing reported)
    pub fn cost(&self) -> Option<f64> {
        self.messages
            .iter()
            .filter_map(|m| m.cost)
            .fold(None, |acc, c| Some(acc.unwrap_or(0.0) + c))
    }

    /// Compact, human-readable listing of the canonical messages
    pub fn overview(&self, max_length: usize) -> String {
        self.messages
            .iter()
            .enumerate()
            .map(|(idx, m)| format!("[{idx}. {} ({})]: {}", m.creator, m.role, m.preview(max_length)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
