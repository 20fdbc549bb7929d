// Call events
//
// CallEvent records everything that happens to the dialogs of an Agent Call:
// every appended message (canonical or on a repair branch), forks, prunes and
// state transitions. A log sink that keeps all events can reconstruct the
// full history, including what pruning removed from the canonical view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::message::Message;
use crate::state::CallState;
use crate::traits::EventSink;

/// What happened
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEventKind {
    /// A message was appended to a dialog
    MessageAppended {
        message: Box<Message>,
        /// False for messages that only ever lived on a repair branch or that
        /// were folded into a tool round
        canonical: bool,
    },

    /// The call moved to a new state
    StateChanged { from: CallState, to: CallState },

    /// A repair branch was forked off `parent_id`
    DialogForked { parent_id: Uuid },

    /// Messages were moved out of the canonical view
    MessagesPruned { from_index: usize, count: usize },
}

/// One event, tagged with the dialog it concerns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallEvent {
    pub dialog_id: Uuid,
    #[serde(flatten)]
    pub kind: CallEventKind,
    pub timestamp: DateTime<Utc>,
}

impl CallEvent {
    fn new(dialog_id: Uuid, kind: CallEventKind) -> Self {
        Self {
            dialog_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Create a message appended event
    pub fn message_appended(dialog_id: Uuid, message: Message, canonical: bool) -> Self {
        Self::new(
            dialog_id,
            CallEventKind::MessageAppended {
                message: Box::new(message),
                canonical,
            },
        )
    }

    /// Create a state changed event
    pub fn state_changed(dialog_id: Uuid, from: CallState, to: CallState) -> Self {
        Self::new(dialog_id, CallEventKind::StateChanged { from, to })
    }

    /// Create a fork event; `dialog_id` is the new branch
    pub fn dialog_forked(dialog_id: Uuid, parent_id: Uuid) -> Self {
        Self::new(dialog_id, CallEventKind::DialogForked { parent_id })
    }

    /// Create a prune event
    pub fn messages_pruned(dialog_id: Uuid, from_index: usize, count: usize) -> Self {
        Self::new(dialog_id, CallEventKind::MessagesPruned { from_index, count })
    }

    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self.kind {
            CallEventKind::MessageAppended { .. } => "message_appended",
            CallEventKind::StateChanged { .. } => "state_changed",
            CallEventKind::DialogForked { .. } => "dialog_forked",
            CallEventKind::MessagesPruned { .. } => "messages_pruned",
        }
    }

    /// The appended message, for message events
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            CallEventKind::MessageAppended { message, .. } => Some(message),
            _ => None,
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn offer(&self, _event: CallEvent) {}
}

/// Writes every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn offer(&self, event: CallEvent) {
        match &event.kind {
            CallEventKind::MessageAppended { message, canonical } => debug!(
                dialog_id = %event.dialog_id,
                message_id = %message.id,
                role = %message.role,
                creator = %message.creator,
                canonical,
                "message appended"
            ),
            CallEventKind::StateChanged { from, to } => debug!(
                dialog_id = %event.dialog_id,
                from = %from,
                to = %to,
                "state changed"
            ),
            CallEventKind::DialogForked { parent_id } => info!(
                dialog_id = %event.dialog_id,
                parent_id = %parent_id,
                "dialog forked"
            ),
            CallEventKind::MessagesPruned { from_index, count } => info!(
                dialog_id = %event.dialog_id,
                from_index,
                count,
                "messages pruned"
            ),
        }
    }
}

/// Forwards events to an unbounded tokio channel
///
/// Events offered after the receiver was dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<CallEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn offer(&self, event: CallEvent) {
        if let Err(err) = self.tx.send(event) {
            debug!(event = err.0.name(), "event receiver dropped, discarding event");
        }
    }
}
