use std::sync::Arc;

use snafu::ensure;
use tokio::sync::watch;

use crate::error::{
    BrokenParentLinkSnafu, ConversationMismatchSnafu, DuplicateMessageIdSnafu,
    PendingConflictSnafu, ThreadResult,
};
use crate::ids::{ConversationId, MessageId};
use crate::message::{AssistantMessage, AssistantStatus, Message};

/// Immutable view of a thread at one revision.
///
/// Cloning is cheap: the list and each message sit behind their own `Arc`. A write after
/// publishing copies the list of pointers and the one message it touches, never the history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub messages: Arc<Vec<Arc<Message>>>,
    pub last_message_id: Option<MessageId>,
    pub pending_id: Option<MessageId>,
    pub revision: u64,
}

impl ThreadSnapshot {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Loading flag for renderers.
    pub fn is_pending(&self) -> bool {
        self.pending_id.is_some()
    }

    /// Parent for the next appended message: the tail, or the root sentinel.
    pub fn next_parent_id(&self) -> MessageId {
        self.last_message_id.unwrap_or(MessageId::ROOT)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .map(Arc::as_ref)
            .find(|message| message.id() == id)
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last().map(Arc::as_ref)
    }
}

/// Owner of the thread for one conversation.
///
/// Only append and pending-text mutation are supported; every mutation publishes a new
/// [`ThreadSnapshot`] to subscribers.
pub struct MessageStore {
    current: ThreadSnapshot,
    publisher: watch::Sender<ThreadSnapshot>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        let current = ThreadSnapshot::default();
        let (publisher, _) = watch::channel(current.clone());
        Self { current, publisher }
    }

    pub fn thread(&self) -> &ThreadSnapshot {
        &self.current
    }

    pub fn subscribe(&self) -> watch::Receiver<ThreadSnapshot> {
        self.publisher.subscribe()
    }

    /// Appends `message` to the tail.
    ///
    /// Fails on duplicate ids, a parent that is not the current tail, a foreign
    /// conversation id, or while another assistant reply is still pending.
    pub fn append(&mut self, message: Message) -> ThreadResult<()> {
        let message_id = message.id();

        if let Some(pending) = self.current.pending_id {
            return PendingConflictSnafu {
                stage: "append-message",
                pending,
            }
            .fail();
        }

        ensure!(
            self.current.message(message_id).is_none(),
            DuplicateMessageIdSnafu {
                stage: "append-message",
                message_id,
            }
        );

        let expected_parent = self.current.next_parent_id();
        ensure!(
            message.parent_id() == expected_parent,
            BrokenParentLinkSnafu {
                stage: "append-message",
                message_id,
                expected: expected_parent,
                found: message.parent_id(),
            }
        );

        if let Some(expected) = self.current.conversation_id {
            ensure!(
                message.conversation_id() == expected,
                ConversationMismatchSnafu {
                    stage: "append-message",
                    message_id,
                    expected,
                    found: message.conversation_id(),
                }
            );
        } else {
            self.current.conversation_id = Some(message.conversation_id());
        }

        if message.is_streaming() {
            self.current.pending_id = Some(message_id);
        }
        Arc::make_mut(&mut self.current.messages).push(Arc::new(message));
        self.current.last_message_id = Some(message_id);
        self.publish();
        Ok(())
    }

    /// Replaces the text of the pending assistant reply.
    ///
    /// Returns false (and changes nothing) when `id` is not the pending message.
    pub fn update_text(&mut self, id: MessageId, text: impl Into<String>) -> bool {
        if self.current.pending_id != Some(id) {
            tracing::debug!(message_id = %id, "ignoring text update for non-pending message");
            return false;
        }

        let text = text.into();
        let updated = self.with_pending_assistant(id, |assistant| assistant.text = text);
        if updated {
            self.publish();
        }
        updated
    }

    /// Marks the pending reply completed, keeping its accumulated text.
    pub fn complete_pending(&mut self, id: MessageId) -> bool {
        self.settle_pending(id, AssistantStatus::Completed, None)
    }

    /// Marks the pending reply failed and substitutes `failure_text` for any partial content.
    pub fn fail_pending(&mut self, id: MessageId, failure_text: impl Into<String>) -> bool {
        self.settle_pending(id, AssistantStatus::Failed, Some(failure_text.into()))
    }

    fn settle_pending(
        &mut self,
        id: MessageId,
        status: AssistantStatus,
        replacement: Option<String>,
    ) -> bool {
        if self.current.pending_id != Some(id) {
            return false;
        }

        let settled = self.with_pending_assistant(id, |assistant| {
            assistant.status = status;
            if let Some(text) = replacement {
                assistant.text = text;
            }
        });
        if settled {
            self.current.pending_id = None;
            self.publish();
        }
        settled
    }

    fn with_pending_assistant<F>(&mut self, id: MessageId, apply: F) -> bool
    where
        F: FnOnce(&mut AssistantMessage),
    {
        // The pending reply is always the tail, since appends are refused while one exists.
        let is_pending_tail = matches!(
            self.current.last(),
            Some(Message::Assistant(assistant)) if assistant.id == id
        );
        if !is_pending_tail {
            return false;
        }

        let tail = Arc::make_mut(&mut self.current.messages).last_mut();
        match tail.map(Arc::make_mut) {
            Some(Message::Assistant(assistant)) => {
                apply(assistant);
                true
            }
            _ => false,
        }
    }

    fn publish(&mut self) {
        self.current.revision = self.current.revision.saturating_add(1);
        self.publisher.send_replace(self.current.clone());
    }
}
