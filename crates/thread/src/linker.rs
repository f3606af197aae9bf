use crate::ids::{ConversationId, MessageId};
use crate::message::Message;
use crate::store::ThreadSnapshot;

/// Mints messages chained onto the tail of a thread.
///
/// Linking is strictly linear: a user message always hangs off the thread's last
/// message, and its assistant reply hangs off the user message.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLinker;

impl ThreadLinker {
    pub fn new() -> Self {
        Self
    }

    /// Builds the next user turn for `thread`, minting a conversation id for a new thread.
    pub fn next_user_message(&self, text: impl Into<String>, thread: &ThreadSnapshot) -> Message {
        let conversation_id = thread
            .conversation_id
            .unwrap_or_else(ConversationId::new_v7);
        Message::user(
            MessageId::new_v7(),
            thread.next_parent_id(),
            conversation_id,
            text,
        )
    }

    pub fn next_assistant_placeholder(
        &self,
        parent_id: MessageId,
        conversation_id: ConversationId,
    ) -> Message {
        Message::assistant_placeholder(MessageId::new_v7(), parent_id, conversation_id)
    }
}
