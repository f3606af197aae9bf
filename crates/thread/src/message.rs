use sigma_llm::Role as ProviderRole;

use crate::ids::{ConversationId, MessageId};

/// Speaker of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn to_provider(self) -> ProviderRole {
        match self {
            Self::User => ProviderRole::User,
            Self::Assistant => ProviderRole::Assistant,
        }
    }
}

/// Lifecycle of an assistant reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssistantStatus {
    /// Text is still being appended by the stream accumulator.
    Streaming,
    Completed,
    /// Text holds the fixed failure reply, not partial stream content.
    Failed,
}

/// A user turn. Text is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    pub id: MessageId,
    pub parent_id: MessageId,
    pub conversation_id: ConversationId,
    pub text: String,
}

/// An assistant turn. Text grows only while `status` is `Streaming`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantMessage {
    pub id: MessageId,
    pub parent_id: MessageId,
    pub conversation_id: ConversationId,
    pub text: String,
    pub status: AssistantStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    pub fn user(
        id: MessageId,
        parent_id: MessageId,
        conversation_id: ConversationId,
        text: impl Into<String>,
    ) -> Self {
        Self::User(UserMessage {
            id,
            parent_id,
            conversation_id,
            text: text.into(),
        })
    }

    /// Creates an empty assistant reply awaiting stream fragments.
    pub fn assistant_placeholder(
        id: MessageId,
        parent_id: MessageId,
        conversation_id: ConversationId,
    ) -> Self {
        Self::Assistant(AssistantMessage {
            id,
            parent_id,
            conversation_id,
            text: String::new(),
            status: AssistantStatus::Streaming,
        })
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::User(message) => message.id,
            Self::Assistant(message) => message.id,
        }
    }

    pub fn parent_id(&self) -> MessageId {
        match self {
            Self::User(message) => message.parent_id,
            Self::Assistant(message) => message.parent_id,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::User(message) => message.conversation_id,
            Self::Assistant(message) => message.conversation_id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User(_) => Role::User,
            Self::Assistant(_) => Role::Assistant,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::User(message) => &message.text,
            Self::Assistant(message) => &message.text,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            Self::Assistant(AssistantMessage {
                status: AssistantStatus::Streaming,
                ..
            })
        )
    }

    pub fn assistant_status(&self) -> Option<AssistantStatus> {
        match self {
            Self::User(_) => None,
            Self::Assistant(message) => Some(message.status),
        }
    }
}
