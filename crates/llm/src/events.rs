use std::fmt;

use uuid::Uuid;

/// Routing key attached to every stream event.
///
/// Carries raw UUIDs so this crate stays independent of the thread engine's typed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
}

impl StreamTarget {
    pub const fn new(conversation_id: Uuid, message_id: Uuid) -> Self {
        Self {
            conversation_id,
            message_id,
        }
    }
}

/// Coarse classification of a stream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Connection could not be established or was interrupted.
    Transport,
    /// A chunk arrived but could not be interpreted as text.
    Decoding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFault {
    pub kind: FaultKind,
    pub message: String,
}

impl StreamFault {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Transport,
            message: message.into(),
        }
    }

    pub fn decoding(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Decoding,
            message: message.into(),
        }
    }
}

impl fmt::Display for StreamFault {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Transport => write!(formatter, "transport fault: {}", self.message),
            FaultKind::Decoding => write!(formatter, "decoding fault: {}", self.message),
        }
    }
}

/// Provider-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    Done,
    Error(StreamFault),
}

/// One event emitted by a provider worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl StreamEventMapped {
    pub fn delta(target: StreamTarget, text: impl Into<String>) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Delta(text.into()),
        }
    }

    pub fn done(target: StreamTarget) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Done,
        }
    }

    pub fn error(target: StreamTarget, fault: StreamFault) -> Self {
        Self {
            target,
            payload: StreamEventPayload::Error(fault),
        }
    }
}
