use sigma_llm::{FaultKind, StreamFault};
use snafu::Snafu;

use crate::controller::CyclePhase;
use crate::ids::{ConversationId, MessageId};

/// Violations of the thread invariants. These indicate programming errors, not runtime faults.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ThreadError {
    #[snafu(display("message '{message_id}' is already in the thread"))]
    DuplicateMessageId {
        stage: &'static str,
        message_id: MessageId,
    },
    #[snafu(display(
        "message '{message_id}' names parent '{found}' but the thread tail is '{expected}'"
    ))]
    BrokenParentLink {
        stage: &'static str,
        message_id: MessageId,
        expected: MessageId,
        found: MessageId,
    },
    #[snafu(display(
        "message '{message_id}' belongs to conversation '{found}', thread is '{expected}'"
    ))]
    ConversationMismatch {
        stage: &'static str,
        message_id: MessageId,
        expected: ConversationId,
        found: ConversationId,
    },
    #[snafu(display("assistant message '{pending}' is still pending"))]
    PendingConflict {
        stage: &'static str,
        pending: MessageId,
    },
    #[snafu(display("thread id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
}

pub type ThreadResult<T> = Result<T, ThreadError>;

/// Reasons a submission was not started.
///
/// `EmptyInput` and `ConcurrentSubmission` are silent rejections; callers should not surface them.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SubmitError {
    #[snafu(display("submission is empty after trimming"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("a request cycle is already {phase:?}"))]
    ConcurrentSubmission {
        stage: &'static str,
        phase: CyclePhase,
    },
    #[snafu(display("thread rejected the submission on `{stage}`: {source}"))]
    Thread {
        stage: &'static str,
        source: ThreadError,
    },
}

impl SubmitError {
    /// True for rejections that must not be shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput { .. } | Self::ConcurrentSubmission { .. }
        )
    }
}

pub type SubmitResult<T> = Result<T, SubmitError>;

/// Faults that end a request cycle in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CycleFault {
    #[snafu(display("transport fault on `{stage}`: {message}"))]
    Transport {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("decoding fault on `{stage}`: {message}"))]
    Decoding {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("request cycle cancelled on `{stage}`"))]
    Cancelled { stage: &'static str },
}

impl CycleFault {
    pub(crate) fn from_stream(stage: &'static str, fault: StreamFault) -> Self {
        match fault.kind {
            FaultKind::Transport => Self::Transport {
                stage,
                message: fault.message,
            },
            FaultKind::Decoding => Self::Decoding {
                stage,
                message: fault.message,
            },
        }
    }
}
