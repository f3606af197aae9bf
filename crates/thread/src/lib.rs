#![deny(unsafe_code)]

//! Conversation thread engine: message model, append-only store, linear linking,
//! stream accumulation and the request-cycle controller.

pub mod accumulator;
pub mod controller;
pub mod error;
pub mod ids;
pub mod linker;
pub mod message;
pub mod options;
pub mod shortcut;
pub mod store;

pub use accumulator::StreamAccumulator;
pub use controller::{
    ConversationController, CycleCanceller, CycleOutcome, CyclePhase, CycleReport, PendingCycle,
    PhaseRejection,
};
pub use error::{CycleFault, SubmitError, SubmitResult, ThreadError, ThreadResult};
pub use ids::{ConversationId, MessageId};
pub use linker::ThreadLinker;
pub use message::{AssistantMessage, AssistantStatus, Message, Role, UserMessage};
pub use options::{ChatOptions, DEFAULT_FAILURE_MESSAGE, DEFAULT_SYSTEM_INSTRUCTION};
pub use shortcut::{PromptShortcut, default_shortcuts};
pub use store::{MessageStore, ThreadSnapshot};
