use std::sync::{Arc, Weak};

use sigma_llm::{
    LlmProvider, ProviderMessage, ProviderStreamHandle, Role as ProviderRole, StreamRequest,
    StreamTarget,
};
use snafu::ResultExt;
use tokio::sync::{oneshot, watch};

use crate::accumulator::StreamAccumulator;
use crate::error::{
    ConcurrentSubmissionSnafu, CycleFault, EmptyInputSnafu, SubmitResult, ThreadSnafu,
};
use crate::ids::{ConversationId, MessageId};
use crate::linker::ThreadLinker;
use crate::message::Message;
use crate::options::ChatOptions;
use crate::shortcut::PromptShortcut;
use crate::store::{MessageStore, ThreadSnapshot};

/// Position of the controller in one request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CyclePhase {
    #[default]
    Idle,
    Submitted,
    Streaming,
    Completed,
    Failed,
}

/// An attempted transition outside the cycle
/// `Idle -> Submitted -> Streaming -> {Completed | Failed} -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRejection {
    pub from: CyclePhase,
    pub to: CyclePhase,
}

impl CyclePhase {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Applies one transition deterministically.
    ///
    /// `Submitted -> Failed` covers requests rejected before a stream exists.
    pub fn advance(self, to: CyclePhase) -> Result<CyclePhase, PhaseRejection> {
        let allowed = matches!(
            (self, to),
            (Self::Idle, Self::Submitted)
                | (Self::Submitted, Self::Streaming)
                | (Self::Submitted, Self::Failed)
                | (Self::Streaming, Self::Completed)
                | (Self::Streaming, Self::Failed)
                | (Self::Completed, Self::Idle)
                | (Self::Failed, Self::Idle)
        );

        if allowed {
            Ok(to)
        } else {
            Err(PhaseRejection { from: self, to })
        }
    }
}

/// Terminal state reached by a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub conversation_id: ConversationId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    pub fault: Option<CycleFault>,
    pub fragments_applied: usize,
}

/// Fires cancellation for one in-flight cycle.
#[derive(Debug)]
pub struct CycleCanceller {
    cancel_tx: oneshot::Sender<()>,
}

impl CycleCanceller {
    /// Returns false when the cycle already finished.
    pub fn cancel(self) -> bool {
        self.cancel_tx.send(()).is_ok()
    }
}

/// A cycle that has been submitted but not yet driven to completion.
///
/// Must be handed back to [`ConversationController::finish`]; the controller stays busy
/// until it is.
#[must_use = "a pending cycle keeps the controller busy until passed to `finish`"]
pub struct PendingCycle {
    conversation_id: ConversationId,
    user_message_id: MessageId,
    assistant_message_id: MessageId,
    target: StreamTarget,
    opened: Result<ProviderStreamHandle, CycleFault>,
    cancel_tx: Option<oneshot::Sender<()>>,
    cancel_rx: oneshot::Receiver<()>,
    alive: Arc<()>,
}

impl PendingCycle {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn user_message_id(&self) -> MessageId {
        self.user_message_id
    }

    pub fn assistant_message_id(&self) -> MessageId {
        self.assistant_message_id
    }

    /// Takes the cancellation handle. Only the first call returns `Some`.
    pub fn canceller(&mut self) -> Option<CycleCanceller> {
        self.cancel_tx
            .take()
            .map(|cancel_tx| CycleCanceller { cancel_tx })
    }
}

/// The cycle whose reply is still pending in the store.
///
/// `alive` dies with the [`PendingCycle`] (or the `finish` future that took it), so a cycle
/// dropped before settling can be told apart from one still being driven.
struct InFlight {
    assistant_message_id: MessageId,
    alive: Weak<()>,
}

/// Orchestrates request cycles for one conversation.
pub struct ConversationController {
    store: MessageStore,
    linker: ThreadLinker,
    provider: Arc<dyn LlmProvider>,
    options: ChatOptions,
    phase: CyclePhase,
    input: String,
    in_flight: Option<InFlight>,
}

impl ConversationController {
    pub fn new(provider: Arc<dyn LlmProvider>, options: ChatOptions) -> Self {
        Self {
            store: MessageStore::new(),
            linker: ThreadLinker::new(),
            provider,
            options,
            phase: CyclePhase::Idle,
            input: String::new(),
            in_flight: None,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn thread(&self) -> &ThreadSnapshot {
        self.store.thread()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThreadSnapshot> {
        self.store.subscribe()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    /// Submits the composer input, clearing it whether or not the submission is accepted.
    pub async fn submit_input(&mut self) -> SubmitResult<CycleReport> {
        let cycle = self.begin_input()?;
        Ok(self.finish(cycle).await)
    }

    /// [`Self::begin`] for the composer input; the input is cleared even on rejection.
    pub fn begin_input(&mut self) -> SubmitResult<PendingCycle> {
        let text = std::mem::take(&mut self.input);
        self.begin(&text)
    }

    pub async fn submit_shortcut(
        &mut self,
        shortcut: &PromptShortcut,
    ) -> SubmitResult<CycleReport> {
        self.set_input(shortcut.composed_text());
        self.submit_input().await
    }

    /// Runs one full cycle for `text`.
    pub async fn submit(&mut self, text: &str) -> SubmitResult<CycleReport> {
        let cycle = self.begin(text)?;
        Ok(self.finish(cycle).await)
    }

    /// Appends the user message and the assistant placeholder, then issues the request.
    ///
    /// Never suspends. Rejected submissions leave the thread untouched, apart from settling
    /// an abandoned cycle first.
    pub fn begin(&mut self, text: &str) -> SubmitResult<PendingCycle> {
        self.recover_abandoned();
        if !self.phase.is_idle() {
            tracing::debug!(phase = ?self.phase, "rejecting submission while a cycle is active");
            return ConcurrentSubmissionSnafu {
                stage: "begin-cycle",
                phase: self.phase,
            }
            .fail();
        }

        if text.trim().is_empty() {
            return EmptyInputSnafu {
                stage: "begin-cycle",
            }
            .fail();
        }

        let prompt_messages = self.build_prompt_context(&self.store.thread().messages, text);

        let user_message = self.linker.next_user_message(text, self.store.thread());
        let user_message_id = user_message.id();
        let conversation_id = user_message.conversation_id();
        self.store.append(user_message).context(ThreadSnafu {
            stage: "append-user-message",
        })?;
        self.transition(CyclePhase::Submitted);

        let placeholder = self
            .linker
            .next_assistant_placeholder(user_message_id, conversation_id);
        let assistant_message_id = placeholder.id();
        if let Err(source) = self.store.append(placeholder) {
            self.phase = CyclePhase::Idle;
            return Err(source).context(ThreadSnafu {
                stage: "append-assistant-placeholder",
            });
        }
        let alive = Arc::new(());
        self.in_flight = Some(InFlight {
            assistant_message_id,
            alive: Arc::downgrade(&alive),
        });

        let target = StreamTarget::new(conversation_id.as_uuid(), assistant_message_id.as_uuid());
        let model_id = match self.options.model_id.trim() {
            "" => self.provider.default_model().to_string(),
            configured => configured.to_string(),
        };
        let mut request = StreamRequest::new(target, model_id, prompt_messages);
        if let Some(temperature) = self.options.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        tracing::info!(
            conversation_id = %conversation_id,
            user_message_id = %user_message_id,
            assistant_message_id = %assistant_message_id,
            provider_id = %self.provider.id(),
            model_id = %request.model_id,
            context_messages = request.messages.len(),
            "issuing completion request"
        );

        let opened = match self.provider.stream_chat(request) {
            Ok(handle) => {
                self.transition(CyclePhase::Streaming);
                Ok(handle)
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "completion request rejected before streaming"
                );
                Err(CycleFault::from_stream("issue-request", error.into()))
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        Ok(PendingCycle {
            conversation_id,
            user_message_id,
            assistant_message_id,
            target,
            opened,
            cancel_tx: Some(cancel_tx),
            cancel_rx,
            alive,
        })
    }

    /// Fails a cycle whose [`PendingCycle`] or `finish` future was dropped before it settled,
    /// returning the controller to `Idle`.
    ///
    /// Returns false when no cycle was abandoned. [`Self::begin`] calls this itself.
    pub fn recover_abandoned(&mut self) -> bool {
        let Some(in_flight) = &self.in_flight else {
            return false;
        };
        if in_flight.alive.strong_count() > 0 {
            return false;
        }

        let assistant_message_id = in_flight.assistant_message_id;
        self.in_flight = None;
        self.store
            .fail_pending(assistant_message_id, self.options.failure_message.clone());
        self.transition(CyclePhase::Failed);
        self.transition(CyclePhase::Idle);
        tracing::warn!(
            assistant_message_id = %assistant_message_id,
            "request cycle dropped before settling, marked failed"
        );
        true
    }

    /// Drives `cycle` to `Completed` or `Failed` and returns the controller to `Idle`.
    ///
    /// Faults never escape: they become the `Failed` outcome with the failure message
    /// substituted for any partial reply.
    pub async fn finish(&mut self, cycle: PendingCycle) -> CycleReport {
        let PendingCycle {
            conversation_id,
            user_message_id,
            assistant_message_id,
            target,
            opened,
            cancel_tx,
            cancel_rx,
            alive,
        } = cycle;
        drop(cancel_tx);

        let mut accumulator = StreamAccumulator::new(target, assistant_message_id);
        let result = match opened {
            Ok(handle) => {
                Self::drive_stream(&mut self.store, &mut accumulator, handle, cancel_rx).await
            }
            Err(fault) => Err(fault),
        };

        let (outcome, fault) = match result {
            Ok(()) => {
                self.store.complete_pending(assistant_message_id);
                self.transition(CyclePhase::Completed);
                tracing::info!(
                    conversation_id = %conversation_id,
                    assistant_message_id = %assistant_message_id,
                    fragments_applied = accumulator.fragments_applied(),
                    reply_len = accumulator.text().len(),
                    "completion stream finished"
                );
                (CycleOutcome::Completed, None)
            }
            Err(fault) => {
                self.store
                    .fail_pending(assistant_message_id, self.options.failure_message.clone());
                self.transition(CyclePhase::Failed);
                tracing::warn!(
                    conversation_id = %conversation_id,
                    assistant_message_id = %assistant_message_id,
                    fragments_discarded = accumulator.fragments_applied(),
                    error = %fault,
                    "request cycle failed"
                );
                (CycleOutcome::Failed, Some(fault))
            }
        };
        self.transition(CyclePhase::Idle);
        self.in_flight = None;
        drop(alive);

        CycleReport {
            outcome,
            conversation_id,
            user_message_id,
            assistant_message_id,
            fault,
            fragments_applied: accumulator.fragments_applied(),
        }
    }

    /// Polls the provider worker alongside the accumulator on the current task.
    ///
    /// The worker future is dropped as soon as the accumulator returns, which releases the
    /// underlying connection on every exit path.
    async fn drive_stream(
        store: &mut MessageStore,
        accumulator: &mut StreamAccumulator,
        handle: ProviderStreamHandle,
        cancel_rx: oneshot::Receiver<()>,
    ) -> Result<(), CycleFault> {
        let ProviderStreamHandle { stream, mut worker } = handle;
        let mut worker_done = false;
        tracing::debug!(target = ?stream.target(), "driving provider stream");

        let drive = accumulator.drive(store, stream, cancel_rx);
        tokio::pin!(drive);

        loop {
            tokio::select! {
                result = &mut drive => return result,
                () = &mut worker, if !worker_done => worker_done = true,
            }
        }
    }

    /// System instruction first, then prior turns in thread order, then the new user text.
    fn build_prompt_context(&self, prior: &[Arc<Message>], text: &str) -> Vec<ProviderMessage> {
        let mut messages = Vec::with_capacity(prior.len() + 2);
        if !self.options.system_instruction.trim().is_empty() {
            messages.push(ProviderMessage::new(
                ProviderRole::System,
                self.options.system_instruction.clone(),
            ));
        }
        messages.extend(
            prior
                .iter()
                .map(|message| ProviderMessage::new(message.role().to_provider(), message.text())),
        );
        messages.push(ProviderMessage::new(ProviderRole::User, text));
        messages
    }

    fn transition(&mut self, to: CyclePhase) {
        match self.phase.advance(to) {
            Ok(next) => self.phase = next,
            Err(rejection) => {
                tracing::error!(
                    from = ?rejection.from,
                    to = ?rejection.to,
                    "illegal request cycle transition"
                );
            }
        }
    }
}
