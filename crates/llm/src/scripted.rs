use std::sync::{Arc, Mutex};

use snafu::ensure;
use tokio::sync::{mpsc, oneshot};

use crate::events::{StreamEventMapped, StreamFault, StreamTarget};
use crate::provider::{
    EmptyMessageSetSnafu, EventChannel, LlmProvider, ProviderResult, ProviderStreamHandle,
    ProviderWorker, RequestRejectedSnafu, StreamRequest,
};

pub const SCRIPTED_PROVIDER_ID: &str = "scripted";

/// How a scripted stream terminates after its fragments are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnding {
    Done,
    Fault(StreamFault),
    /// Channel closes without a terminal event.
    Disconnect,
    /// Never terminates; waits until the consumer cancels.
    Stall,
    /// `stream_chat` itself fails, no stream is produced.
    RejectOpen(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub fragments: Vec<String>,
    pub ending: ScriptEnding,
}

impl Script {
    pub fn completing<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ending: ScriptEnding::Done,
        }
    }

    pub fn ending(mut self, ending: ScriptEnding) -> Self {
        self.ending = ending;
        self
    }
}

/// Deterministic provider that replays scripts in order, one per request.
///
/// Requests beyond the queued scripts complete immediately with no fragments.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    requests: Arc<Mutex<Vec<StreamRequest>>>,
}

impl ScriptedProvider {
    pub fn new<I>(scripts: I) -> Self
    where
        I: IntoIterator<Item = Script>,
    {
        let mut scripts = scripts.into_iter().collect::<Vec<_>>();
        scripts.reverse();
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::default(),
        }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_script(&self) -> Script {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.pop())
            .unwrap_or_else(|| Script::completing(Vec::<String>::new()))
    }

    async fn run_script(
        target: StreamTarget,
        script: Script,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        cancel_rx: oneshot::Receiver<()>,
    ) {
        for fragment in script.fragments {
            if event_tx
                .send(StreamEventMapped::delta(target, fragment))
                .is_err()
            {
                return;
            }
            tokio::task::yield_now().await;
        }

        match script.ending {
            ScriptEnding::Done => {
                let _ = event_tx.send(StreamEventMapped::done(target));
            }
            ScriptEnding::Fault(fault) => {
                let _ = event_tx.send(StreamEventMapped::error(target, fault));
            }
            ScriptEnding::Disconnect | ScriptEnding::RejectOpen(_) => {}
            ScriptEnding::Stall => {
                let _ = cancel_rx.await;
                tracing::debug!(target = ?target, "scripted stream released after cancel");
            }
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        SCRIPTED_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "scripted-stream-chat",
                target: request.target,
            }
        );

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let script = self.next_script();
        if let ScriptEnding::RejectOpen(message) = &script.ending {
            return RequestRejectedSnafu {
                stage: "scripted-open",
                message: message.clone(),
            }
            .fail();
        }

        let EventChannel {
            sender,
            stream,
            stopped,
        } = EventChannel::open(request.target);
        let worker: ProviderWorker =
            Box::pin(Self::run_script(request.target, script, sender, stopped));
        Ok(ProviderStreamHandle { stream, worker })
    }
}
