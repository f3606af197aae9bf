use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use crate::events::{StreamEventMapped, StreamFault, StreamTarget};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let trimmed = |value: String| value.trim().to_string();
        Self {
            provider_id: trimmed(provider_id.into()),
            api_key: trimmed(api_key.into()),
            endpoint: trimmed(endpoint.into()),
        }
    }
}

/// Role as understood by the completion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl StreamRequest {
    pub fn new(
        target: StreamTarget,
        model_id: impl Into<String>,
        messages: Vec<ProviderMessage>,
    ) -> Self {
        Self {
            target,
            model_id: model_id.into(),
            messages,
            preamble: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Future performing the network IO of one stream; it must be polled for events to flow.
pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("provider '{provider_id}' has no API key configured"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("unknown provider '{provider_id}'"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("nothing to send for {target:?} on `{stage}`"))]
    EmptyMessageSet {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("could not build http client on `{stage}`: {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completion request failed on `{stage}`: {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("provider rejected the request on `{stage}`: {message}"))]
    RequestRejected {
        stage: &'static str,
        message: String,
    },
}

impl From<ProviderError> for StreamFault {
    /// A request that never produced a stream is a transport fault.
    fn from(error: ProviderError) -> Self {
        StreamFault::transport(error.to_string())
    }
}

/// Consumer side of one provider stream, yielding events in arrival order.
///
/// Dropping it (or calling [`ProviderEventStream::cancel`]) tells the worker to stop.
pub struct ProviderEventStream {
    target: StreamTarget,
    receiver: mpsc::UnboundedReceiver<StreamEventMapped>,
    stop: Option<oneshot::Sender<()>>,
}

pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    /// Signals the worker to stop. Returns true only for the first call that reached it.
    pub fn cancel(&mut self) -> bool {
        match self.stop.take() {
            Some(stop) => stop.send(()).is_ok(),
            None => false,
        }
    }
}

impl Stream for ProviderEventStream {
    type Item = StreamEventMapped;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    /// Opens a stream for `request`. Never blocks; IO happens when the worker is polled.
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

/// Producer and consumer ends wired for one stream target.
pub(crate) struct EventChannel {
    pub(crate) sender: mpsc::UnboundedSender<StreamEventMapped>,
    pub(crate) stream: ProviderEventStream,
    pub(crate) stopped: oneshot::Receiver<()>,
}

impl EventChannel {
    pub(crate) fn open(target: StreamTarget) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop, stopped) = oneshot::channel();
        Self {
            sender,
            stream: ProviderEventStream {
                target,
                receiver,
                stop: Some(stop),
            },
            stopped,
        }
    }
}
