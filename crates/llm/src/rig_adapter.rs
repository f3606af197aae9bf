use std::ops::ControlFlow;

use futures::StreamExt;
use rig::completion::{CompletionError, CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::events::{StreamEventMapped, StreamFault, StreamTarget};
use crate::provider::{
    CompletionsFailedSnafu, DEFAULT_OPENAI_MODEL, EmptyMessageSetSnafu, EventChannel,
    HttpClientSnafu, LlmProvider, MissingApiKeySnafu, ProviderConfig, ProviderResult,
    ProviderStreamHandle, ProviderWorker, Role, StreamRequest,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

type OpenAiReplyStream = rig::streaming::StreamingCompletionResponse<
    openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Streams chat completions from an OpenAI-compatible endpoint through rig.
pub struct RigProviderAdapter {
    config: ProviderConfig,
}

/// A [`StreamRequest`] reshaped into what rig's request builder takes.
#[derive(Debug, Clone, PartialEq)]
struct RigTurns {
    preamble: Option<String>,
    history: Vec<RigMessage>,
    prompt: RigMessage,
}

impl RigTurns {
    /// Rig takes one preamble, so system turns are appended to it in order and the
    /// final conversational turn becomes the prompt.
    fn from_request(request: &StreamRequest) -> ProviderResult<Self> {
        let mut instructions = request
            .preamble
            .iter()
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>();
        let mut history = Vec::with_capacity(request.messages.len());

        for message in &request.messages {
            match message.role {
                Role::System if !message.content.trim().is_empty() => {
                    instructions.push(&message.content)
                }
                Role::System => {}
                Role::User => history.push(RigMessage::user(message.content.clone())),
                Role::Assistant => history.push(RigMessage::assistant(message.content.clone())),
            }
        }

        let Some(prompt) = history.pop() else {
            return EmptyMessageSetSnafu {
                stage: "split-conversation-turns",
                target: request.target,
            }
            .fail();
        };

        Ok(Self {
            preamble: (!instructions.is_empty()).then(|| instructions.join("\n\n")),
            history,
            prompt,
        })
    }
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "create-rig-adapter",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }

    fn client(&self) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(self.config.api_key.as_str());
        if !self.config.endpoint.is_empty() {
            builder = builder.base_url(self.config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-openai-client",
        })
    }
}

/// Forwards rig stream chunks into the provider event channel for one target.
struct ReplyPump {
    target: StreamTarget,
    events: mpsc::UnboundedSender<StreamEventMapped>,
}

impl ReplyPump {
    fn emit(&self, event: StreamEventMapped) -> ControlFlow<()> {
        if self.events.send(event).is_err() {
            tracing::debug!(target = ?self.target, "event receiver dropped, stopping pump");
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn forward<R>(
        &self,
        chunk: Result<StreamedAssistantContent<R>, CompletionError>,
    ) -> ControlFlow<()>
    where
        R: Clone + Unpin,
    {
        match chunk {
            Ok(content) => match text_delta(content) {
                Some(text) => self.emit(StreamEventMapped::delta(self.target, text)),
                None => ControlFlow::Continue(()),
            },
            Err(source) => {
                tracing::warn!(
                    target = ?self.target,
                    error = %source,
                    "reply stream chunk failed"
                );
                let fault = fault_for_chunk(&source);
                let _ = self.emit(StreamEventMapped::error(self.target, fault));
                ControlFlow::Break(())
            }
        }
    }

    async fn run<F>(self, opening: F, mut cancel_rx: oneshot::Receiver<()>)
    where
        F: Future<Output = ProviderResult<OpenAiReplyStream>>,
    {
        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(target = ?self.target, "cancelled before reply stream opened");
                return;
            }
            opened = opening => opened,
        };

        let mut replies = match opened {
            Ok(replies) => replies,
            Err(error) => {
                tracing::warn!(target = ?self.target, error = %error, "reply stream did not open");
                let _ = self.emit(StreamEventMapped::error(self.target, error.into()));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(target = ?self.target, "reply stream cancelled");
                    replies.cancel();
                    return;
                }
                chunk = replies.next() => {
                    let Some(chunk) = chunk else { break };
                    if self.forward(chunk).is_break() {
                        return;
                    }
                }
            }
        }

        let _ = self.emit(StreamEventMapped::done(self.target));
    }
}

/// Only non-empty answer text reaches the transcript; reasoning and tool items are dropped.
fn text_delta<R>(content: StreamedAssistantContent<R>) -> Option<String>
where
    R: Clone + Unpin,
{
    match content {
        StreamedAssistantContent::Text(text) if !text.text.is_empty() => Some(text.text),
        _ => None,
    }
}

fn fault_for_chunk(source: &CompletionError) -> StreamFault {
    match source {
        CompletionError::JsonError(_) => StreamFault::decoding(source.to_string()),
        _ => StreamFault::transport(source.to_string()),
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "OpenAI (rig)"
    }

    fn default_model(&self) -> &str {
        DEFAULT_OPENAI_MODEL
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let turns = RigTurns::from_request(&request)?;
        let model = self.client()?.completion_model(request.model_id.clone());

        tracing::debug!(
            target = ?request.target,
            model_id = %request.model_id,
            history_turns = turns.history.len(),
            has_preamble = turns.preamble.is_some(),
            "opening reply stream"
        );

        let mut builder = model
            .completion_request(turns.prompt)
            .messages(turns.history);
        if let Some(preamble) = turns.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        let opening = async move {
            builder.stream().await.context(CompletionsFailedSnafu {
                stage: "open-reply-stream",
            })
        };

        let EventChannel {
            sender,
            stream,
            stopped,
        } = EventChannel::open(request.target);
        let pump = ReplyPump {
            target: request.target,
            events: sender,
        };
        let worker: ProviderWorker = Box::pin(pump.run(opening, stopped));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::provider::{ProviderError, ProviderMessage};

    fn request(messages: Vec<ProviderMessage>) -> StreamRequest {
        StreamRequest::new(
            StreamTarget::new(Uuid::now_v7(), Uuid::now_v7()),
            DEFAULT_OPENAI_MODEL,
            messages,
        )
    }

    #[test]
    fn adapter_requires_api_key() {
        let result = RigProviderAdapter::new(ProviderConfig::new("openai", "  ", ""));
        assert!(matches!(result, Err(ProviderError::MissingApiKey { .. })));
    }

    #[test]
    fn system_turns_join_explicit_preamble_and_last_turn_is_prompt() {
        let request = request(vec![
            ProviderMessage::new(Role::System, "format math as LaTeX"),
            ProviderMessage::new(Role::User, "2+2=?"),
            ProviderMessage::new(Role::Assistant, "4"),
            ProviderMessage::new(Role::User, "3+3=?"),
        ])
        .with_preamble("be brief");

        let turns = RigTurns::from_request(&request).expect("conversation has turns");
        assert_eq!(
            turns.preamble.as_deref(),
            Some("be brief\n\nformat math as LaTeX")
        );
        assert_eq!(
            turns.history,
            vec![RigMessage::user("2+2=?"), RigMessage::assistant("4")]
        );
        assert_eq!(turns.prompt, RigMessage::user("3+3=?"));
    }

    #[test]
    fn blank_system_turns_produce_no_preamble() {
        let request = request(vec![
            ProviderMessage::new(Role::System, "   "),
            ProviderMessage::new(Role::User, "hi"),
        ]);
        let turns = RigTurns::from_request(&request).expect("one user turn");
        assert_eq!(turns.preamble, None);
        assert!(turns.history.is_empty());
    }

    #[test]
    fn system_only_request_has_no_prompt() {
        let request = request(vec![ProviderMessage::new(Role::System, "rules")]);
        assert!(matches!(
            RigTurns::from_request(&request),
            Err(ProviderError::EmptyMessageSet { .. })
        ));
    }

    #[test]
    fn stream_chat_rejects_empty_message_set() {
        let adapter = RigProviderAdapter::new(ProviderConfig::new("openai", "sk-test", ""))
            .expect("api key present");
        let result = adapter.stream_chat(request(Vec::new()));
        assert!(matches!(result, Err(ProviderError::EmptyMessageSet { .. })));
    }
}
