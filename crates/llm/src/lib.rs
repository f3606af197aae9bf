use std::sync::Arc;

mod events;
mod provider;
mod rig_adapter;
mod scripted;

pub use events::{FaultKind, StreamEventMapped, StreamEventPayload, StreamFault, StreamTarget};
pub use provider::{
    DEFAULT_OPENAI_MODEL, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role, StreamRequest,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};
pub use scripted::{SCRIPTED_PROVIDER_ID, Script, ScriptEnding, ScriptedProvider};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_id_resolves_to_openai() {
        let provider = create_provider(ProviderConfig::new("", "sk-test", ""))
            .expect("openai adapter builds with key");
        assert_eq!(provider.id(), RIG_OPENAI_PROVIDER_ID);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = create_provider(ProviderConfig::new("anthropic", "key", ""));
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }
}
