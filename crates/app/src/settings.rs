use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use sigma_llm::{DEFAULT_OPENAI_MODEL, ProviderConfig};
use sigma_thread::{
    ChatOptions, DEFAULT_FAILURE_MESSAGE, DEFAULT_SYSTEM_INSTRUCTION, PromptShortcut,
    default_shortcuts,
};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "sigma";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "SIGMA_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutSettings {
    pub title: String,
    pub subtitle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_shortcut_settings")]
    pub shortcuts: Vec<ShortcutSettings>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_instruction: default_system_instruction(),
            failure_message: default_failure_message(),
            temperature: None,
            max_tokens: None,
            shortcuts: default_shortcut_settings(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub chat: ChatSettings,
}

impl Settings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.provider.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider.provider_id,
            &self.provider.api_key,
            &self.provider.endpoint,
        ))
    }

    pub fn chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::default()
            .with_model(self.chat.model.clone())
            .with_system_instruction(self.chat.system_instruction.clone())
            .with_failure_message(self.chat.failure_message.clone());
        if let Some(temperature) = self.chat.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.chat.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        options
    }

    pub fn shortcuts(&self) -> Vec<PromptShortcut> {
        self.chat
            .shortcuts
            .iter()
            .map(|shortcut| PromptShortcut::new(&shortcut.title, &shortcut.subtitle))
            .collect()
    }

    pub fn normalized(mut self) -> Self {
        self.provider.provider_id = non_blank_or(&self.provider.provider_id, DEFAULT_PROVIDER_ID);
        self.provider.api_key = self.provider.api_key.trim().to_string();
        self.provider.endpoint = non_blank_or(&self.provider.endpoint, DEFAULT_ENDPOINT);
        self.chat.model = non_blank_or(&self.chat.model, DEFAULT_OPENAI_MODEL);
        self.chat.failure_message =
            non_blank_or(&self.chat.failure_message, DEFAULT_FAILURE_MESSAGE);
        // A blank system instruction is allowed and means "send none".
        self.chat.system_instruction = self.chat.system_instruction.trim().to_string();

        self.chat.shortcuts.retain(|shortcut| {
            !shortcut.title.trim().is_empty() && !shortcut.subtitle.trim().is_empty()
        });

        self
    }

    /// Fills the provider from `OPENAI_*` variables when no API key is configured.
    pub fn with_openai_fallback<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.provider.api_key.is_empty() {
            return self;
        }

        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(api_key) = read("OPENAI_API_KEY") else {
            return self;
        };

        tracing::info!("using OPENAI_API_KEY from the environment");
        self.provider.provider_id = DEFAULT_PROVIDER_ID.to_string();
        self.provider.api_key = api_key;
        if let Some(endpoint) = read("OPENAI_BASE_URL") {
            self.provider.endpoint = endpoint;
        }
        if let Some(model) = read("OPENAI_MODEL") {
            self.chat.model = model;
        }
        self
    }
}

pub struct SettingsStore {
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".sigma"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Layers defaults, the JSON file and `SIGMA_` environment variables.
    ///
    /// Unreadable settings fall back to defaults with a warning.
    pub fn load(&self) -> Settings {
        if !self.config_path.exists() {
            tracing::info!(
                "settings file not found at {:?}, using defaults",
                self.config_path
            );
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(&self.config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    self.config_path,
                    error
                );
                Settings::default()
            }
        }
    }

    pub fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_system_instruction() -> String {
    DEFAULT_SYSTEM_INSTRUCTION.to_string()
}

fn default_failure_message() -> String {
    DEFAULT_FAILURE_MESSAGE.to_string()
}

fn default_shortcut_settings() -> Vec<ShortcutSettings> {
    default_shortcuts()
        .into_iter()
        .map(|shortcut| ShortcutSettings {
            title: shortcut.title,
            subtitle: shortcut.subtitle,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use figment::Jail;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let settings = SettingsStore::new(PathBuf::from("absent.json")).load();
            assert_eq!(settings, Settings::default());
            assert!(settings.to_provider_config().is_none());
            Ok(())
        });
    }

    #[test]
    fn file_values_merge_over_defaults_and_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{
                    "provider": { "api_key": "  sk-file  " },
                    "chat": { "model": "gpt-4o-mini", "max_tokens": 512 }
                }"#,
            )?;
            jail.set_env("SIGMA_CHAT__MODEL", "gpt-4.1");

            let settings = SettingsStore::new(PathBuf::from("settings.json")).load();
            assert_eq!(settings.provider.api_key, "sk-file");
            assert_eq!(settings.provider.endpoint, DEFAULT_ENDPOINT);
            assert_eq!(settings.chat.model, "gpt-4.1");
            assert_eq!(settings.chat.max_tokens, Some(512));
            assert_eq!(settings.chat.failure_message, DEFAULT_FAILURE_MESSAGE);

            let options = settings.chat_options();
            assert_eq!(options.model_id, "gpt-4.1");
            assert_eq!(options.max_tokens, Some(512));
            Ok(())
        });
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", "{ not json")?;
            let settings = SettingsStore::new(PathBuf::from("settings.json")).load();
            assert_eq!(settings, Settings::default());
            Ok(())
        });
    }

    #[test]
    fn persist_then_load_round_trips_through_nested_directory() {
        Jail::expect_with(|_jail| {
            let store = SettingsStore::new(PathBuf::from("nested/dir/settings.json"));
            let mut settings = Settings::default();
            settings.provider.api_key = "sk-saved".to_string();
            settings.chat.shortcuts.truncate(1);

            store.persist(&settings).expect("settings persist");
            assert!(!Path::new("nested/dir/settings.json.tmp").exists());
            assert_eq!(store.load(), settings);
            Ok(())
        });
    }

    #[test]
    fn normalization_drops_blank_shortcuts_and_restores_blank_defaults() {
        let mut settings = Settings::default();
        settings.provider.provider_id = "  ".to_string();
        settings.chat.model = String::new();
        settings.chat.failure_message = " ".to_string();
        settings.chat.shortcuts.push(ShortcutSettings {
            title: " ".to_string(),
            subtitle: "orphan".to_string(),
        });

        let settings = settings.normalized();
        assert_eq!(settings.provider.provider_id, DEFAULT_PROVIDER_ID);
        assert_eq!(settings.chat.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(settings.chat.failure_message, DEFAULT_FAILURE_MESSAGE);
        assert_eq!(settings.shortcuts(), default_shortcuts());
    }

    #[test]
    fn openai_environment_fills_missing_key_only() {
        let environment = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_BASE_URL", "http://localhost:8080/v1"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
        ]);
        let lookup = |key: &str| environment.get(key).map(|value| value.to_string());

        let filled = Settings::default().with_openai_fallback(lookup);
        let config = filled.to_provider_config().expect("key from environment");
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.endpoint, "http://localhost:8080/v1");
        assert_eq!(filled.chat.model, "gpt-4o-mini");

        let mut configured = Settings::default();
        configured.provider.api_key = "sk-file".to_string();
        let kept = configured.clone().with_openai_fallback(lookup);
        assert_eq!(kept, configured);
    }
}
