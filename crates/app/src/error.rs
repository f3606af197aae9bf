use std::path::PathBuf;

use sigma_llm::ProviderError;
use snafu::Snafu;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to build completion provider on `{stage}`: {source}"))]
    LoadProvider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("no API key configured; set SIGMA_PROVIDER__API_KEY or OPENAI_API_KEY"))]
    MissingCredentials { stage: &'static str },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("settings file already exists at {path:?}; pass --force to overwrite"))]
    ConfigExists { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read terminal input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write terminal output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("shortcut {index} does not exist; {available} are configured"))]
    UnknownShortcut {
        stage: &'static str,
        index: usize,
        available: usize,
    },
}

pub type AppResult<T> = Result<T, AppError>;
