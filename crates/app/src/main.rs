use std::process::ExitCode;

use clap::Parser;
use sigma_llm::create_provider;
use sigma_thread::ConversationController;
use snafu::{OptionExt, ResultExt};
use tracing_subscriber::EnvFilter;

mod cli;
mod error;
mod render;
mod session;
mod settings;

use cli::{ChatArgs, Cli, Commands, InitConfigArgs};
use error::{
    AppResult, ConfigExistsSnafu, LoadProviderSnafu, MissingCredentialsSnafu, SettingsSnafu,
    WriteOutputSnafu,
};
use settings::{Settings, SettingsStore};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with streamed replies on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, "sigma stopped");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<ExitCode> {
    let store = SettingsStore::new(cli.config.unwrap_or_else(SettingsStore::default_config_path));

    match cli.command.unwrap_or(Commands::Chat(ChatArgs::default())) {
        Commands::Chat(args) => chat(&store, args).await,
        Commands::Shortcuts => {
            let settings = store.load();
            let mut stdout = std::io::stdout().lock();
            session::write_shortcuts(&mut stdout, &settings.shortcuts()).context(
                WriteOutputSnafu {
                    stage: "list-shortcuts",
                },
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::InitConfig(InitConfigArgs { force }) => {
            let path = store.config_path().to_path_buf();
            if path.exists() && !force {
                return ConfigExistsSnafu {
                    stage: "init-config",
                    path,
                }
                .fail();
            }

            store.persist(&Settings::default()).context(SettingsSnafu {
                stage: "init-config",
            })?;
            println!("Wrote default settings to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn chat(store: &SettingsStore, args: ChatArgs) -> AppResult<ExitCode> {
    let mut settings = store
        .load()
        .with_openai_fallback(|key| std::env::var(key).ok());
    if let Some(model) = args.model.filter(|model| !model.trim().is_empty()) {
        settings.chat.model = model.trim().to_string();
    }

    let config = settings
        .to_provider_config()
        .context(MissingCredentialsSnafu {
            stage: "resolve-provider-config",
        })?;
    let provider = create_provider(config).context(LoadProviderSnafu {
        stage: "create-provider",
    })?;

    tracing::info!(
        provider_id = %provider.id(),
        provider_name = %provider.name(),
        model_id = %settings.chat.model,
        config_path = ?store.config_path(),
        "starting chat"
    );

    let mut controller = ConversationController::new(provider, settings.chat_options());
    match args.ask {
        Some(question) => {
            if session::ask_once(&mut controller, &question).await {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        None => {
            session::run_interactive(&mut controller, &settings.shortcuts()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
