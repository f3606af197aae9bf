//! Command line definitions for the `sigma` terminal client.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Streaming math and probability tutor for the terminal
#[derive(Parser, Debug)]
#[command(name = "sigma")]
#[command(about = "Sigma: ask math and probability questions, answers stream as they arrive")]
#[command(version)]
pub struct Cli {
    /// Settings file to load instead of the per-user default
    #[arg(short, long, global = true, env = "SIGMA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive conversation (default)
    Chat(ChatArgs),
    /// List the configured prompt shortcuts
    Shortcuts,
    /// Write a settings file populated with defaults
    InitConfig(InitConfigArgs),
}

/// Arguments for the chat command
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Model identifier overriding the configured one
    #[arg(short, long)]
    pub model: Option<String>,

    /// Ask a single question, print the answer and exit
    #[arg(short, long)]
    pub ask: Option<String>,
}

/// Arguments for the init-config command
#[derive(clap::Args, Debug)]
pub struct InitConfigArgs {
    /// Overwrite an existing settings file
    #[arg(short, long)]
    pub force: bool,
}
