use std::io::{self, Write};

use sigma_thread::{ConversationController, CycleOutcome, CycleReport, PromptShortcut};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{AppResult, ReadInputSnafu, UnknownShortcutSnafu, WriteOutputSnafu};
use crate::render::{RendererHandle, spawn_renderer};

const USER_PROMPT: &str = "you> ";

const HELP: &str = "Type a question and press Enter. \
/N sends shortcut N, /shortcuts lists them, /quit exits. \
Ctrl-C cancels a streaming reply.";

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ask(String),
    Shortcut(usize),
    ListShortcuts,
    Help,
    Quit,
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Ask(line.trim_end_matches(['\r', '\n']).to_string());
        };

        match command {
            "quit" | "exit" | "q" => Self::Quit,
            "shortcuts" | "s" => Self::ListShortcuts,
            "help" | "?" => Self::Help,
            other => match other.parse::<usize>() {
                Ok(number) => Self::Shortcut(number),
                Err(_) => Self::Ask(trimmed.to_string()),
            },
        }
    }
}

pub fn write_shortcuts<W: Write>(out: &mut W, shortcuts: &[PromptShortcut]) -> io::Result<()> {
    if shortcuts.is_empty() {
        return writeln!(out, "No shortcuts configured.");
    }

    for (index, shortcut) in shortcuts.iter().enumerate() {
        writeln!(out, "  /{}  {}", index + 1, shortcut.title)?;
        writeln!(out, "       {}", shortcut.subtitle)?;
    }
    Ok(())
}

/// Resolves a 1-based shortcut number.
pub fn select_shortcut(shortcuts: &[PromptShortcut], number: usize) -> AppResult<&PromptShortcut> {
    number
        .checked_sub(1)
        .and_then(|index| shortcuts.get(index))
        .ok_or_else(|| {
            UnknownShortcutSnafu {
                stage: "select-shortcut",
                index: number,
                available: shortcuts.len(),
            }
            .build()
        })
}

/// Submits the current composer input and streams the reply to stdout.
///
/// Returns `None` when the submission was rejected.
async fn run_cycle(
    controller: &mut ConversationController,
    renderer: &mut RendererHandle,
) -> Option<CycleReport> {
    let mut cycle = match controller.begin_input() {
        Ok(cycle) => cycle,
        Err(error) if error.is_silent() => {
            tracing::debug!(error = %error, "submission ignored");
            return None;
        }
        Err(error) => {
            tracing::error!(error = %error, "submission failed");
            eprintln!("error: {error}");
            return None;
        }
    };

    let interrupt = cycle.canceller().map(|canceller| {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && canceller.cancel() {
                tracing::info!("reply cancelled from the terminal");
            }
        })
    });

    let report = controller.finish(cycle).await;
    if let Some(interrupt) = interrupt {
        interrupt.abort();
    }
    renderer.caught_up(controller.thread().revision).await;

    tracing::debug!(
        outcome = ?report.outcome,
        fragments_applied = report.fragments_applied,
        "request cycle reported"
    );
    Some(report)
}

/// Asks one question and reports whether the reply completed.
pub async fn ask_once(controller: &mut ConversationController, question: &str) -> bool {
    let mut renderer = spawn_renderer(controller.subscribe());
    controller.set_input(question);
    run_cycle(controller, &mut renderer)
        .await
        .is_some_and(|report| report.outcome == CycleOutcome::Completed)
}

pub async fn run_interactive(
    controller: &mut ConversationController,
    shortcuts: &[PromptShortcut],
) -> AppResult<()> {
    let mut renderer = spawn_renderer(controller.subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_block(|out| {
        writeln!(out, "{HELP}")?;
        writeln!(out)?;
        write_shortcuts(out, shortcuts)
    })?;

    loop {
        print_block(|out| write!(out, "{USER_PROMPT}"))?;

        let line = tokio::select! {
            line = lines.next_line() => line.context(ReadInputSnafu { stage: "read-line" })?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            print_block(|out| writeln!(out))?;
            break;
        };

        match Command::parse(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Help => print_block(|out| writeln!(out, "{HELP}"))?,
            Command::ListShortcuts => print_block(|out| write_shortcuts(out, shortcuts))?,
            Command::Shortcut(number) => match select_shortcut(shortcuts, number) {
                Ok(shortcut) => {
                    let text = shortcut.composed_text();
                    print_block(|out| writeln!(out, "{USER_PROMPT}{text}"))?;
                    controller.set_input(text);
                    run_cycle(controller, &mut renderer).await;
                }
                Err(error) => eprintln!("{error}"),
            },
            Command::Ask(text) => {
                controller.set_input(text);
                run_cycle(controller, &mut renderer).await;
            }
        }
    }

    tracing::info!(
        messages = controller.thread().len(),
        "interactive session closed"
    );
    Ok(())
}

fn print_block<F>(write: F) -> AppResult<()>
where
    F: FnOnce(&mut io::StdoutLock<'static>) -> io::Result<()>,
{
    let mut stdout = io::stdout().lock();
    write(&mut stdout)
        .and_then(|()| stdout.flush())
        .context(WriteOutputSnafu {
            stage: "print-terminal-output",
        })
}
