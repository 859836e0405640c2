//! Line-oriented operator console.
//!
//! Each stdin line is parsed as a subcommand (`add fix the tests`,
//! `move 3 1`, `key enter`) and executed against an
//! [`OrchestratorHandle`]. Messages are addressed by their 1-based position
//! in the queue as shown by `list`.

use clap::{Parser, Subcommand};

use crate::models::{MessageItem, MessageStatus, SessionSnapshot};
use crate::notify::{NoticeLevel, OutputStream, UiEvent};
use crate::orchestrator::OrchestratorHandle;
use crate::{AppError, Result};

/// Longest text preview shown by `list`.
const PREVIEW_CHARS: usize = 60;

#[derive(Debug, Parser)]
#[command(name = "queue-autopilot", no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConsoleCommand {
    /// Add a message to the end of the queue.
    Add {
        /// Message text.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Replace the text of a message.
    Edit {
        /// Position as shown by `list`.
        index: usize,
        /// New text.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    /// Remove a message.
    Remove {
        /// Position as shown by `list`.
        index: usize,
    },
    /// Queue a fresh copy of a message.
    Duplicate {
        /// Position as shown by `list`.
        index: usize,
    },
    /// Move a message to another position.
    Move {
        /// Current position.
        from: usize,
        /// Target position.
        to: usize,
    },
    /// Remove every message.
    Clear,
    /// Show the queue.
    List,
    /// Start processing, starting the CLI session if needed.
    Start,
    /// Stop processing and interrupt the CLI.
    Stop,
    /// Start the CLI session without processing.
    Session,
    /// Kill the CLI session.
    Reset,
    /// Send a navigation key: up, down, left, right, enter, escape.
    Key {
        /// Key name.
        key: String,
    },
    /// Show session flags.
    Status,
    /// Show queue statistics.
    Stats,
    /// Show saved runs.
    History,
    /// Exit.
    Quit,
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading, optionally printing a reply.
    Continue(Option<String>),
    /// Stop the console.
    Quit,
}

/// Parse one input line.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` with usage text for an unknown or
/// malformed command.
pub fn parse_line(line: &str) -> Result<ConsoleCommand> {
    ConsoleLine::try_parse_from(line.split_whitespace())
        .map(|parsed| parsed.command)
        .map_err(|err| AppError::InvalidInput(err.to_string().trim_end().to_owned()))
}

/// Run `command` against the orchestrator.
///
/// # Errors
///
/// Propagates the orchestrator's error for the failed operation.
pub async fn execute(handle: &OrchestratorHandle, command: ConsoleCommand) -> Result<Outcome> {
    let reply = match command {
        ConsoleCommand::Add { text } => {
            handle.enqueue(text.join(" ")).await?;
            None
        }
        ConsoleCommand::Edit { index, text } => {
            let id = id_at(handle, index).await?;
            handle.edit(id, text.join(" ")).await?;
            Some(format!("message {index} updated"))
        }
        ConsoleCommand::Remove { index } => {
            let id = id_at(handle, index).await?;
            handle.remove(id).await?;
            Some(format!("message {index} removed"))
        }
        ConsoleCommand::Duplicate { index } => {
            let id = id_at(handle, index).await?;
            handle.duplicate(id).await?;
            Some(format!("message {index} duplicated"))
        }
        ConsoleCommand::Move { from, to } => {
            let (Some(from_idx), Some(to_idx)) = (from.checked_sub(1), to.checked_sub(1)) else {
                return Err(AppError::InvalidInput("positions start at 1".into()));
            };
            let len = handle.items().await?.len();
            if from_idx >= len || to_idx >= len {
                return Err(AppError::NotFound(format!(
                    "cannot move {from} to {to}: queue has {len} messages"
                )));
            }
            handle.reorder(from_idx, to_idx).await?;
            Some(format!("message {from} moved to {to}"))
        }
        ConsoleCommand::Clear => {
            handle.clear().await?;
            None
        }
        ConsoleCommand::List => Some(render_items(&handle.items().await?)),
        ConsoleCommand::Start => {
            handle.start_processing().await?;
            None
        }
        ConsoleCommand::Stop => {
            handle.stop_processing().await?;
            None
        }
        ConsoleCommand::Session => {
            handle.start_session().await?;
            None
        }
        ConsoleCommand::Reset => {
            handle.reset_session().await?;
            None
        }
        ConsoleCommand::Key { key } => {
            handle.keypress(key).await?;
            None
        }
        ConsoleCommand::Status => Some(render_snapshot(&handle.snapshot().await?)),
        ConsoleCommand::Stats => Some(handle.stats().await?.summary()),
        ConsoleCommand::History => {
            let runs = handle.history().await?;
            if runs.is_empty() {
                Some("no saved runs".to_owned())
            } else {
                Some(
                    runs.iter()
                        .map(|run| {
                            format!(
                                "{} started {} {}: {} messages, {} completed, {} errors, {} waiting",
                                run.id,
                                run.started_at.format("%Y-%m-%d %H:%M"),
                                if run.is_closed() { "(closed)" } else { "(open)" },
                                run.total,
                                run.completed,
                                run.errors,
                                run.waiting
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }
        }
        ConsoleCommand::Quit => return Ok(Outcome::Quit),
    };
    Ok(Outcome::Continue(reply))
}

async fn id_at(handle: &OrchestratorHandle, index: usize) -> Result<String> {
    let items = handle.items().await?;
    index
        .checked_sub(1)
        .and_then(|i| items.get(i))
        .map(|item| item.id.clone())
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no message at position {index} (queue has {})",
                items.len()
            ))
        })
}

/// Render the queue as numbered lines.
#[must_use]
pub fn render_items(items: &[MessageItem]) -> String {
    if items.is_empty() {
        return "queue is empty".to_owned();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let first_line = item.text.lines().next().unwrap_or_default();
            let mut preview: String = first_line.chars().take(PREVIEW_CHARS).collect();
            if first_line.chars().count() > PREVIEW_CHARS || item.text.lines().nth(1).is_some() {
                preview.push_str("...");
            }
            let detail = match item.status {
                MessageStatus::Waiting => item
                    .wait_seconds
                    .map(|secs| format!(" (resumes in {})", format_wait(secs)))
                    .unwrap_or_default(),
                MessageStatus::Error => item
                    .error
                    .as_deref()
                    .map(|err| format!(" ({err})"))
                    .unwrap_or_default(),
                _ => String::new(),
            };
            format!("{:>3}. [{}] {preview}{detail}", i + 1, item.status.as_str())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_wait(secs: u64) -> String {
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    format!(
        "session: {} | ready: {} | processing: {} | current: {}",
        if snapshot.running { "running" } else { "stopped" },
        snapshot.ready,
        snapshot.processing,
        snapshot.current_message_id.as_deref().unwrap_or("-")
    )
}

/// Text to print for a UI event, if any.
///
/// Raw stdout is only echoed when `show_output` is set; queue updates are
/// left to `list`.
#[must_use]
pub fn render_event(event: &UiEvent, show_output: bool) -> Option<String> {
    match event {
        UiEvent::QueueUpdated { .. } => None,
        UiEvent::SessionStateChanged(snapshot) => Some(render_snapshot(snapshot)),
        UiEvent::Output {
            stream: OutputStream::Stdout,
            text,
        } => show_output.then(|| text.clone()),
        UiEvent::Output {
            stream: OutputStream::Stderr,
            text,
        } => Some(format!("[cli stderr] {}", text.trim_end())),
        UiEvent::Notice { level, text } => {
            let tag = match level {
                NoticeLevel::Info => "info",
                NoticeLevel::Warning => "warning",
                NoticeLevel::Error => "error",
            };
            Some(format!("[{tag}] {text}"))
        }
        UiEvent::DependencyReport(report) => Some(report.render().trim_end().to_owned()),
    }
}
