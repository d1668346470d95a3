//! Chat line parsing.

use shared::{ChatDestination, ClientId, CompanyId};

/// Commands the bot understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Rules,
    Password,
    Reset,
    Confirm,
    Unknown(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "help" => Self::Help,
            "rules" => Self::Rules,
            "pw" => Self::Password,
            "reset" => Self::Reset,
            "confirm" => Self::Confirm,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Name for logs
    pub fn name(&self) -> &str {
        match self {
            Self::Help => "help",
            Self::Rules => "rules",
            Self::Password => "pw",
            Self::Reset => "reset",
            Self::Confirm => "confirm",
            Self::Unknown(name) => name,
        }
    }
}

/// A chat line that started with the command prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    pub argument: String,
}

/// Split a chat line into command and argument. Returns `None` for lines
/// that are not commands.
pub fn parse(prefix: &str, text: &str) -> Option<ParsedCommand> {
    let line = text.trim().strip_prefix(prefix)?.trim();
    if line.is_empty() {
        return None;
    }

    let (name, argument) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    Some(ParsedCommand {
        command: Command::from_name(name),
        argument: argument.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl From<ChatDestination> for Visibility {
    fn from(destination: ChatDestination) -> Self {
        if destination.is_private() {
            Self::Private
        } else {
            Self::Public
        }
    }
}

/// Everything a handler needs to know about who sent a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sender {
    pub client_id: ClientId,
    /// Looked up when the command is dispatched, never cached
    pub company: Option<CompanyId>,
    pub visibility: Visibility,
}
