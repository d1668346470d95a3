//! Player-facing message templates.
//!
//! Operators may override any entry with a JSON file mapping a key to a
//! string or a list of strings. Keys missing from the file use the built-in
//! English text.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Welcome,
    Help,
    Rules,
    PasswordInstructions,
    PasswordWhisperOnly,
    PasswordMissingArgument,
    PasswordInvalid,
    PasswordSetSuccess,
    PasswordClearSuccess,
    PasswordReapplied,
    PasswordSaveFailed,
    PasswordNotInCompany,
    ResetNotInCompany,
    ResetPrompt,
    ResetConfirmed,
    ResetNoPending,
    ResetWrongCompany,
    UnknownCommand,
    InternalError,
}

impl MessageKey {
    pub const ALL: [MessageKey; 19] = [
        Self::Welcome,
        Self::Help,
        Self::Rules,
        Self::PasswordInstructions,
        Self::PasswordWhisperOnly,
        Self::PasswordMissingArgument,
        Self::PasswordInvalid,
        Self::PasswordSetSuccess,
        Self::PasswordClearSuccess,
        Self::PasswordReapplied,
        Self::PasswordSaveFailed,
        Self::PasswordNotInCompany,
        Self::ResetNotInCompany,
        Self::ResetPrompt,
        Self::ResetConfirmed,
        Self::ResetNoPending,
        Self::ResetWrongCompany,
        Self::UnknownCommand,
        Self::InternalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Help => "help",
            Self::Rules => "rules",
            Self::PasswordInstructions => "password_instructions",
            Self::PasswordWhisperOnly => "password_whisper_only",
            Self::PasswordMissingArgument => "password_missing_argument",
            Self::PasswordInvalid => "password_invalid",
            Self::PasswordSetSuccess => "password_set_success",
            Self::PasswordClearSuccess => "password_clear_success",
            Self::PasswordReapplied => "password_reapplied",
            Self::PasswordSaveFailed => "password_save_failed",
            Self::PasswordNotInCompany => "password_not_in_company",
            Self::ResetNotInCompany => "reset_not_in_company",
            Self::ResetPrompt => "reset_prompt",
            Self::ResetConfirmed => "reset_confirmed",
            Self::ResetNoPending => "reset_no_pending",
            Self::ResetWrongCompany => "reset_wrong_company",
            Self::UnknownCommand => "unknown_command",
            Self::InternalError => "internal_error",
        }
    }

    fn default_lines(self) -> &'static [&'static str] {
        match self {
            Self::Welcome => &[
                "Welcome {client_name}!",
                "This server is maintained by {bot_name}. Type {prefix}help for commands and {prefix}rules for the rules.",
            ],
            Self::Help => &[
                "Available commands: {prefix}help, {prefix}rules, {prefix}pw <password>, {prefix}reset, {prefix}confirm.",
                "Open the Online Players list, select {bot_name} and whisper {prefix}pw <password> so nobody else sees it.",
            ],
            Self::Rules => &["1. Respect other players.", "2. Do not block tracks."],
            Self::PasswordInstructions => &[
                "Protect {company_name}: whisper {bot_name} with {prefix}pw <password>.",
                "The password is restored automatically after server restarts.",
            ],
            Self::PasswordWhisperOnly => &[
                "Passwords are only accepted by whisper. Select {bot_name} in the Online Players list and send {prefix}pw <password> there.",
            ],
            Self::PasswordMissingArgument => &[
                "Please provide a password: {prefix}pw <password> or {prefix}pw clear.",
            ],
            Self::PasswordInvalid => &["Invalid password."],
            Self::PasswordSetSuccess => &["Password for company {company_name} has been saved."],
            Self::PasswordClearSuccess => &[
                "Password for company {company_name} has been removed.",
            ],
            Self::PasswordReapplied => &[
                "The stored password for company {company_name} has been set again.",
            ],
            Self::PasswordSaveFailed => &[
                "The password could not be saved. Please try again later.",
            ],
            Self::PasswordNotInCompany => &[
                "You need to be part of a company to set a password. Start a company first.",
            ],
            Self::ResetNotInCompany => &["You are currently not in a company."],
            Self::ResetPrompt => &[
                "You want to reset company {company_name}.",
                "Send {prefix}confirm within {confirm_seconds} seconds to go ahead.",
            ],
            Self::ResetConfirmed => &["Company {company_name} has been reset."],
            Self::ResetNoPending => &["There is nothing to confirm."],
            Self::ResetWrongCompany => &[
                "Your reset request was for company {company_name}. Use {prefix}reset again in the company you want to reset.",
            ],
            Self::UnknownCommand => &["Unknown command. Try {prefix}help."],
            Self::InternalError => &["Something went wrong. Please try again."],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Template {
    Line(String),
    Lines(Vec<String>),
}

/// Placeholder values for one rendering
pub type Vars<'a> = [(&'a str, &'a str)];

#[derive(Debug, Clone, Default)]
pub struct Templates {
    overrides: HashMap<String, Template>,
}

impl Templates {
    /// Built-in messages only
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Load overrides from a JSON file; unreadable files fall back to the
    /// built-in messages
    pub async fn load(path: &Path) -> Self {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No message file, using built-in messages");
                return Self::builtin();
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read message file, using built-in messages"
                );
                return Self::builtin();
            }
        };

        match Self::from_json(&content) {
            Ok(templates) => {
                tracing::info!(
                    path = %path.display(),
                    overrides = templates.overrides.len(),
                    "Loaded message file"
                );
                templates
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse message file, using built-in messages"
                );
                Self::builtin()
            }
        }
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let overrides: HashMap<String, Template> = serde_json::from_str(content)?;
        for key in overrides.keys() {
            if !MessageKey::ALL.iter().any(|k| k.as_str() == key) {
                tracing::warn!(key = %key, "Ignoring unknown message key");
            }
        }
        Ok(Self { overrides })
    }

    /// Render every line of a message. Empty lines are dropped, so an
    /// operator can silence a message by overriding it with `[]`.
    pub fn lines(&self, key: MessageKey, vars: &Vars<'_>) -> Vec<String> {
        let raw: Vec<&str> = match self.overrides.get(key.as_str()) {
            Some(Template::Line(line)) => vec![line.as_str()],
            Some(Template::Lines(lines)) => lines.iter().map(String::as_str).collect(),
            None => key.default_lines().to_vec(),
        };

        raw.into_iter()
            .map(|line| render(line, vars))
            .filter(|line| !line.trim().is_empty())
            .collect()
    }
}

/// Replace `{name}` placeholders; unknown placeholders are left as written
fn render(template: &str, vars: &Vars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.iter().find(|(k, _)| *k == name) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
