//! Chat command handlers.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::bot::Bot;
use crate::confirm::ActionKind;
use crate::error::CommandError;
use crate::outbox::Outbox;
use crate::router::{Command, ParsedCommand, Sender, Visibility};
use crate::templates::MessageKey;

/// Arguments to `pw` that remove the password instead of setting one
const CLEAR_WORDS: [&str; 5] = ["clear", "reset", "remove", "delete", "none"];

impl Bot {
    /// Run one command. A failing or panicking handler sends nothing it
    /// produced so far; the sender gets a generic error reply instead.
    pub(crate) async fn dispatch(
        &mut self,
        sender: Sender,
        parsed: ParsedCommand,
        out: &mut Outbox,
    ) {
        let mut scratch = Outbox::new();
        let result = AssertUnwindSafe(self.run_command(sender, &parsed, &mut scratch))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(CommandError::Panicked(panic_message(payload.as_ref())))
            });

        match result {
            Ok(()) => out.append(scratch),
            Err(e) => {
                tracing::error!(
                    client = %sender.client_id,
                    command = parsed.command.name(),
                    error = %e,
                    "Command failed"
                );
                self.say(out, sender.client_id, MessageKey::InternalError, None);
            }
        }
    }

    async fn run_command(
        &mut self,
        sender: Sender,
        parsed: &ParsedCommand,
        out: &mut Outbox,
    ) -> Result<(), CommandError> {
        match &parsed.command {
            Command::Help => self.say(out, sender.client_id, MessageKey::Help, sender.company),
            Command::Rules => self.say(out, sender.client_id, MessageKey::Rules, sender.company),
            Command::Password => self.password(sender, &parsed.argument, out).await,
            Command::Reset => self.reset(sender, out),
            Command::Confirm => self.confirm(sender, out).await?,
            Command::Unknown(name) => {
                tracing::debug!(client = %sender.client_id, command = %name, "Unknown command");
                self.say(out, sender.client_id, MessageKey::UnknownCommand, None);
            }
        }
        Ok(())
    }

    async fn password(&mut self, sender: Sender, argument: &str, out: &mut Outbox) {
        let client_id = sender.client_id;

        // Never look at the argument of a public pw
        if sender.visibility == Visibility::Public {
            tracing::warn!(client = %client_id, "Password command sent in public chat, ignored");
            self.say(out, client_id, MessageKey::PasswordWhisperOnly, None);
            return;
        }

        let Some(company_id) = sender.company else {
            self.say(out, client_id, MessageKey::PasswordNotInCompany, None);
            return;
        };

        if argument.is_empty() {
            self.say(out, client_id, MessageKey::PasswordMissingArgument, Some(company_id));
            return;
        }

        if CLEAR_WORDS.iter().any(|w| argument.eq_ignore_ascii_case(w)) {
            match self.store.clear(company_id).await {
                Ok(_) => {
                    tracing::info!(
                        client = %client_id,
                        company = company_id.display_number(),
                        "Company password cleared"
                    );
                    out.set_company_password(company_id, "");
                    self.mark_password_current(company_id);
                    self.say(out, client_id, MessageKey::PasswordClearSuccess, Some(company_id));
                }
                Err(e) => {
                    tracing::error!(
                        company = company_id.display_number(),
                        error = %e,
                        "Failed to clear password"
                    );
                    self.say(out, client_id, MessageKey::PasswordSaveFailed, Some(company_id));
                }
            }
            return;
        }

        if argument.contains(['\n', '\r']) {
            self.say(out, client_id, MessageKey::PasswordInvalid, Some(company_id));
            return;
        }

        match self.store.set(company_id, argument.to_string()).await {
            Ok(()) => {
                tracing::info!(
                    client = %client_id,
                    company = company_id.display_number(),
                    "Company password set"
                );
                out.set_company_password(company_id, argument);
                self.mark_password_current(company_id);
                self.say(out, client_id, MessageKey::PasswordSetSuccess, Some(company_id));
            }
            Err(e) => {
                tracing::error!(
                    company = company_id.display_number(),
                    error = %e,
                    "Failed to save password"
                );
                self.say(out, client_id, MessageKey::PasswordSaveFailed, Some(company_id));
            }
        }
    }

    fn reset(&mut self, sender: Sender, out: &mut Outbox) {
        let Some(company_id) = sender.company else {
            self.say(out, sender.client_id, MessageKey::ResetNotInCompany, None);
            return;
        };

        self.confirmations
            .request(sender.client_id, company_id, ActionKind::ResetCompany);
        tracing::info!(
            client = %sender.client_id,
            company = company_id.display_number(),
            "Reset requested"
        );
        self.say(out, sender.client_id, MessageKey::ResetPrompt, Some(company_id));
    }

    async fn confirm(&mut self, sender: Sender, out: &mut Outbox) -> Result<(), CommandError> {
        let client_id = sender.client_id;
        let Some(pending) = self.confirmations.consume(client_id) else {
            self.say(out, client_id, MessageKey::ResetNoPending, None);
            return Ok(());
        };

        if sender.company != Some(pending.company_id) {
            tracing::info!(
                client = %client_id,
                company = pending.company_id.display_number(),
                "Reset confirmation from outside the company, dropped"
            );
            self.say(out, client_id, MessageKey::ResetWrongCompany, Some(pending.company_id));
            return Ok(());
        }

        match pending.action {
            ActionKind::ResetCompany => {
                let company_id = pending.company_id;
                if self.settings.clear_password_on_reset {
                    self.store.clear(company_id).await?;
                }
                out.reset_company(company_id);
                self.say(out, client_id, MessageKey::ResetConfirmed, Some(company_id));
                tracing::info!(
                    client = %client_id,
                    company = company_id.display_number(),
                    "Company reset"
                );
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::{test_bot, whispers_to};
    use crate::store::PasswordStore;
    use crate::templates::Templates;
    use shared::{AdminToBot, BotToAdmin, ChatDestination, ClientId, CompanyId};
    use std::time::Duration;

    const ALICE: ClientId = ClientId(1);

    async fn place(bot: &mut Bot, client: ClientId, company: CompanyId) {
        bot.handle_event(AdminToBot::ClientInfo {
            client_id: client,
            name: "Alice".to_string(),
            company_id: company,
        })
        .await;
        if let Some(company) = company.membership() {
            bot.handle_event(AdminToBot::CompanyInfo {
                company_id: company,
                name: "Alpha Transport".to_string(),
                passworded: false,
            })
            .await;
        }
    }

    async fn whisper(bot: &mut Bot, client: ClientId, text: &str) -> Vec<BotToAdmin> {
        chat(bot, client, ChatDestination::Client(ClientId(0)), text).await
    }

    async fn chat(
        bot: &mut Bot,
        client: ClientId,
        destination: ChatDestination,
        text: &str,
    ) -> Vec<BotToAdmin> {
        bot.handle_event(AdminToBot::Chat {
            client_id: client,
            destination,
            text: text.to_string(),
        })
        .await
    }

    fn set_requests(requests: &[BotToAdmin]) -> Vec<&BotToAdmin> {
        requests
            .iter()
            .filter(|r| matches!(r, BotToAdmin::SetCompanyPassword { .. }))
            .collect()
    }

    fn reset_requests(requests: &[BotToAdmin]) -> Vec<CompanyId> {
        requests
            .iter()
            .filter_map(|r| match r {
                BotToAdmin::ResetCompany { company_id } => Some(*company_id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_whispered_password_is_stored_and_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(2)).await;

        let out = whisper(&mut bot, ALICE, "!pw hunter2").await;
        assert_eq!(out[0], BotToAdmin::set_password(CompanyId(2), "hunter2"));
        assert_eq!(
            whispers_to(&out, ALICE),
            vec!["Password for company Alpha Transport has been saved."]
        );
        assert_eq!(bot.store.get(CompanyId(2)), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_password_set_live_is_not_reapplied() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(2)).await;
        whisper(&mut bot, ALICE, "!pw hunter2").await;

        assert!(set_requests(&bot.reapply_passwords()).is_empty());
        let update = bot
            .handle_event(AdminToBot::CompanyInfo {
                company_id: CompanyId(2),
                name: "Alpha Transport".to_string(),
                passworded: true,
            })
            .await;
        assert!(set_requests(&update).is_empty());
    }

    #[tokio::test]
    async fn test_public_password_is_never_processed_or_echoed() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(2)).await;

        for destination in [ChatDestination::Broadcast, ChatDestination::Company(CompanyId(2))] {
            let out = chat(&mut bot, ALICE, destination, "!pw hunter2").await;
            assert!(set_requests(&out).is_empty());
            assert!(!out.is_empty());
            for request in &out {
                assert!(matches!(
                    request,
                    BotToAdmin::Chat { destination: ChatDestination::Client(ALICE), .. }
                ));
                assert!(!format!("{:?}", request).contains("hunter2"));
                if let BotToAdmin::Chat { text, .. } = request {
                    assert!(!text.contains("hunter2"));
                }
            }
        }
        assert!(bot.store.is_empty());
    }

    #[tokio::test]
    async fn test_password_needs_company_and_argument() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId::SPECTATOR).await;

        let out = whisper(&mut bot, ALICE, "!pw secret").await;
        assert!(set_requests(&out).is_empty());
        assert!(whispers_to(&out, ALICE)[0].starts_with("You need to be part of a company"));

        place(&mut bot, ALICE, CompanyId(0)).await;
        let out = whisper(&mut bot, ALICE, "!pw").await;
        assert!(set_requests(&out).is_empty());
        assert!(whispers_to(&out, ALICE)[0].starts_with("Please provide a password"));
    }

    #[tokio::test]
    async fn test_password_clear_word_removes_password() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(2)).await;
        whisper(&mut bot, ALICE, "!pw hunter2").await;

        let out = whisper(&mut bot, ALICE, "!pw CLEAR").await;
        assert_eq!(out[0], BotToAdmin::set_password(CompanyId(2), ""));
        assert_eq!(
            whispers_to(&out, ALICE),
            vec!["Password for company Alpha Transport has been removed."]
        );
        assert_eq!(bot.store.get(CompanyId(2)), None);
    }

    #[tokio::test]
    async fn test_password_save_failure_sends_no_set() {
        let dir = tempfile::tempdir().unwrap();
        // Renaming onto a directory fails
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();
        let store = PasswordStore::open(&path).await;
        let mut bot = Bot::new(crate::bot::tests::settings(), Templates::builtin(), store);
        place(&mut bot, ALICE, CompanyId(2)).await;

        let out = whisper(&mut bot, ALICE, "!pw hunter2").await;
        assert!(set_requests(&out).is_empty());
        assert_eq!(
            whispers_to(&out, ALICE),
            vec!["The password could not be saved. Please try again later."]
        );
        assert_eq!(bot.store.get(CompanyId(2)), None);
    }

    #[tokio::test]
    async fn test_reset_then_confirm_resets_own_company_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(3)).await;

        let prompt = chat(&mut bot, ALICE, ChatDestination::Broadcast, "!reset 7").await;
        assert!(reset_requests(&prompt).is_empty());
        let lines = whispers_to(&prompt, ALICE);
        assert_eq!(lines[0], "You want to reset company Alpha Transport.");
        assert_eq!(lines[1], "Send !confirm within 30 seconds to go ahead.");

        let out = chat(&mut bot, ALICE, ChatDestination::Broadcast, "!confirm 9").await;
        assert_eq!(reset_requests(&out), vec![CompanyId(3)]);
        assert_eq!(whispers_to(&out, ALICE), vec!["Company Alpha Transport has been reset."]);

        let again = chat(&mut bot, ALICE, ChatDestination::Broadcast, "!confirm").await;
        assert!(reset_requests(&again).is_empty());
        assert_eq!(whispers_to(&again, ALICE), vec!["There is nothing to confirm."]);
    }

    #[tokio::test]
    async fn test_confirm_without_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(3)).await;

        let out = whisper(&mut bot, ALICE, "!confirm").await;
        assert!(reset_requests(&out).is_empty());
        assert_eq!(whispers_to(&out, ALICE), vec!["There is nothing to confirm."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_after_timeout_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(3)).await;

        whisper(&mut bot, ALICE, "!reset").await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let out = whisper(&mut bot, ALICE, "!confirm").await;
        assert!(reset_requests(&out).is_empty());
        assert_eq!(whispers_to(&out, ALICE), vec!["There is nothing to confirm."]);
    }

    #[tokio::test]
    async fn test_confirm_from_other_company_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(3)).await;
        whisper(&mut bot, ALICE, "!reset").await;

        place(&mut bot, ALICE, CompanyId(5)).await;
        let out = whisper(&mut bot, ALICE, "!confirm").await;
        assert!(reset_requests(&out).is_empty());
        assert!(whispers_to(&out, ALICE)[0].starts_with("Your reset request was for company"));

        // The pending entry is gone
        let again = whisper(&mut bot, ALICE, "!confirm").await;
        assert_eq!(whispers_to(&again, ALICE), vec!["There is nothing to confirm."]);
    }

    #[tokio::test]
    async fn test_reset_requires_company() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId::SPECTATOR).await;

        let out = whisper(&mut bot, ALICE, "!reset").await;
        assert_eq!(whispers_to(&out, ALICE), vec!["You are currently not in a company."]);
        assert_eq!(bot.confirmations.len(), 0);
    }

    #[tokio::test]
    async fn test_quit_cancels_pending_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(3)).await;
        whisper(&mut bot, ALICE, "!reset").await;

        bot.handle_event(AdminToBot::ClientQuit { client_id: ALICE }).await;
        assert_eq!(bot.confirmations.len(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_reset_clears_password_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        bot.settings.clear_password_on_reset = true;
        place(&mut bot, ALICE, CompanyId(3)).await;
        whisper(&mut bot, ALICE, "!pw hunter2").await;

        whisper(&mut bot, ALICE, "!reset").await;
        let out = whisper(&mut bot, ALICE, "!confirm").await;
        assert_eq!(reset_requests(&out), vec![CompanyId(3)]);
        assert_eq!(bot.store.get(CompanyId(3)), None);
    }

    #[tokio::test]
    async fn test_failed_handler_sends_only_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let store = PasswordStore::load(nested.join("state.json")).await.unwrap();
        let mut bot = Bot::new(crate::bot::tests::settings(), Templates::builtin(), store);
        bot.settings.clear_password_on_reset = true;
        place(&mut bot, ALICE, CompanyId(3)).await;
        whisper(&mut bot, ALICE, "!pw hunter2").await;

        // Replace the state directory with a file so the next save fails
        std::fs::remove_dir_all(&nested).unwrap();
        std::fs::write(&nested, "").unwrap();

        whisper(&mut bot, ALICE, "!reset").await;
        let out = whisper(&mut bot, ALICE, "!confirm").await;
        assert!(reset_requests(&out).is_empty());
        assert_eq!(whispers_to(&out, ALICE), vec!["Something went wrong. Please try again."]);
        assert_eq!(bot.store.get(CompanyId(3)), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_unknown_command_and_unknown_client() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId(0)).await;

        let out = whisper(&mut bot, ALICE, "!dance").await;
        assert_eq!(whispers_to(&out, ALICE), vec!["Unknown command. Try !help."]);

        let stranger = whisper(&mut bot, ClientId(99), "!help").await;
        assert!(stranger.is_empty());

        let chatter = whisper(&mut bot, ALICE, "just chatting").await;
        assert!(chatter.is_empty());
    }

    #[tokio::test]
    async fn test_help_lists_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        place(&mut bot, ALICE, CompanyId::SPECTATOR).await;

        let out = chat(&mut bot, ALICE, ChatDestination::Broadcast, "!HELP").await;
        let lines = whispers_to(&out, ALICE);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("!pw <password>"));
    }
}
