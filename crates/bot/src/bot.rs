//! Event handling for one bot instance.
//!
//! `Bot` owns every piece of mutable state the commands touch: the password
//! store, pending confirmations and the live roster. The supervisor feeds it
//! events one at a time and sends whatever requests it returns, so nothing
//! here needs locking.

use shared::{AdminToBot, BotToAdmin, ChatDestination, ClientId, CompanyId};
use std::collections::HashSet;
use std::time::Duration;

use crate::confirm::ConfirmationRegistry;
use crate::outbox::Outbox;
use crate::roster::Roster;
use crate::router::{self, Sender};
use crate::store::PasswordStore;
use crate::templates::{MessageKey, Templates};

#[derive(Debug, Clone)]
pub struct BotSettings {
    pub bot_name: String,
    pub command_prefix: String,
    pub confirm_timeout: Duration,
    pub clear_password_on_reset: bool,
}

pub struct Bot {
    pub(crate) settings: BotSettings,
    pub(crate) templates: Templates,
    pub(crate) store: PasswordStore,
    pub(crate) confirmations: ConfirmationRegistry,
    pub(crate) roster: Roster,
    server_name: String,
    /// Set once the startup delay has passed on this connection
    reapply_armed: bool,
    /// Companies that got their stored password on this connection
    reapplied: HashSet<CompanyId>,
}

impl Bot {
    pub fn new(settings: BotSettings, templates: Templates, store: PasswordStore) -> Self {
        let confirmations = ConfirmationRegistry::new(settings.confirm_timeout);
        Self {
            settings,
            templates,
            store,
            confirmations,
            roster: Roster::new(),
            server_name: String::new(),
            reapply_armed: false,
            reapplied: HashSet::new(),
        }
    }

    /// Process one event from the admin channel
    pub async fn handle_event(&mut self, event: AdminToBot) -> Vec<BotToAdmin> {
        let mut out = Outbox::new();

        match event {
            AdminToBot::Protocol { version } => {
                tracing::debug!(version, "Admin protocol announced");
            }
            AdminToBot::Welcome { server_name } => {
                tracing::info!(server = %server_name, "Connected to server");
                self.server_name = server_name;
            }
            AdminToBot::LoginFailed { reason } => {
                tracing::warn!(reason = %reason, "Unexpected login failure notice");
            }
            AdminToBot::ClientJoined {
                client_id,
                name,
                company_id,
            } => {
                tracing::info!(client = %client_id, name = %name, "Client joined");
                self.roster.upsert_client(client_id, &name, company_id);
                if self.roster.mark_greeted(client_id) {
                    self.say(&mut out, client_id, MessageKey::Welcome, None);
                }
            }
            AdminToBot::ClientInfo {
                client_id,
                name,
                company_id,
            } => {
                self.roster.upsert_client(client_id, &name, company_id);
            }
            AdminToBot::ClientUpdated {
                client_id,
                name,
                company_id,
            } => {
                let change = self.roster.upsert_client(client_id, &name, company_id);
                if let Some(company) = change.joined() {
                    tracing::info!(
                        client = %client_id,
                        company = company.display_number(),
                        "Client joined company"
                    );
                    if self.roster.claim_founded(company) {
                        self.say(
                            &mut out,
                            client_id,
                            MessageKey::PasswordInstructions,
                            Some(company),
                        );
                    }
                }
            }
            AdminToBot::ClientQuit { client_id } => {
                tracing::info!(client = %client_id, "Client left");
                self.roster.remove_client(client_id);
                self.confirmations.cancel(client_id);
            }
            AdminToBot::CompanyFounded { company_id, name } => {
                tracing::info!(
                    company = company_id.display_number(),
                    name = %name,
                    "Company founded"
                );
                for founder in self.roster.found_company(company_id, &name) {
                    self.say(&mut out, founder, MessageKey::PasswordInstructions, Some(company_id));
                }
            }
            AdminToBot::CompanyInfo { company_id, name, .. } => {
                self.roster.upsert_company(company_id, &name);
                if self.reapply_armed && self.wants_reapply(company_id) {
                    if let Some(password) = self.store.get(company_id).map(str::to_string) {
                        tracing::info!(
                            company = company_id.display_number(),
                            "Company reported after reapply, re-applying stored password"
                        );
                        self.apply_stored(&mut out, company_id, &password);
                    }
                }
            }
            AdminToBot::CompanyRemoved { company_id } => {
                tracing::info!(company = company_id.display_number(), "Company removed");
                self.roster.remove_company(company_id);
                if self.settings.clear_password_on_reset {
                    self.forget_password(company_id).await;
                }
            }
            AdminToBot::Chat {
                client_id,
                destination,
                text,
            } => {
                self.on_chat(client_id, destination, &text, &mut out).await;
            }
            AdminToBot::RequestFailed { reason, company_id } => match company_id {
                Some(company) => tracing::warn!(
                    company = company.display_number(),
                    reason = %reason,
                    "Server rejected request"
                ),
                None => tracing::warn!(reason = %reason, "Server rejected request"),
            },
            AdminToBot::Shutdown => {
                tracing::info!("Server shutting down");
            }
        }

        out.into_requests()
    }

    async fn on_chat(
        &mut self,
        client_id: ClientId,
        destination: ChatDestination,
        text: &str,
        out: &mut Outbox,
    ) {
        let Some(parsed) = router::parse(&self.settings.command_prefix, text) else {
            return;
        };

        if self.roster.client(client_id).is_none() {
            tracing::debug!(client = %client_id, "Ignoring command from unknown client");
            return;
        }

        let sender = Sender {
            client_id,
            company: self.roster.current_company(client_id),
            visibility: destination.into(),
        };
        tracing::debug!(
            client = %client_id,
            command = parsed.command.name(),
            visibility = ?sender.visibility,
            "Dispatching command"
        );
        self.dispatch(sender, parsed, out).await;
    }

    /// Push every stored password to a company that is already known.
    /// Companies reported later on this connection get theirs when their
    /// info arrives, so each company receives it once per connection.
    pub fn reapply_passwords(&mut self) -> Vec<BotToAdmin> {
        let mut out = Outbox::new();
        self.reapply_armed = true;

        let stored: Vec<(CompanyId, String)> = self
            .store
            .iter()
            .map(|(company_id, password)| (company_id, password.to_string()))
            .collect();
        for (company_id, password) in &stored {
            if !self.wants_reapply(*company_id) {
                continue;
            }
            if !self.roster.has_company(*company_id) {
                tracing::info!(
                    company = company_id.display_number(),
                    "Company not reported yet, waiting for its info"
                );
                continue;
            }
            tracing::info!(company = company_id.display_number(), "Re-applying stored password");
            self.apply_stored(&mut out, *company_id, password);
        }

        tracing::info!(
            applied = self.reapplied.len(),
            stored = stored.len(),
            companies = self.roster.company_count(),
            "Password reapply finished"
        );
        out.into_requests()
    }

    /// Stored passwords are not pushed to companies founded on this
    /// connection; a reused id must not inherit an old password.
    fn wants_reapply(&self, company_id: CompanyId) -> bool {
        !self.reapplied.contains(&company_id) && !self.roster.founded_this_session(company_id)
    }

    /// The live company already has the stored password, so reapply skips it
    /// for the rest of this connection
    pub(crate) fn mark_password_current(&mut self, company_id: CompanyId) {
        self.reapplied.insert(company_id);
    }

    fn apply_stored(&mut self, out: &mut Outbox, company_id: CompanyId, password: &str) {
        out.set_company_password(company_id, password);
        self.reapplied.insert(company_id);
        for member in self.roster.members(company_id) {
            self.say(out, member, MessageKey::PasswordReapplied, Some(company_id));
        }
    }

    /// Drop per-connection state after a disconnect
    pub fn reset_session(&mut self) {
        let pending = self.confirmations.len();
        self.roster.clear();
        self.confirmations.clear();
        self.reapply_armed = false;
        self.reapplied.clear();
        if pending > 0 {
            tracing::debug!(pending, "Dropped pending confirmations");
        }
    }

    pub(crate) async fn forget_password(&mut self, company_id: CompanyId) {
        match self.store.clear(company_id).await {
            Ok(true) => {
                tracing::info!(company = company_id.display_number(), "Forgot stored password")
            }
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "Failed to forget stored password"),
        }
    }

    /// Whisper a message to a client with the usual placeholders filled in
    pub(crate) fn say(
        &self,
        out: &mut Outbox,
        client_id: ClientId,
        key: MessageKey,
        company: Option<CompanyId>,
    ) {
        let client_name = self
            .roster
            .client(client_id)
            .map(|c| c.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Player {}", client_id));
        let company_name = company
            .map(|c| self.roster.company_name(c))
            .unwrap_or_else(|| "your company".to_string());
        let server_name = if self.server_name.is_empty() {
            "this server"
        } else {
            self.server_name.as_str()
        };
        let confirm_seconds = self.confirmations.timeout().as_secs().to_string();

        let vars = [
            ("client_name", client_name.as_str()),
            ("company_name", company_name.as_str()),
            ("bot_name", self.settings.bot_name.as_str()),
            ("server_name", server_name),
            ("prefix", self.settings.command_prefix.as_str()),
            ("confirm_seconds", confirm_seconds.as_str()),
        ];
        out.whisper_lines(client_id, self.templates.lines(key, &vars));
    }
}
