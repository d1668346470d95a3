use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Company slot on the game server. Reused after a company is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub u8);

impl CompanyId {
    /// Pseudo-company the server reports for spectators
    pub const SPECTATOR: CompanyId = CompanyId(255);

    pub fn is_spectator(self) -> bool {
        self == Self::SPECTATOR
    }

    /// `None` for spectators, the company otherwise
    pub fn membership(self) -> Option<CompanyId> {
        if self.is_spectator() {
            None
        } else {
            Some(self)
        }
    }

    /// Number shown to players in game (companies count from 1)
    pub fn display_number(self) -> u16 {
        u16::from(self.0) + 1
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connected player session. Invalid once the player disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Bot <-> Admin bridge Messages
// ============================================================================

/// Messages sent from the bot to the admin bridge
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotToAdmin {
    /// Authenticate on the admin channel
    Login {
        bot_name: String,
        password: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },

    /// Ask for automatic updates on the given feeds
    Subscribe { feeds: Vec<UpdateFeed> },

    /// Request a full snapshot of a feed
    Poll { feed: UpdateFeed },

    /// Chat message from the bot
    Chat {
        destination: ChatDestination,
        text: String,
    },

    /// Set (or clear, with an empty string) a company password
    SetCompanyPassword { company_id: CompanyId, password: String },

    /// Reset a company, removing it from the game
    ResetCompany { company_id: CompanyId },
}

/// Messages sent from the admin bridge to the bot
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminToBot {
    /// First packet after connecting, before login completes
    Protocol { version: u8 },

    /// Login accepted
    Welcome {
        #[serde(default)]
        server_name: String,
    },

    /// Login rejected (usually a wrong admin password)
    LoginFailed { reason: String },

    /// A player connected to the game
    ClientJoined {
        client_id: ClientId,
        #[serde(default)]
        name: String,
        #[serde(default = "spectator")]
        company_id: CompanyId,
    },

    /// Snapshot entry for an already connected player (answer to a poll)
    ClientInfo {
        client_id: ClientId,
        #[serde(default)]
        name: String,
        #[serde(default = "spectator")]
        company_id: CompanyId,
    },

    /// A player changed name or company
    ClientUpdated {
        client_id: ClientId,
        #[serde(default)]
        name: String,
        company_id: CompanyId,
    },

    /// A player disconnected
    ClientQuit { client_id: ClientId },

    /// A new company was started
    CompanyFounded {
        company_id: CompanyId,
        #[serde(default)]
        name: String,
    },

    /// Snapshot or update of company details
    CompanyInfo {
        company_id: CompanyId,
        #[serde(default)]
        name: String,
        #[serde(default)]
        passworded: bool,
    },

    /// A company was closed, merged or reset
    CompanyRemoved { company_id: CompanyId },

    /// Chat line seen on the server
    Chat {
        client_id: ClientId,
        destination: ChatDestination,
        text: String,
    },

    /// A request from the bot could not be carried out
    RequestFailed {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        company_id: Option<CompanyId>,
    },

    /// The game server is shutting down
    Shutdown,
}

fn spectator() -> CompanyId {
    CompanyId::SPECTATOR
}

// ============================================================================
// Shared Types
// ============================================================================

/// Who a chat message is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChatDestination {
    /// Public chat, visible to everyone
    Broadcast,
    /// Team chat inside one company
    Company(CompanyId),
    /// Whisper to a single client
    Client(ClientId),
}

impl ChatDestination {
    /// Only whispers are private; team chat is seen by every company member
    pub fn is_private(self) -> bool {
        matches!(self, Self::Client(_))
    }
}

/// Update feeds the bot subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFeed {
    Chat,
    ClientInfo,
    CompanyInfo,
}

impl UpdateFeed {
    pub const ALL: [UpdateFeed; 3] = [Self::Chat, Self::ClientInfo, Self::CompanyInfo];
}

// ============================================================================
// Helper implementations
// ============================================================================

impl BotToAdmin {
    pub fn whisper(client_id: ClientId, text: impl Into<String>) -> Self {
        Self::Chat {
            destination: ChatDestination::Client(client_id),
            text: text.into(),
        }
    }

    pub fn set_password(company_id: CompanyId, password: impl Into<String>) -> Self {
        Self::SetCompanyPassword {
            company_id,
            password: password.into(),
        }
    }

    /// Short name for logging; never includes message content
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Subscribe { .. } => "subscribe",
            Self::Poll { .. } => "poll",
            Self::Chat { .. } => "chat",
            Self::SetCompanyPassword { .. } => "set_company_password",
            Self::ResetCompany { .. } => "reset_company",
        }
    }
}

impl AdminToBot {
    /// Short name for logging; never includes message content
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => "protocol",
            Self::Welcome { .. } => "welcome",
            Self::LoginFailed { .. } => "login_failed",
            Self::ClientJoined { .. } => "client_joined",
            Self::ClientInfo { .. } => "client_info",
            Self::ClientUpdated { .. } => "client_updated",
            Self::ClientQuit { .. } => "client_quit",
            Self::CompanyFounded { .. } => "company_founded",
            Self::CompanyInfo { .. } => "company_info",
            Self::CompanyRemoved { .. } => "company_removed",
            Self::Chat { .. } => "chat",
            Self::RequestFailed { .. } => "request_failed",
            Self::Shutdown => "shutdown",
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::ClientJoined { .. } => "ClientJoined",
            Self::ClientInfo { .. } => "ClientInfo",
            Self::ClientUpdated { .. } => "ClientUpdated",
            _ => "AdminToBot",
        }
    }
}

// Passwords are redacted so a stray `{:?}` cannot leak them into logs.
impl fmt::Debug for BotToAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login {
                bot_name, version, ..
            } => f
                .debug_struct("Login")
                .field("bot_name", bot_name)
                .field("password", &"****")
                .field("version", version)
                .finish(),
            Self::Subscribe { feeds } => f.debug_struct("Subscribe").field("feeds", feeds).finish(),
            Self::Poll { feed } => f.debug_struct("Poll").field("feed", feed).finish(),
            Self::Chat { destination, text } => f
                .debug_struct("Chat")
                .field("destination", destination)
                .field("text", text)
                .finish(),
            Self::SetCompanyPassword { company_id, password } => f
                .debug_struct("SetCompanyPassword")
                .field("company_id", company_id)
                .field("password", if password.is_empty() { &"" } else { &"****" })
                .finish(),
            Self::ResetCompany { company_id } => f
                .debug_struct("ResetCompany")
                .field("company_id", company_id)
                .finish(),
        }
    }
}

// Player chat may carry a `!pw` argument, so only its length is shown.
impl fmt::Debug for AdminToBot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol { version } => {
                f.debug_struct("Protocol").field("version", version).finish()
            }
            Self::Welcome { server_name } => f
                .debug_struct("Welcome")
                .field("server_name", server_name)
                .finish(),
            Self::LoginFailed { reason } => {
                f.debug_struct("LoginFailed").field("reason", reason).finish()
            }
            Self::ClientJoined {
                client_id,
                name,
                company_id,
            }
            | Self::ClientInfo {
                client_id,
                name,
                company_id,
            }
            | Self::ClientUpdated {
                client_id,
                name,
                company_id,
            } => f
                .debug_struct(self.variant_name())
                .field("client_id", client_id)
                .field("name", name)
                .field("company_id", company_id)
                .finish(),
            Self::ClientQuit { client_id } => f
                .debug_struct("ClientQuit")
                .field("client_id", client_id)
                .finish(),
            Self::CompanyFounded { company_id, name } => f
                .debug_struct("CompanyFounded")
                .field("company_id", company_id)
                .field("name", name)
                .finish(),
            Self::CompanyInfo {
                company_id,
                name,
                passworded,
            } => f
                .debug_struct("CompanyInfo")
                .field("company_id", company_id)
                .field("name", name)
                .field("passworded", passworded)
                .finish(),
            Self::CompanyRemoved { company_id } => f
                .debug_struct("CompanyRemoved")
                .field("company_id", company_id)
                .finish(),
            Self::Chat {
                client_id,
                destination,
                text,
            } => f
                .debug_struct("Chat")
                .field("client_id", client_id)
                .field("destination", destination)
                .field("text_len", &text.len())
                .finish(),
            Self::RequestFailed { reason, company_id } => f
                .debug_struct("RequestFailed")
                .field("reason", reason)
                .field("company_id", company_id)
                .finish(),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
