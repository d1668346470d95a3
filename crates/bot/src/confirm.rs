use shared::{ClientId, CompanyId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Destructive actions that need a `!confirm`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ResetCompany,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub client_id: ClientId,
    pub company_id: CompanyId,
    pub action: ActionKind,
    pub created_at: Instant,
}

/// Pending confirmations, at most one per client. Expiry is checked lazily
/// when an entry is consumed.
#[derive(Debug)]
pub struct ConfirmationRegistry {
    pending: HashMap<ClientId, PendingConfirmation>,
    timeout: Duration,
}

impl ConfirmationRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a pending action, replacing any earlier one for this client
    pub fn request(&mut self, client_id: ClientId, company_id: CompanyId, action: ActionKind) {
        let pending = PendingConfirmation {
            client_id,
            company_id,
            action,
            created_at: Instant::now(),
        };
        if self.pending.insert(client_id, pending).is_some() {
            tracing::debug!(client = %client_id, "Replaced pending confirmation");
        }
    }

    /// Take the pending action for a client, if it has not expired
    pub fn consume(&mut self, client_id: ClientId) -> Option<PendingConfirmation> {
        let pending = self.pending.remove(&client_id)?;
        if pending.created_at.elapsed() > self.timeout {
            tracing::debug!(client = %pending.client_id, "Pending confirmation expired");
            return None;
        }
        Some(pending)
    }

    pub fn cancel(&mut self, client_id: ClientId) {
        self.pending.remove(&client_id);
    }

    /// Drop everything; client ids are meaningless after a disconnect
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
