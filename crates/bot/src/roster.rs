//! Live view of clients and companies, rebuilt from the event stream on
//! every connection.

use shared::{ClientId, CompanyId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub name: String,
    /// `None` while spectating
    pub company: Option<CompanyId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyState {
    pub name: String,
}

/// Result of recording a client's company
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanyChange {
    pub previous: Option<CompanyId>,
    pub current: Option<CompanyId>,
}

impl CompanyChange {
    pub fn joined(&self) -> Option<CompanyId> {
        if self.previous != self.current {
            self.current
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub struct Roster {
    clients: HashMap<ClientId, ClientState>,
    companies: HashMap<CompanyId, CompanyState>,
    /// Clients already welcomed on this connection
    greeted: HashSet<ClientId>,
    /// Companies founded on this connection whose founder has not had the
    /// password hint yet
    unclaimed: HashSet<CompanyId>,
    /// Every company founded on this connection
    founded: HashSet<CompanyId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self, client_id: ClientId) -> Option<&ClientState> {
        self.clients.get(&client_id)
    }

    /// The company a client belongs to right now
    pub fn current_company(&self, client_id: ClientId) -> Option<CompanyId> {
        self.clients.get(&client_id).and_then(|c| c.company)
    }

    pub fn has_company(&self, company_id: CompanyId) -> bool {
        self.companies.contains_key(&company_id)
    }

    pub fn company_count(&self) -> usize {
        self.companies.len()
    }

    /// Name shown to players, falling back to the in-game numbering
    pub fn company_name(&self, company_id: CompanyId) -> String {
        match self.companies.get(&company_id) {
            Some(company) if !company.name.is_empty() => company.name.clone(),
            _ => format!("Company #{}", company_id.display_number()),
        }
    }

    /// Record a client's name and company; an empty name keeps the old one
    pub fn upsert_client(
        &mut self,
        client_id: ClientId,
        name: &str,
        company: CompanyId,
    ) -> CompanyChange {
        let current = company.membership();
        let entry = self.clients.entry(client_id).or_insert_with(|| ClientState {
            name: String::new(),
            company: None,
        });
        let previous = entry.company;
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        entry.company = current;
        CompanyChange { previous, current }
    }

    pub fn remove_client(&mut self, client_id: ClientId) -> Option<ClientState> {
        self.greeted.remove(&client_id);
        self.clients.remove(&client_id)
    }

    /// Returns true the first time it is called for a client
    pub fn mark_greeted(&mut self, client_id: ClientId) -> bool {
        self.greeted.insert(client_id)
    }

    pub fn upsert_company(&mut self, company_id: CompanyId, name: &str) {
        let entry = self.companies.entry(company_id).or_default();
        if !name.is_empty() {
            entry.name = name.to_string();
        }
    }

    /// True for companies founded after this connection was established
    pub fn founded_this_session(&self, company_id: CompanyId) -> bool {
        self.founded.contains(&company_id)
    }

    /// Register a newly founded company and return the clients already in
    /// it (the founder, if its update arrived first). An empty result leaves
    /// the company waiting for its founder.
    pub fn found_company(&mut self, company_id: CompanyId, name: &str) -> Vec<ClientId> {
        self.upsert_company(company_id, name);
        self.founded.insert(company_id);
        let members = self.members(company_id);
        if members.is_empty() {
            self.unclaimed.insert(company_id);
        }
        members
    }

    /// Claim a freshly founded company for the client that just joined it.
    /// Succeeds once per company.
    pub fn claim_founded(&mut self, company_id: CompanyId) -> bool {
        self.unclaimed.remove(&company_id)
    }

    pub fn remove_company(&mut self, company_id: CompanyId) {
        self.companies.remove(&company_id);
        self.unclaimed.remove(&company_id);
        self.founded.remove(&company_id);
    }

    pub fn members(&self, company_id: CompanyId) -> Vec<ClientId> {
        let mut members: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.company == Some(company_id))
            .map(|(id, _)| *id)
            .collect();
        members.sort();
        members
    }

    pub fn clear(&mut self) {
        self.clients.clear();
        self.companies.clear();
        self.greeted.clear();
        self.unclaimed.clear();
        self.founded.clear();
    }
}
