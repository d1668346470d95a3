use shared::{BotToAdmin, ClientId, CompanyId};

/// Requests produced while handling one event, sent in order by the
/// supervisor
#[derive(Debug, Default)]
pub struct Outbox {
    requests: Vec<BotToAdmin>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn whisper_lines(&mut self, client_id: ClientId, lines: Vec<String>) {
        self.requests
            .extend(lines.into_iter().map(|line| BotToAdmin::whisper(client_id, line)));
    }

    pub fn set_company_password(&mut self, company_id: CompanyId, password: &str) {
        self.requests.push(BotToAdmin::set_password(company_id, password));
    }

    pub fn reset_company(&mut self, company_id: CompanyId) {
        self.requests.push(BotToAdmin::ResetCompany { company_id });
    }

    pub fn append(&mut self, other: Outbox) {
        self.requests.extend(other.requests);
    }

    pub fn into_requests(self) -> Vec<BotToAdmin> {
        self.requests
    }
}
