//! Connection lifecycle: connect, log in, run the session, reconnect.

use shared::{AdminToBot, BotToAdmin, UpdateFeed};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bot::Bot;
use crate::error::SessionError;
use crate::link::{AdminLink, Connector};

const VERSION: &str = env!("PWBOT_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionResult {
    /// Link lost or closed by the server (reconnect)
    Disconnected,
    /// Local shutdown requested (exit)
    Shutdown,
}

pub struct SupervisorSettings {
    pub bot_name: String,
    pub admin_password: String,
    pub reapply_delay: Duration,
    pub reconnect_delay: Duration,
    pub fail_fast_on_auth: bool,
}

pub struct SessionSupervisor<C: Connector> {
    connector: C,
    bot: Bot,
    settings: SupervisorSettings,
    state: ConnectionState,
    failed_attempts: u32,
    ever_connected: bool,
}

impl<C: Connector> SessionSupervisor<C> {
    pub fn new(connector: C, bot: Bot, settings: SupervisorSettings) -> Self {
        Self {
            connector,
            bot,
            settings,
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
            ever_connected: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Keep a session alive until shutdown. Only a rejected login before the
    /// first successful connection ends the loop with an error, and only
    /// when fail-fast is enabled.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), SessionError> {
        loop {
            match self.run_connection(&shutdown).await {
                Ok(ConnectionResult::Shutdown) => {
                    tracing::info!("Shutting down");
                    break;
                }
                Ok(ConnectionResult::Disconnected) => {
                    tracing::warn!(
                        "Connection lost. Reconnecting in {:?}...",
                        self.settings.reconnect_delay
                    );
                }
                Err(SessionError::Auth(reason))
                    if self.settings.fail_fast_on_auth && !self.ever_connected =>
                {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::error!(
                        reason = %reason,
                        "Admin login rejected, check the admin password"
                    );
                    return Err(SessionError::Auth(reason));
                }
                Err(e) => {
                    self.failed_attempts += 1;
                    tracing::error!(
                        attempt = self.failed_attempts,
                        "Connection error: {}. Reconnecting in {:?}...",
                        e,
                        self.settings.reconnect_delay
                    );
                }
            }

            self.set_state(ConnectionState::Disconnected);
            self.bot.reset_session();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn run_connection(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<ConnectionResult, SessionError> {
        self.set_state(ConnectionState::Connecting);
        let mut link = tokio::select! {
            _ = shutdown.cancelled() => return Ok(ConnectionResult::Shutdown),
            link = self.connector.connect() => link?,
        };

        self.set_state(ConnectionState::Authenticating);
        link.send(BotToAdmin::Login {
            bot_name: self.settings.bot_name.clone(),
            password: self.settings.admin_password.clone(),
            version: Some(VERSION.to_string()),
        })
        .await?;

        // Wait for the login response
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => return Ok(ConnectionResult::Shutdown),
                event = link.recv() => event,
            };
            match event {
                Some(Ok(event @ AdminToBot::Welcome { .. })) => {
                    self.bot.handle_event(event).await;
                    break;
                }
                Some(Ok(AdminToBot::LoginFailed { reason })) => {
                    return Err(SessionError::Auth(reason));
                }
                Some(Ok(AdminToBot::Protocol { version })) => {
                    tracing::debug!(version, "Admin protocol announced");
                }
                Some(Ok(AdminToBot::Shutdown)) => {
                    tracing::info!("Server shutting down during login");
                    return Ok(ConnectionResult::Disconnected);
                }
                Some(Ok(other)) => {
                    tracing::debug!(kind = other.kind(), "Ignoring event during login");
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(SessionError::Transport(
                        "connection closed during login".to_string(),
                    ));
                }
            }
        }

        self.set_state(ConnectionState::Connected);
        self.ever_connected = true;
        self.failed_attempts = 0;

        link.send(BotToAdmin::Subscribe {
            feeds: UpdateFeed::ALL.to_vec(),
        })
        .await?;
        for feed in [UpdateFeed::ClientInfo, UpdateFeed::CompanyInfo] {
            link.send(BotToAdmin::Poll { feed }).await?;
        }

        let reapply = tokio::time::sleep(self.settings.reapply_delay);
        tokio::pin!(reapply);
        let mut reapplied = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(ConnectionResult::Shutdown),
                _ = &mut reapply, if !reapplied => {
                    reapplied = true;
                    let requests = self.bot.reapply_passwords();
                    send_all(&mut link, requests).await?;
                }
                event = link.recv() => match event {
                    Some(Ok(AdminToBot::Shutdown)) => {
                        self.bot.handle_event(AdminToBot::Shutdown).await;
                        return Ok(ConnectionResult::Disconnected);
                    }
                    Some(Ok(event)) => {
                        let requests = self.bot.handle_event(event).await;
                        send_all(&mut link, requests).await?;
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(ConnectionResult::Disconnected),
                },
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "Connection state changed");
            self.state = state;
        }
    }
}

async fn send_all<L: AdminLink>(
    link: &mut L,
    requests: Vec<BotToAdmin>,
) -> Result<(), SessionError> {
    for request in requests {
        tracing::debug!(kind = request.kind(), "Sending request");
        link.send(request).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::tests::test_bot;
    use crate::link::fake::{pair, Attempt, FakeConnector, FakeLink, ServerEnd};
    use shared::{ClientId, CompanyId};

    fn settings(fail_fast_on_auth: bool) -> SupervisorSettings {
        SupervisorSettings {
            bot_name: "ServerBot".to_string(),
            admin_password: "admin".to_string(),
            reapply_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            fail_fast_on_auth,
        }
    }

    fn company_info(id: u8) -> AdminToBot {
        AdminToBot::CompanyInfo {
            company_id: CompanyId(id),
            name: String::new(),
            passworded: false,
        }
    }

    fn welcome(server: &ServerEnd, companies: &[u8]) {
        server.send(AdminToBot::Welcome {
            server_name: "Test Server".to_string(),
        });
        for id in companies {
            server.send(company_info(*id));
        }
    }

    fn supervise(link: FakeLink, bot: Bot, settings: SupervisorSettings) -> Supervisor {
        SessionSupervisor::new(FakeConnector::new([Attempt::Accept(link)]), bot, settings)
    }

    type Supervisor = SessionSupervisor<FakeConnector>;

    fn password_sets(requests: &[BotToAdmin]) -> Vec<BotToAdmin> {
        let mut sets: Vec<BotToAdmin> = requests
            .iter()
            .filter(|r| matches!(r, BotToAdmin::SetCompanyPassword { .. }))
            .cloned()
            .collect();
        sets.sort_by_key(|r| match r {
            BotToAdmin::SetCompanyPassword { company_id, .. } => company_id.0,
            _ => 0,
        });
        sets
    }

    #[tokio::test(start_paused = true)]
    async fn test_reapply_once_per_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        bot.store.set(CompanyId(3), "hunter2".to_string()).await.unwrap();
        bot.store.set(CompanyId(7), "abc".to_string()).await.unwrap();

        let (link1, mut server1) = pair();
        let (link2, mut server2) = pair();
        welcome(&server1, &[3, 7]);
        welcome(&server2, &[3, 7]);

        let connector = FakeConnector::new([Attempt::Accept(link1), Attempt::Accept(link2)]);
        let mut supervisor = SessionSupervisor::new(connector, bot, settings(true));
        let shutdown = CancellationToken::new();
        let expected = vec![
            BotToAdmin::set_password(CompanyId(3), "hunter2"),
            BotToAdmin::set_password(CompanyId(7), "abc"),
        ];

        let script = async {
            tokio::time::sleep(Duration::from_secs(4)).await;
            let early = server1.drain();
            assert!(matches!(early[0], BotToAdmin::Login { .. }));
            assert!(password_sets(&early).is_empty());

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(password_sets(&server1.drain()), expected);

            // Server restart
            drop(server1);
            tokio::time::sleep(Duration::from_secs(30)).await;
            assert_eq!(password_sets(&server2.drain()), expected);

            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_handshake_requests() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let (link, mut server) = pair();
        welcome(&server, &[]);

        let mut supervisor = supervise(link, bot, settings(true));
        let shutdown = CancellationToken::new();

        let script = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let requests = server.drain();
            match &requests[0] {
                BotToAdmin::Login { bot_name, password, .. } => {
                    assert_eq!(bot_name, "ServerBot");
                    assert_eq!(password, "admin");
                }
                other => panic!("expected login, got {:?}", other),
            }
            assert_eq!(
                requests[1],
                BotToAdmin::Subscribe {
                    feeds: UpdateFeed::ALL.to_vec()
                }
            );
            assert_eq!(
                requests[2],
                BotToAdmin::Poll {
                    feed: UpdateFeed::ClientInfo
                }
            );
            assert_eq!(
                requests[3],
                BotToAdmin::Poll {
                    feed: UpdateFeed::CompanyInfo
                }
            );
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_login_at_startup_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let (link, server) = pair();
        server.send(AdminToBot::LoginFailed {
            reason: "wrong password".to_string(),
        });

        let mut supervisor = supervise(link, bot, settings(true));
        let result = supervisor.run(CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::Auth(ref reason)) if reason == "wrong password"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_login_retries_when_not_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let (link, server) = pair();
        server.send(AdminToBot::LoginFailed {
            reason: "wrong password".to_string(),
        });

        let mut supervisor = supervise(link, bot, settings(false));
        let shutdown = CancellationToken::new();
        let script = async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
        // t=0 rejected, t=5 and t=10 refused
        assert_eq!(supervisor.connector.connects, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_login_after_connecting_once_retries() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let (link1, server1) = pair();
        let (link2, server2) = pair();
        welcome(&server1, &[]);
        // Close the event stream once the welcome is read
        drop(server1.events);
        server2.send(AdminToBot::LoginFailed {
            reason: "password changed".to_string(),
        });

        let connector = FakeConnector::new([Attempt::Accept(link1), Attempt::Accept(link2)]);
        let mut supervisor = SessionSupervisor::new(connector, bot, settings(true));
        let shutdown = CancellationToken::new();
        let script = async {
            tokio::time::sleep(Duration::from_secs(12)).await;
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
        assert_eq!(supervisor.connector.connects, 3);
        drop(server1.requests);
        drop(server2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_retry_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let connector = FakeConnector::new([Attempt::Refuse]);
        let mut supervisor = SessionSupervisor::new(connector, bot, settings(true));
        let shutdown = CancellationToken::new();
        let script = async {
            tokio::time::sleep(Duration::from_secs(26)).await;
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
        assert_eq!(supervisor.connector.connects, 6);
        assert_eq!(supervisor.failed_attempts, 6);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_events_before_welcome_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let (link, mut server) = pair();
        server.send(AdminToBot::ClientQuit {
            client_id: ClientId(1),
        });
        server.send(AdminToBot::Chat {
            client_id: ClientId(2),
            destination: shared::ChatDestination::Broadcast,
            text: "hello".to_string(),
        });
        welcome(&server, &[]);

        let mut supervisor = supervise(link, bot, settings(true));
        let shutdown = CancellationToken::new();
        let script = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let requests = server.drain();
            assert!(requests
                .iter()
                .any(|r| matches!(r, BotToAdmin::Subscribe { .. })));
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
        assert_eq!(supervisor.failed_attempts, 0);
        assert_eq!(supervisor.connector.connects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_applies_when_snapshot_arrives() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        bot.store.set(CompanyId(3), "hunter2".to_string()).await.unwrap();
        let (link, mut server) = pair();
        welcome(&server, &[]);

        let mut config = settings(true);
        config.reapply_delay = Duration::ZERO;
        let mut supervisor = supervise(link, bot, config);
        let shutdown = CancellationToken::new();

        let script = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.send(company_info(3));
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(
                password_sets(&server.drain()),
                vec![BotToAdmin::set_password(CompanyId(3), "hunter2")]
            );

            // Later updates for the same company do not set it again
            server.send(company_info(3));
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(password_sets(&server.drain()).is_empty());
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_after_delay_still_applies() {
        let dir = tempfile::tempdir().unwrap();
        let mut bot = test_bot(&dir).await;
        bot.store.set(CompanyId(3), "hunter2".to_string()).await.unwrap();
        bot.store.set(CompanyId(7), "abc".to_string()).await.unwrap();
        let (link, mut server) = pair();
        welcome(&server, &[]);

        let mut supervisor = supervise(link, bot, settings(true));
        let shutdown = CancellationToken::new();

        let script = async {
            tokio::time::sleep(Duration::from_secs(6)).await;
            assert!(password_sets(&server.drain()).is_empty());

            server.send(company_info(7));
            server.send(company_info(3));
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(
                password_sets(&server.drain()),
                vec![
                    BotToAdmin::set_password(CompanyId(3), "hunter2"),
                    BotToAdmin::set_password(CompanyId(7), "abc"),
                ]
            );
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_while_connected_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let bot = test_bot(&dir).await;
        let (link1, server1) = pair();
        let (link2, mut server2) = pair();
        welcome(&server1, &[]);

        let connector = FakeConnector::new([Attempt::Accept(link1), Attempt::Accept(link2)]);
        let mut supervisor = SessionSupervisor::new(connector, bot, settings(true));
        let shutdown = CancellationToken::new();

        let script = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            server1.fail(SessionError::Transport("connection reset".to_string()));

            // Reconnect happens reconnect_delay after the error
            tokio::time::sleep(Duration::from_millis(4500)).await;
            assert!(server2.drain().is_empty());
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(matches!(
                server2.drain().first(),
                Some(BotToAdmin::Login { .. })
            ));
            shutdown.cancel();
        };

        let (result, ()) = tokio::join!(supervisor.run(shutdown.clone()), script);
        assert!(result.is_ok());
        assert_eq!(supervisor.connector.connects, 2);
        // The second link never sent a welcome, so the count was not reset
        assert_eq!(supervisor.failed_attempts, 1);
    }
}
