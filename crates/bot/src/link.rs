//! Transport to the admin channel.
//!
//! The supervisor only sees the `Connector` and `AdminLink` traits. The
//! production implementation speaks JSON text frames over a WebSocket to
//! the server's admin bridge.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use shared::{AdminToBot, BotToAdmin};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::SessionError;

/// Opens admin links
#[async_trait]
pub trait Connector: Send {
    type Link: AdminLink;

    async fn connect(&mut self) -> Result<Self::Link, SessionError>;
}

/// One open admin session
#[async_trait]
pub trait AdminLink: Send {
    async fn send(&mut self, request: BotToAdmin) -> Result<(), SessionError>;

    /// Next event from the server; `None` once the link is closed
    async fn recv(&mut self) -> Option<Result<AdminToBot, SessionError>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Link = WsAdminLink;

    async fn connect(&mut self) -> Result<WsAdminLink, SessionError> {
        tracing::debug!(url = %self.url, "Opening admin link");
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (sender, receiver) = ws_stream.split();
        Ok(WsAdminLink { sender, receiver })
    }
}

pub struct WsAdminLink {
    sender: SplitSink<WsStream, Message>,
    receiver: SplitStream<WsStream>,
}

#[async_trait]
impl AdminLink for WsAdminLink {
    async fn send(&mut self, request: BotToAdmin) -> Result<(), SessionError> {
        let text =
            serde_json::to_string(&request).map_err(|e| SessionError::Protocol(e.to_string()))?;
        self.sender.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<AdminToBot, SessionError>> {
        loop {
            match self.receiver.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(
                        serde_json::from_str(&text)
                            .map_err(|e| SessionError::Protocol(format!("bad event: {}", e))),
                    );
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.sender.send(Message::Pong(data)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Admin link closed by server");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
