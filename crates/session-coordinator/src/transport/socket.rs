//! Signaling socket abstraction.
//!
//! A connector yields a [`SocketLink`]: an outbound frame sender and an
//! inbound event receiver. Dropping the outbound sender closes the socket from
//! our side. The production [`WebSocketConnector`] bridges a
//! `tokio-tungstenite` stream to the link with a writer task and a reader task.

use crate::errors::CoordinatorError;
use common::types::{ParticipantId, SessionId};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Buffer size for frames in either direction.
const LINK_BUFFER: usize = 256;

/// Event read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One text frame.
    Frame(String),
    /// The socket closed without the caller asking for it.
    Closed { reason: Option<String> },
}

/// Channel pair bound to one live socket.
#[derive(Debug)]
pub struct SocketLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<SocketEvent>,
}

impl SocketLink {
    /// Create a link and return the remote halves (used by connectors and mocks).
    #[must_use]
    pub fn pair() -> (Self, mpsc::Receiver<String>, mpsc::Sender<SocketEvent>) {
        let (outbound, outbound_rx) = mpsc::channel(LINK_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel(LINK_BUFFER);
        (Self { outbound, inbound }, outbound_rx, inbound_tx)
    }
}

/// Opens signaling sockets.
#[async_trait::async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a socket for the given session/participant.
    async fn connect(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<SocketLink, CoordinatorError>;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    /// `base_url` must use `ws://` or `wss://`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, session_id: &SessionId, participant_id: &ParticipantId) -> String {
        format!(
            "{}/sessions/{}/signaling?participantId={}",
            self.base_url, session_id, participant_id
        )
    }

    async fn writer_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::Receiver<String>,
    ) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write.send(Message::Text(frame)).await {
                warn!(target: "sc.transport", error = %e, "WebSocket write failed");
                return;
            }
        }
        // Outbound sender dropped: caller-initiated close.
        let _ = write.send(Message::Close(None)).await;
        debug!(target: "sc.transport", "WebSocket writer terminated");
    }

    async fn reader_task(
        mut read: futures::stream::SplitStream<WsStream>,
        tx: mpsc::Sender<SocketEvent>,
    ) {
        let reason = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if tx.send(SocketEvent::Frame(text)).await.is_err() {
                        // Link dropped by the channel; nobody is listening.
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };
        let _ = tx.send(SocketEvent::Closed { reason }).await;
        debug!(target: "sc.transport", "WebSocket reader terminated");
    }
}

#[async_trait::async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<SocketLink, CoordinatorError> {
        let url = self.endpoint(session_id, participant_id);
        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            warn!(target: "sc.transport", error = %e, "WebSocket handshake failed");
            CoordinatorError::Connection(format!("WebSocket handshake failed: {e}"))
        })?;

        info!(
            target: "sc.transport",
            session_id = %session_id,
            "WebSocket connected"
        );

        let (write, read) = ws_stream.split();
        let (link, outbound_rx, inbound_tx) = SocketLink::pair();
        tokio::spawn(Self::writer_task(write, outbound_rx));
        tokio::spawn(Self::reader_task(read, inbound_tx));
        Ok(link)
    }
}
