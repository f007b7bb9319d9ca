//! Scripted signaling connector.
//!
//! Each `connect` consumes one scripted outcome (accept when the script is
//! empty) and records the instant of the attempt, measured on the tokio clock
//! so paused-time tests can assert backoff delays exactly. Accepted
//! connections are handed to the test as [`MockServerConnection`]s.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_test_utils::MockConnector;
//!
//! let connector = MockConnector::builder().accept().refuse(3).build();
//! // ... spawn the transport with `connector.clone()`
//! let mut server = connector.next_connection().await;
//! server.drop_connection("server restart").await;
//! ```

use common::types::{ParticipantId, SessionId};
use session_coordinator::envelope::SignalingEnvelope;
use session_coordinator::transport::{SignalingConnector, SocketEvent, SocketLink};
use session_coordinator::CoordinatorError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse,
    /// Never complete the handshake.
    Hang,
}

/// Scripted `SignalingConnector`.
#[derive(Debug)]
pub struct MockConnector {
    script: Mutex<VecDeque<ConnectOutcome>>,
    attempts: Mutex<Vec<Instant>>,
    connections_tx: mpsc::UnboundedSender<MockServerConnection>,
    connections_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MockServerConnection>>,
}

impl MockConnector {
    /// Create a new MockConnector builder.
    #[must_use]
    pub fn builder() -> MockConnectorBuilder {
        MockConnectorBuilder::default()
    }

    /// Connector accepting every attempt.
    #[must_use]
    pub fn accepting() -> Arc<Self> {
        Self::builder().build()
    }

    /// Append outcomes to the script.
    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Instants of every connect attempt.
    #[must_use]
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Gaps between consecutive attempts.
    #[must_use]
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        self.attempts()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    /// Wait for the next accepted connection.
    ///
    /// # Panics
    ///
    /// Panics if the connector is dropped while waiting.
    pub async fn next_connection(&self) -> MockServerConnection {
        self.connections_rx
            .lock()
            .await
            .recv()
            .await
            .expect("connector dropped")
    }
}

#[async_trait::async_trait]
impl SignalingConnector for MockConnector {
    async fn connect(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<SocketLink, CoordinatorError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);

        match outcome {
            ConnectOutcome::Refuse => Err(CoordinatorError::Connection(
                "connection refused".to_string(),
            )),
            ConnectOutcome::Hang => std::future::pending().await,
            ConnectOutcome::Accept => {
                let (link, outbound_rx, inbound_tx) = SocketLink::pair();
                let _ = self.connections_tx.send(MockServerConnection {
                    session_id: session_id.clone(),
                    participant_id: participant_id.clone(),
                    outbound_rx,
                    inbound_tx,
                });
                Ok(link)
            }
        }
    }
}

/// Builder for MockConnector configuration.
#[derive(Debug, Default)]
pub struct MockConnectorBuilder {
    script: VecDeque<ConnectOutcome>,
}

impl MockConnectorBuilder {
    #[must_use]
    pub fn accept(mut self) -> Self {
        self.script.push_back(ConnectOutcome::Accept);
        self
    }

    /// Refuse the next `n` attempts.
    #[must_use]
    pub fn refuse(mut self, n: usize) -> Self {
        self.script
            .extend(std::iter::repeat(ConnectOutcome::Refuse).take(n));
        self
    }

    #[must_use]
    pub fn hang(mut self) -> Self {
        self.script.push_back(ConnectOutcome::Hang);
        self
    }

    /// Build the MockConnector.
    #[must_use]
    pub fn build(self) -> Arc<MockConnector> {
        let (connections_tx, connections_rx) = mpsc::unbounded_channel();
        Arc::new(MockConnector {
            script: Mutex::new(self.script),
            attempts: Mutex::new(Vec::new()),
            connections_tx,
            connections_rx: tokio::sync::Mutex::new(connections_rx),
        })
    }
}

/// Server side of one accepted connection.
#[derive(Debug)]
pub struct MockServerConnection {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::Sender<SocketEvent>,
}

impl MockServerConnection {
    /// Next raw frame from the client; `None` once the client closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.outbound_rx.recv().await
    }

    /// Next frame decoded as an envelope.
    ///
    /// # Panics
    ///
    /// Panics if the client sent a frame that is not an envelope.
    pub async fn next_envelope(&mut self) -> Option<SignalingEnvelope> {
        let frame = self.next_frame().await?;
        Some(SignalingEnvelope::decode(&frame).expect("client sent a valid envelope"))
    }

    /// Frames already sent by the client, without waiting.
    pub fn drain_envelopes(&mut self) -> Vec<SignalingEnvelope> {
        let mut envelopes = Vec::new();
        while let Ok(frame) = self.outbound_rx.try_recv() {
            envelopes.push(SignalingEnvelope::decode(&frame).expect("client sent a valid envelope"));
        }
        envelopes
    }

    /// Deliver an envelope to the client.
    ///
    /// # Panics
    ///
    /// Panics if the client side is gone.
    pub async fn push(&self, envelope: &SignalingEnvelope) {
        self.push_raw(&envelope.encode().expect("envelope encodes"))
            .await;
    }

    /// Deliver a raw text frame to the client.
    ///
    /// # Panics
    ///
    /// Panics if the client side is gone.
    pub async fn push_raw(&self, frame: &str) {
        self.inbound_tx
            .send(SocketEvent::Frame(frame.to_string()))
            .await
            .expect("client link open");
    }

    /// Close the socket from the server side (abnormal closure).
    pub async fn drop_connection(self, reason: &str) {
        let _ = self
            .inbound_tx
            .send(SocketEvent::Closed {
                reason: Some(reason.to_string()),
            })
            .await;
    }
}
