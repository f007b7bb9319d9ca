//! `TransportChannel` actor.
//!
//! The channel owns the socket link and the reconnect timer. Callers interact
//! through a cloneable [`TransportHandle`]; every inbound frame is decoded in
//! arrival order and published to the dispatcher.
//!
//! # Reconnect
//!
//! - Only closures the caller did not request trigger reconnect.
//! - Attempt `n` is scheduled `base * 2^(n-1)` after the previous failure.
//! - After `max_attempts` failures the channel enters `Disconnected` and
//!   publishes `TransportFatal`; only an explicit `connect` revives it.
//! - A successful reconnect resets the counter and re-sends the join envelope.
//! - The initial `connect` is not retried; its failure is returned as-is.

use super::backoff::BackoffPolicy;
use super::socket::{SignalingConnector, SocketEvent, SocketLink};
use super::{EnvelopeSink, TransportState};
use crate::dispatcher::{DispatchEvent, EventDispatcher};
use crate::envelope::SignalingEnvelope;
use crate::errors::CoordinatorError;
use crate::observability::metrics;

use common::types::{ParticipantId, SessionId};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the transport mailbox.
const TRANSPORT_CHANNEL_BUFFER: usize = 256;

/// Messages accepted by the transport actor.
#[derive(Debug)]
enum TransportCommand {
    Connect {
        session_id: SessionId,
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Send {
        envelope: SignalingEnvelope,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a running `TransportChannel`.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    sender: mpsc::Sender<TransportCommand>,
    state_rx: watch::Receiver<TransportState>,
    cancel_token: CancellationToken,
}

impl TransportHandle {
    /// Open the channel for a session and send the join envelope.
    ///
    /// Fails with `ForbiddenAction` while a socket is already open, so every
    /// successful call sends exactly one join.
    pub async fn connect(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TransportCommand::Connect {
                session_id,
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Transmit an envelope. Fails with `NotConnected` unless connected.
    pub async fn send(&self, envelope: SignalingEnvelope) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TransportCommand::Send {
                envelope,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::NotConnected)?;

        rx.await.map_err(|_| CoordinatorError::NotConnected)?
    }

    /// Close the channel. Sends the leave envelope if the socket is open and
    /// cancels any pending reconnect.
    pub async fn disconnect(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TransportCommand::Disconnect { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        *self.state_rx.borrow()
    }

    /// Watch state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state_rx.clone()
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[async_trait::async_trait]
impl EnvelopeSink for TransportHandle {
    async fn send_envelope(&self, envelope: SignalingEnvelope) -> Result<(), CoordinatorError> {
        self.send(envelope).await
    }
}

/// Reconnect attempt waiting on its backoff timer.
struct PendingReconnect {
    attempt: u32,
    timer: Pin<Box<Sleep>>,
}

/// The `TransportChannel` actor.
pub struct TransportChannel {
    connector: Arc<dyn SignalingConnector>,
    dispatcher: Arc<EventDispatcher>,
    policy: BackoffPolicy,
    handshake_timeout: Duration,
    receiver: mpsc::Receiver<TransportCommand>,
    cancel_token: CancellationToken,
    state_tx: watch::Sender<TransportState>,
    /// Session/participant the channel is bound to.
    identity: Option<(SessionId, ParticipantId)>,
    link: Option<SocketLink>,
    reconnect: Option<PendingReconnect>,
}

impl TransportChannel {
    /// Spawn a transport channel actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connector: Arc<dyn SignalingConnector>,
        dispatcher: Arc<EventDispatcher>,
        policy: BackoffPolicy,
        handshake_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (TransportHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(TRANSPORT_CHANNEL_BUFFER);
        let (state_tx, state_rx) = watch::channel(TransportState::Idle);

        let actor = Self {
            connector,
            dispatcher,
            policy,
            handshake_timeout,
            receiver,
            cancel_token: cancel_token.clone(),
            state_tx,
            identity: None,
            link: None,
            reconnect: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = TransportHandle {
            sender,
            state_rx,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sc.transport")]
    async fn run(mut self) {
        debug!(target: "sc.transport", "TransportChannel started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "sc.transport", "TransportChannel received cancellation signal");
                    self.close_link();
                    break;
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!(target: "sc.transport", "All transport handles dropped");
                            self.close_link();
                            break;
                        }
                    }
                }

                event = next_socket_event(&mut self.link) => {
                    self.handle_socket_event(event);
                }

                attempt = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    self.attempt_reconnect(attempt).await;
                }
            }
        }

        debug!(target: "sc.transport", "TransportChannel stopped");
    }

    async fn handle_command(&mut self, command: TransportCommand) {
        match command {
            TransportCommand::Connect {
                session_id,
                participant_id,
                respond_to,
            } => {
                let result = self.handle_connect(session_id, participant_id).await;
                let _ = respond_to.send(result);
            }
            TransportCommand::Send {
                envelope,
                respond_to,
            } => {
                let result = self.handle_send(&envelope).await;
                let _ = respond_to.send(result);
            }
            TransportCommand::Disconnect { respond_to } => {
                self.close_link();
                let _ = respond_to.send(());
            }
        }
    }

    async fn handle_connect(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
    ) -> Result<(), CoordinatorError> {
        if let Some((bound_session, bound_participant)) = &self.identity {
            if self.link.is_some() {
                if *bound_session == session_id && *bound_participant == participant_id {
                    return Err(CoordinatorError::ForbiddenAction(
                        "Already connected to this session".to_string(),
                    ));
                }
                return Err(CoordinatorError::Internal(format!(
                    "transport already bound to session {bound_session}"
                )));
            }
        }

        self.reconnect = None;
        self.set_state(TransportState::Connecting);

        match self.open_link(&session_id, &participant_id).await {
            Ok(link) => {
                self.link = Some(link);
                info!(
                    target: "sc.transport",
                    session_id = %session_id,
                    participant_id = %participant_id,
                    "Transport connected"
                );
                self.identity = Some((session_id, participant_id));
                self.set_state(TransportState::Connected);
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "sc.transport",
                    session_id = %session_id,
                    error = %e,
                    "Initial connect failed"
                );
                self.identity = None;
                self.set_state(TransportState::Disconnected);
                Err(e)
            }
        }
    }

    async fn handle_send(&mut self, envelope: &SignalingEnvelope) -> Result<(), CoordinatorError> {
        if self.current_state() != TransportState::Connected {
            return Err(CoordinatorError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(CoordinatorError::NotConnected)?;
        let frame = envelope.encode()?;
        link.outbound
            .send(frame)
            .await
            .map_err(|_| CoordinatorError::NotConnected)
    }

    /// Connect and send the join envelope within the handshake timeout.
    async fn open_link(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<SocketLink, CoordinatorError> {
        let link = timeout(
            self.handshake_timeout,
            self.connector.connect(session_id, participant_id),
        )
        .await
        .map_err(|_| CoordinatorError::Connection("handshake timed out".to_string()))??;

        let join = SignalingEnvelope::join(session_id.clone(), participant_id.clone()).encode()?;
        link.outbound
            .send(join)
            .await
            .map_err(|_| CoordinatorError::Connection("closed during handshake".to_string()))?;

        Ok(link)
    }

    fn handle_socket_event(&mut self, event: Option<SocketEvent>) {
        match event {
            Some(SocketEvent::Frame(frame)) => match SignalingEnvelope::decode(&frame) {
                Ok(envelope) => {
                    metrics::record_envelope_received(envelope.kind);
                    self.dispatcher.publish(&DispatchEvent::Envelope(envelope));
                }
                Err(e) => {
                    warn!(target: "sc.transport", error = %e, "Dropping malformed frame");
                    metrics::record_envelope_malformed();
                }
            },
            Some(SocketEvent::Closed { reason }) => {
                warn!(
                    target: "sc.transport",
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Socket closed unexpectedly"
                );
                self.link = None;
                self.schedule_reconnect(1);
            }
            None => {
                warn!(target: "sc.transport", "Socket reader ended");
                self.link = None;
                self.schedule_reconnect(1);
            }
        }
    }

    fn schedule_reconnect(&mut self, attempt: u32) {
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                debug!(
                    target: "sc.transport",
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Scheduling reconnect"
                );
                self.reconnect = Some(PendingReconnect {
                    attempt,
                    timer: Box::pin(sleep(delay)),
                });
                self.set_state(TransportState::Reconnecting { attempt });
            }
            None => self.give_up(attempt.saturating_sub(1)),
        }
    }

    async fn attempt_reconnect(&mut self, attempt: u32) {
        metrics::record_reconnect_attempt();

        let Some((session_id, participant_id)) = self.identity.clone() else {
            self.set_state(TransportState::Idle);
            return;
        };

        match self.open_link(&session_id, &participant_id).await {
            Ok(link) => {
                self.link = Some(link);
                info!(
                    target: "sc.transport",
                    session_id = %session_id,
                    attempt,
                    "Transport reconnected"
                );
                self.set_state(TransportState::Connected);
            }
            Err(e) => {
                warn!(
                    target: "sc.transport",
                    session_id = %session_id,
                    attempt,
                    error = %e,
                    "Reconnect attempt failed"
                );
                if attempt >= self.policy.max_attempts() {
                    self.give_up(attempt);
                } else {
                    self.schedule_reconnect(attempt + 1);
                }
            }
        }
    }

    fn give_up(&mut self, attempts: u32) {
        error!(
            target: "sc.transport",
            attempts,
            "Reconnect attempts exhausted"
        );
        self.identity = None;
        self.set_state(TransportState::Disconnected);
        self.dispatcher
            .publish(&DispatchEvent::TransportFatal { attempts });
    }

    /// Caller-initiated close: at most one leave envelope, no reconnect.
    fn close_link(&mut self) {
        self.reconnect = None;

        if let Some(link) = self.link.take() {
            if let Some((session_id, participant_id)) = &self.identity {
                match SignalingEnvelope::leave(session_id.clone(), participant_id.clone()).encode()
                {
                    Ok(frame) => {
                        if link.outbound.try_send(frame).is_err() {
                            debug!(target: "sc.transport", "Leave envelope not sent, link closed");
                        }
                    }
                    Err(e) => {
                        warn!(target: "sc.transport", error = %e, "Failed to encode leave envelope");
                    }
                }
            }
        }

        self.identity = None;
        if self.current_state() != TransportState::Idle {
            info!(target: "sc.transport", "Transport disconnected");
        }
        self.set_state(TransportState::Idle);
    }

    fn current_state(&self) -> TransportState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: TransportState) {
        if self.current_state() == state {
            return;
        }
        self.state_tx.send_replace(state);
        metrics::set_transport_state(state.code());
        self.dispatcher
            .publish(&DispatchEvent::TransportState(state));
    }
}

/// Next event from the link; pends forever without one.
async fn next_socket_event(link: &mut Option<SocketLink>) -> Option<SocketEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves with the attempt number when the backoff timer fires.
async fn reconnect_due(pending: &mut Option<PendingReconnect>) -> u32 {
    match pending {
        Some(p) => {
            p.timer.as_mut().await;
            p.attempt
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dispatcher::Topic;
    use std::sync::Mutex;

    /// Connector that always refuses.
    struct RefusingConnector;

    #[async_trait::async_trait]
    impl SignalingConnector for RefusingConnector {
        async fn connect(
            &self,
            _session_id: &SessionId,
            _participant_id: &ParticipantId,
        ) -> Result<SocketLink, CoordinatorError> {
            Err(CoordinatorError::Connection("refused".to_string()))
        }
    }

    /// Connector that accepts and keeps the remote ends alive.
    #[derive(Default)]
    struct LoopbackConnector {
        remotes: Mutex<Vec<(mpsc::Receiver<String>, mpsc::Sender<SocketEvent>)>>,
    }

    #[async_trait::async_trait]
    impl SignalingConnector for LoopbackConnector {
        async fn connect(
            &self,
            _session_id: &SessionId,
            _participant_id: &ParticipantId,
        ) -> Result<SocketLink, CoordinatorError> {
            let (link, outbound_rx, inbound_tx) = SocketLink::pair();
            self.remotes.lock().unwrap().push((outbound_rx, inbound_tx));
            Ok(link)
        }
    }

    fn spawn_channel(
        connector: Arc<dyn SignalingConnector>,
    ) -> (TransportHandle, Arc<EventDispatcher>, JoinHandle<()>) {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (handle, task) = TransportChannel::spawn(
            connector,
            Arc::clone(&dispatcher),
            BackoffPolicy::new(Duration::from_millis(100), 3),
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        (handle, dispatcher, task)
    }

    #[tokio::test]
    async fn test_send_before_connect_is_not_connected() {
        let (handle, _dispatcher, _task) = spawn_channel(Arc::new(LoopbackConnector::default()));

        let result = handle
            .send(SignalingEnvelope::join(SessionId::from("s"), ParticipantId::from("p")))
            .await;
        assert_eq!(result, Err(CoordinatorError::NotConnected));
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_returned() {
        let (handle, _dispatcher, _task) = spawn_channel(Arc::new(RefusingConnector));

        let result = handle
            .connect(SessionId::from("s"), ParticipantId::from("p"))
            .await;
        assert!(matches!(result, Err(CoordinatorError::Connection(_))));
        assert_eq!(handle.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_publishes_state_transitions() {
        let (handle, dispatcher, _task) = spawn_channel(Arc::new(LoopbackConnector::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.subscribe(Topic::TransportState, move |event| {
            if let DispatchEvent::TransportState(state) = event {
                sink.lock().unwrap().push(*state);
            }
            Ok(())
        });

        handle
            .connect(SessionId::from("s"), ParticipantId::from("p"))
            .await
            .unwrap();
        handle.disconnect().await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                TransportState::Connecting,
                TransportState::Connected,
                TransportState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_send_after_cancel_is_not_connected() {
        let (handle, _dispatcher, task) =
            spawn_channel(Arc::new(LoopbackConnector::default()));
        handle
            .connect(SessionId::from("s"), ParticipantId::from("p"))
            .await
            .unwrap();

        handle.cancel();
        task.await.unwrap();

        let result = handle
            .send(SignalingEnvelope::join(SessionId::from("s"), ParticipantId::from("p")))
            .await;
        assert_eq!(result, Err(CoordinatorError::NotConnected));
    }
}
