//! `SessionControl` actor.
//!
//! Single writer of the session snapshot. Every moderator action goes through
//! [`SessionControlHandle::apply`]:
//!
//! 1. local precondition check ([`rules::admit`]); a failure never reaches
//!    the backend
//! 2. submission to the backend, bounded by the request timeout
//! 3. on acknowledgment, the action is logged and applied to a copy of the
//!    snapshot which then replaces the published one
//!
//! A refused or timed-out submission fails with `ActionRejected` and leaves
//! the published snapshot untouched.
//! Actions are processed one at a time in mailbox order.
//!
//! Authoritative server notifications (join, leave, participant updates,
//! chat) arrive through [`SessionControlHandle::notify`] and are applied
//! without submission. Nothing is applied after the session ended.

use super::actions::{ActionOutcome, ActionSubmission, Actor, ControlAction, SessionAction};
use super::model::{ChatMessage, Participant, ParticipantStatus, Role, Session};
use super::rules::{self, Admission};
use crate::backend::BackendAuthority;
use crate::dispatcher::{DispatchEvent, EventDispatcher};
use crate::envelope::ParticipantUpdate;
use crate::errors::CoordinatorError;
use crate::observability::metrics;

use common::types::{ParticipantId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the control mailbox.
const CONTROL_CHANNEL_BUFFER: usize = 64;

/// Server-originated change applied without backend submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlNotification {
    Joined {
        participant_id: ParticipantId,
        display_name: Option<String>,
        role: Option<Role>,
    },
    Left {
        participant_id: ParticipantId,
    },
    ParticipantUpdated(ParticipantUpdate),
    Chat(ChatMessage),
    /// Local transport lost or regained its connection.
    LocalConnection {
        connected: bool,
    },
}

#[derive(Debug)]
enum ControlCommand {
    Apply {
        actor: Actor,
        action: ControlAction,
        reason: Option<String>,
        respond_to: oneshot::Sender<Result<ActionOutcome, CoordinatorError>>,
    },
    ActionLog {
        respond_to: oneshot::Sender<Vec<SessionAction>>,
    },
}

/// Handle to a `SessionControl` actor.
#[derive(Clone, Debug)]
pub struct SessionControlHandle {
    sender: mpsc::Sender<ControlCommand>,
    notify_tx: mpsc::UnboundedSender<ControlNotification>,
    session_rx: watch::Receiver<Arc<Session>>,
    end_token: CancellationToken,
    cancel_token: CancellationToken,
}

impl SessionControlHandle {
    /// Gate, submit and apply a moderator action.
    pub async fn apply(
        &self,
        actor: Actor,
        action: ControlAction,
        reason: Option<String>,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::Apply {
                actor,
                action,
                reason,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Queue a server notification. Returns `false` once the actor is gone.
    pub fn notify(&self, notification: ControlNotification) -> bool {
        self.notify_tx.send(notification).is_ok()
    }

    /// Acknowledged actions ordered by timestamp.
    pub async fn action_log(&self) -> Result<Vec<SessionAction>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ControlCommand::ActionLog { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Session> {
        Arc::clone(&self.session_rx.borrow())
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<Session>> {
        self.session_rx.clone()
    }

    /// Cancelled once the session has ended.
    #[must_use]
    pub fn end_token(&self) -> CancellationToken {
        self.end_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `SessionControl` actor.
pub struct SessionControl {
    session_id: SessionId,
    local_participant: ParticipantId,
    backend: Arc<dyn BackendAuthority>,
    dispatcher: Arc<EventDispatcher>,
    request_timeout: Duration,
    receiver: mpsc::Receiver<ControlCommand>,
    notify_rx: mpsc::UnboundedReceiver<ControlNotification>,
    cancel_token: CancellationToken,
    end_token: CancellationToken,
    session_tx: watch::Sender<Arc<Session>>,
    action_log: Vec<SessionAction>,
    /// Local status before the transport dropped, restored on reconnect.
    status_before_loss: Option<ParticipantStatus>,
}

impl SessionControl {
    /// Spawn a control actor over an initial snapshot.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session: Session,
        local_participant: ParticipantId,
        backend: Arc<dyn BackendAuthority>,
        dispatcher: Arc<EventDispatcher>,
        request_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (SessionControlHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONTROL_CHANNEL_BUFFER);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let end_token = CancellationToken::new();
        if session.is_ended() {
            end_token.cancel();
        }
        let session_id = session.id.clone();
        let (session_tx, session_rx) = watch::channel(Arc::new(session));

        let actor = Self {
            session_id,
            local_participant,
            backend,
            dispatcher,
            request_timeout,
            receiver,
            notify_rx,
            cancel_token: cancel_token.clone(),
            end_token: end_token.clone(),
            session_tx,
            action_log: Vec::new(),
            status_before_loss: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionControlHandle {
            sender,
            notify_tx,
            session_rx,
            end_token,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "sc.control",
        fields(session_id = %self.session_id, participant_id = %self.local_participant)
    )]
    async fn run(mut self) {
        debug!(target: "sc.control", "SessionControl started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(ControlCommand::Apply { actor, action, reason, respond_to }) => {
                            let result = self.handle_apply(actor, action, reason).await;
                            let _ = respond_to.send(result);
                        }
                        Some(ControlCommand::ActionLog { respond_to }) => {
                            let _ = respond_to.send(self.action_log.clone());
                        }
                        None => break,
                    }
                }

                Some(notification) = self.notify_rx.recv() => {
                    self.handle_notification(notification);
                }
            }
        }

        debug!(target: "sc.control", "SessionControl stopped");
    }

    async fn handle_apply(
        &mut self,
        actor: Actor,
        action: ControlAction,
        reason: Option<String>,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let kind = action.kind();
        let current = self.snapshot();

        match rules::admit(&current, &actor, &action) {
            Ok(Admission::Submit) => {}
            Ok(Admission::NoOp) => {
                debug!(target: "sc.control", action = kind.as_str(), "Action already satisfied");
                metrics::record_action(kind.as_str(), "noop");
                return Ok(ActionOutcome::NoOp);
            }
            Err(e) => {
                debug!(target: "sc.control", action = kind.as_str(), error = %e, "Action refused locally");
                metrics::record_action(kind.as_str(), "forbidden");
                return Err(e);
            }
        }

        let submission = ActionSubmission::from_action(&action, reason);
        let submitted = tokio::select! {
            () = self.cancel_token.cancelled() => {
                return Err(CoordinatorError::Internal("session control cancelled".to_string()));
            }
            result = timeout(
                self.request_timeout,
                self.backend.submit_action(&self.session_id, &submission),
            ) => result,
        };

        let logged = match submitted {
            Ok(Ok(logged)) => logged,
            Ok(Err(e)) => {
                warn!(
                    target: "sc.control",
                    action = kind.as_str(),
                    error = %e,
                    "Backend rejected action"
                );
                metrics::record_action(kind.as_str(), "rejected");
                return Err(CoordinatorError::ActionRejected { reason: e.reason() });
            }
            Err(_) => {
                warn!(target: "sc.control", action = kind.as_str(), "Action submission timed out");
                metrics::record_action(kind.as_str(), "timeout");
                return Err(CoordinatorError::ActionRejected {
                    reason: "request timed out".to_string(),
                });
            }
        };

        let mut next = Session::clone(&current);
        rules::apply_action(&mut next, &action);
        let ended = next.is_ended();

        let position = self
            .action_log
            .partition_point(|a| a.timestamp <= logged.timestamp);
        self.action_log.insert(position, logged.clone());
        self.replace(next);
        metrics::record_action(kind.as_str(), "applied");

        info!(
            target: "sc.control",
            action = kind.as_str(),
            action_id = %logged.id,
            target_id = ?action.target().map(ParticipantId::as_str),
            "Action applied"
        );

        if ended {
            info!(target: "sc.control", "Session ended");
            self.end_token.cancel();
        }

        Ok(ActionOutcome::Applied(logged))
    }

    fn handle_notification(&mut self, notification: ControlNotification) {
        let current = self.snapshot();
        if current.is_ended() {
            debug!(target: "sc.control", ?notification, "Notification ignored after end");
            return;
        }

        let mut next = Session::clone(&current);
        let changed = match notification {
            ControlNotification::Joined {
                participant_id,
                display_name,
                role,
            } => apply_join(&mut next, participant_id, display_name, role),
            ControlNotification::Left { participant_id } => {
                match next.participant_mut(&participant_id) {
                    Some(p) if p.is_member() && p.status != ParticipantStatus::Disconnected => {
                        p.status = ParticipantStatus::Disconnected;
                        p.screen_sharing = false;
                        true
                    }
                    _ => false,
                }
            }
            ControlNotification::ParticipantUpdated(update) => apply_update(&mut next, &update),
            ControlNotification::Chat(message) => {
                if next.messages.iter().any(|m| m.id == message.id) {
                    false
                } else {
                    next.messages.push(message);
                    true
                }
            }
            ControlNotification::LocalConnection { connected } => {
                self.apply_local_connection(&mut next, connected)
            }
        };

        if changed {
            self.replace(next);
        }
    }

    fn apply_local_connection(&mut self, session: &mut Session, connected: bool) -> bool {
        let Some(local) = session.participant_mut(&self.local_participant) else {
            return false;
        };
        if !local.is_member() {
            return false;
        }

        if connected {
            match self.status_before_loss.take() {
                Some(previous) if local.status == ParticipantStatus::Disconnected => {
                    local.status = previous;
                    true
                }
                _ => false,
            }
        } else if local.status == ParticipantStatus::Disconnected {
            false
        } else {
            self.status_before_loss = Some(local.status);
            local.status = ParticipantStatus::Disconnected;
            true
        }
    }

    fn snapshot(&self) -> Arc<Session> {
        Arc::clone(&self.session_tx.borrow())
    }

    fn replace(&self, next: Session) {
        let next = Arc::new(next);
        self.session_tx.send_replace(Arc::clone(&next));
        self.dispatcher.publish(&DispatchEvent::SessionChanged(next));
    }
}

/// New joins into a locked session wait in the waiting room; known
/// participants keep their admission.
fn apply_join(
    session: &mut Session,
    participant_id: ParticipantId,
    display_name: Option<String>,
    role: Option<Role>,
) -> bool {
    let locked = session.locked;
    if let Some(existing) = session.participant_mut(&participant_id) {
        return match existing.status {
            ParticipantStatus::Removed
            | ParticipantStatus::WaitingRoom
            | ParticipantStatus::Connected => false,
            ParticipantStatus::Joining | ParticipantStatus::Disconnected => {
                existing.status = ParticipantStatus::Connected;
                true
            }
        };
    }

    let name = display_name.unwrap_or_else(|| participant_id.to_string());
    let mut participant = Participant::new(participant_id, name, role.unwrap_or(Role::Patient));
    participant.status = if locked {
        ParticipantStatus::WaitingRoom
    } else {
        ParticipantStatus::Connected
    };
    session.participants.push(participant);
    true
}

fn apply_update(session: &mut Session, update: &ParticipantUpdate) -> bool {
    let Some(participant) = session.participant_mut(&update.participant_id) else {
        debug!(
            target: "sc.control",
            participant_id = %update.participant_id,
            "Update for unknown participant ignored"
        );
        return false;
    };

    let before = participant.clone();
    if let Some(status) = update.status {
        participant.status = status;
    }
    if let Some(audio) = update.audio_enabled {
        participant.audio_enabled = audio;
    }
    if let Some(video) = update.video_enabled {
        participant.video_enabled = video;
    }
    if let Some(sharing) = update.screen_sharing {
        participant.screen_sharing = sharing;
    }
    if let Some(quality) = update.connection_quality {
        participant.connection_quality = quality;
    }
    if let Some(role) = update.role {
        participant.role = role;
    }
    if let Some(name) = &update.display_name {
        participant.display_name.clone_from(name);
    }
    *participant != before
}
