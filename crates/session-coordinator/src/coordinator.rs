//! Session coordinator.
//!
//! One [`SessionCoordinator`] owns every component of a single session:
//!
//! ```text
//!                      ┌──────────────────┐
//!   socket ──frames──▶ │ TransportChannel │ ──envelopes──▶ EventDispatcher
//!                      └──────────────────┘                    │
//!          ┌────────────────────┬────────────────────┬─────────┴──────────┐
//!          ▼                    ▼                    ▼                    ▼
//!   NegotiationOrchestrator  SessionControl   RecordingActor   TranscriptionActor
//! ```
//!
//! Dispatcher handlers are synchronous; each one forwards into the owning
//! component's mailbox. Every task runs under a child of the coordinator's
//! cancellation token, so `close` (or drop) stops all of them. Several
//! coordinators can coexist in one process.

use crate::backend::{
    BackendAuthority, BackendClient, BackendError, ChatRequest, ExportFormat, JoinRequest,
};
use crate::config::Config;
use crate::control::{
    ActionOutcome, Actor, ChatMessage, ControlAction, ControlNotification, Role, Session,
    SessionAction, SessionControl, SessionControlHandle,
};
use crate::dispatcher::{DispatchEvent, EventDispatcher, HandlerError, Topic};
use crate::envelope::{
    ChatPayload, EnvelopeKind, IceCandidate, JoinPayload, ParticipantUpdate, SignalingEnvelope,
};
use crate::errors::CoordinatorError;
use crate::media::{
    RecorderCapability, RecordingActor, RecordingHandle, RecordingQuality, RecordingState,
    RecordingSummary, SpeechCapability, TranscriptEntry, TranscriptionActor,
    TranscriptionHandle, TranscriptionState,
};
use crate::negotiation::{NegotiationOrchestrator, NegotiationState, PeerConnection};
use crate::transport::{
    BackoffPolicy, EnvelopeSink, SignalingConnector, TransportChannel, TransportHandle,
    TransportState, WebSocketConnector,
};

use common::types::{ParticipantId, SessionId};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// External collaborators of one coordinator.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub connector: Arc<dyn SignalingConnector>,
    pub backend: Arc<dyn BackendAuthority>,
    pub peer: Arc<dyn PeerConnection>,
    pub recorder: Arc<dyn RecorderCapability>,
    pub speech: Arc<dyn SpeechCapability>,
}

impl CoordinatorDeps {
    /// WebSocket signaling and the REST backend from `config`; device
    /// capabilities are supplied by the embedder.
    pub fn production(
        config: &Config,
        peer: Arc<dyn PeerConnection>,
        recorder: Arc<dyn RecorderCapability>,
        speech: Arc<dyn SpeechCapability>,
    ) -> Result<Self, CoordinatorError> {
        Ok(Self {
            connector: Arc::new(WebSocketConnector::new(config.signaling_url.clone())),
            backend: Arc::new(BackendClient::from_config(config)?),
            peer,
            recorder,
            speech,
        })
    }
}

/// Identity of the local participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
}

impl LocalParticipant {
    #[must_use]
    pub fn new(id: ParticipantId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
        }
    }
}

/// Client-side coordinator for one session.
pub struct SessionCoordinator {
    session_id: SessionId,
    local: LocalParticipant,
    request_timeout: Duration,
    backend: Arc<dyn BackendAuthority>,
    speech: Arc<dyn SpeechCapability>,
    dispatcher: Arc<EventDispatcher>,
    transport: TransportHandle,
    control: SessionControlHandle,
    negotiation: Arc<NegotiationOrchestrator>,
    recording: RecordingHandle,
    transcription: TranscriptionHandle,
    cancel_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("session_id", &self.session_id)
            .field("local", &self.local)
            .field("closed", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// Join `session_id` through the backend, start every component and
    /// connect the transport.
    ///
    /// On a transport failure everything started so far is torn down and the
    /// error is returned.
    #[instrument(skip_all, name = "sc.coordinator", fields(session_id = %session_id, participant_id = %local.id))]
    pub async fn open(
        config: &Config,
        deps: CoordinatorDeps,
        session_id: SessionId,
        local: LocalParticipant,
    ) -> Result<Self, CoordinatorError> {
        let request_timeout = config.request_timeout;
        let join = JoinRequest {
            participant_id: local.id.clone(),
            display_name: local.display_name.clone(),
            role: local.role,
        };
        let session = bounded(
            request_timeout,
            "join",
            deps.backend.join_session(&session_id, &join),
        )
        .await?;
        if session.is_ended() {
            return Err(CoordinatorError::SessionEnded);
        }
        info!(
            target: "sc.coordinator",
            participants = session.participants.len(),
            status = session.display_status(),
            "Joined session"
        );

        let cancel_token = CancellationToken::new();
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut tasks = Vec::new();

        let (control, control_task) = SessionControl::spawn(
            session,
            local.id.clone(),
            Arc::clone(&deps.backend),
            Arc::clone(&dispatcher),
            request_timeout,
            cancel_token.child_token(),
        );
        tasks.push(control_task);

        let (transport, transport_task) = TransportChannel::spawn(
            Arc::clone(&deps.connector),
            Arc::clone(&dispatcher),
            BackoffPolicy::new(config.reconnect_base_delay, config.reconnect_max_attempts),
            config.handshake_timeout,
            cancel_token.child_token(),
        );
        tasks.push(transport_task);
        let sink: Arc<dyn EnvelopeSink> = Arc::new(transport.clone());

        let negotiation = Arc::new(NegotiationOrchestrator::new(
            session_id.clone(),
            local.id.clone(),
            Arc::clone(&deps.peer),
            Arc::clone(&sink),
            request_timeout,
        ));
        let (negotiation_tx, negotiation_rx) = mpsc::unbounded_channel();
        tasks.push(
            Arc::clone(&negotiation).spawn_inbound_pump(negotiation_rx, cancel_token.child_token()),
        );

        let (recording, recording_task) = RecordingActor::spawn(
            session_id.clone(),
            Arc::clone(&deps.recorder),
            Arc::clone(&deps.backend),
            Arc::clone(&dispatcher),
            config.upload_max_retries,
            cancel_token.child_token(),
            control.end_token(),
        );
        tasks.push(recording_task);

        let (transcription, transcription_task) = TranscriptionActor::spawn(
            session_id.clone(),
            local.id.clone(),
            Some(local.display_name.clone()),
            Arc::clone(&deps.speech),
            Arc::clone(&deps.backend),
            sink,
            Arc::clone(&dispatcher),
            cancel_token.child_token(),
        );
        tasks.push(transcription_task);

        let coordinator = Self {
            session_id,
            local,
            request_timeout,
            backend: deps.backend,
            speech: deps.speech,
            dispatcher,
            transport,
            control,
            negotiation,
            recording,
            transcription,
            cancel_token,
            tasks: Mutex::new(tasks),
        };
        coordinator.wire_subscriptions(negotiation_tx);
        coordinator.spawn_end_watcher();

        if let Err(e) = coordinator
            .transport
            .connect(coordinator.session_id.clone(), coordinator.local.id.clone())
            .await
        {
            error!(target: "sc.coordinator", error = %e, "Signaling connect failed");
            coordinator.close().await;
            return Err(e);
        }

        info!(target: "sc.coordinator", "Session coordinator open");
        Ok(coordinator)
    }

    /// Route dispatcher topics into the owning components.
    fn wire_subscriptions(&self, negotiation_tx: mpsc::UnboundedSender<SignalingEnvelope>) {
        let local_id = self.local.id.clone();

        for kind in [
            EnvelopeKind::Offer,
            EnvelopeKind::Answer,
            EnvelopeKind::IceCandidate,
        ] {
            let tx = negotiation_tx.clone();
            self.dispatcher.subscribe(Topic::Envelope(kind), move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                tx.send(envelope.clone())
                    .map_err(|_| HandlerError::new("negotiation pump stopped"))
            });
        }

        let control = self.control.clone();
        self.dispatcher
            .subscribe(Topic::Envelope(EnvelopeKind::Join), move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                let participant_id = sender_of(envelope)?;
                let payload = match envelope.data {
                    Some(_) => envelope
                        .payload::<JoinPayload>()
                        .map_err(|e| HandlerError::new(e.to_string()))?,
                    None => JoinPayload::default(),
                };
                forward(
                    &control,
                    ControlNotification::Joined {
                        participant_id,
                        display_name: payload.display_name,
                        role: payload.role,
                    },
                )
            });

        let control = self.control.clone();
        self.dispatcher
            .subscribe(Topic::Envelope(EnvelopeKind::Leave), move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                let participant_id = sender_of(envelope)?;
                forward(&control, ControlNotification::Left { participant_id })
            });

        let control = self.control.clone();
        self.dispatcher.subscribe(
            Topic::Envelope(EnvelopeKind::ParticipantUpdate),
            move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                let update = envelope
                    .payload::<ParticipantUpdate>()
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                forward(&control, ControlNotification::ParticipantUpdated(update))
            },
        );

        let control = self.control.clone();
        self.dispatcher
            .subscribe(Topic::Envelope(EnvelopeKind::Chat), move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                let sender_id = sender_of(envelope)?;
                let payload = envelope
                    .payload::<ChatPayload>()
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                forward(
                    &control,
                    ControlNotification::Chat(ChatMessage {
                        id: payload.message_id,
                        sender_id,
                        text: payload.text,
                        sent_at: envelope.timestamp,
                    }),
                )
            });

        for (kind, active) in [
            (EnvelopeKind::RecordingStart, true),
            (EnvelopeKind::RecordingStop, false),
        ] {
            let recording = self.recording.clone();
            let local_id = local_id.clone();
            self.dispatcher.subscribe(Topic::Envelope(kind), move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                if envelope.participant_id.as_ref() == Some(&local_id) {
                    return Ok(());
                }
                if recording.set_remote_recording(active) {
                    Ok(())
                } else {
                    Err(HandlerError::new("recording actor stopped"))
                }
            });
        }

        let transcription = self.transcription.clone();
        self.dispatcher.subscribe(
            Topic::Envelope(EnvelopeKind::Transcription),
            move |event| {
                let Some(envelope) = envelope_of(event) else {
                    return Ok(());
                };
                if envelope.participant_id.as_ref() == Some(&local_id) {
                    return Ok(());
                }
                let mut entry = envelope
                    .payload::<TranscriptEntry>()
                    .map_err(|e| HandlerError::new(e.to_string()))?;
                if entry.speaker_id.is_none() {
                    entry.speaker_id.clone_from(&envelope.participant_id);
                }
                if transcription.ingest_remote(entry) {
                    Ok(())
                } else {
                    Err(HandlerError::new("transcription actor stopped"))
                }
            },
        );

        let control = self.control.clone();
        self.dispatcher
            .subscribe(Topic::TransportState, move |event| match event {
                DispatchEvent::TransportState(TransportState::Connected) => forward(
                    &control,
                    ControlNotification::LocalConnection { connected: true },
                ),
                DispatchEvent::TransportState(
                    TransportState::Reconnecting { .. } | TransportState::Disconnected,
                ) => forward(
                    &control,
                    ControlNotification::LocalConnection { connected: false },
                ),
                _ => Ok(()),
            });

        let session_id = self.session_id.clone();
        self.dispatcher.subscribe(Topic::TransportFatal, move |event| {
            if let DispatchEvent::TransportFatal { attempts } = event {
                error!(
                    target: "sc.coordinator",
                    session_id = %session_id,
                    attempts,
                    "Signaling lost; reconnect attempts exhausted"
                );
            }
            Ok(())
        });
    }

    /// Tear down media and signaling once the session ends.
    fn spawn_end_watcher(&self) {
        let end_token = self.control.end_token();
        let cancel_token = self.cancel_token.child_token();
        let transport = self.transport.clone();
        let negotiation = Arc::clone(&self.negotiation);
        let recording = self.recording.clone();
        let transcription = self.transcription.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => return,
                () = end_token.cancelled() => {}
            }
            info!(target: "sc.coordinator", "Session ended, tearing down");
            negotiation.close().await;
            if let Err(e) = transport.disconnect().await {
                debug!(target: "sc.coordinator", error = %e, "Transport already stopped");
            }
            if let Err(e) = transcription.stop().await {
                warn!(target: "sc.coordinator", error = %e, "Transcription stop failed");
            }
            match recording.stop().await {
                Ok(Some(summary)) => info!(
                    target: "sc.coordinator",
                    duration_secs = summary.duration_secs,
                    uploaded = summary.uploaded,
                    "Recording finalized at session end"
                ),
                Ok(None) => {}
                Err(e) => warn!(target: "sc.coordinator", error = %e, "Recording stop failed"),
            }
        });
        self.track(task);
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn local_participant(&self) -> &LocalParticipant {
        &self.local
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Session> {
        self.control.snapshot()
    }

    #[must_use]
    pub fn subscribe_session(&self) -> watch::Receiver<Arc<Session>> {
        self.control.subscribe()
    }

    #[must_use]
    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    #[must_use]
    pub fn subscribe_transport(&self) -> watch::Receiver<TransportState> {
        self.transport.subscribe_state()
    }

    #[must_use]
    pub fn negotiation(&self) -> &Arc<NegotiationOrchestrator> {
        &self.negotiation
    }

    #[must_use]
    pub fn negotiation_state(&self) -> NegotiationState {
        self.negotiation.state()
    }

    #[must_use]
    pub fn recording_state(&self) -> RecordingState {
        self.recording.state()
    }

    #[must_use]
    pub fn transcription_state(&self) -> TranscriptionState {
        self.transcription.state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Acting identity of the local participant, using the role currently
    /// held in the snapshot.
    fn actor(&self) -> Actor {
        let role = self
            .control
            .snapshot()
            .participant(&self.local.id)
            .map_or(self.local.role, |p| p.role);
        Actor::new(self.local.id.clone(), role)
    }

    /// Apply a moderator action as the local participant.
    pub async fn apply(
        &self,
        action: ControlAction,
        reason: Option<String>,
    ) -> Result<ActionOutcome, CoordinatorError> {
        self.control.apply(self.actor(), action, reason).await
    }

    /// End the session immediately, regardless of pause or lock.
    ///
    /// Once the backend acknowledges, signaling and negotiation are torn down
    /// before returning. A refused or failed emergency end changes nothing.
    #[instrument(skip_all, name = "sc.coordinator.emergency_end", fields(session_id = %self.session_id))]
    pub async fn emergency_end(
        &self,
        reason: Option<String>,
    ) -> Result<ActionOutcome, CoordinatorError> {
        let outcome = self
            .control
            .apply(self.actor(), ControlAction::EmergencyEnd, reason)
            .await?;

        if matches!(outcome, ActionOutcome::Applied(_)) {
            warn!(target: "sc.coordinator", "Emergency end teardown");
            self.negotiation.close().await;
            if let Err(e) = self.transport.disconnect().await {
                debug!(target: "sc.coordinator", error = %e, "Transport already stopped");
            }
        }
        Ok(outcome)
    }

    /// Start the local offer cycle.
    pub async fn start_negotiation(&self) -> Result<(), CoordinatorError> {
        self.negotiation.create_and_send_offer().await
    }

    /// Fresh offer cycle after a track change.
    pub async fn renegotiate(&self) -> Result<(), CoordinatorError> {
        self.negotiation.renegotiate().await
    }

    pub async fn on_local_candidate(&self, candidate: IceCandidate) -> Result<(), CoordinatorError> {
        self.negotiation.on_local_candidate(candidate).await
    }

    pub async fn on_connection_established(&self) -> Result<(), CoordinatorError> {
        self.negotiation.on_connection_established().await
    }

    /// Persist a chat message and broadcast it.
    ///
    /// Once the backend stored the message the call succeeds; a failed
    /// broadcast is logged and other participants see it through history.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<ChatMessage, CoordinatorError> {
        let snapshot = self.control.snapshot();
        if snapshot.is_ended() {
            return Err(CoordinatorError::SessionEnded);
        }
        if !snapshot.chat_enabled {
            return Err(CoordinatorError::ForbiddenAction(
                "Chat is disabled for this session".to_string(),
            ));
        }

        let request = ChatRequest {
            sender_id: self.local.id.clone(),
            text: text.into(),
        };
        let message = bounded(
            self.request_timeout,
            "chat send",
            self.backend.send_chat(&self.session_id, &request),
        )
        .await?;
        self.control
            .notify(ControlNotification::Chat(message.clone()));

        let envelope = SignalingEnvelope::with_payload(
            EnvelopeKind::Chat,
            self.session_id.clone(),
            self.local.id.clone(),
            &ChatPayload {
                message_id: message.id.clone(),
                text: message.text.clone(),
            },
        )?;
        match self.transport.send(envelope).await {
            Ok(()) => {
                debug!(target: "sc.coordinator", text_len = message.text.len(), "Chat sent");
            }
            Err(e) => warn!(
                target: "sc.coordinator",
                error = %e,
                message_id = %message.id,
                "Chat stored but not broadcast"
            ),
        }
        Ok(message)
    }

    /// Chat history from the backend.
    pub async fn chat_history(&self) -> Result<Vec<ChatMessage>, CoordinatorError> {
        bounded(
            self.request_timeout,
            "chat history",
            self.backend.chat_history(&self.session_id),
        )
        .await
    }

    /// Acknowledged actions ordered by timestamp.
    pub async fn action_log(&self) -> Result<Vec<SessionAction>, CoordinatorError> {
        self.control.action_log().await
    }

    /// Start recording, and transcription when a language is given.
    ///
    /// Both capabilities are checked before anything starts. If transcription
    /// then fails, the new recording is discarded and the error returned.
    /// Other participants are told only once everything is running.
    pub async fn start_recording(
        &self,
        quality: RecordingQuality,
        transcription_language: Option<String>,
    ) -> Result<(), CoordinatorError> {
        if self.control.snapshot().is_ended() {
            return Err(CoordinatorError::SessionEnded);
        }
        if transcription_language.is_some() && !self.speech.is_available() {
            return Err(CoordinatorError::MediaUnavailable(
                "speech recognition is not available".to_string(),
            ));
        }

        self.recording
            .start(quality, transcription_language.is_some())
            .await?;

        if let Some(language) = transcription_language {
            if let Err(e) = self.transcription.start(language).await {
                warn!(
                    target: "sc.coordinator",
                    error = %e,
                    "Transcription failed to start alongside recording"
                );
                if let Err(discard_err) = self.recording.discard().await {
                    warn!(target: "sc.coordinator", error = %discard_err, "Recording discard failed");
                }
                return Err(e);
            }
        }

        self.announce(EnvelopeKind::RecordingStart).await;
        Ok(())
    }

    pub async fn pause_recording(&self) -> Result<(), CoordinatorError> {
        self.recording.pause().await
    }

    pub async fn resume_recording(&self) -> Result<(), CoordinatorError> {
        self.recording.resume().await
    }

    /// Stop recording and upload. Transcription keeps running.
    pub async fn stop_recording(&self) -> Result<Option<RecordingSummary>, CoordinatorError> {
        let summary = self.recording.stop().await?;
        if summary.is_some() {
            self.announce(EnvelopeKind::RecordingStop).await;
        }
        Ok(summary)
    }

    pub async fn start_transcription(
        &self,
        language: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        if self.control.snapshot().is_ended() {
            return Err(CoordinatorError::SessionEnded);
        }
        self.transcription.start(language).await
    }

    pub async fn stop_transcription(&self) -> Result<(), CoordinatorError> {
        self.transcription.stop().await
    }

    pub async fn transcript_entries(&self) -> Result<Vec<TranscriptEntry>, CoordinatorError> {
        self.transcription.entries().await
    }

    /// Render the locally accumulated transcript.
    pub async fn export_transcript(&self, format: ExportFormat) -> Result<String, CoordinatorError> {
        self.transcription.export(format).await
    }

    /// Best-effort recording indicator for other participants.
    async fn announce(&self, kind: EnvelopeKind) {
        let envelope =
            SignalingEnvelope::new(kind, self.session_id.clone(), Some(self.local.id.clone()), None);
        if let Err(e) = self.transport.send(envelope).await {
            warn!(target: "sc.coordinator", kind = kind.as_str(), error = %e, "Announcement not sent");
        }
    }

    /// Leave the session and stop every task. Idempotent.
    ///
    /// In-flight work (reconnect timers, negotiation, upload retries) is
    /// cancelled; results still pending are discarded.
    #[instrument(skip_all, name = "sc.coordinator.close", fields(session_id = %self.session_id))]
    pub async fn close(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        if let Err(e) = self.transport.disconnect().await {
            debug!(target: "sc.coordinator", error = %e, "Transport already stopped");
        }
        self.negotiation.close().await;

        if !self.control.snapshot().is_ended() {
            if let Err(e) = bounded(
                self.request_timeout,
                "leave",
                self.backend.leave_session(&self.session_id, &self.local.id),
            )
            .await
            {
                warn!(target: "sc.coordinator", error = %e, "Backend leave failed");
            }
        }

        self.cancel_token.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in futures::future::join_all(tasks).await {
            if let Err(e) = task {
                warn!(target: "sc.coordinator", error = %e, "Task ended abnormally");
            }
        }
        info!(target: "sc.coordinator", "Session coordinator closed");
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Await a backend call bounded by `limit`.
async fn bounded<T>(
    limit: Duration,
    what: &str,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, CoordinatorError> {
    match timeout(limit, call).await {
        Ok(result) => result.map_err(CoordinatorError::from),
        Err(_) => Err(CoordinatorError::Timeout(what.to_string())),
    }
}

fn envelope_of(event: &DispatchEvent) -> Option<&SignalingEnvelope> {
    match event {
        DispatchEvent::Envelope(envelope) => Some(envelope),
        _ => None,
    }
}

fn sender_of(envelope: &SignalingEnvelope) -> Result<ParticipantId, HandlerError> {
    envelope.participant_id.clone().ok_or_else(|| {
        HandlerError::new(format!(
            "{} envelope without participantId",
            envelope.kind.as_str()
        ))
    })
}

fn forward(
    control: &SessionControlHandle,
    notification: ControlNotification,
) -> Result<(), HandlerError> {
    if control.notify(notification) {
        Ok(())
    } else {
        Err(HandlerError::new("session control stopped"))
    }
}
