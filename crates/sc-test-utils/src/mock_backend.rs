//! In-memory backend authority.
//!
//! Every call is recorded as a [`BackendCall`] so tests can assert counts and
//! ordering. Failures are configured through the builder or at runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_test_utils::MockBackend;
//!
//! let backend = MockBackend::builder()
//!     .with_session(session)
//!     .reject_actions("Session is under review")
//!     .fail_uploads(2)
//!     .build();
//! ```

use bytes::Bytes;
use chrono::Utc;
use common::types::{ParticipantId, SessionId};
use session_coordinator::backend::{
    BackendAuthority, BackendError, ChatRequest, CreateSessionRequest, ExportFormat, Invitation,
    InvitationRequest, JoinRequest, RecordingCompletion, StartRecordingRequest,
    StartTranscriptionRequest,
};
use session_coordinator::control::actions::{ActionSubmission, SessionAction};
use session_coordinator::control::{ChatMessage, Participant, ParticipantStatus, Session};
use session_coordinator::media::{RecordingState, TranscriptEntry};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    GetSession,
    CreateSession,
    JoinSession(JoinRequest),
    LeaveSession(ParticipantId),
    SendChat(ChatRequest),
    ChatHistory,
    SubmitAction(ActionSubmission),
    StartRecording(StartRecordingRequest),
    PauseRecording,
    ResumeRecording,
    StopRecording(RecordingCompletion),
    UploadRecording { size: usize },
    RecordingState,
    StartTranscription(StartTranscriptionRequest),
    StopTranscription,
    TranscriptEntries,
    AppendTranscriptEntry(TranscriptEntry),
    ExportTranscript(ExportFormat),
    CreateInvitation,
    AcceptInvitation(String),
    CancelInvitation(String),
}

#[derive(Debug, Default)]
struct Behavior {
    reject_actions: Option<String>,
    action_delay: Option<Duration>,
    reject_join: Option<String>,
    reject_recording: Option<String>,
    reject_transcription: Option<String>,
}

/// In-memory `BackendAuthority`.
#[derive(Debug)]
pub struct MockBackend {
    session: Mutex<Session>,
    behavior: Mutex<Behavior>,
    upload_failures: AtomicU32,
    sequence: AtomicU32,
    calls: Mutex<Vec<BackendCall>>,
    transcript: Mutex<Vec<TranscriptEntry>>,
}

impl MockBackend {
    /// Create a new MockBackend builder.
    #[must_use]
    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder::default()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    /// Submitted action bodies, in order.
    #[must_use]
    pub fn action_submissions(&self) -> Vec<ActionSubmission> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                BackendCall::SubmitAction(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn upload_attempts(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::UploadRecording { .. }))
    }

    /// Completion notices sent, in order.
    #[must_use]
    pub fn completions(&self) -> Vec<RecordingCompletion> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                BackendCall::StopRecording(completion) => Some(completion.clone()),
                _ => None,
            })
            .collect()
    }

    /// Change (or clear) the action rejection reason.
    pub fn set_reject_actions(&self, reason: Option<&str>) {
        self.behavior.lock().unwrap().reject_actions = reason.map(str::to_string);
    }

    /// Fail the next `n` uploads.
    pub fn set_upload_failures(&self, n: u32) {
        self.upload_failures.store(n, Ordering::SeqCst);
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn rejected(reason: &str) -> BackendError {
        BackendError::Rejected {
            reason: reason.to_string(),
        }
    }
}

/// Builder for MockBackend configuration.
#[derive(Debug, Default)]
pub struct MockBackendBuilder {
    session: Option<Session>,
    behavior: Behavior,
    upload_failures: u32,
}

impl MockBackendBuilder {
    /// Snapshot returned by join and get.
    #[must_use]
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Reject every action submission with `reason`.
    #[must_use]
    pub fn reject_actions(mut self, reason: &str) -> Self {
        self.behavior.reject_actions = Some(reason.to_string());
        self
    }

    /// Delay every action acknowledgment.
    #[must_use]
    pub fn action_delay(mut self, delay: Duration) -> Self {
        self.behavior.action_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn reject_join(mut self, reason: &str) -> Self {
        self.behavior.reject_join = Some(reason.to_string());
        self
    }

    /// Reject recording start, pause and resume.
    #[must_use]
    pub fn reject_recording(mut self, reason: &str) -> Self {
        self.behavior.reject_recording = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn reject_transcription(mut self, reason: &str) -> Self {
        self.behavior.reject_transcription = Some(reason.to_string());
        self
    }

    /// Fail the first `n` uploads with `Unavailable`.
    #[must_use]
    pub fn fail_uploads(mut self, n: u32) -> Self {
        self.upload_failures = n;
        self
    }

    /// Build the MockBackend.
    #[must_use]
    pub fn build(self) -> Arc<MockBackend> {
        Arc::new(MockBackend {
            session: Mutex::new(
                self.session
                    .unwrap_or_else(|| crate::fixtures::TestSession::active("session-1").build()),
            ),
            behavior: Mutex::new(self.behavior),
            upload_failures: AtomicU32::new(self.upload_failures),
            sequence: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            transcript: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl BackendAuthority for MockBackend {
    async fn get_session(&self, _session_id: &SessionId) -> Result<Session, BackendError> {
        self.record(BackendCall::GetSession);
        Ok(self.session.lock().unwrap().clone())
    }

    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Session, BackendError> {
        self.record(BackendCall::CreateSession);
        let mut session = Session::new(SessionId::from(self.next_id("session")));
        session.estimated_duration_minutes = request.estimated_duration_minutes;
        session.chat_enabled = request.chat_enabled;
        session.recording_enabled = request.recording_enabled;
        Ok(session)
    }

    async fn join_session(
        &self,
        _session_id: &SessionId,
        request: &JoinRequest,
    ) -> Result<Session, BackendError> {
        self.record(BackendCall::JoinSession(request.clone()));
        if let Some(reason) = &self.behavior.lock().unwrap().reject_join {
            return Err(Self::rejected(reason));
        }

        let mut session = self.session.lock().unwrap();
        if session.participant(&request.participant_id).is_none() {
            let mut participant = Participant::new(
                request.participant_id.clone(),
                request.display_name.clone(),
                request.role,
            );
            participant.status = ParticipantStatus::Connected;
            session.participants.push(participant);
        }
        Ok(session.clone())
    }

    async fn leave_session(
        &self,
        _session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::LeaveSession(participant_id.clone()));
        Ok(())
    }

    async fn send_chat(
        &self,
        _session_id: &SessionId,
        request: &ChatRequest,
    ) -> Result<ChatMessage, BackendError> {
        self.record(BackendCall::SendChat(request.clone()));
        let message = ChatMessage {
            id: self.next_id("msg"),
            sender_id: request.sender_id.clone(),
            text: request.text.clone(),
            sent_at: Utc::now(),
        };
        self.session.lock().unwrap().messages.push(message.clone());
        Ok(message)
    }

    async fn chat_history(&self, _session_id: &SessionId) -> Result<Vec<ChatMessage>, BackendError> {
        self.record(BackendCall::ChatHistory);
        Ok(self.session.lock().unwrap().messages.clone())
    }

    async fn submit_action(
        &self,
        _session_id: &SessionId,
        submission: &ActionSubmission,
    ) -> Result<SessionAction, BackendError> {
        self.record(BackendCall::SubmitAction(submission.clone()));
        let (reject, delay) = {
            let behavior = self.behavior.lock().unwrap();
            (behavior.reject_actions.clone(), behavior.action_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = reject {
            return Err(Self::rejected(&reason));
        }
        Ok(SessionAction {
            id: self.next_id("action"),
            action_type: submission.action_type,
            target_id: submission.target_id.clone(),
            performed_by: None,
            reason: submission.reason.clone(),
            parameters: submission.parameters.clone(),
            timestamp: Utc::now(),
        })
    }

    async fn start_recording(
        &self,
        _session_id: &SessionId,
        request: &StartRecordingRequest,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::StartRecording(request.clone()));
        match &self.behavior.lock().unwrap().reject_recording {
            Some(reason) => Err(Self::rejected(reason)),
            None => Ok(()),
        }
    }

    async fn pause_recording(&self, _session_id: &SessionId) -> Result<(), BackendError> {
        self.record(BackendCall::PauseRecording);
        match &self.behavior.lock().unwrap().reject_recording {
            Some(reason) => Err(Self::rejected(reason)),
            None => Ok(()),
        }
    }

    async fn resume_recording(&self, _session_id: &SessionId) -> Result<(), BackendError> {
        self.record(BackendCall::ResumeRecording);
        match &self.behavior.lock().unwrap().reject_recording {
            Some(reason) => Err(Self::rejected(reason)),
            None => Ok(()),
        }
    }

    async fn stop_recording(
        &self,
        _session_id: &SessionId,
        completion: &RecordingCompletion,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::StopRecording(completion.clone()));
        Ok(())
    }

    async fn upload_recording(&self, _session_id: &SessionId, data: Bytes) -> Result<(), BackendError> {
        self.record(BackendCall::UploadRecording { size: data.len() });
        let remaining = self.upload_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.upload_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Unavailable("upload failed".to_string()));
        }
        Ok(())
    }

    async fn recording_state(&self, _session_id: &SessionId) -> Result<RecordingState, BackendError> {
        self.record(BackendCall::RecordingState);
        Ok(RecordingState::default())
    }

    async fn start_transcription(
        &self,
        _session_id: &SessionId,
        request: &StartTranscriptionRequest,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::StartTranscription(request.clone()));
        match &self.behavior.lock().unwrap().reject_transcription {
            Some(reason) => Err(Self::rejected(reason)),
            None => Ok(()),
        }
    }

    async fn stop_transcription(&self, _session_id: &SessionId) -> Result<(), BackendError> {
        self.record(BackendCall::StopTranscription);
        Ok(())
    }

    async fn transcript_entries(
        &self,
        _session_id: &SessionId,
    ) -> Result<Vec<TranscriptEntry>, BackendError> {
        self.record(BackendCall::TranscriptEntries);
        Ok(self.transcript.lock().unwrap().clone())
    }

    async fn append_transcript_entry(
        &self,
        _session_id: &SessionId,
        entry: &TranscriptEntry,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::AppendTranscriptEntry(entry.clone()));
        self.transcript.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn export_transcript(
        &self,
        _session_id: &SessionId,
        format: ExportFormat,
    ) -> Result<String, BackendError> {
        self.record(BackendCall::ExportTranscript(format));
        let entries = self.transcript.lock().unwrap().clone();
        Ok(match format {
            ExportFormat::Json => serde_json::to_string(&entries)
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?,
            ExportFormat::Text => entries
                .iter()
                .map(|e| e.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }

    async fn create_invitation(
        &self,
        session_id: &SessionId,
        request: &InvitationRequest,
    ) -> Result<Invitation, BackendError> {
        self.record(BackendCall::CreateInvitation);
        Ok(Invitation {
            id: self.next_id("inv"),
            token: self.next_id("token"),
            session_id: session_id.clone(),
            role: request.role,
            expires_at: None,
        })
    }

    async fn accept_invitation(&self, token: &str) -> Result<Session, BackendError> {
        self.record(BackendCall::AcceptInvitation(token.to_string()));
        Ok(self.session.lock().unwrap().clone())
    }

    async fn cancel_invitation(
        &self,
        _session_id: &SessionId,
        invitation_id: &str,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::CancelInvitation(invitation_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_coordinator::control::ActionKind;

    #[tokio::test]
    async fn test_rejection_is_configurable_at_runtime() {
        let backend = MockBackend::builder().reject_actions("nope").build();
        let submission = ActionSubmission {
            action_type: ActionKind::Lock,
            target_id: None,
            parameters: None,
            reason: None,
        };
        let session_id = SessionId::from("s");

        assert!(backend.submit_action(&session_id, &submission).await.is_err());
        backend.set_reject_actions(None);
        let action = backend.submit_action(&session_id, &submission).await.unwrap();

        assert_eq!(action.action_type, ActionKind::Lock);
        assert_eq!(backend.action_submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_failures_count_down() {
        let backend = MockBackend::builder().fail_uploads(1).build();
        let session_id = SessionId::from("s");

        assert!(backend
            .upload_recording(&session_id, Bytes::from_static(b"ab"))
            .await
            .is_err());
        assert!(backend
            .upload_recording(&session_id, Bytes::from_static(b"ab"))
            .await
            .is_ok());
        assert_eq!(backend.upload_attempts(), 2);
    }
}
