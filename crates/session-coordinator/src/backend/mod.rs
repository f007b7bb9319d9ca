//! Backend authority.
//!
//! The backend owns persistence and is the authority for every moderator
//! action. The core talks to it through [`BackendAuthority`]; the production
//! implementation is the `reqwest`-based [`BackendClient`].
//!
//! Every response is wrapped in [`ApiResponse`]. A `success: false` body or a
//! non-2xx status is a [`BackendError::Rejected`] carrying the backend's
//! reason.

pub mod client;

pub use client::BackendClient;

use crate::control::actions::{ActionSubmission, SessionAction};
use crate::control::model::{ChatMessage, Role, Session};
use crate::errors::CoordinatorError;
use crate::media::recording::{RecordingQuality, RecordingState};
use crate::media::transcription::TranscriptEntry;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend call failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refused the request.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// The backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The response did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Reason suitable for `ActionRejected`.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            BackendError::Rejected { reason } => reason.clone(),
            BackendError::Unavailable(_) => "The session service is unavailable".to_string(),
            BackendError::InvalidResponse(_) => {
                "The session service returned an unexpected response".to_string()
            }
        }
    }
}

impl From<BackendError> for CoordinatorError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected { reason } => CoordinatorError::ActionRejected { reason },
            other => CoordinatorError::Backend(other.to_string()),
        }
    }
}

/// Uniform response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    /// Failed response with a reason.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            errors: None,
        }
    }

    /// Backend-supplied failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        if let Some(message) = self.message.as_ref().filter(|m| !m.is_empty()) {
            return Some(message.clone());
        }
        self.errors
            .as_ref()
            .filter(|errors| !errors.is_empty())
            .map(|errors| errors.join("; "))
    }

    /// `data` on success, `Rejected` otherwise.
    pub fn into_result(self) -> Result<Option<T>, BackendError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(BackendError::Rejected {
                reason: self
                    .reason()
                    .unwrap_or_else(|| "Request was rejected".to_string()),
            })
        }
    }
}

/// Body of `POST /sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_start: Option<DateTime<Utc>>,
    pub estimated_duration_minutes: u32,
    pub chat_enabled: bool,
    pub recording_enabled: bool,
}

/// Body of `POST /sessions/{id}/join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub role: Role,
}

/// Body of `POST /sessions/{id}/chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub sender_id: ParticipantId,
    pub text: String,
}

/// Body of `POST /sessions/{id}/recording/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    pub quality: RecordingQuality,
    pub bitrate_bps: u64,
    pub with_transcription: bool,
}

/// Completion notice sent with `POST /sessions/{id}/recording/stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingCompletion {
    pub duration_secs: u64,
    pub size_bytes: u64,
    pub uploaded: bool,
}

/// Body of `POST /sessions/{id}/transcription/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTranscriptionRequest {
    pub language: String,
}

/// Transcript export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Json,
}

impl ExportFormat {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text",
            ExportFormat::Json => "json",
        }
    }
}

/// Body of `POST /sessions/{id}/invitations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_minutes: Option<u32>,
}

/// Issued invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub token: String,
    pub session_id: SessionId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Backend authority consumed by the core.
#[async_trait::async_trait]
pub trait BackendAuthority: Send + Sync {
    async fn get_session(&self, session_id: &SessionId) -> Result<Session, BackendError>;

    async fn create_session(&self, request: &CreateSessionRequest)
        -> Result<Session, BackendError>;

    /// Join and return the current session snapshot.
    async fn join_session(
        &self,
        session_id: &SessionId,
        request: &JoinRequest,
    ) -> Result<Session, BackendError>;

    async fn leave_session(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<(), BackendError>;

    async fn send_chat(
        &self,
        session_id: &SessionId,
        request: &ChatRequest,
    ) -> Result<ChatMessage, BackendError>;

    async fn chat_history(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>, BackendError>;

    /// Submit a moderator action; the returned action is the logged record.
    async fn submit_action(
        &self,
        session_id: &SessionId,
        submission: &ActionSubmission,
    ) -> Result<SessionAction, BackendError>;

    async fn start_recording(
        &self,
        session_id: &SessionId,
        request: &StartRecordingRequest,
    ) -> Result<(), BackendError>;

    async fn pause_recording(&self, session_id: &SessionId) -> Result<(), BackendError>;

    async fn resume_recording(&self, session_id: &SessionId) -> Result<(), BackendError>;

    /// Completion notice; sent once per stopped recording.
    async fn stop_recording(
        &self,
        session_id: &SessionId,
        completion: &RecordingCompletion,
    ) -> Result<(), BackendError>;

    async fn upload_recording(&self, session_id: &SessionId, data: Bytes)
        -> Result<(), BackendError>;

    async fn recording_state(&self, session_id: &SessionId)
        -> Result<RecordingState, BackendError>;

    async fn start_transcription(
        &self,
        session_id: &SessionId,
        request: &StartTranscriptionRequest,
    ) -> Result<(), BackendError>;

    async fn stop_transcription(&self, session_id: &SessionId) -> Result<(), BackendError>;

    async fn transcript_entries(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TranscriptEntry>, BackendError>;

    async fn append_transcript_entry(
        &self,
        session_id: &SessionId,
        entry: &TranscriptEntry,
    ) -> Result<(), BackendError>;

    async fn export_transcript(
        &self,
        session_id: &SessionId,
        format: ExportFormat,
    ) -> Result<String, BackendError>;

    async fn create_invitation(
        &self,
        session_id: &SessionId,
        request: &InvitationRequest,
    ) -> Result<Invitation, BackendError>;

    async fn accept_invitation(&self, token: &str) -> Result<Session, BackendError>;

    async fn cancel_invitation(
        &self,
        session_id: &SessionId,
        invitation_id: &str,
    ) -> Result<(), BackendError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_envelope_uses_message() {
        let response: ApiResponse<Session> = serde_json::from_value(json!({
            "success": false,
            "message": "Session is locked"
        }))
        .unwrap();

        assert_eq!(
            response.into_result(),
            Err(BackendError::Rejected {
                reason: "Session is locked".to_string()
            })
        );
    }

    #[test]
    fn test_failed_envelope_falls_back_to_errors() {
        let response: ApiResponse<Session> = serde_json::from_value(json!({
            "success": false,
            "errors": ["targetId is required", "reason too long"]
        }))
        .unwrap();

        assert_eq!(
            response.reason().as_deref(),
            Some("targetId is required; reason too long")
        );
    }

    #[test]
    fn test_success_without_data() {
        let response: ApiResponse<serde_json::Value> =
            serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(response.into_result(), Ok(None));
    }

    #[test]
    fn test_rejection_maps_to_action_rejected() {
        let err: CoordinatorError = BackendError::Rejected {
            reason: "Not allowed".to_string(),
        }
        .into();
        assert_eq!(
            err,
            CoordinatorError::ActionRejected {
                reason: "Not allowed".to_string()
            }
        );

        let err: CoordinatorError = BackendError::Unavailable("connect refused".to_string()).into();
        assert!(matches!(err, CoordinatorError::Backend(_)));
    }
}
