//! HTTP client for the backend REST surface.
//!
//! All requests carry the bearer API token and are bounded by the configured
//! request timeout. Failures are logged here with their transport detail and
//! returned as [`BackendError`] values that never contain the token.

use super::{
    ApiResponse, BackendAuthority, BackendError, ChatRequest, CreateSessionRequest, ExportFormat,
    Invitation, InvitationRequest, JoinRequest, RecordingCompletion, StartRecordingRequest,
    StartTranscriptionRequest,
};
use crate::config::Config;
use crate::control::actions::{ActionSubmission, SessionAction};
use crate::control::model::{ChatMessage, Session};
use crate::errors::CoordinatorError;
use crate::media::recording::RecordingState;
use crate::media::transcription::TranscriptEntry;

use bytes::Bytes;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ParticipantId, SessionId};
use reqwest::{Client, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Connect timeout for backend requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend REST client.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    api_token: SecretString,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .field("api_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::Internal` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_token: SecretString,
        request_timeout: Duration,
    ) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                error!(target: "sc.backend", error = %e, "Failed to build HTTP client");
                CoordinatorError::Internal("failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Create a client from configuration.
    pub fn from_config(config: &Config) -> Result<Self, CoordinatorError> {
        Self::new(
            config.backend_url.clone(),
            config.api_token.clone(),
            config.request_timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.api_token.expose_secret())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, BackendError> {
        let request = self.authorized(self.client.get(self.url(path)));
        self.execute(request, path).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, BackendError> {
        let request = self.authorized(self.client.post(self.url(path)).json(body));
        self.execute(request, path).await
    }

    async fn delete(&self, path: &str) -> Result<(), BackendError> {
        let request = self.authorized(self.client.delete(self.url(path)));
        self.execute::<IgnoredAny>(request, path).await.map(|_| ())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<Option<T>, BackendError> {
        let response = request.send().await.map_err(|e| {
            warn!(target: "sc.backend", path, error = %e, "Backend request failed");
            BackendError::Unavailable(if e.is_timeout() {
                "request timed out".to_string()
            } else {
                "request failed".to_string()
            })
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(target: "sc.backend", path, error = %e, "Failed to read backend response");
            BackendError::InvalidResponse("unreadable body".to_string())
        })?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ApiResponse<IgnoredAny>>(&body)
                .ok()
                .and_then(|envelope| envelope.reason())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!(
                target: "sc.backend",
                path,
                status = status.as_u16(),
                "Backend returned an error status"
            );
            return Err(BackendError::Rejected { reason });
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            error!(target: "sc.backend", path, error = %e, "Failed to parse backend response");
            BackendError::InvalidResponse(e.to_string())
        })?;

        debug!(target: "sc.backend", path, success = envelope.success, "Backend responded");
        envelope.into_result()
    }
}

fn require<T>(data: Option<T>, what: &str) -> Result<T, BackendError> {
    data.ok_or_else(|| BackendError::InvalidResponse(format!("missing {what} in response")))
}

#[async_trait::async_trait]
impl BackendAuthority for BackendClient {
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn get_session(&self, session_id: &SessionId) -> Result<Session, BackendError> {
        let data = self.get(&format!("/sessions/{session_id}")).await?;
        require(data, "session")
    }

    #[instrument(skip_all)]
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Session, BackendError> {
        let data = self.post("/sessions", request).await?;
        require(data, "session")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn join_session(
        &self,
        session_id: &SessionId,
        request: &JoinRequest,
    ) -> Result<Session, BackendError> {
        let data = self
            .post(&format!("/sessions/{session_id}/join"), request)
            .await?;
        require(data, "session")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn leave_session(
        &self,
        session_id: &SessionId,
        participant_id: &ParticipantId,
    ) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(
            &format!("/sessions/{session_id}/leave"),
            &json!({ "participantId": participant_id }),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn send_chat(
        &self,
        session_id: &SessionId,
        request: &ChatRequest,
    ) -> Result<ChatMessage, BackendError> {
        let data = self
            .post(&format!("/sessions/{session_id}/chat"), request)
            .await?;
        require(data, "chat message")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn chat_history(&self, session_id: &SessionId) -> Result<Vec<ChatMessage>, BackendError> {
        let data = self.get(&format!("/sessions/{session_id}/chat")).await?;
        Ok(data.unwrap_or_default())
    }

    #[instrument(skip_all, fields(session_id = %session_id, action = submission.action_type.as_str()))]
    async fn submit_action(
        &self,
        session_id: &SessionId,
        submission: &ActionSubmission,
    ) -> Result<SessionAction, BackendError> {
        let data = self
            .post(&format!("/sessions/{session_id}/actions"), submission)
            .await?;
        require(data, "session action")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn start_recording(
        &self,
        session_id: &SessionId,
        request: &StartRecordingRequest,
    ) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(&format!("/sessions/{session_id}/recording/start"), request)
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn pause_recording(&self, session_id: &SessionId) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(&format!("/sessions/{session_id}/recording/pause"), &json!({}))
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn resume_recording(&self, session_id: &SessionId) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(
            &format!("/sessions/{session_id}/recording/resume"),
            &json!({}),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn stop_recording(
        &self,
        session_id: &SessionId,
        completion: &RecordingCompletion,
    ) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(&format!("/sessions/{session_id}/recording/stop"), completion)
            .await
            .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id, size = data.len()))]
    async fn upload_recording(
        &self,
        session_id: &SessionId,
        data: Bytes,
    ) -> Result<(), BackendError> {
        let path = format!("/sessions/{session_id}/recording/upload");
        let request = self.authorized(
            self.client
                .post(self.url(&path))
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data),
        );
        self.execute::<IgnoredAny>(request, &path).await.map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn recording_state(&self, session_id: &SessionId) -> Result<RecordingState, BackendError> {
        let data = self
            .get(&format!("/sessions/{session_id}/recording"))
            .await?;
        require(data, "recording state")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn start_transcription(
        &self,
        session_id: &SessionId,
        request: &StartTranscriptionRequest,
    ) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(
            &format!("/sessions/{session_id}/transcription/start"),
            request,
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn stop_transcription(&self, session_id: &SessionId) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(
            &format!("/sessions/{session_id}/transcription/stop"),
            &json!({}),
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn transcript_entries(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TranscriptEntry>, BackendError> {
        let data = self
            .get(&format!("/sessions/{session_id}/transcription/entries"))
            .await?;
        Ok(data.unwrap_or_default())
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn append_transcript_entry(
        &self,
        session_id: &SessionId,
        entry: &TranscriptEntry,
    ) -> Result<(), BackendError> {
        self.post::<_, IgnoredAny>(
            &format!("/sessions/{session_id}/transcription/entries"),
            entry,
        )
        .await
        .map(|_| ())
    }

    #[instrument(skip_all, fields(session_id = %session_id, format = format.as_str()))]
    async fn export_transcript(
        &self,
        session_id: &SessionId,
        format: ExportFormat,
    ) -> Result<String, BackendError> {
        let data = self
            .get(&format!(
                "/sessions/{session_id}/transcription/export?format={}",
                format.as_str()
            ))
            .await?;
        require(data, "transcript export")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn create_invitation(
        &self,
        session_id: &SessionId,
        request: &InvitationRequest,
    ) -> Result<Invitation, BackendError> {
        let data = self
            .post(&format!("/sessions/{session_id}/invitations"), request)
            .await?;
        require(data, "invitation")
    }

    #[instrument(skip_all)]
    async fn accept_invitation(&self, token: &str) -> Result<Session, BackendError> {
        let data = self
            .post(&format!("/invitations/{token}/accept"), &json!({}))
            .await?;
        require(data, "session")
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn cancel_invitation(
        &self,
        session_id: &SessionId,
        invitation_id: &str,
    ) -> Result<(), BackendError> {
        self.delete(&format!("/sessions/{session_id}/invitations/{invitation_id}"))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let client = BackendClient::new(
            "https://api.example.com/v1/",
            SecretString::from("tok-very-secret"),
            Duration::from_secs(1),
        )
        .unwrap();

        let debug_output = format!("{client:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("tok-very-secret"));
        assert_eq!(client.url("/sessions"), "https://api.example.com/v1/sessions");
    }

    #[test]
    fn test_missing_data_is_invalid_response() {
        let result: Result<Session, _> = require(None, "session");
        assert!(matches!(result, Err(BackendError::InvalidResponse(_))));
    }
}
