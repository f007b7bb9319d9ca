//! Integration tests for the backend REST client against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use bytes::Bytes;
use common::secret::SecretString;
use common::types::{ParticipantId, SessionId};
use serde_json::json;
use session_coordinator::backend::{BackendAuthority, BackendClient, BackendError, JoinRequest};
use session_coordinator::control::actions::ActionSubmission;
use session_coordinator::control::{ActionKind, ControlAction, Role};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> BackendClient {
    BackendClient::new(
        server.uri(),
        SecretString::from("test-token"),
        Duration::from_millis(500),
    )
    .unwrap()
}

fn sid() -> SessionId {
    SessionId::from("s-1")
}

#[tokio::test]
async fn test_join_sends_bearer_token_and_parses_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/join"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "participantId": "p-1",
            "displayName": "Dr. Lee",
            "role": "therapist"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "id": "s-1",
                "status": "active",
                "locked": true,
                "estimatedDurationMinutes": 45,
                "participants": [{
                    "id": "p-1",
                    "displayName": "Dr. Lee",
                    "role": "therapist",
                    "status": "connected"
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = client(&server)
        .join_session(
            &sid(),
            &JoinRequest {
                participant_id: ParticipantId::from("p-1"),
                display_name: "Dr. Lee".to_string(),
                role: Role::Therapist,
            },
        )
        .await
        .unwrap();

    assert!(session.locked);
    assert_eq!(session.estimated_duration_minutes, 45);
    assert_eq!(session.display_status(), "locked");
}

#[tokio::test]
async fn test_action_acknowledgment_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/actions"))
        .and(body_partial_json(json!({
            "actionType": "mute",
            "targetId": "p-2",
            "reason": "background noise"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "id": "a-9",
                "actionType": "mute",
                "targetId": "p-2",
                "performedBy": "p-1",
                "timestamp": "2026-03-01T09:30:00Z"
            }
        })))
        .mount(&server)
        .await;

    let submission = ActionSubmission::from_action(
        &ControlAction::Mute {
            target: ParticipantId::from("p-2"),
        },
        Some("background noise".to_string()),
    );
    let action = client(&server)
        .submit_action(&sid(), &submission)
        .await
        .unwrap();

    assert_eq!(action.id, "a-9");
    assert_eq!(action.action_type, ActionKind::Mute);
    assert_eq!(action.performed_by, Some(ParticipantId::from("p-1")));
}

#[tokio::test]
async fn test_error_status_surfaces_backend_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/actions"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "message": "Session is under review"
        })))
        .mount(&server)
        .await;

    let result = client(&server)
        .submit_action(
            &sid(),
            &ActionSubmission::from_action(&ControlAction::Lock, None),
        )
        .await;

    assert_eq!(
        result,
        Err(BackendError::Rejected {
            reason: "Session is under review".to_string()
        })
    );
}

#[tokio::test]
async fn test_unsuccessful_envelope_joins_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/recording/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "errors": ["recording disabled", "quota exceeded"]
        })))
        .mount(&server)
        .await;

    let result = client(&server)
        .start_recording(
            &sid(),
            &session_coordinator::backend::StartRecordingRequest {
                quality: session_coordinator::media::RecordingQuality::Standard,
                bitrate_bps: 1_000_000,
                with_transcription: false,
            },
        )
        .await;

    assert_eq!(
        result,
        Err(BackendError::Rejected {
            reason: "recording disabled; quota exceeded".to_string()
        })
    );
}

#[tokio::test]
async fn test_error_status_without_json_falls_back_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let result = client(&server).get_session(&sid()).await;

    assert_eq!(
        result.err(),
        Some(BackendError::Rejected {
            reason: "HTTP 502".to_string()
        })
    );
}

#[tokio::test]
async fn test_upload_is_octet_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions/s-1/recording/upload"))
        .and(header("content-type", "application/octet-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .upload_recording(&sid(), Bytes::from_static(b"\x1a\x45\xdf\xa3"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_chat_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-1/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;

    let history = client(&server).chat_history(&sid()).await.unwrap();

    assert!(history.is_empty());
}

#[tokio::test]
async fn test_slow_backend_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sessions/s-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "data": {"id": "s-1"}}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let result = client(&server).get_session(&sid()).await;

    assert_eq!(
        result.err(),
        Some(BackendError::Unavailable("request timed out".to_string()))
    );
}
