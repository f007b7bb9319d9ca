//! Signaling wire envelope and typed payloads.
//!
//! The envelope is the unit exchanged over the transport channel:
//!
//! ```text
//! { "type": "ice-candidate" | "offer" | ... ,
//!   "sessionId": "...", "participantId": "...", "data": { ... },
//!   "timestamp": "2026-01-01T10:00:00Z" }
//! ```
//!
//! `participantId` and `data` are omitted when absent.

use crate::control::model::{ConnectionQuality, ParticipantStatus, Role};
use crate::errors::CoordinatorError;
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    IceCandidate,
    Offer,
    Answer,
    Join,
    Leave,
    Chat,
    RecordingStart,
    RecordingStop,
    ParticipantUpdate,
    Transcription,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 10] = [
        EnvelopeKind::IceCandidate,
        EnvelopeKind::Offer,
        EnvelopeKind::Answer,
        EnvelopeKind::Join,
        EnvelopeKind::Leave,
        EnvelopeKind::Chat,
        EnvelopeKind::RecordingStart,
        EnvelopeKind::RecordingStop,
        EnvelopeKind::ParticipantUpdate,
        EnvelopeKind::Transcription,
    ];

    /// Wire name, also used as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::IceCandidate => "ice-candidate",
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::Join => "join",
            EnvelopeKind::Leave => "leave",
            EnvelopeKind::Chat => "chat",
            EnvelopeKind::RecordingStart => "recording-start",
            EnvelopeKind::RecordingStop => "recording-stop",
            EnvelopeKind::ParticipantUpdate => "participant-update",
            EnvelopeKind::Transcription => "transcription",
        }
    }
}

/// Signaling envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingEnvelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl SignalingEnvelope {
    /// Create an envelope stamped with the current time.
    #[must_use]
    pub fn new(
        kind: EnvelopeKind,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind,
            session_id,
            participant_id,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Create an envelope carrying a typed payload.
    pub fn with_payload<T: Serialize>(
        kind: EnvelopeKind,
        session_id: SessionId,
        participant_id: ParticipantId,
        payload: &T,
    ) -> Result<Self, CoordinatorError> {
        let data = serde_json::to_value(payload)?;
        Ok(Self::new(kind, session_id, Some(participant_id), Some(data)))
    }

    /// Join envelope for a participant.
    #[must_use]
    pub fn join(session_id: SessionId, participant_id: ParticipantId) -> Self {
        Self::new(EnvelopeKind::Join, session_id, Some(participant_id), None)
    }

    /// Leave envelope for a participant.
    #[must_use]
    pub fn leave(session_id: SessionId, participant_id: ParticipantId) -> Self {
        Self::new(EnvelopeKind::Leave, session_id, Some(participant_id), None)
    }

    /// Decode the `data` field into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, CoordinatorError> {
        let data = self.data.clone().ok_or_else(|| {
            CoordinatorError::Serialization(format!("{} envelope has no data", self.kind.as_str()))
        })?;
        Ok(serde_json::from_value(data)?)
    }

    /// Encode to a JSON text frame.
    pub fn encode(&self) -> Result<String, CoordinatorError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from a JSON text frame.
    pub fn decode(frame: &str) -> Result<Self, CoordinatorError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// SDP type carried in offers and answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description (offer or answer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Connectivity candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

/// Chat message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub message_id: String,
    pub text: String,
}

/// Authoritative participant change pushed by the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    pub participant_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ParticipantStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_sharing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_quality: Option<ConnectionQuality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Join payload (optional on the wire; defaults applied when absent).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_matches_contract() {
        let envelope = SignalingEnvelope::with_payload(
            EnvelopeKind::IceCandidate,
            SessionId::from("s-1"),
            ParticipantId::from("p-1"),
            &IceCandidate {
                candidate: "candidate:1 1 UDP 2122 10.0.0.1 5000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["participantId"], "p-1");
        assert_eq!(value["data"]["sdpMid"], "0");
        assert_eq!(value["data"]["sdpMLineIndex"], 0);
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let envelope = SignalingEnvelope::new(
            EnvelopeKind::RecordingStop,
            SessionId::from("s-1"),
            None,
            None,
        );
        let value: serde_json::Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();
        assert!(value.get("participantId").is_none());
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_decode_inbound_frame() {
        let frame = json!({
            "type": "participant-update",
            "sessionId": "s-9",
            "participantId": "p-2",
            "data": {"participantId": "p-2", "audioEnabled": false},
            "timestamp": "2026-03-01T09:30:00Z"
        })
        .to_string();

        let envelope = SignalingEnvelope::decode(&frame).unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::ParticipantUpdate);
        assert_eq!(envelope.session_id, SessionId::from("s-9"));
        assert_eq!(envelope.participant_id, Some(ParticipantId::from("p-2")));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let frame = r#"{"type":"teleport","sessionId":"s","timestamp":"2026-03-01T09:30:00Z"}"#;
        assert!(matches!(
            SignalingEnvelope::decode(frame),
            Err(CoordinatorError::Serialization(_))
        ));
    }

    #[test]
    fn test_payload_requires_data() {
        let envelope = SignalingEnvelope::join(SessionId::from("s"), ParticipantId::from("p"));
        let result: Result<SessionDescription, _> = envelope.payload();
        assert!(matches!(result, Err(CoordinatorError::Serialization(_))));
    }

    #[test]
    fn test_participant_update_partial_fields() {
        let envelope = SignalingEnvelope::decode(
            &json!({
                "type": "participant-update",
                "sessionId": "s-9",
                "data": {"participantId": "p-2", "audioEnabled": false, "connectionQuality": "poor"},
                "timestamp": "2026-03-01T09:30:00Z"
            })
            .to_string(),
        )
        .unwrap();

        let update: ParticipantUpdate = envelope.payload().unwrap();
        assert_eq!(update.participant_id, ParticipantId::from("p-2"));
        assert_eq!(update.audio_enabled, Some(false));
        assert_eq!(update.connection_quality, Some(ConnectionQuality::Poor));
        assert!(update.status.is_none());
    }

    #[test]
    fn test_session_description_shape() {
        let desc = SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: "v=0".to_string(),
        };
        let value = serde_json::to_value(&desc).unwrap();
        assert_eq!(value, json!({"type": "answer", "sdp": "v=0"}));
    }
}
