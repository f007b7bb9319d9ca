//! Session and participant state.
//!
//! The session snapshot is owned by the control actor and published as
//! `Arc<Session>`; readers never write through it.

use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use serde::{Deserialize, Serialize};

/// Session lifecycle status. Locking is tracked separately in
/// [`Session::locked`] so a session can be paused and locked at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Paused,
    Ended,
}

/// Participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Therapist,
    Host,
    Supervisor,
    Observer,
}

impl Role {
    /// Roles allowed to issue moderator actions.
    #[must_use]
    pub const fn can_moderate(&self) -> bool {
        matches!(self, Role::Host | Role::Therapist | Role::Supervisor)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Therapist => "therapist",
            Role::Host => "host",
            Role::Supervisor => "supervisor",
            Role::Observer => "observer",
        }
    }
}

/// Participant connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantStatus {
    Joining,
    Connected,
    WaitingRoom,
    Disconnected,
    Removed,
}

/// Connection-quality estimate reported by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Session participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub status: ParticipantStatus,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    #[serde(default)]
    pub screen_sharing: bool,
    #[serde(default)]
    pub connection_quality: ConnectionQuality,
    /// Warnings issued by moderators during this session.
    #[serde(default)]
    pub warnings: u32,
}

impl Participant {
    /// New participant in `joining` with audio and video on.
    #[must_use]
    pub fn new(id: ParticipantId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
            status: ParticipantStatus::Joining,
            audio_enabled: true,
            video_enabled: true,
            screen_sharing: false,
            connection_quality: ConnectionQuality::Unknown,
            warnings: 0,
        }
    }

    /// Still part of the session (not removed).
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.status != ParticipantStatus::Removed
    }
}

/// Chat message kept in session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: ParticipantId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_duration_minutes: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default = "default_true")]
    pub chat_enabled: bool,
    #[serde(default)]
    pub recording_enabled: bool,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

fn default_true() -> bool {
    true
}

impl Session {
    /// Pending session with no participants.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            status: SessionStatus::Pending,
            locked: false,
            scheduled_start: None,
            estimated_duration_minutes: 0,
            participants: Vec::new(),
            chat_enabled: true,
            recording_enabled: false,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    /// Participant that currently belongs to the session (not removed).
    #[must_use]
    pub fn member(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participant(id).filter(|p| p.is_member())
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    /// Status as shown to users: `locked` wins over `active`.
    #[must_use]
    pub fn display_status(&self) -> &'static str {
        match self.status {
            SessionStatus::Ended => "ended",
            SessionStatus::Active if self.locked => "locked",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Pending => "pending",
        }
    }

    /// Terminal transition: every member is disconnected.
    pub fn end(&mut self) {
        self.status = SessionStatus::Ended;
        for participant in self.participants.iter_mut().filter(|p| p.is_member()) {
            participant.status = ParticipantStatus::Disconnected;
            participant.screen_sharing = false;
        }
    }

    /// Members currently connected.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Connected)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session_with(participants: Vec<Participant>) -> Session {
        let mut session = Session::new(SessionId::from("s-1"));
        session.status = SessionStatus::Active;
        session.participants = participants;
        session
    }

    #[test]
    fn test_display_status_prefers_locked_for_active() {
        let mut session = session_with(vec![]);
        assert_eq!(session.display_status(), "active");

        session.locked = true;
        assert_eq!(session.display_status(), "locked");

        session.status = SessionStatus::Paused;
        assert_eq!(session.display_status(), "paused");
    }

    #[test]
    fn test_end_disconnects_members_only() {
        let mut removed = Participant::new(ParticipantId::from("p-2"), "Bo", Role::Patient);
        removed.status = ParticipantStatus::Removed;
        let mut connected = Participant::new(ParticipantId::from("p-1"), "Al", Role::Host);
        connected.status = ParticipantStatus::Connected;
        connected.screen_sharing = true;

        let mut session = session_with(vec![connected, removed]);
        session.end();

        assert!(session.is_ended());
        assert_eq!(session.participants[0].status, ParticipantStatus::Disconnected);
        assert!(!session.participants[0].screen_sharing);
        assert_eq!(session.participants[1].status, ParticipantStatus::Removed);
        assert_eq!(session.connected_count(), 0);
    }

    #[test]
    fn test_member_excludes_removed() {
        let mut p = Participant::new(ParticipantId::from("p-1"), "Al", Role::Patient);
        p.status = ParticipantStatus::Removed;
        let session = session_with(vec![p]);

        assert!(session.participant(&ParticipantId::from("p-1")).is_some());
        assert!(session.member(&ParticipantId::from("p-1")).is_none());
    }

    #[test]
    fn test_moderator_roles() {
        assert!(Role::Host.can_moderate());
        assert!(Role::Therapist.can_moderate());
        assert!(Role::Supervisor.can_moderate());
        assert!(!Role::Patient.can_moderate());
        assert!(!Role::Observer.can_moderate());
    }

    #[test]
    fn test_session_deserializes_backend_shape() {
        let session: Session = serde_json::from_value(json!({
            "id": "s-7",
            "status": "active",
            "estimatedDurationMinutes": 50,
            "participants": [{
                "id": "p-1",
                "displayName": "Dr. Lee",
                "role": "therapist",
                "status": "waiting-room",
                "audioEnabled": true,
                "videoEnabled": false
            }]
        }))
        .unwrap();

        assert_eq!(session.estimated_duration_minutes, 50);
        assert!(session.chat_enabled);
        assert!(!session.locked);
        assert_eq!(session.participants[0].status, ParticipantStatus::WaitingRoom);
        assert_eq!(session.participants[0].connection_quality, ConnectionQuality::Unknown);
    }
}
