//! Test fixtures: configuration and session snapshots.

use common::types::{ParticipantId, SessionId};
use session_coordinator::config::Config;
use session_coordinator::control::{
    ChatMessage, Participant, ParticipantStatus, Role, Session, SessionStatus,
};
use std::collections::HashMap;

/// Configuration pointing at unroutable endpoints, with a 100ms reconnect
/// base delay and three attempts.
#[must_use]
pub fn test_config() -> Config {
    test_config_with(&[])
}

/// `test_config` with overrides, e.g. `[("SC_UPLOAD_MAX_RETRIES", "2")]`.
#[must_use]
pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("SC_SIGNALING_URL", "ws://127.0.0.1:1"),
        ("SC_BACKEND_URL", "http://127.0.0.1:1"),
        ("SC_API_TOKEN", "test-token"),
        ("SC_RECONNECT_BASE_DELAY_MS", "100"),
        ("SC_RECONNECT_MAX_ATTEMPTS", "3"),
        ("SC_HANDSHAKE_TIMEOUT_MS", "1000"),
        ("SC_REQUEST_TIMEOUT_MS", "1000"),
        ("SC_UPLOAD_MAX_RETRIES", "3"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("test configuration is valid")
}

/// Connected participant.
#[must_use]
pub fn participant(id: &str, role: Role) -> Participant {
    let mut participant = Participant::new(ParticipantId::from(id), id, role);
    participant.status = ParticipantStatus::Connected;
    participant
}

/// Builder for session snapshots.
#[derive(Debug, Clone)]
pub struct TestSession {
    session: Session,
}

impl TestSession {
    /// Active, unlocked session with no participants.
    #[must_use]
    pub fn active(id: &str) -> Self {
        let mut session = Session::new(SessionId::from(id));
        session.status = SessionStatus::Active;
        session.estimated_duration_minutes = 50;
        Self { session }
    }

    #[must_use]
    pub fn with_host(self, id: &str) -> Self {
        self.with_participant(participant(id, Role::Host))
    }

    #[must_use]
    pub fn with_patient(self, id: &str) -> Self {
        self.with_participant(participant(id, Role::Patient))
    }

    #[must_use]
    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.session.participants.push(participant);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.session.status = status;
        self
    }

    #[must_use]
    pub fn locked(mut self) -> Self {
        self.session.locked = true;
        self
    }

    #[must_use]
    pub fn with_message(mut self, id: &str, sender: &str, text: &str) -> Self {
        self.session.messages.push(ChatMessage {
            id: id.to_string(),
            sender_id: ParticipantId::from(sender),
            text: text.to_string(),
            sent_at: chrono::Utc::now(),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_overrides() {
        let config = test_config_with(&[("SC_UPLOAD_MAX_RETRIES", "1")]);
        assert_eq!(config.upload_max_retries, 1);
        assert_eq!(config.reconnect_max_attempts, 3);
    }

    #[test]
    fn test_session_builder() {
        let session = TestSession::active("s-1")
            .with_host("h")
            .with_patient("p")
            .locked()
            .with_status(SessionStatus::Paused)
            .build();

        assert_eq!(session.participants.len(), 2);
        assert!(session.locked);
        assert_eq!(session.display_status(), "paused");
    }
}
