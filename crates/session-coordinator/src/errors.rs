//! Session coordinator error types.
//!
//! Every fault surfaced to the caller is a `CoordinatorError`. Each variant maps
//! to a stable numeric code and a user-facing message; transport internals
//! (URLs, socket errors, backend stack traces) are logged but never rendered.

use thiserror::Error;

/// Session coordinator error type.
///
/// Error codes:
/// - `Connection`, `NotConnected`, `Timeout`: `TRANSPORT` (1)
/// - `Negotiation`: `NEGOTIATION` (2)
/// - `ForbiddenAction`: `FORBIDDEN` (3)
/// - `InvalidTarget`: `NOT_FOUND` (4)
/// - `ActionRejected`, `SessionEnded`: `REJECTED` (5)
/// - `MediaUnavailable`: `MEDIA_UNAVAILABLE` (6)
/// - `Backend`, `Serialization`, `Config`, `Internal`: `INTERNAL_ERROR` (7)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Signaling endpoint unreachable or handshake rejected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Send attempted while the transport channel is not connected.
    #[error("Transport channel is not connected")]
    NotConnected,

    /// Malformed or out-of-sequence offer/answer/candidate.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Local precondition failed; nothing was sent to the backend.
    #[error("Forbidden action: {0}")]
    ForbiddenAction(String),

    /// Target participant (or message) is not part of the session.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Backend refused the action; local state is unchanged.
    #[error("Action rejected: {reason}")]
    ActionRejected { reason: String },

    /// The session has ended; no further actions are accepted.
    #[error("Session has ended")]
    SessionEnded,

    /// No capture stream is available for recording or transcription.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Operation exceeded its time bound.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Backend call failed outside of an action submission.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Envelope or payload could not be encoded/decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor mailbox closed, task failure).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            CoordinatorError::Connection(_)
            | CoordinatorError::NotConnected
            | CoordinatorError::Timeout(_) => 1,
            CoordinatorError::Negotiation(_) => 2,
            CoordinatorError::ForbiddenAction(_) => 3,
            CoordinatorError::InvalidTarget(_) => 4,
            CoordinatorError::ActionRejected { .. } | CoordinatorError::SessionEnded => 5,
            CoordinatorError::MediaUnavailable(_) => 6,
            CoordinatorError::Backend(_)
            | CoordinatorError::Serialization(_)
            | CoordinatorError::Config(_)
            | CoordinatorError::Internal(_) => 7,
        }
    }

    /// Returns a user-facing message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::Connection(_) => {
                "Unable to reach the session server, please check your connection".to_string()
            }
            CoordinatorError::NotConnected => {
                "You are not connected to the session right now".to_string()
            }
            CoordinatorError::Timeout(_) => "The request took too long, please retry".to_string(),
            CoordinatorError::Negotiation(_) => {
                "The media connection could not be established".to_string()
            }
            CoordinatorError::ForbiddenAction(msg) | CoordinatorError::InvalidTarget(msg) => {
                msg.clone()
            }
            CoordinatorError::ActionRejected { reason } => reason.clone(),
            CoordinatorError::SessionEnded => "This session has ended".to_string(),
            CoordinatorError::MediaUnavailable(_) => {
                "No camera or microphone stream is available".to_string()
            }
            CoordinatorError::Backend(_)
            | CoordinatorError::Serialization(_)
            | CoordinatorError::Config(_)
            | CoordinatorError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether the fault is recovered locally through reconnect backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Connection(_))
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(err: serde_json::Error) -> Self {
        CoordinatorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            CoordinatorError::Connection("refused".to_string()).error_code(),
            1
        );
        assert_eq!(CoordinatorError::NotConnected.error_code(), 1);
        assert_eq!(
            CoordinatorError::Negotiation("no offer".to_string()).error_code(),
            2
        );
        assert_eq!(
            CoordinatorError::ForbiddenAction("host".to_string()).error_code(),
            3
        );
        assert_eq!(
            CoordinatorError::InvalidTarget("p-9".to_string()).error_code(),
            4
        );
        assert_eq!(
            CoordinatorError::ActionRejected {
                reason: "nope".to_string()
            }
            .error_code(),
            5
        );
        assert_eq!(CoordinatorError::SessionEnded.error_code(), 5);
        assert_eq!(
            CoordinatorError::MediaUnavailable("no mic".to_string()).error_code(),
            6
        );
        assert_eq!(
            CoordinatorError::Internal("mailbox".to_string()).error_code(),
            7
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = CoordinatorError::Connection("ws://10.0.0.5:8443 refused".to_string());
        assert!(!err.client_message().contains("10.0.0.5"));

        let err = CoordinatorError::Backend("500 from https://api.internal".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_rejected_reason_is_surfaced() {
        let err = CoordinatorError::ActionRejected {
            reason: "Session is locked by supervisor".to_string(),
        };
        assert_eq!(err.client_message(), "Session is locked by supervisor");
        assert_eq!(
            err.to_string(),
            "Action rejected: Session is locked by supervisor"
        );
    }

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(CoordinatorError::Connection("x".to_string()).is_retryable());
        assert!(!CoordinatorError::NotConnected.is_retryable());
        assert!(!CoordinatorError::ActionRejected {
            reason: "x".to_string()
        }
        .is_retryable());
    }
}
