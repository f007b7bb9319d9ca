//! Transport channel: one bidirectional signaling connection per session.
//!
//! The channel moves opaque envelopes and knows nothing about session
//! semantics. It reconnects with exponential backoff after any closure the
//! caller did not initiate:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ok──▶ Connected ──abnormal close──▶ Reconnecting{1}
//!   ▲                   │                  ▲                              │
//!   │                 error                └──────────ok──────────────────┤
//!   │                   ▼                                                 │ fail
//!   └──disconnect── Disconnected ◀──attempts exhausted── Reconnecting{n} ◀┘
//! ```
//!
//! # Modules
//!
//! - [`backoff`] - delay schedule shared with recording upload retries
//! - [`socket`] - connector abstraction and the WebSocket implementation
//! - [`channel`] - `TransportChannel` actor and its handle

pub mod backoff;
pub mod channel;
pub mod socket;

pub use backoff::BackoffPolicy;
pub use channel::{TransportChannel, TransportHandle};
pub use socket::{SignalingConnector, SocketEvent, SocketLink, WebSocketConnector};

use crate::envelope::SignalingEnvelope;
use crate::errors::CoordinatorError;

/// Transport channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Never connected, or closed by the caller.
    Idle,
    /// Initial handshake in progress.
    Connecting,
    /// Connected and joined.
    Connected,
    /// Waiting for (or running) the given reconnect attempt.
    Reconnecting { attempt: u32 },
    /// Terminal until the next explicit `connect`.
    Disconnected,
}

impl TransportState {
    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            TransportState::Idle => 0,
            TransportState::Connecting => 1,
            TransportState::Connected => 2,
            TransportState::Reconnecting { .. } => 3,
            TransportState::Disconnected => 4,
        }
    }
}

/// Outbound envelope sink.
///
/// Implemented by [`TransportHandle`]; components that transmit envelopes
/// depend on this trait so they can be exercised without a socket.
#[async_trait::async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Transmit one envelope. Fails with `NotConnected` while disconnected.
    async fn send_envelope(&self, envelope: SignalingEnvelope) -> Result<(), CoordinatorError>;
}
