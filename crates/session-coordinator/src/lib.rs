//! Session Coordinator Library
//!
//! Client-side coordinator for a real-time multi-party video session:
//!
//! - Signaling transport with reconnect and exponential backoff
//! - Typed publish/subscribe dispatch of inbound envelopes and state changes
//! - Offer/answer/candidate sequencing for the peer link
//! - Moderator actions gated locally and acknowledged by the backend before
//!   they mutate the session snapshot
//! - Recording and transcription lifecycles with utterance-keyed transcript
//!   dedup
//!
//! # Architecture
//!
//! ```text
//! SessionCoordinator (one per session)
//! ├── TransportChannel actor     (socket link, reconnect timer)
//! ├── EventDispatcher            (ordered handlers per topic)
//! ├── NegotiationOrchestrator    (inbound pump + peer sequencing)
//! ├── SessionControl actor       (single writer of the snapshot)
//! ├── RecordingActor             (ticker, chunk buffer, upload)
//! └── TranscriptionActor         (recognizer pump, transcript buffer)
//! ```
//!
//! Browser-side collaborators (peer connection, recorder, speech recognizer)
//! and the backend are injected through traits so the core runs without
//! devices or network in tests.
//!
//! # Modules
//!
//! - [`backend`] - backend authority trait and REST client
//! - [`config`] - configuration from environment
//! - [`control`] - session model, moderator actions and the control actor
//! - [`coordinator`] - per-session wiring and lifecycle
//! - [`dispatcher`] - publish/subscribe registry
//! - [`envelope`] - signaling wire envelope
//! - [`errors`] - error taxonomy
//! - [`media`] - recording and transcription
//! - [`negotiation`] - offer/answer/candidate sequencing
//! - [`observability`] - metrics
//! - [`transport`] - signaling channel

pub mod backend;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod media;
pub mod negotiation;
pub mod observability;
pub mod transport;

pub use coordinator::{CoordinatorDeps, LocalParticipant, SessionCoordinator};
pub use errors::CoordinatorError;
