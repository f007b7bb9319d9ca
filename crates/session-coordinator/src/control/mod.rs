//! Session control.
//!
//! - `model`: session and participant snapshot types
//! - `actions`: moderator action description and the logged record
//! - `rules`: preconditions and mutations
//! - `machine`: the single-writer actor

pub mod actions;
pub mod machine;
pub mod model;
pub mod rules;

pub use actions::{ActionKind, ActionOutcome, Actor, ControlAction, SessionAction};
pub use machine::{ControlNotification, SessionControl, SessionControlHandle};
pub use model::{
    ChatMessage, ConnectionQuality, Participant, ParticipantStatus, Role, Session, SessionStatus,
};
