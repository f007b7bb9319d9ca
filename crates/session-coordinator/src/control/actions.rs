//! Moderator actions.
//!
//! [`ControlAction`] is the single tagged description consumed by
//! `SessionControlHandle::apply`. It is lowered to an [`ActionSubmission`]
//! for the backend, which answers with the logged [`SessionAction`].

use super::model::Role;
use chrono::{DateTime, Utc};
use common::types::ParticipantId;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Action kind as logged and submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Mute,
    Unmute,
    EnableVideo,
    DisableVideo,
    Remove,
    SendToWaitingRoom,
    AdmitFromWaitingRoom,
    Warn,
    Lock,
    Unlock,
    Pause,
    Resume,
    Extend,
    End,
    EmergencyEnd,
    EnableChat,
    DisableChat,
    DeleteMessage,
    ReassignRole,
    ForceReconnect,
    StopScreenShare,
}

impl ActionKind {
    /// Wire name, also used as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Mute => "mute",
            ActionKind::Unmute => "unmute",
            ActionKind::EnableVideo => "enable-video",
            ActionKind::DisableVideo => "disable-video",
            ActionKind::Remove => "remove",
            ActionKind::SendToWaitingRoom => "send-to-waiting-room",
            ActionKind::AdmitFromWaitingRoom => "admit-from-waiting-room",
            ActionKind::Warn => "warn",
            ActionKind::Lock => "lock",
            ActionKind::Unlock => "unlock",
            ActionKind::Pause => "pause",
            ActionKind::Resume => "resume",
            ActionKind::Extend => "extend",
            ActionKind::End => "end",
            ActionKind::EmergencyEnd => "emergency-end",
            ActionKind::EnableChat => "enable-chat",
            ActionKind::DisableChat => "disable-chat",
            ActionKind::DeleteMessage => "delete-message",
            ActionKind::ReassignRole => "reassign-role",
            ActionKind::ForceReconnect => "force-reconnect",
            ActionKind::StopScreenShare => "stop-screen-share",
        }
    }
}

/// A moderator action with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Mute { target: ParticipantId },
    Unmute { target: ParticipantId },
    EnableVideo { target: ParticipantId },
    DisableVideo { target: ParticipantId },
    Remove { target: ParticipantId },
    SendToWaitingRoom { target: ParticipantId },
    AdmitFromWaitingRoom { target: ParticipantId },
    Warn { target: ParticipantId, message: String },
    ReassignRole { target: ParticipantId, role: Role },
    ForceReconnect { target: ParticipantId },
    StopScreenShare { target: ParticipantId },
    Lock,
    Unlock,
    Pause,
    Resume,
    Extend { minutes: u32 },
    End,
    EmergencyEnd,
    EnableChat,
    DisableChat,
    DeleteMessage { message_id: String },
}

impl ControlAction {
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            ControlAction::Mute { .. } => ActionKind::Mute,
            ControlAction::Unmute { .. } => ActionKind::Unmute,
            ControlAction::EnableVideo { .. } => ActionKind::EnableVideo,
            ControlAction::DisableVideo { .. } => ActionKind::DisableVideo,
            ControlAction::Remove { .. } => ActionKind::Remove,
            ControlAction::SendToWaitingRoom { .. } => ActionKind::SendToWaitingRoom,
            ControlAction::AdmitFromWaitingRoom { .. } => ActionKind::AdmitFromWaitingRoom,
            ControlAction::Warn { .. } => ActionKind::Warn,
            ControlAction::ReassignRole { .. } => ActionKind::ReassignRole,
            ControlAction::ForceReconnect { .. } => ActionKind::ForceReconnect,
            ControlAction::StopScreenShare { .. } => ActionKind::StopScreenShare,
            ControlAction::Lock => ActionKind::Lock,
            ControlAction::Unlock => ActionKind::Unlock,
            ControlAction::Pause => ActionKind::Pause,
            ControlAction::Resume => ActionKind::Resume,
            ControlAction::Extend { .. } => ActionKind::Extend,
            ControlAction::End => ActionKind::End,
            ControlAction::EmergencyEnd => ActionKind::EmergencyEnd,
            ControlAction::EnableChat => ActionKind::EnableChat,
            ControlAction::DisableChat => ActionKind::DisableChat,
            ControlAction::DeleteMessage { .. } => ActionKind::DeleteMessage,
        }
    }

    /// Target participant for participant-level actions.
    #[must_use]
    pub fn target(&self) -> Option<&ParticipantId> {
        match self {
            ControlAction::Mute { target }
            | ControlAction::Unmute { target }
            | ControlAction::EnableVideo { target }
            | ControlAction::DisableVideo { target }
            | ControlAction::Remove { target }
            | ControlAction::SendToWaitingRoom { target }
            | ControlAction::AdmitFromWaitingRoom { target }
            | ControlAction::Warn { target, .. }
            | ControlAction::ReassignRole { target, .. }
            | ControlAction::ForceReconnect { target }
            | ControlAction::StopScreenShare { target } => Some(target),
            _ => None,
        }
    }

    /// Action-specific parameters sent to the backend.
    #[must_use]
    pub fn parameters(&self) -> Option<serde_json::Value> {
        match self {
            ControlAction::Warn { message, .. } => Some(json!({ "message": message })),
            ControlAction::ReassignRole { role, .. } => Some(json!({ "role": role })),
            ControlAction::Extend { minutes } => Some(json!({ "minutes": minutes })),
            ControlAction::DeleteMessage { message_id } => {
                Some(json!({ "messageId": message_id }))
            }
            _ => None,
        }
    }

    /// Actions that may not target a host.
    #[must_use]
    pub fn protects_host(&self) -> bool {
        matches!(
            self,
            ControlAction::Mute { .. }
                | ControlAction::DisableVideo { .. }
                | ControlAction::Remove { .. }
                | ControlAction::SendToWaitingRoom { .. }
                | ControlAction::Warn { .. }
                | ControlAction::ForceReconnect { .. }
        )
    }
}

/// Identity issuing an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub participant_id: ParticipantId,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn new(participant_id: ParticipantId, role: Role) -> Self {
        Self {
            participant_id,
            role,
        }
    }
}

/// Body of `POST /sessions/{id}/actions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSubmission {
    pub action_type: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ActionSubmission {
    #[must_use]
    pub fn from_action(action: &ControlAction, reason: Option<String>) -> Self {
        Self {
            action_type: action.kind(),
            target_id: action.target().cloned(),
            parameters: action.parameters(),
            reason,
        }
    }
}

/// Logged action as acknowledged by the backend. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAction {
    pub id: String,
    pub action_type: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Result of a successful `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Acknowledged, logged and applied.
    Applied(SessionAction),
    /// Already in the requested state; nothing submitted.
    NoOp,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_shape() {
        let action = ControlAction::Warn {
            target: ParticipantId::from("p-3"),
            message: "Please unmute only when speaking".to_string(),
        };
        let submission = ActionSubmission::from_action(&action, Some("disruption".to_string()));
        let value = serde_json::to_value(&submission).unwrap();

        assert_eq!(value["actionType"], "warn");
        assert_eq!(value["targetId"], "p-3");
        assert_eq!(
            value["parameters"]["message"],
            "Please unmute only when speaking"
        );
        assert_eq!(value["reason"], "disruption");
    }

    #[test]
    fn test_session_level_actions_have_no_target() {
        for action in [
            ControlAction::Lock,
            ControlAction::Unlock,
            ControlAction::Pause,
            ControlAction::Resume,
            ControlAction::Extend { minutes: 10 },
            ControlAction::End,
            ControlAction::EmergencyEnd,
            ControlAction::EnableChat,
            ControlAction::DisableChat,
        ] {
            assert!(action.target().is_none(), "{:?}", action.kind());
        }

        let submission = ActionSubmission::from_action(&ControlAction::Lock, None);
        let value = serde_json::to_value(&submission).unwrap();
        assert!(value.get("targetId").is_none());
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn test_kind_wire_names_match_serde() {
        for kind in [
            ActionKind::SendToWaitingRoom,
            ActionKind::EmergencyEnd,
            ActionKind::StopScreenShare,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_host_protection_scope() {
        let target = ParticipantId::from("h");
        assert!(ControlAction::Mute { target: target.clone() }.protects_host());
        assert!(ControlAction::Remove { target: target.clone() }.protects_host());
        assert!(!ControlAction::Unmute { target: target.clone() }.protects_host());
        assert!(!ControlAction::AdmitFromWaitingRoom { target }.protects_host());
    }
}
