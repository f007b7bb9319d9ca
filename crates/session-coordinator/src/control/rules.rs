//! Preconditions and state mutations for moderator actions.
//!
//! Both functions are pure over a [`Session`]. The control actor runs
//! [`admit`] before submitting, and [`apply_action`] on a copy of the snapshot
//! only after the backend acknowledged the action.

use super::actions::{Actor, ControlAction};
use super::model::{ParticipantStatus, Role, Session, SessionStatus};
use crate::errors::CoordinatorError;

/// Result of the local precondition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Submit to the backend.
    Submit,
    /// Already in the requested state.
    NoOp,
}

fn forbidden(message: &str) -> CoordinatorError {
    CoordinatorError::ForbiddenAction(message.to_string())
}

/// Check an action against the current snapshot.
///
/// Order: terminal session, acting role, target membership, then the
/// action-specific rule.
pub fn admit(
    session: &Session,
    actor: &Actor,
    action: &ControlAction,
) -> Result<Admission, CoordinatorError> {
    if session.is_ended() {
        return Err(CoordinatorError::SessionEnded);
    }
    if !actor.role.can_moderate() {
        return Err(CoordinatorError::ForbiddenAction(format!(
            "A {} cannot moderate this session",
            actor.role.as_str()
        )));
    }

    if let Some(target_id) = action.target() {
        let target = session.member(target_id).ok_or_else(|| {
            CoordinatorError::InvalidTarget(format!(
                "Participant {target_id} is not part of this session"
            ))
        })?;

        if action.protects_host() && target.role == Role::Host {
            return Err(forbidden("This action cannot target the host"));
        }

        match action {
            ControlAction::AdmitFromWaitingRoom { .. }
                if target.status != ParticipantStatus::WaitingRoom =>
            {
                return Err(forbidden("Participant is not in the waiting room"));
            }
            ControlAction::SendToWaitingRoom { .. }
                if !matches!(
                    target.status,
                    ParticipantStatus::Connected | ParticipantStatus::Joining
                ) =>
            {
                return Err(forbidden("Participant is not connected"));
            }
            ControlAction::StopScreenShare { .. } if !target.screen_sharing => {
                return Err(forbidden("Participant is not sharing their screen"));
            }
            _ => {}
        }
        return Ok(Admission::Submit);
    }

    match action {
        ControlAction::Lock if session.locked => Err(forbidden("Session is already locked")),
        ControlAction::Unlock if !session.locked => Ok(Admission::NoOp),
        ControlAction::Pause if session.status != SessionStatus::Active => {
            Err(forbidden("Only an active session can be paused"))
        }
        ControlAction::Resume => match session.status {
            SessionStatus::Paused => Ok(Admission::Submit),
            SessionStatus::Active => Ok(Admission::NoOp),
            _ => Err(forbidden("Only a paused session can be resumed")),
        },
        ControlAction::Extend { minutes: 0 } => {
            Err(forbidden("Extension must be at least one minute"))
        }
        ControlAction::End if session.status != SessionStatus::Active => {
            Err(forbidden("Only an active session can be ended"))
        }
        ControlAction::End if session.locked => {
            Err(forbidden("Unlock the session before ending it"))
        }
        ControlAction::DeleteMessage { message_id }
            if !session.messages.iter().any(|m| &m.id == message_id) =>
        {
            Err(CoordinatorError::InvalidTarget(format!(
                "Message {message_id} does not exist"
            )))
        }
        _ => Ok(Admission::Submit),
    }
}

/// Apply an acknowledged action.
pub fn apply_action(session: &mut Session, action: &ControlAction) {
    if let Some(target_id) = action.target() {
        let Some(target) = session.participant_mut(target_id) else {
            return;
        };
        match action {
            ControlAction::Mute { .. } => target.audio_enabled = false,
            ControlAction::Unmute { .. } => target.audio_enabled = true,
            ControlAction::EnableVideo { .. } => target.video_enabled = true,
            ControlAction::DisableVideo { .. } => target.video_enabled = false,
            ControlAction::Remove { .. } => {
                target.status = ParticipantStatus::Removed;
                target.screen_sharing = false;
            }
            ControlAction::SendToWaitingRoom { .. } => {
                target.status = ParticipantStatus::WaitingRoom;
                target.screen_sharing = false;
            }
            ControlAction::AdmitFromWaitingRoom { .. } => {
                target.status = ParticipantStatus::Connected;
            }
            ControlAction::Warn { .. } => target.warnings = target.warnings.saturating_add(1),
            ControlAction::ReassignRole { role, .. } => target.role = *role,
            ControlAction::ForceReconnect { .. } => {
                target.status = ParticipantStatus::Joining;
                target.screen_sharing = false;
            }
            ControlAction::StopScreenShare { .. } => target.screen_sharing = false,
            _ => {}
        }
        return;
    }

    match action {
        ControlAction::Lock => session.locked = true,
        ControlAction::Unlock => session.locked = false,
        ControlAction::Pause => session.status = SessionStatus::Paused,
        ControlAction::Resume => session.status = SessionStatus::Active,
        ControlAction::Extend { minutes } => {
            session.estimated_duration_minutes =
                session.estimated_duration_minutes.saturating_add(*minutes);
        }
        ControlAction::End | ControlAction::EmergencyEnd => session.end(),
        ControlAction::EnableChat => session.chat_enabled = true,
        ControlAction::DisableChat => session.chat_enabled = false,
        ControlAction::DeleteMessage { message_id } => {
            session.messages.retain(|m| &m.id != message_id);
        }
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::control::model::{ChatMessage, Participant};
    use chrono::Utc;
    use common::types::{ParticipantId, SessionId};

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    fn host() -> Actor {
        Actor::new(pid("host"), Role::Host)
    }

    fn session() -> Session {
        let mut session = Session::new(SessionId::from("s-1"));
        session.status = SessionStatus::Active;

        let mut h = Participant::new(pid("host"), "Host", Role::Host);
        h.status = ParticipantStatus::Connected;
        let mut patient = Participant::new(pid("pat"), "Pat", Role::Patient);
        patient.status = ParticipantStatus::Connected;
        let mut waiting = Participant::new(pid("wait"), "Wes", Role::Patient);
        waiting.status = ParticipantStatus::WaitingRoom;
        let mut gone = Participant::new(pid("gone"), "Gil", Role::Observer);
        gone.status = ParticipantStatus::Removed;

        session.participants = vec![h, patient, waiting, gone];
        session.messages.push(ChatMessage {
            id: "m-1".to_string(),
            sender_id: pid("pat"),
            text: "hello".to_string(),
            sent_at: Utc::now(),
        });
        session
    }

    #[test]
    fn test_patient_cannot_moderate() {
        let actor = Actor::new(pid("pat"), Role::Patient);
        let err = admit(&session(), &actor, &ControlAction::Lock).unwrap_err();
        assert!(matches!(err, CoordinatorError::ForbiddenAction(_)));
    }

    #[test]
    fn test_target_must_be_member() {
        for target in ["nobody", "gone"] {
            let err = admit(
                &session(),
                &host(),
                &ControlAction::Mute { target: pid(target) },
            )
            .unwrap_err();
            assert!(matches!(err, CoordinatorError::InvalidTarget(_)), "{target}");
        }
    }

    #[test]
    fn test_host_is_protected() {
        let supervisor = Actor::new(pid("sup"), Role::Supervisor);
        let err = admit(
            &session(),
            &supervisor,
            &ControlAction::Mute { target: pid("host") },
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::ForbiddenAction(_)));

        assert_eq!(
            admit(
                &session(),
                &supervisor,
                &ControlAction::Unmute { target: pid("host") }
            )
            .unwrap(),
            Admission::Submit
        );
    }

    #[test]
    fn test_waiting_room_rules() {
        let s = session();
        assert_eq!(
            admit(&s, &host(), &ControlAction::AdmitFromWaitingRoom { target: pid("wait") })
                .unwrap(),
            Admission::Submit
        );
        assert!(admit(&s, &host(), &ControlAction::AdmitFromWaitingRoom { target: pid("pat") })
            .is_err());
        assert!(admit(&s, &host(), &ControlAction::SendToWaitingRoom { target: pid("wait") })
            .is_err());
    }

    #[test]
    fn test_idempotent_unlock_and_resume() {
        let s = session();
        assert_eq!(admit(&s, &host(), &ControlAction::Unlock).unwrap(), Admission::NoOp);
        assert_eq!(admit(&s, &host(), &ControlAction::Resume).unwrap(), Admission::NoOp);
    }

    #[test]
    fn test_lock_pause_end_preconditions() {
        let mut s = session();
        s.locked = true;
        assert!(admit(&s, &host(), &ControlAction::Lock).is_err());
        assert!(admit(&s, &host(), &ControlAction::End).is_err());
        assert_eq!(admit(&s, &host(), &ControlAction::Unlock).unwrap(), Admission::Submit);

        s.status = SessionStatus::Paused;
        assert!(admit(&s, &host(), &ControlAction::Pause).is_err());
        assert_eq!(admit(&s, &host(), &ControlAction::Resume).unwrap(), Admission::Submit);
        assert_eq!(
            admit(&s, &host(), &ControlAction::EmergencyEnd).unwrap(),
            Admission::Submit
        );
    }

    #[test]
    fn test_ended_session_refuses_everything() {
        let mut s = session();
        s.end();
        for action in [ControlAction::EmergencyEnd, ControlAction::Unlock, ControlAction::Resume] {
            assert_eq!(
                admit(&s, &host(), &action).unwrap_err(),
                CoordinatorError::SessionEnded
            );
        }
    }

    #[test]
    fn test_extend_and_delete_message_rules() {
        let s = session();
        assert!(admit(&s, &host(), &ControlAction::Extend { minutes: 0 }).is_err());
        let err = admit(
            &s,
            &host(),
            &ControlAction::DeleteMessage {
                message_id: "m-404".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTarget(_)));
    }

    #[test]
    fn test_apply_participant_actions() {
        let mut s = session();
        apply_action(&mut s, &ControlAction::Mute { target: pid("pat") });
        apply_action(
            &mut s,
            &ControlAction::Warn {
                target: pid("pat"),
                message: "x".to_string(),
            },
        );
        apply_action(&mut s, &ControlAction::AdmitFromWaitingRoom { target: pid("wait") });
        apply_action(
            &mut s,
            &ControlAction::ReassignRole {
                target: pid("wait"),
                role: Role::Observer,
            },
        );

        let pat = s.participant(&pid("pat")).unwrap();
        assert!(!pat.audio_enabled);
        assert_eq!(pat.warnings, 1);
        let wait = s.participant(&pid("wait")).unwrap();
        assert_eq!(wait.status, ParticipantStatus::Connected);
        assert_eq!(wait.role, Role::Observer);
    }

    #[test]
    fn test_apply_session_actions() {
        let mut s = session();
        s.estimated_duration_minutes = 50;
        apply_action(&mut s, &ControlAction::Extend { minutes: 15 });
        apply_action(&mut s, &ControlAction::DisableChat);
        apply_action(
            &mut s,
            &ControlAction::DeleteMessage {
                message_id: "m-1".to_string(),
            },
        );
        assert_eq!(s.estimated_duration_minutes, 65);
        assert!(!s.chat_enabled);
        assert!(s.messages.is_empty());

        s.locked = true;
        s.status = SessionStatus::Paused;
        apply_action(&mut s, &ControlAction::EmergencyEnd);
        assert!(s.is_ended());
        assert_eq!(
            s.participant(&pid("pat")).unwrap().status,
            ParticipantStatus::Disconnected
        );
        assert_eq!(
            s.participant(&pid("gone")).unwrap().status,
            ParticipantStatus::Removed
        );
    }
}
