//! Audience-scoped event fan-out.
//!
//! Delivery is best-effort per connection: each helper returns the ids whose
//! sockets were already dead so the caller can run disconnect cleanup, while
//! delivery to the rest of the audience proceeds regardless.

use super::room::{Role, RoomState};
use super::signaling::ServerMessage;

fn deliver<'a>(
    targets: impl Iterator<Item = &'a super::room::Participant>,
    message: &ServerMessage,
) -> Vec<String> {
    let Some(frame) = message.to_ws() else {
        return Vec::new();
    };

    let mut dead = Vec::new();
    for participant in targets {
        if !participant.send_frame(frame.clone()) {
            tracing::warn!(
                participant_id = %participant.id,
                "Dropping event for dead connection"
            );
            dead.push(participant.id.clone());
        }
    }
    dead
}

/// Every participant in the room.
pub fn to_all(state: &RoomState, message: &ServerMessage) -> Vec<String> {
    deliver(state.participants.iter(), message)
}

/// Every participant except `exclude_id` (join/leave/producer events).
pub fn to_others(state: &RoomState, exclude_id: &str, message: &ServerMessage) -> Vec<String> {
    deliver(
        state.participants.iter().filter(|p| p.id != exclude_id),
        message,
    )
}

/// All students, never the teacher.
pub fn to_students(state: &RoomState, message: &ServerMessage) -> Vec<String> {
    deliver(
        state
            .participants
            .iter()
            .filter(|p| p.role == Role::Student),
        message,
    )
}

/// One addressed student. `None` when no such student is in the room;
/// otherwise the dead list (at most the addressee).
pub fn to_student(state: &RoomState, student_id: &str, message: &ServerMessage) -> Option<Vec<String>> {
    let target = state
        .participants
        .iter()
        .find(|p| p.id == student_id && p.role == Role::Student)?;
    Some(deliver(std::iter::once(target), message))
}

/// The room's teacher, if connected.
pub fn to_teacher(state: &RoomState, message: &ServerMessage) -> Vec<String> {
    deliver(state.teacher().into_iter(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::room::Participant;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use warp::ws::Message;

    fn join(state: &mut RoomState, id: &str, role: Role) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .participants
            .push(Participant::new(id.to_string(), id.to_string(), role, tx));
        rx
    }

    fn message() -> ServerMessage {
        ServerMessage::UserLeft {
            user_id: "user_9".to_string(),
        }
    }

    #[tokio::test]
    async fn test_to_others_excludes_sender() {
        let mut state = RoomState::default();
        let mut teacher_rx = join(&mut state, "teacher_1", Role::Teacher);
        let mut student_rx = join(&mut state, "student_1", Role::Student);

        let dead = to_others(&state, "student_1", &message());
        assert!(dead.is_empty());
        assert!(teacher_rx.try_recv().is_ok());
        assert!(student_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_to_students_never_reaches_teacher() {
        let mut state = RoomState::default();
        let mut teacher_rx = join(&mut state, "teacher_1", Role::Teacher);
        let mut s1_rx = join(&mut state, "student_1", Role::Student);
        let mut s2_rx = join(&mut state, "student_2", Role::Student);

        to_students(&state, &message());
        assert!(teacher_rx.try_recv().is_err());
        assert!(s1_rx.try_recv().is_ok());
        assert!(s2_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_to_student_addresses_one() {
        let mut state = RoomState::default();
        let mut s1_rx = join(&mut state, "student_1", Role::Student);
        let mut s2_rx = join(&mut state, "student_2", Role::Student);

        let dead = to_student(&state, "student_2", &message()).unwrap();
        assert!(dead.is_empty());
        assert!(s1_rx.try_recv().is_err());
        assert!(s2_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_to_student_unknown_target() {
        let mut state = RoomState::default();
        join(&mut state, "student_1", Role::Student);
        assert!(to_student(&state, "student_9", &message()).is_none());
    }

    #[tokio::test]
    async fn test_teacher_is_not_an_addressable_student() {
        let mut state = RoomState::default();
        join(&mut state, "teacher_1", Role::Teacher);
        assert!(to_student(&state, "teacher_1", &message()).is_none());
    }

    #[tokio::test]
    async fn test_dead_socket_reported_without_aborting_fanout() {
        let mut state = RoomState::default();
        let dead_rx = join(&mut state, "student_1", Role::Student);
        let mut live_rx = join(&mut state, "student_2", Role::Student);
        drop(dead_rx);

        let dead = to_all(&state, &message());
        assert_eq!(dead, vec!["student_1".to_string()]);
        assert!(live_rx.try_recv().is_ok());
    }
}
