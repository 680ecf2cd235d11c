use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use warp::ws::Message;

use super::negotiator::{Producer, Transport};
use super::session::ExamSession;
use super::signaling::{ParticipantInfo, ProducerSummary};
use crate::error::{ExamError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn parse(role: &str) -> Result<Role> {
        match role {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(ExamError::InvalidRole(other.to_string())),
        }
    }
}

/// Generate a process-unique participant id
pub fn generate_participant_id() -> String {
    let mut rng = rand::thread_rng();
    format!("user_{:08x}", rng.gen::<u32>())
}

#[derive(Debug)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub sender: mpsc::UnboundedSender<Message>,
    pub transports: HashMap<String, Transport>,
    pub producers: HashMap<String, Producer>,
}

impl Participant {
    pub fn new(id: String, name: String, role: Role, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            name,
            role,
            sender,
            transports: HashMap::new(),
            producers: HashMap::new(),
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        let mut producers: Vec<ProducerSummary> = self
            .producers
            .values()
            .map(|p| ProducerSummary {
                producer_id: p.id.clone(),
                kind: p.kind,
            })
            .collect();
        producers.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));

        ParticipantInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
            producers,
        }
    }

    pub fn transport(&self, transport_id: &str) -> Result<&Transport> {
        self.transports
            .get(transport_id)
            .ok_or_else(|| ExamError::TransportNotReady(transport_id.to_string()))
    }

    pub fn transport_mut(&mut self, transport_id: &str) -> Result<&mut Transport> {
        self.transports
            .get_mut(transport_id)
            .ok_or_else(|| ExamError::TransportNotReady(transport_id.to_string()))
    }

    /// Deliver a frame; false means the socket is gone and the participant
    /// needs disconnect cleanup.
    pub fn send_frame(&self, frame: Message) -> bool {
        self.sender.send(frame).is_ok()
    }
}

/// Mutable room state, guarded by the room's mutex. Every handler step runs
/// inside this critical section; engine awaits happen outside it.
#[derive(Default)]
pub struct RoomState {
    /// Roster in join order
    pub participants: Vec<Participant>,
    pub exam: Option<ExamSession>,
}

impl RoomState {
    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn participant_mut(&mut self, participant_id: &str) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.id == participant_id)
    }

    pub fn teacher(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.role == Role::Teacher)
    }

    pub fn students(&self) -> impl Iterator<Item = &Participant> {
        self.participants
            .iter()
            .filter(|p| p.role == Role::Student)
    }

    pub fn remove_participant(&mut self, participant_id: &str) -> Option<Participant> {
        let index = self
            .participants
            .iter()
            .position(|p| p.id == participant_id)?;
        Some(self.participants.remove(index))
    }

    /// Roster as seen by `participant_id` (everyone but themselves)
    pub fn roster_excluding(&self, participant_id: &str) -> Vec<ParticipantInfo> {
        self.participants
            .iter()
            .filter(|p| p.id != participant_id)
            .map(Participant::info)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn has_running_exam(&self) -> bool {
        self.exam.as_ref().map(|e| e.is_running()).unwrap_or(false)
    }
}

pub struct Room {
    pub code: String,
    pub state: Mutex<RoomState>,
}

impl Room {
    fn new(code: String) -> Arc<Self> {
        Arc::new(Self {
            code,
            state: Mutex::new(RoomState::default()),
        })
    }
}

/// Maps room codes to rooms; rooms appear on first join and disappear once
/// empty with no running exam.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, room_code: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(room_code).cloned()
    }

    /// Fetch the room, creating it on first join.
    pub async fn get_or_create(&self, room_code: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_code) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_code.to_string())
            .or_insert_with(|| {
                tracing::info!(room = %room_code, "Room created");
                Room::new(room_code.to_string())
            })
            .clone()
    }

    /// Delete the room if it is empty and no exam is still running.
    /// Returns true if the room was removed.
    pub async fn remove_if_idle(&self, room_code: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_code) else {
            return false;
        };

        let idle = {
            let state = room.state.lock().await;
            state.is_empty() && !state.has_running_exam()
        };

        if idle {
            rooms.remove(room_code);
            tracing::info!(room = %room_code, "Room removed");
        }
        idle
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::session::ExamSession;

    fn participant(id: &str, role: Role) -> Participant {
        let (tx, _rx) = mpsc::unbounded_channel();
        Participant::new(id.to_string(), format!("name-{}", id), role, tx)
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("teacher").unwrap(), Role::Teacher);
        assert_eq!(Role::parse("student").unwrap(), Role::Student);
        assert!(matches!(
            Role::parse("janitor"),
            Err(ExamError::InvalidRole(_))
        ));
    }

    #[test]
    fn test_roster_preserves_join_order() {
        let mut state = RoomState::default();
        state.participants.push(participant("user_1", Role::Student));
        state.participants.push(participant("user_2", Role::Teacher));
        state.participants.push(participant("user_3", Role::Student));

        let roster = state.roster_excluding("user_2");
        let ids: Vec<&str> = roster.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["user_1", "user_3"]);
    }

    #[test]
    fn test_teacher_lookup() {
        let mut state = RoomState::default();
        state.participants.push(participant("user_1", Role::Student));
        assert!(state.teacher().is_none());

        state.participants.push(participant("user_2", Role::Teacher));
        assert_eq!(state.teacher().unwrap().id, "user_2");
    }

    #[test]
    fn test_remove_participant() {
        let mut state = RoomState::default();
        state.participants.push(participant("user_1", Role::Student));

        let removed = state.remove_participant("user_1").unwrap();
        assert_eq!(removed.id, "user_1");
        assert!(state.is_empty());
        assert!(state.remove_participant("user_1").is_none());
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = RoomRegistry::new();
        let a = registry.get_or_create("EXAM001").await;
        let b = registry.get_or_create("EXAM001").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_if_idle_removes_empty_room() {
        let registry = RoomRegistry::new();
        registry.get_or_create("EXAM001").await;
        assert!(registry.remove_if_idle("EXAM001").await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_if_idle_keeps_occupied_room() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("EXAM001").await;
        room.state
            .lock()
            .await
            .participants
            .push(participant("user_1", Role::Student));

        assert!(!registry.remove_if_idle("EXAM001").await);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_if_idle_keeps_room_with_running_exam() {
        let registry = RoomRegistry::new();
        let room = registry.get_or_create("EXAM001").await;
        room.state.lock().await.exam = Some(ExamSession::start(60));

        // Empty of participants but the countdown still owns the session
        assert!(!registry.remove_if_idle("EXAM001").await);
    }

    #[test]
    fn test_participant_id_shape() {
        let id = generate_participant_id();
        assert!(id.starts_with("user_"));
        assert_eq!(id.len(), "user_".len() + 8);
    }
}
