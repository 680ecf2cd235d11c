use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use warp::ws::Message;

use super::room::Role;
use super::session::ExamSnapshot;
use crate::error::ErrorCode;
use crate::media::{DtlsParameters, MediaKind, RtpParameters, TransportOptions};

/// Messages clients send over the wire, framed as `{type, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        room: String,
        username: String,
        role: String,
    },

    CreateWebRtcTransport {
        sender: bool,
    },

    #[serde(rename_all = "camelCase")]
    ConnectTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },

    #[serde(rename_all = "camelCase")]
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },

    #[serde(rename_all = "camelCase")]
    StartExam {
        duration_seconds: u64,
    },

    #[serde(rename_all = "camelCase")]
    RecordAnswer {
        question_id: String,
        value: String,
    },

    #[serde(rename_all = "camelCase")]
    SubmitExam {
        exam_id: String,
        student_id: String,
        #[serde(default)]
        answers: HashMap<String, String>,
        remaining_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    ProctorMessage {
        message: String,
        #[serde(default)]
        target_student_id: Option<String>,
    },
}

/// Media stream already flowing when a participant joins late
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: String,
    pub kind: MediaKind,
}

/// Roster entry shared in `roomJoined`; carries existing producers so a late
/// joiner can catch up on streams announced before it arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: String,
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub producers: Vec<ProducerSummary>,
}

/// Messages the server sends to clients, framed as `{type, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        participants: Vec<ParticipantInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        exam_session: Option<ExamSnapshot>,
    },

    TransportCreated(TransportOptions),

    #[serde(rename_all = "camelCase")]
    TransportConnected {
        transport_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ProducerCreated {
        producer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    NewProducer {
        producer_id: String,
        participant_id: String,
        kind: MediaKind,
    },

    UserJoined {
        id: String,
        name: String,
        role: Role,
    },

    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: String,
    },

    ProctorMessage {
        message: String,
        from: String,
    },

    #[serde(rename_all = "camelCase")]
    ExamStarted {
        exam_id: String,
        duration_seconds: u64,
        remaining_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    AnswerRecorded {
        question_id: String,
    },

    #[serde(rename_all = "camelCase")]
    SubmissionReceived {
        exam_id: String,
        student_id: String,
    },

    #[serde(rename_all = "camelCase")]
    StudentSubmitted {
        student_id: String,
        remaining_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    ExamSubmitted {
        exam_id: String,
        remaining_time: u64,
    },

    #[serde(rename_all = "camelCase")]
    ExamExpired {
        remaining_time: u64,
    },

    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Serialize into a WebSocket text frame.
    pub fn to_ws(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::text(text)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server message");
                None
            }
        }
    }
}
