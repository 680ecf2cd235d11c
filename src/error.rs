use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaEngineError;

/// Error codes surfaced to clients in `error{code,message}` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidRole,
    RoleConflict,
    RoomFull,
    RoomNotFound,
    TransportNotReady,
    NegotiationFailed,
    AlreadyRunning,
    AlreadySubmitted,
    Malformed,
}

/// Protocol and state errors for the exam coordinator
#[derive(Debug, Error)]
pub enum ExamError {
    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("room {0} already has a teacher")]
    RoleConflict(String),

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("transport {0} is not connected")]
    TransportNotReady(String),

    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("exam already running in room {0}")]
    AlreadyRunning(String),

    #[error("submission already finalized for {0}")]
    AlreadySubmitted(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Convenience type alias for Results using ExamError
pub type Result<T> = std::result::Result<T, ExamError>;

impl ExamError {
    /// Wire code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            ExamError::InvalidRole(_) => ErrorCode::InvalidRole,
            ExamError::RoleConflict(_) => ErrorCode::RoleConflict,
            ExamError::RoomFull(_) => ErrorCode::RoomFull,
            ExamError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            ExamError::TransportNotReady(_) => ErrorCode::TransportNotReady,
            ExamError::NegotiationFailed(_) => ErrorCode::NegotiationFailed,
            ExamError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
            ExamError::AlreadySubmitted(_) => ErrorCode::AlreadySubmitted,
            ExamError::Malformed(_) => ErrorCode::Malformed,
        }
    }

    /// Helper to create Malformed errors with context
    pub fn malformed(msg: impl Into<String>) -> Self {
        ExamError::Malformed(msg.into())
    }
}

/// Engine failures surface to clients as NegotiationFailed
impl From<MediaEngineError> for ExamError {
    fn from(err: MediaEngineError) -> Self {
        ExamError::NegotiationFailed(err.to_string())
    }
}
