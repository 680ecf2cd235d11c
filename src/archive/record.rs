use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::exam::session::{Answer, SessionStatus};

/// Finalized exam submission handed to the persistence sink exactly once
/// per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub exam_id: String,
    pub room: String,
    pub status: SessionStatus,
    pub remaining_seconds: u64,
    pub finished_at_ms: u64,
    /// student id -> question id -> answer
    pub answers: HashMap<String, HashMap<String, Answer>>,
    pub submitted_students: Vec<String>,
}
