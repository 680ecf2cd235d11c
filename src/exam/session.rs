use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::archive::record::SubmissionRecord;
use crate::error::{ExamError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Submitted,
    Expired,
}

/// One answer cell in the ledger; last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub value: String,
    pub modified_at_ms: u64,
}

/// Snapshot handed to late joiners in `roomJoined`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSnapshot {
    pub exam_id: String,
    pub duration_seconds: u64,
    pub remaining_time: u64,
    pub status: SessionStatus,
}

/// Outcome of one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Session no longer running; the countdown should stop.
    Idle,
    /// Decremented, still running.
    Ticked(u64),
    /// This tick won the terminal transition to `expired`.
    Expired,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Authoritative per-room exam record: timer, answer ledger, termination.
///
/// The session only exists in `running` or a terminal state; "not started"
/// is the absence of a session on the room. Both the countdown tick and a
/// manual submit commit their terminal transition by observing `running`
/// under the room lock, so exactly one of them wins.
#[derive(Debug, Clone)]
pub struct ExamSession {
    pub exam_id: String,
    pub duration_secs: u64,
    pub remaining_secs: u64,
    pub status: SessionStatus,
    /// student id -> question id -> answer
    answers: HashMap<String, HashMap<String, Answer>>,
    /// students whose own submission is final
    submitted: HashSet<String>,
}

impl ExamSession {
    pub fn start(duration_secs: u64) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            exam_id: format!("exam_{:08x}", rng.gen::<u32>()),
            duration_secs,
            remaining_secs: duration_secs,
            status: SessionStatus::Running,
            answers: HashMap::new(),
            submitted: HashSet::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn snapshot(&self) -> Option<ExamSnapshot> {
        if !self.is_running() {
            return None;
        }
        Some(ExamSnapshot {
            exam_id: self.exam_id.clone(),
            duration_seconds: self.duration_secs,
            remaining_time: self.remaining_secs,
            status: self.status,
        })
    }

    /// Record one answer for a student. Rejected once the session is
    /// terminal or the student's own submission is final.
    pub fn record_answer(
        &mut self,
        student_id: &str,
        question_id: &str,
        value: String,
    ) -> Result<()> {
        if !self.is_running() {
            return Err(ExamError::AlreadySubmitted(self.exam_id.clone()));
        }
        if self.submitted.contains(student_id) {
            return Err(ExamError::AlreadySubmitted(student_id.to_string()));
        }

        self.answers
            .entry(student_id.to_string())
            .or_default()
            .insert(
                question_id.to_string(),
                Answer {
                    value,
                    modified_at_ms: now_ms(),
                },
            );
        Ok(())
    }

    /// Fold a submit payload's answers into the ledger (last write wins).
    pub fn merge_answers(&mut self, student_id: &str, answers: HashMap<String, String>) {
        let ledger = self.answers.entry(student_id.to_string()).or_default();
        let stamp = now_ms();
        for (question_id, value) in answers {
            ledger.insert(
                question_id,
                Answer {
                    value,
                    modified_at_ms: stamp,
                },
            );
        }
    }

    /// Mark a student's contribution final; idempotent submits are rejected.
    pub fn finalize_student(&mut self, student_id: &str) -> Result<()> {
        if !self.is_running() {
            return Err(ExamError::AlreadySubmitted(self.exam_id.clone()));
        }
        if !self.submitted.insert(student_id.to_string()) {
            return Err(ExamError::AlreadySubmitted(student_id.to_string()));
        }
        Ok(())
    }

    /// True when every listed student has finalized.
    pub fn all_students_finalized<'a>(&self, mut students: impl Iterator<Item = &'a str>) -> bool {
        students.all(|id| self.submitted.contains(id))
    }

    /// One countdown second. Only a `running` session moves; the transition
    /// to `expired` happens on exactly one tick.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_running() {
            return TickOutcome::Idle;
        }

        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.status = SessionStatus::Expired;
            TickOutcome::Expired
        } else {
            TickOutcome::Ticked(self.remaining_secs)
        }
    }

    /// Compare-and-set close: commits `submitted` iff still running.
    pub fn try_close_submitted(&mut self) -> bool {
        if self.is_running() {
            self.status = SessionStatus::Submitted;
            true
        } else {
            false
        }
    }

    /// Final record for the persistence sink.
    pub fn to_record(&self, room_code: &str) -> SubmissionRecord {
        let mut submitted_students: Vec<String> = self.submitted.iter().cloned().collect();
        submitted_students.sort();

        SubmissionRecord {
            exam_id: self.exam_id.clone(),
            room: room_code.to_string(),
            status: self.status,
            remaining_seconds: self.remaining_secs,
            finished_at_ms: now_ms(),
            answers: self.answers.clone(),
            submitted_students,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_running_with_full_clock() {
        let session = ExamSession::start(600);
        assert!(session.is_running());
        assert_eq!(session.remaining_secs, 600);
        assert!(session.exam_id.starts_with("exam_"));
    }

    #[test]
    fn test_record_answer_last_write_wins() {
        let mut session = ExamSession::start(600);
        session.record_answer("user_1", "q1", "a".into()).unwrap();
        session.record_answer("user_1", "q1", "b".into()).unwrap();

        let record = session.to_record("EXAM001");
        assert_eq!(record.answers["user_1"]["q1"].value, "b");
    }

    #[test]
    fn test_record_answer_rejected_after_expiry() {
        let mut session = ExamSession::start(1);
        assert_eq!(session.tick(), TickOutcome::Expired);
        assert!(matches!(
            session.record_answer("user_1", "q1", "a".into()),
            Err(ExamError::AlreadySubmitted(_))
        ));
    }

    #[test]
    fn test_record_answer_rejected_after_own_submit() {
        let mut session = ExamSession::start(600);
        session.finalize_student("user_1").unwrap();
        assert!(session.record_answer("user_1", "q1", "a".into()).is_err());

        // Other students keep writing
        assert!(session.record_answer("user_2", "q1", "a".into()).is_ok());
    }

    #[test]
    fn test_finalize_student_idempotence_rejected() {
        let mut session = ExamSession::start(600);
        session.finalize_student("user_1").unwrap();
        assert!(matches!(
            session.finalize_student("user_1"),
            Err(ExamError::AlreadySubmitted(_))
        ));
    }

    #[test]
    fn test_all_students_finalized() {
        let mut session = ExamSession::start(600);
        session.finalize_student("user_1").unwrap();
        assert!(session.all_students_finalized(["user_1"].into_iter()));
        assert!(!session.all_students_finalized(["user_1", "user_2"].into_iter()));
        // An empty roster is vacuously finalized
        assert!(session.all_students_finalized(std::iter::empty()));
    }

    #[test]
    fn test_tick_expires_exactly_once() {
        let mut session = ExamSession::start(3);
        assert_eq!(session.tick(), TickOutcome::Ticked(2));
        assert_eq!(session.tick(), TickOutcome::Ticked(1));
        assert_eq!(session.tick(), TickOutcome::Expired);
        assert_eq!(session.status, SessionStatus::Expired);

        // Further ticks are no-ops
        assert_eq!(session.tick(), TickOutcome::Idle);
        assert_eq!(session.status, SessionStatus::Expired);
    }

    #[test]
    fn test_submit_beats_tick() {
        let mut session = ExamSession::start(2);
        assert!(session.try_close_submitted());
        assert_eq!(session.status, SessionStatus::Submitted);

        // The racing tick loses and must not expire the session
        assert_eq!(session.tick(), TickOutcome::Idle);
        assert_eq!(session.status, SessionStatus::Submitted);
    }

    #[test]
    fn test_tick_beats_submit() {
        let mut session = ExamSession::start(1);
        assert_eq!(session.tick(), TickOutcome::Expired);
        assert!(!session.try_close_submitted());
        assert_eq!(session.status, SessionStatus::Expired);
    }

    #[test]
    fn test_snapshot_only_while_running() {
        let mut session = ExamSession::start(10);
        let snapshot = session.snapshot().unwrap();
        assert_eq!(snapshot.remaining_time, 10);
        assert_eq!(snapshot.status, SessionStatus::Running);

        session.try_close_submitted();
        assert!(session.snapshot().is_none());
    }

    #[test]
    fn test_record_carries_ledger_and_clock() {
        let mut session = ExamSession::start(10);
        session.record_answer("user_1", "q1", "42".into()).unwrap();
        session.tick();
        session.finalize_student("user_1").unwrap();
        session.try_close_submitted();

        let record = session.to_record("EXAM001");
        assert_eq!(record.room, "EXAM001");
        assert_eq!(record.status, SessionStatus::Submitted);
        assert_eq!(record.remaining_seconds, 9);
        assert_eq!(record.submitted_students, vec!["user_1".to_string()]);
        assert!(record.finished_at_ms > 0);
    }
}
