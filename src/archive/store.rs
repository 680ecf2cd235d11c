use std::path::PathBuf;

use futures::future::BoxFuture;
use thiserror::Error;

use super::record::SubmissionRecord;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to write submission: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize submission: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistence sink for finalized exam submissions.
pub trait SubmissionSink: Send + Sync {
    fn archive(&self, record: SubmissionRecord) -> BoxFuture<'_, Result<(), ArchiveError>>;
}

/// Default sink: one pretty-printed JSON file per finished session.
pub struct JsonSubmissionStore {
    output_dir: PathBuf,
}

impl JsonSubmissionStore {
    pub fn new(output_dir: &str) -> Self {
        // Create output directory if it doesn't exist
        std::fs::create_dir_all(output_dir).ok();

        Self {
            output_dir: PathBuf::from(output_dir),
        }
    }

    fn path_for(&self, record: &SubmissionRecord) -> PathBuf {
        self.output_dir
            .join(format!("{}-{}.json", record.room, record.exam_id))
    }
}

impl SubmissionSink for JsonSubmissionStore {
    fn archive(&self, record: SubmissionRecord) -> BoxFuture<'_, Result<(), ArchiveError>> {
        Box::pin(async move {
            let path = self.path_for(&record);
            let body = serde_json::to_vec_pretty(&record)?;
            tokio::fs::write(&path, body).await?;

            tracing::info!(
                room = %record.room,
                exam_id = %record.exam_id,
                status = ?record.status,
                file = %path.display(),
                "Archived exam submission"
            );
            Ok(())
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::session::SessionStatus;
    use rand::Rng;
    use std::collections::HashMap;

    fn sample_record() -> SubmissionRecord {
        SubmissionRecord {
            exam_id: "exam_0000002a".to_string(),
            room: "EXAM001".to_string(),
            status: SessionStatus::Submitted,
            remaining_seconds: 5,
            finished_at_ms: 1_700_000_000_000,
            answers: HashMap::new(),
            submitted_students: vec!["user_1".to_string()],
        }
    }

    #[tokio::test]
    async fn test_json_store_writes_one_file_per_session() {
        let dir = std::env::temp_dir().join(format!(
            "exam-server-test-{:08x}",
            rand::thread_rng().gen::<u32>()
        ));
        let store = JsonSubmissionStore::new(dir.to_str().unwrap());

        store.archive(sample_record()).await.unwrap();

        let path = dir.join("EXAM001-exam_0000002a.json");
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: SubmissionRecord = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.exam_id, "exam_0000002a");
        assert_eq!(parsed.status, SessionStatus::Submitted);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_recording_sink_counts_writes() {
        let sink = testing::RecordingSink::new();
        assert_eq!(sink.len(), 0);
        sink.archive(sample_record()).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.last().unwrap().room, "EXAM001");
    }
}
