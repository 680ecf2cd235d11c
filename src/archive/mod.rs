pub mod record;
mod store;

pub use record::SubmissionRecord;
pub use store::{ArchiveError, JsonSubmissionStore, SubmissionSink};

#[cfg(test)]
pub use store::testing;
