//! Batch job status mapping to the `batch_job_statuses` SMALLINT lookup table.
//!
//! Each variant's discriminant matches the seed data order (1-based) in the
//! lookup table. Over the wire the status is its lowercase name.

use serde::{Deserialize, Serialize};

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

/// Batch job lifecycle status.
///
/// `pending -> processing -> {completed, failed, cancelled}`. The last three
/// are terminal: no transition ever leaves them.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl BatchJobStatus {
    /// All statuses in seed order.
    pub const ALL: [BatchJobStatus; 5] = [
        BatchJobStatus::Pending,
        BatchJobStatus::Processing,
        BatchJobStatus::Completed,
        BatchJobStatus::Failed,
        BatchJobStatus::Cancelled,
    ];

    /// Terminal statuses: completed, failed, cancelled.
    pub const TERMINAL: [BatchJobStatus; 3] = [
        BatchJobStatus::Completed,
        BatchJobStatus::Failed,
        BatchJobStatus::Cancelled,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Resolve a database status ID back to a status.
    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// The lowercase name stored in the lookup table and used in responses.
    pub fn name(self) -> &'static str {
        match self {
            BatchJobStatus::Pending => "pending",
            BatchJobStatus::Processing => "processing",
            BatchJobStatus::Completed => "completed",
            BatchJobStatus::Failed => "failed",
            BatchJobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }
}

impl From<BatchJobStatus> for StatusId {
    fn from(value: BatchJobStatus) -> Self {
        value as StatusId
    }
}

impl std::fmt::Display for BatchJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_job_status_ids_match_seed_data() {
        assert_eq!(BatchJobStatus::Pending.id(), 1);
        assert_eq!(BatchJobStatus::Processing.id(), 2);
        assert_eq!(BatchJobStatus::Completed.id(), 3);
        assert_eq!(BatchJobStatus::Failed.id(), 4);
        assert_eq!(BatchJobStatus::Cancelled.id(), 5);
    }

    #[test]
    fn status_into_status_id() {
        let id: StatusId = BatchJobStatus::Processing.into();
        assert_eq!(id, 2);
    }

    #[test]
    fn from_id_round_trips_every_status() {
        for status in BatchJobStatus::ALL {
            assert_eq!(BatchJobStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(BatchJobStatus::from_id(0), None);
        assert_eq!(BatchJobStatus::from_id(6), None);
    }

    #[test]
    fn only_end_states_are_terminal() {
        assert!(!BatchJobStatus::Pending.is_terminal());
        assert!(!BatchJobStatus::Processing.is_terminal());
        assert!(BatchJobStatus::Completed.is_terminal());
        assert!(BatchJobStatus::Failed.is_terminal());
        assert!(BatchJobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn serializes_as_lowercase_name() {
        let json = serde_json::to_value(BatchJobStatus::Processing).unwrap();
        assert_eq!(json, "processing");
        assert_eq!(BatchJobStatus::Failed.to_string(), "failed");
    }
}
