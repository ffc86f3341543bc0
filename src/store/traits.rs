//! `RecordStore` trait: single async interface for institution records.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DatabaseError, SubmissionError};
use crate::form::model::{Draft, Record};

/// Point-in-time copy of the database taken before an export.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
}

/// Backend-agnostic record persistence.
///
/// Records are append-only: there is no update or delete.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Time left before `submitter_id` may store another record, or `None`
    /// if they may submit now.
    async fn cooldown_remaining(&self, submitter_id: i64)
    -> Result<Option<Duration>, DatabaseError>;

    /// Whether `submitter_id` has no record inside the cooldown window.
    async fn can_submit(&self, submitter_id: i64) -> Result<bool, DatabaseError> {
        Ok(self.cooldown_remaining(submitter_id).await?.is_none())
    }

    /// Persist a confirmed draft.
    ///
    /// The cooldown check and the insert are one atomic operation; a
    /// violation yields `SubmissionError::Duplicate` and writes nothing.
    async fn save(&self, draft: &Draft) -> Result<Record, SubmissionError>;

    /// Most recent record for a submitter.
    async fn get_latest(&self, submitter_id: i64) -> Result<Option<Record>, DatabaseError>;

    /// Every record, in insertion order.
    async fn get_all(&self) -> Result<Vec<Record>, DatabaseError>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize, DatabaseError>;

    /// Copy the underlying storage for disaster recovery.
    async fn snapshot(&self) -> Result<SnapshotHandle, DatabaseError>;
}
