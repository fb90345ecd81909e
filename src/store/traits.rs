//! Persistence traits: the durable task store and the conversation sink.
//!
//! The tracker only depends on these two traits. `LibSqlBackend` implements
//! both against a single database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::tracker::model::JobResult;

/// A persisted ask job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub job_id: String,
    pub question: String,
    pub snapshot: JobResult,
    pub conversation_id: Option<i64>,
    pub conversation_entry_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new job record.
#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub job_id: String,
    pub question: String,
    pub snapshot: JobResult,
}

/// Partial update of a job record. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct JobRecordUpdate {
    pub job_id: Option<String>,
    pub snapshot: Option<JobResult>,
    pub conversation_id: Option<i64>,
    pub conversation_entry_id: Option<i64>,
}

impl JobRecordUpdate {
    pub fn snapshot(snapshot: JobResult) -> Self {
        Self {
            snapshot: Some(snapshot),
            ..Default::default()
        }
    }

    pub fn job_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Default::default()
        }
    }

    pub fn binding(conversation_id: i64, conversation_entry_id: i64) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            conversation_entry_id: Some(conversation_entry_id),
            ..Default::default()
        }
    }
}

/// A user-facing conversation entry that receives the generated SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationEntry {
    pub id: i64,
    pub conversation_id: i64,
    pub question: String,
    pub sql: Option<String>,
    pub view_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SQL written into a conversation entry when its job finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub sql: String,
    pub view_id: Option<i64>,
}

/// A saved view whose statement answers a question directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub id: i64,
    pub name: String,
    pub statement: String,
}

/// Durable store for ask job records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Fails if a record for the same `job_id` exists.
    async fn create_record(&self, record: NewJobRecord) -> Result<JobRecord, DatabaseError>;

    /// Apply a partial update to the record with the given id.
    ///
    /// Returns `DatabaseError::NotFound` if no such record exists.
    async fn update_record(
        &self,
        id: i64,
        update: JobRecordUpdate,
    ) -> Result<JobRecord, DatabaseError>;

    /// Look up a record by the AI service's job id.
    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<JobRecord>, DatabaseError>;

    /// Look up a record by its own id.
    async fn find_by_id(&self, id: i64) -> Result<Option<JobRecord>, DatabaseError>;
}

/// Conversation entries and the views they may reference.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Write the finished SQL into an entry.
    async fn update_entry(&self, entry_id: i64, update: EntryUpdate) -> Result<(), DatabaseError>;

    /// Load a saved view.
    async fn get_view(&self, view_id: i64) -> Result<Option<View>, DatabaseError>;
}
