//! libSQL backend: implements `TaskStore` and `ConversationSink`.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ConversationEntry, ConversationSink, EntryUpdate, JobRecord, JobRecordUpdate, NewJobRecord,
    TaskStore, View,
};
use crate::tracker::model::JobResult;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// All job records, oldest first.
    pub async fn list_records(&self) -> Result<Vec<JobRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM asking_tasks ORDER BY id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    /// Create an empty conversation entry for a question.
    pub async fn insert_conversation_entry(
        &self,
        conversation_id: i64,
        question: &str,
    ) -> Result<ConversationEntry, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO conversation_entries (conversation_id, question, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     RETURNING {ENTRY_COLUMNS}"
                ),
                params![conversation_id, question, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_conversation_entry: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_conversation_entry: {e}")))?
            .ok_or_else(|| {
                DatabaseError::Query("insert_conversation_entry: no row returned".to_string())
            })?;
        row_to_entry(&row)
    }

    /// Get a conversation entry by id.
    pub async fn get_conversation_entry(
        &self,
        id: i64,
    ) -> Result<Option<ConversationEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM conversation_entries WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation_entry: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation_entry: {e}"))),
        }
    }

    /// Save a view.
    pub async fn insert_view(&self, name: &str, statement: &str) -> Result<View, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO views (name, statement) VALUES (?1, ?2) RETURNING id, name, statement",
                params![name, statement],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_view: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_view: {e}")))?
            .ok_or_else(|| DatabaseError::Query("insert_view: no row returned".to_string()))?;
        row_to_view(&row)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn serialize_snapshot(snapshot: &JobResult) -> Result<String, DatabaseError> {
    serde_json::to_string(snapshot)
        .map_err(|e| DatabaseError::Serialization(format!("job snapshot: {e}")))
}

const TASK_COLUMNS: &str =
    "id, job_id, question, detail, conversation_id, conversation_entry_id, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, conversation_id, question, sql, view_id, created_at, updated_at";

/// Map a libsql Row to a JobRecord. Column order matches TASK_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<JobRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("asking_tasks row parse: {e}"));

    let detail: String = row.get(3).map_err(parse)?;
    let snapshot: JobResult = serde_json::from_str(&detail)
        .map_err(|e| DatabaseError::Serialization(format!("job snapshot: {e}")))?;
    let created: String = row.get(6).map_err(parse)?;
    let updated: String = row.get(7).map_err(parse)?;

    Ok(JobRecord {
        id: row.get(0).map_err(parse)?,
        job_id: row.get(1).map_err(parse)?,
        question: row.get(2).map_err(parse)?,
        snapshot,
        conversation_id: row.get::<Option<i64>>(4).map_err(parse)?,
        conversation_entry_id: row.get::<Option<i64>>(5).map_err(parse)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Column order matches ENTRY_COLUMNS.
fn row_to_entry(row: &libsql::Row) -> Result<ConversationEntry, DatabaseError> {
    let parse =
        |e: libsql::Error| DatabaseError::Query(format!("conversation_entries row parse: {e}"));

    let created: String = row.get(5).map_err(parse)?;
    let updated: String = row.get(6).map_err(parse)?;

    Ok(ConversationEntry {
        id: row.get(0).map_err(parse)?,
        conversation_id: row.get(1).map_err(parse)?,
        question: row.get(2).map_err(parse)?,
        sql: row.get::<Option<String>>(3).map_err(parse)?,
        view_id: row.get::<Option<i64>>(4).map_err(parse)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_view(row: &libsql::Row) -> Result<View, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("views row parse: {e}"));
    Ok(View {
        id: row.get(0).map_err(parse)?,
        name: row.get(1).map_err(parse)?,
        statement: row.get(2).map_err(parse)?,
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl TaskStore for LibSqlBackend {
    async fn create_record(&self, record: NewJobRecord) -> Result<JobRecord, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let detail = serialize_snapshot(&record.snapshot)?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO asking_tasks (job_id, question, detail, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     RETURNING {TASK_COLUMNS}"
                ),
                params![record.job_id.clone(), record.question, detail, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_record: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_record: {e}")))?
            .ok_or_else(|| DatabaseError::Query("create_record: no row returned".to_string()))?;
        let created = row_to_record(&row)?;

        debug!(id = created.id, job_id = %record.job_id, "Job record created");
        Ok(created)
    }

    async fn update_record(
        &self,
        id: i64,
        update: JobRecordUpdate,
    ) -> Result<JobRecord, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let detail = update
            .snapshot
            .as_ref()
            .map(serialize_snapshot)
            .transpose()?;

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE asking_tasks SET
                        job_id = COALESCE(?1, job_id),
                        detail = COALESCE(?2, detail),
                        conversation_id = COALESCE(?3, conversation_id),
                        conversation_entry_id = COALESCE(?4, conversation_entry_id),
                        updated_at = ?5
                     WHERE id = ?6
                     RETURNING {TASK_COLUMNS}"
                ),
                params![
                    opt_text_owned(update.job_id),
                    opt_text_owned(detail),
                    opt_int(update.conversation_id),
                    opt_int(update.conversation_entry_id),
                    now,
                    id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_record: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("update_record: {e}")))?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "asking_task".to_string(),
                id: id.to_string(),
            })?;
        let updated = row_to_record(&row)?;

        debug!(id, job_id = %updated.job_id, status = %updated.snapshot.status, "Job record updated");
        Ok(updated)
    }

    async fn find_by_job_id(&self, job_id: &str) -> Result<Option<JobRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM asking_tasks WHERE job_id = ?1"),
                params![job_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_job_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_job_id: {e}"))),
        }
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<JobRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM asking_tasks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_by_id: {e}"))),
        }
    }
}

#[async_trait]
impl ConversationSink for LibSqlBackend {
    async fn update_entry(&self, entry_id: i64, update: EntryUpdate) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn()
            .execute(
                "UPDATE conversation_entries SET sql = ?1, view_id = ?2, updated_at = ?3 WHERE id = ?4",
                params![update.sql, opt_int(update.view_id), now, entry_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_entry: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "conversation_entry".to_string(),
                id: entry_id.to_string(),
            });
        }

        debug!(entry_id, view_id = ?update.view_id, "Conversation entry updated");
        Ok(())
    }

    async fn get_view(&self, view_id: i64) -> Result<Option<View>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, statement FROM views WHERE id = ?1",
                params![view_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_view: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_view(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_view: {e}"))),
        }
    }
}
