//! Writing a finished job into its conversation entry.

use crate::error::TrackerError;
use crate::store::{ConversationSink, EntryUpdate};
use crate::tracker::model::JobResult;

/// Copy the first candidate of `result` into a conversation entry.
///
/// A candidate answered from a saved view writes the view's statement.
/// Returns `false` when there is nothing to write.
pub async fn write_conversation_entry(
    sink: &dyn ConversationSink,
    entry_id: i64,
    result: &JobResult,
) -> Result<bool, TrackerError> {
    let Some(candidate) = result.candidates.first() else {
        return Ok(false);
    };

    let update = match candidate.view_id {
        Some(view_id) => {
            let view = sink
                .get_view(view_id)
                .await?
                .ok_or(TrackerError::ViewNotFound { view_id })?;
            EntryUpdate {
                sql: view.statement,
                view_id: Some(view_id),
            }
        }
        None => EntryUpdate {
            sql: candidate.sql.clone(),
            view_id: None,
        },
    };

    sink.update_entry(entry_id, update).await?;
    tracing::info!(entry_id, status = %result.status, "Conversation entry updated with job result");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::tracker::model::{Candidate, JobStatus};

    fn finished(sql: &str, view_id: Option<i64>) -> JobResult {
        JobResult::with_status(JobStatus::Finished).with_candidate(Candidate {
            sql: sql.to_string(),
            summary: String::new(),
            view_id,
        })
    }

    #[tokio::test]
    async fn writes_candidate_sql() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let entry = db.insert_conversation_entry(1, "q").await.unwrap();

        let wrote = write_conversation_entry(&db, entry.id, &finished("SELECT 1", None))
            .await
            .unwrap();
        assert!(wrote);

        let entry = db.get_conversation_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.sql.as_deref(), Some("SELECT 1"));
        assert_eq!(entry.view_id, None);
    }

    #[tokio::test]
    async fn view_candidate_copies_view_statement() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let entry = db.insert_conversation_entry(1, "q").await.unwrap();
        let view = db
            .insert_view("revenue", "SELECT sum(amount) FROM orders")
            .await
            .unwrap();

        write_conversation_entry(&db, entry.id, &finished("SELECT 2", Some(view.id)))
            .await
            .unwrap();

        let entry = db.get_conversation_entry(entry.id).await.unwrap().unwrap();
        assert_eq!(entry.sql.as_deref(), Some("SELECT sum(amount) FROM orders"));
        assert_eq!(entry.view_id, Some(view.id));
    }

    #[tokio::test]
    async fn no_candidates_writes_nothing() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let entry = db.insert_conversation_entry(1, "q").await.unwrap();
        let failed = JobResult::with_status(JobStatus::Failed).into_failure("E", "boom");

        let wrote = write_conversation_entry(&db, entry.id, &failed).await.unwrap();
        assert!(!wrote);
        let entry = db.get_conversation_entry(entry.id).await.unwrap().unwrap();
        assert!(entry.sql.is_none());
    }

    #[tokio::test]
    async fn missing_view_is_an_error() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let entry = db.insert_conversation_entry(1, "q").await.unwrap();
        let err = write_conversation_entry(&db, entry.id, &finished("SELECT 1", Some(77)))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::ViewNotFound { view_id: 77 }));
    }
}
