//! Task tracker: creates ask jobs, drives them to a terminal state and
//! answers reads against memory first, the store second.
//!
//! The public operations are safe to call concurrently from many request
//! handlers. The poll loop (`spawn_poll_loop`) calls [`TaskTracker::poll_tick`]
//! on a fixed interval; each tick polls every eligible job as its own task.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::remote::RemoteJobClient;
use crate::store::{ConversationSink, JobRecordUpdate, NewJobRecord, TaskStore};
use crate::tracker::finalize::write_conversation_entry;
use crate::tracker::model::{AskContext, JobResult, JobStatus, ResumeOptions};
use crate::tracker::table::{InFlightGuard, JobTable, PersistTarget, TrackedJob};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Jobs polled (successfully or not).
    pub polled: usize,
    /// Jobs whose poll returned an error.
    pub failed: usize,
    /// Jobs evicted from memory.
    pub evicted: usize,
}

/// Per-job fields the state machine needs after recording a new snapshot.
struct Recorded {
    question: String,
    resumed_from_cancelled: bool,
}

/// The ask job supervisor. Cheap to clone; clones share one job table.
#[derive(Clone)]
pub struct TaskTracker {
    config: TrackerConfig,
    remote: Arc<dyn RemoteJobClient>,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn ConversationSink>,
    table: Arc<JobTable>,
}

impl TaskTracker {
    pub fn new(
        config: TrackerConfig,
        remote: Arc<dyn RemoteJobClient>,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn ConversationSink>,
    ) -> Self {
        Self {
            config,
            remote,
            store,
            sink,
            table: JobTable::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    // ── Creation ────────────────────────────────────────────────────

    /// Submit a question and start tracking the job. Returns the job id.
    ///
    /// With `resume`, the new job takes over the record and conversation
    /// entry of a previously cancelled job and is polled once right away.
    pub async fn create_job(
        &self,
        question: &str,
        context: AskContext,
        resume: Option<ResumeOptions>,
    ) -> Result<String, TrackerError> {
        let resume = resume.map(validate_resume).transpose()?;

        let job_id = self.remote.submit(question, &context).await?;
        let mut job = TrackedJob::new(job_id.clone(), question);

        let Some((previous_id, entry_id)) = resume else {
            self.table.insert(job);
            info!(job_id = %job_id, "Ask job created");
            return Ok(job_id);
        };

        if let Err(e) = self
            .store
            .update_record(previous_id, JobRecordUpdate::job_id(&job_id))
            .await
        {
            warn!(job_id = %job_id, previous_id, "Resume failed, cancelling new job: {e}");
            if let Err(cancel_err) = self.remote.cancel(&job_id).await {
                warn!(job_id = %job_id, "Failed to cancel orphaned job: {cancel_err}");
            }
            return Err(e.into());
        }

        if let Some(superseded) = self.table.supersede(previous_id) {
            debug!(job_id = %superseded, previous_id, "Detached superseded job");
        }

        job.persisted_id = Some(previous_id);
        job.bound_entry_id = Some(entry_id);
        job.resumed_from_cancelled = true;
        let guard = self.table.insert_claimed(job);
        info!(job_id = %job_id, previous_id, entry_id, "Ask job resumed from cancelled");

        if let Err(e) = self.poll_job(&guard).await {
            warn!(job_id = %job_id, "Eager poll of resumed job failed: {e}");
        }

        Ok(job_id)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Latest result for a job: memory first, then the store.
    pub async fn get_result(&self, job_id: &str) -> Result<Option<JobResult>, TrackerError> {
        if let Some(result) = self.table.latest_result(job_id) {
            return Ok(Some(result));
        }
        let record = self.store.find_by_job_id(job_id).await?;
        Ok(record.map(|r| r.snapshot))
    }

    /// Latest result for a store record id.
    pub async fn get_result_by_persisted_id(
        &self,
        persisted_id: i64,
    ) -> Result<Option<JobResult>, TrackerError> {
        if let Some(job_id) = self.table.job_for_persisted_id(persisted_id) {
            return self.get_result(&job_id).await;
        }
        let record = self.store.find_by_id(persisted_id).await?;
        Ok(record.map(|r| r.snapshot))
    }

    /// Copy of the in-memory entry for a job, if it is still tracked.
    pub fn get_tracked(&self, job_id: &str) -> Option<TrackedJob> {
        self.table.get(job_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.table.len()
    }

    // ── Cancellation & binding ──────────────────────────────────────

    /// Ask the service to stop a job. Local state changes on the next poll.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), TrackerError> {
        self.remote.cancel(job_id).await?;
        info!(job_id, "Ask job cancellation requested");
        Ok(())
    }

    /// Bind a tracked job to a conversation entry.
    ///
    /// If the job already finished, the entry is written before returning.
    pub async fn bind_conversation_entry(
        &self,
        persisted_id: i64,
        job_id: &str,
        conversation_id: i64,
        entry_id: i64,
    ) -> Result<(), TrackerError> {
        if self.table.get(job_id).is_none() {
            return Err(TrackerError::JobNotTracked {
                job_id: job_id.to_string(),
            });
        }

        self.store
            .update_record(
                persisted_id,
                JobRecordUpdate::binding(conversation_id, entry_id),
            )
            .await?;

        let (is_finalized, latest) = self
            .table
            .bind(job_id, persisted_id, entry_id)
            .ok_or_else(|| TrackerError::JobNotTracked {
                job_id: job_id.to_string(),
            })?;
        debug!(job_id, persisted_id, entry_id, "Job bound to conversation entry");

        if is_finalized && let Some(result) = latest {
            if let Err(e) = write_conversation_entry(self.sink.as_ref(), entry_id, &result).await {
                error!(job_id, entry_id, "Failed to write finished job into entry: {e}");
            }
        }
        Ok(())
    }

    // ── Polling ─────────────────────────────────────────────────────

    /// Run one tick: poll every eligible job concurrently, then evict
    /// finalized jobs past the retention window.
    pub async fn poll_tick(&self) -> TickSummary {
        let plan = self.table.plan_tick(self.config.retention);
        let mut summary = TickSummary {
            polled: plan.claimed.len(),
            ..Default::default()
        };

        let mut jobs = JoinSet::new();
        for guard in plan.claimed {
            let tracker = self.clone();
            jobs.spawn(async move {
                let result = tracker.poll_job(&guard).await;
                (guard.job_id().to_string(), result)
            });
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((job_id, Err(e))) => {
                    summary.failed += 1;
                    warn!(job_id = %job_id, "Ask job poll failed: {e}");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Ask job poll task panicked: {e}");
                }
            }
        }

        if !plan.stale.is_empty() {
            summary.evicted = self.table.evict(&plan.stale);
            debug!(evicted = summary.evicted, "Evicted finalized ask jobs");
        }
        summary
    }

    /// Poll one job and advance its state machine. The caller holds the
    /// job's exclusion marker for the whole call.
    async fn poll_job(&self, guard: &InFlightGuard) -> Result<(), TrackerError> {
        let job_id = guard.job_id();
        let result = self.remote.poll(job_id).await?;

        let Some(recorded) = self.record_snapshot(job_id, &result) else {
            return Ok(());
        };
        debug!(job_id, status = %result.status, "Ask job status changed");

        if result.status == JobStatus::Understanding {
            return Ok(());
        }

        if let Some(kind) = result.kind.filter(|k| k.finalizes_early()) {
            self.table.update(job_id, |job| job.is_finalized = true);
            info!(job_id, ?kind, "Ask job finalized by classification");

            if recorded.resumed_from_cancelled {
                let code = kind.early_failure_code().unwrap_or("IDENTIFIED_AS_GENERAL");
                let failed = result
                    .clone()
                    .into_failure(code, kind.early_failure_message());
                self.table
                    .update(job_id, |job| job.latest_result = Some(failed.clone()));
                self.persist(job_id, &recorded.question, &failed).await?;
            }
            return Ok(());
        }

        if !result.status.is_terminal() {
            return self.persist(job_id, &recorded.question, &result).await;
        }

        // Finalized before the store write, so a failed write cannot leave a
        // terminal job live.
        let bound = self.table.update(job_id, |job| {
            job.is_finalized = true;
            job.bound_entry_id
        });
        info!(job_id, status = %result.status, "Ask job finalized");

        let persisted = self.persist(job_id, &recorded.question, &result).await;
        if let Err(e) = &persisted {
            error!(job_id, "Final snapshot not persisted: {e}");
        }
        if let Some(Some(entry_id)) = bound {
            write_conversation_entry(self.sink.as_ref(), entry_id, &result).await?;
        }
        persisted
    }

    /// Stamp the poll time and store `result` if its status changed and the
    /// job is still live.
    ///
    /// Only the status is compared: a new snapshot under the same status is
    /// dropped, which bounds store writes to one per status transition.
    fn record_snapshot(&self, job_id: &str, result: &JobResult) -> Option<Recorded> {
        let polled_at = Instant::now();
        self.table
            .update(job_id, |job| {
                job.last_polled_at = polled_at;
                // Superseded while this poll was in flight.
                if job.superseded || job.is_finalized {
                    return None;
                }
                let previous = job.latest_result.as_ref().map(|r| r.status);
                if previous == Some(result.status) {
                    return None;
                }
                job.latest_result = Some(result.clone());
                Some(Recorded {
                    question: job.question.clone(),
                    resumed_from_cancelled: job.resumed_from_cancelled,
                })
            })
            .flatten()
    }

    /// Create or update the store record for a job.
    async fn persist(
        &self,
        job_id: &str,
        question: &str,
        snapshot: &JobResult,
    ) -> Result<(), TrackerError> {
        let id = match self.table.persist_target(job_id) {
            PersistTarget::Detached => {
                debug!(job_id, "Skipping persistence of superseded job");
                return Ok(());
            }
            PersistTarget::Record(id) => {
                self.store
                    .update_record(id, JobRecordUpdate::snapshot(snapshot.clone()))
                    .await?;
                id
            }
            PersistTarget::Lookup => match self.store.find_by_job_id(job_id).await? {
                Some(existing) => {
                    self.store
                        .update_record(existing.id, JobRecordUpdate::snapshot(snapshot.clone()))
                        .await?;
                    existing.id
                }
                None => {
                    self.store
                        .create_record(NewJobRecord {
                            job_id: job_id.to_string(),
                            question: question.to_string(),
                            snapshot: snapshot.clone(),
                        })
                        .await?
                        .id
                }
            },
        };

        self.table.register_persisted_id(job_id, id);
        Ok(())
    }
}

/// Both resume fields are required.
fn validate_resume(resume: ResumeOptions) -> Result<(i64, i64), TrackerError> {
    let previous = resume
        .previous_persisted_id
        .ok_or_else(|| TrackerError::InvalidResume {
            reason: "previous persisted task id is required".to_string(),
        })?;
    let entry = resume
        .conversation_entry_id
        .ok_or_else(|| TrackerError::InvalidResume {
            reason: "conversation entry id is required".to_string(),
        })?;
    Ok((previous, entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_requires_both_ids() {
        assert!(validate_resume(ResumeOptions::default()).is_err());
        assert!(
            validate_resume(ResumeOptions {
                previous_persisted_id: Some(1),
                conversation_entry_id: None,
            })
            .is_err()
        );
        assert_eq!(
            validate_resume(ResumeOptions {
                previous_persisted_id: Some(1),
                conversation_entry_id: Some(2),
            })
            .unwrap(),
            (1, 2)
        );
    }
}
