//! In-memory job table.
//!
//! One mutex guards the jobs map, the persisted-id index and the in-flight
//! set. The lock is never held across an `.await`; every method takes it for
//! a short, synchronous critical section.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::tracker::model::JobResult;

/// A job the tracker is actively following.
#[derive(Debug, Clone)]
pub struct TrackedJob {
    /// Handle returned by the AI service.
    pub job_id: String,
    /// Store record id, once the job has been persisted.
    pub persisted_id: Option<i64>,
    pub question: String,
    /// Creation time until the first poll completes.
    pub last_polled_at: Instant,
    pub latest_result: Option<JobResult>,
    /// Never reverts to false once set.
    pub is_finalized: bool,
    pub bound_entry_id: Option<i64>,
    /// Supersedes a cancelled job bound to the same conversation entry.
    pub resumed_from_cancelled: bool,
    /// Replaced by a resumed job. Never written to the store again.
    pub superseded: bool,
}

impl TrackedJob {
    pub fn new(job_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            persisted_id: None,
            question: question.into(),
            last_polled_at: Instant::now(),
            latest_result: None,
            is_finalized: false,
            bound_entry_id: None,
            resumed_from_cancelled: false,
            superseded: false,
        }
    }

    /// Finalized and idle for longer than `retention`.
    fn is_stale(&self, retention: Duration) -> bool {
        self.is_finalized && self.last_polled_at.elapsed() > retention
    }
}

#[derive(Default)]
struct TableInner {
    jobs: HashMap<String, TrackedJob>,
    by_persisted_id: HashMap<i64, String>,
    in_flight: HashSet<String>,
}

/// Where a job's snapshot goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistTarget {
    /// Update this record.
    Record(i64),
    /// No record id known yet: look up by job id, else create.
    Lookup,
    /// Superseded or no longer tracked: write nothing.
    Detached,
}

/// Jobs to work on in one tick.
pub struct TickPlan {
    /// Exclusion markers for every job that should be polled now.
    pub claimed: Vec<InFlightGuard>,
    /// Finalized jobs past the retention window.
    pub stale: Vec<String>,
}

/// Owned table of tracked jobs.
#[derive(Default)]
pub struct JobTable {
    inner: Mutex<TableInner>,
}

impl JobTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        // Critical sections never panic midway, so a poisoned table is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start tracking a job.
    pub fn insert(&self, job: TrackedJob) {
        let mut inner = self.lock();
        if let Some(id) = job.persisted_id {
            inner.by_persisted_id.insert(id, job.job_id.clone());
        }
        inner.jobs.insert(job.job_id.clone(), job);
    }

    /// Start tracking a job and claim its exclusion marker in the same step.
    pub fn insert_claimed(self: &Arc<Self>, job: TrackedJob) -> InFlightGuard {
        let job_id = job.job_id.clone();
        let mut inner = self.lock();
        if let Some(id) = job.persisted_id {
            inner.by_persisted_id.insert(id, job_id.clone());
        }
        inner.jobs.insert(job_id.clone(), job);
        inner.in_flight.insert(job_id.clone());
        InFlightGuard {
            table: Arc::clone(self),
            job_id,
        }
    }

    /// Copy of a tracked job.
    pub fn get(&self, job_id: &str) -> Option<TrackedJob> {
        self.lock().jobs.get(job_id).cloned()
    }

    pub fn latest_result(&self, job_id: &str) -> Option<JobResult> {
        self.lock()
            .jobs
            .get(job_id)
            .and_then(|job| job.latest_result.clone())
    }

    /// The tracked job currently claiming a store record id.
    pub fn job_for_persisted_id(&self, persisted_id: i64) -> Option<String> {
        let inner = self.lock();
        inner
            .by_persisted_id
            .get(&persisted_id)
            .filter(|job_id| inner.jobs.contains_key(*job_id))
            .cloned()
    }

    /// Run `f` against a tracked job. `None` if the job is not tracked.
    pub fn update<F, R>(&self, job_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut TrackedJob) -> R,
    {
        self.lock().jobs.get_mut(job_id).map(f)
    }

    pub fn persist_target(&self, job_id: &str) -> PersistTarget {
        match self.lock().jobs.get(job_id) {
            Some(job) if !job.superseded => job
                .persisted_id
                .map_or(PersistTarget::Lookup, PersistTarget::Record),
            _ => PersistTarget::Detached,
        }
    }

    /// Record the store id for a job and index it. Superseded jobs are left
    /// alone so they cannot reclaim the index.
    pub fn register_persisted_id(&self, job_id: &str, persisted_id: i64) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(job_id).filter(|job| !job.superseded) else {
            return;
        };
        job.persisted_id = Some(persisted_id);
        inner
            .by_persisted_id
            .insert(persisted_id, job_id.to_string());
    }

    /// Bind a job to a conversation entry.
    ///
    /// Returns the job's finalization flag and latest result, or `None` if
    /// the job is not tracked.
    pub fn bind(
        &self,
        job_id: &str,
        persisted_id: i64,
        entry_id: i64,
    ) -> Option<(bool, Option<JobResult>)> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(job_id)?;
        job.bound_entry_id = Some(entry_id);
        job.persisted_id = Some(persisted_id);
        let state = (job.is_finalized, job.latest_result.clone());
        inner
            .by_persisted_id
            .insert(persisted_id, job_id.to_string());
        Some(state)
    }

    /// Detach whichever job claims `persisted_id` so it no longer writes to
    /// that record or its conversation entry. The job is finalized locally.
    pub fn supersede(&self, persisted_id: i64) -> Option<String> {
        let mut inner = self.lock();
        let job_id = inner.by_persisted_id.remove(&persisted_id)?;
        let job = inner.jobs.get_mut(&job_id)?;
        job.persisted_id = None;
        job.bound_entry_id = None;
        job.is_finalized = true;
        job.superseded = true;
        Some(job_id)
    }

    /// Claim the exclusion marker for one job.
    pub fn try_claim(self: &Arc<Self>, job_id: &str) -> Option<InFlightGuard> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(job_id) || !inner.in_flight.insert(job_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            table: Arc::clone(self),
            job_id: job_id.to_string(),
        })
    }

    /// Decide what one tick does: claim every unfinalized job that is not in
    /// flight, and list finalized jobs past the retention window.
    pub fn plan_tick(self: &Arc<Self>, retention: Duration) -> TickPlan {
        let mut inner = self.lock();
        let mut stale = Vec::new();
        let mut eligible = Vec::new();

        for (job_id, job) in &inner.jobs {
            if inner.in_flight.contains(job_id) {
                continue;
            }
            if job.is_stale(retention) {
                stale.push(job_id.clone());
                continue;
            }
            if job.is_finalized {
                continue;
            }
            eligible.push(job_id.clone());
        }

        let claimed = eligible
            .into_iter()
            .map(|job_id| {
                inner.in_flight.insert(job_id.clone());
                InFlightGuard {
                    table: Arc::clone(self),
                    job_id,
                }
            })
            .collect();

        TickPlan { claimed, stale }
    }

    /// Drop stale jobs from memory. Returns how many were removed.
    pub fn evict(&self, job_ids: &[String]) -> usize {
        let mut inner = self.lock();
        let mut evicted = 0;
        for job_id in job_ids {
            if inner.in_flight.contains(job_id) {
                continue;
            }
            let Some(job) = inner.jobs.remove(job_id) else {
                continue;
            };
            if let Some(id) = job.persisted_id
                && inner.by_persisted_id.get(&id) == Some(job_id)
            {
                inner.by_persisted_id.remove(&id);
            }
            evicted += 1;
        }
        evicted
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.lock().in_flight.contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    fn release(&self, job_id: &str) {
        self.lock().in_flight.remove(job_id);
    }
}

/// Exclusion marker for one job. Released on drop, on every exit path.
pub struct InFlightGuard {
    table: Arc<JobTable>,
    job_id: String,
}

impl InFlightGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.table.release(&self.job_id);
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("job_id", &self.job_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::model::JobStatus;

    fn finalized(job_id: &str, idle: Duration) -> TrackedJob {
        let mut job = TrackedJob::new(job_id, "q");
        job.is_finalized = true;
        job.last_polled_at = Instant::now() - idle;
        job
    }

    #[test]
    fn claim_is_exclusive_until_guard_drops() {
        let table = JobTable::new();
        table.insert(TrackedJob::new("a", "q"));

        let guard = table.try_claim("a").unwrap();
        assert!(table.is_in_flight("a"));
        assert!(table.try_claim("a").is_none());

        drop(guard);
        assert!(!table.is_in_flight("a"));
        assert!(table.try_claim("a").is_some());
    }

    #[test]
    fn cannot_claim_untracked_job() {
        let table = JobTable::new();
        assert!(table.try_claim("ghost").is_none());
    }

    #[test]
    fn plan_skips_in_flight_and_finalized() {
        let table = JobTable::new();
        table.insert(TrackedJob::new("busy", "q"));
        table.insert(TrackedJob::new("idle", "q"));
        table.insert(finalized("done", Duration::ZERO));
        let _busy = table.try_claim("busy").unwrap();

        let plan = table.plan_tick(Duration::from_secs(300));
        let claimed: Vec<&str> = plan.claimed.iter().map(|g| g.job_id()).collect();
        assert_eq!(claimed, vec!["idle"]);
        assert!(plan.stale.is_empty());
        assert!(table.is_in_flight("idle"));
    }

    #[test]
    fn plan_lists_stale_and_evict_removes_index() {
        let table = JobTable::new();
        let mut old = finalized("old", Duration::from_secs(600));
        old.persisted_id = Some(4);
        table.insert(old);
        table.insert(finalized("recent", Duration::from_secs(10)));

        let plan = table.plan_tick(Duration::from_secs(300));
        assert!(plan.claimed.is_empty());
        assert_eq!(plan.stale, vec!["old".to_string()]);

        assert_eq!(table.evict(&plan.stale), 1);
        assert!(table.get("old").is_none());
        assert!(table.job_for_persisted_id(4).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bind_reports_state_and_indexes() {
        let table = JobTable::new();
        let mut job = TrackedJob::new("a", "q");
        job.latest_result = Some(JobResult::with_status(JobStatus::Finished));
        job.is_finalized = true;
        table.insert(job);

        let (is_finalized, result) = table.bind("a", 11, 99).unwrap();
        assert!(is_finalized);
        assert_eq!(result.unwrap().status, JobStatus::Finished);
        assert_eq!(table.job_for_persisted_id(11).as_deref(), Some("a"));
        assert_eq!(table.get("a").unwrap().bound_entry_id, Some(99));
        assert!(table.bind("missing", 1, 1).is_none());
    }

    #[test]
    fn supersede_detaches_previous_job() {
        let table = JobTable::new();
        let mut old = TrackedJob::new("old", "q");
        old.persisted_id = Some(3);
        old.bound_entry_id = Some(30);
        table.insert(old);

        assert_eq!(table.supersede(3).as_deref(), Some("old"));
        let old = table.get("old").unwrap();
        assert!(old.is_finalized);
        assert!(old.persisted_id.is_none());
        assert!(old.bound_entry_id.is_none());
        assert!(table.job_for_persisted_id(3).is_none());
    }

    #[test]
    fn superseded_job_is_detached_from_store() {
        let table = JobTable::new();
        let mut old = TrackedJob::new("old", "q");
        old.persisted_id = Some(3);
        table.insert(old);
        table.insert(TrackedJob::new("fresh", "q"));

        assert_eq!(table.persist_target("old"), PersistTarget::Record(3));
        assert_eq!(table.persist_target("fresh"), PersistTarget::Lookup);
        assert_eq!(table.persist_target("gone"), PersistTarget::Detached);

        table.supersede(3);
        assert_eq!(table.persist_target("old"), PersistTarget::Detached);

        // A late create for the old job must not reclaim the index.
        table.register_persisted_id("old", 7);
        assert!(table.get("old").unwrap().persisted_id.is_none());
        assert!(table.job_for_persisted_id(7).is_none());
    }

    #[test]
    fn insert_claimed_holds_marker() {
        let table = JobTable::new();
        let guard = table.insert_claimed(TrackedJob::new("a", "q"));
        assert!(table.plan_tick(Duration::from_secs(300)).claimed.is_empty());
        drop(guard);
        assert_eq!(table.plan_tick(Duration::from_secs(300)).claimed.len(), 1);
    }
}
