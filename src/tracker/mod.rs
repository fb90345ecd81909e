//! Ask job tracking.
//!
//! Core components:
//! - `model` - job status, classification and result snapshot
//! - `table` - in-memory job table with per-job exclusion markers
//! - `service` - `TaskTracker`: create/read/cancel/bind and the per-job state machine
//! - `finalize` - writing finished results into conversation entries
//! - `poller` - fixed-interval background loop

pub mod finalize;
pub mod model;
pub mod poller;
pub mod service;
pub mod table;

pub use model::{
    AskContext, AskHistory, Candidate, JobFailure, JobKind, JobResult, JobStatus, ResumeOptions,
};
pub use poller::spawn_poll_loop;
pub use service::{TaskTracker, TickSummary};
pub use table::{JobTable, TrackedJob};
