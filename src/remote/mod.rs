//! Remote job client: the AI service that turns questions into SQL.

pub mod http;

pub use http::HttpRemoteClient;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::tracker::model::{AskContext, JobResult};

/// Client for the service that runs ask jobs.
///
/// Every call is a single round trip; retries belong to the caller.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Submit a question. Returns the service's job id.
    async fn submit(&self, question: &str, context: &AskContext) -> Result<String, RemoteError>;

    /// Fetch the latest snapshot of a job.
    async fn poll(&self, job_id: &str) -> Result<JobResult, RemoteError>;

    /// Ask the service to stop a job.
    async fn cancel(&self, job_id: &str) -> Result<(), RemoteError>;
}
