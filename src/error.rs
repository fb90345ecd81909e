//! Error types for the ask tracker.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors talking to the AI service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("AI service rejected {endpoint} with status {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Errors raised by the task tracker's public operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Invalid resume request: {reason}")]
    InvalidResume { reason: String },

    #[error("Job {job_id} is not tracked")]
    JobNotTracked { job_id: String },

    #[error("View {view_id} not found")]
    ViewNotFound { view_id: i64 },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
