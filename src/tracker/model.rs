//! Ask job result model.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of an ask job as reported by the AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// The service is classifying the question.
    Understanding,
    /// Retrieving relevant schema.
    Searching,
    /// Reasoning about the SQL to write.
    Planning,
    /// Generating candidate SQL.
    Generating,
    /// Repairing invalid SQL.
    Correcting,
    /// Candidates are ready.
    Finished,
    /// The job failed; see `JobResult::error`.
    Failed,
    /// The job was cancelled.
    Stopped,
}

impl JobStatus {
    /// No further polling is useful once a job reaches a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Understanding => "UNDERSTANDING",
            Self::Searching => "SEARCHING",
            Self::Planning => "PLANNING",
            Self::Generating => "GENERATING",
            Self::Correcting => "CORRECTING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UNDERSTANDING" => Ok(Self::Understanding),
            "SEARCHING" => Ok(Self::Searching),
            "PLANNING" => Ok(Self::Planning),
            "GENERATING" => Ok(Self::Generating),
            "CORRECTING" => Ok(Self::Correcting),
            "FINISHED" => Ok(Self::Finished),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Classification the service assigns once it understands the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    TextToSql,
    General,
    MisleadingQuery,
}

impl JobKind {
    /// Non-SQL classifications end the job without waiting for a terminal status.
    pub fn finalizes_early(&self) -> bool {
        matches!(self, Self::General | Self::MisleadingQuery)
    }

    /// Error code used for the synthetic failure of a resumed job.
    pub fn early_failure_code(&self) -> Option<&'static str> {
        match self {
            Self::General => Some("IDENTIFIED_AS_GENERAL"),
            Self::MisleadingQuery => Some("IDENTIFIED_AS_MISLEADING_QUERY"),
            Self::TextToSql => None,
        }
    }

    pub fn early_failure_message(&self) -> &'static str {
        match self {
            Self::General => "The question was identified as a general question, not a data query",
            Self::MisleadingQuery => "The question was identified as misleading for this data",
            Self::TextToSql => "",
        }
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT_TO_SQL" => Ok(Self::TextToSql),
            "GENERAL" => Ok(Self::General),
            "MISLEADING_QUERY" => Ok(Self::MisleadingQuery),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// One generated SQL candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub sql: String,
    #[serde(default)]
    pub summary: String,
    /// Set when the candidate was answered from a saved view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_id: Option<i64>,
}

/// Error details of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: String,
    pub message: String,
}

/// Latest known snapshot of an ask job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rephrased_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_generation_reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retrieved_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl JobResult {
    /// A bare snapshot with only a status.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            kind: None,
            candidates: Vec::new(),
            error: None,
            rephrased_question: None,
            intent_reasoning: None,
            sql_generation_reasoning: None,
            retrieved_tables: Vec::new(),
            invalid_sql: None,
            trace_id: None,
        }
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_candidate(mut self, candidate: Candidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    /// Copy of this snapshot turned into a `FAILED` result with the given error.
    pub fn into_failure(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error = Some(JobFailure {
            code: code.into(),
            message: message.into(),
        });
        self
    }
}

/// A previous question/answer pair sent along with a new question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskHistory {
    pub question: String,
    pub sql: String,
}

/// Context submitted with a question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskContext {
    pub histories: Vec<AskHistory>,
    pub project_id: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

/// Re-run of a cancelled job bound to an existing conversation entry.
///
/// Both fields are required; they are `Option` so a missing value surfaces as
/// a validation error instead of being unrepresentable at the API boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeOptions {
    pub previous_persisted_id: Option<i64>,
    pub conversation_entry_id: Option<i64>,
}
