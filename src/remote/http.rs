//! HTTP client for the AI service's `/v1/asks` endpoints.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::remote::RemoteJobClient;
use crate::tracker::model::{
    AskContext, AskHistory, Candidate, JobFailure, JobKind, JobResult, JobStatus,
};

/// `RemoteJobClient` over HTTP.
pub struct HttpRemoteClient {
    base_url: String,
    api_token: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send a request and return the response if it was a 2xx.
    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            body,
        })
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AskRequest<'a> {
    query: &'a str,
    histories: &'a [AskHistory],
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    configurations: AskConfigurations<'a>,
}

#[derive(Debug, Serialize)]
struct AskConfigurations<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    query_id: String,
}

#[derive(Debug, Deserialize)]
struct AskResultBody {
    status: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    response: Option<Vec<CandidateBody>>,
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    rephrased_question: Option<String>,
    #[serde(default)]
    intent_reasoning: Option<String>,
    #[serde(default)]
    sql_generation_reasoning: Option<String>,
    #[serde(default)]
    retrieved_tables: Option<Vec<String>>,
    #[serde(default)]
    invalid_sql: Option<String>,
    #[serde(default)]
    trace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateBody {
    sql: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(rename = "viewId", alias = "view_id", default)]
    view_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

impl AskResultBody {
    fn into_result(self, endpoint: &str) -> Result<JobResult, RemoteError> {
        let invalid = |reason: String| RemoteError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason,
        };

        let status: JobStatus = self.status.parse().map_err(invalid)?;
        let kind: Option<JobKind> = self
            .kind
            .map(|k| k.parse())
            .transpose()
            .map_err(invalid)?;

        let mut result = JobResult::with_status(status);
        result.kind = kind;
        result.candidates = self
            .response
            .unwrap_or_default()
            .into_iter()
            .map(|c| Candidate {
                sql: c.sql,
                summary: c.summary.unwrap_or_default(),
                view_id: c.view_id,
            })
            .collect();
        result.error = self.error.map(|e| JobFailure {
            code: e.code,
            message: e.message,
        });
        result.rephrased_question = self.rephrased_question;
        result.intent_reasoning = self.intent_reasoning;
        result.sql_generation_reasoning = self.sql_generation_reasoning;
        result.retrieved_tables = self.retrieved_tables.unwrap_or_default();
        result.invalid_sql = self.invalid_sql;
        result.trace_id = self.trace_id;
        Ok(result)
    }
}

#[async_trait]
impl RemoteJobClient for HttpRemoteClient {
    async fn submit(&self, question: &str, context: &AskContext) -> Result<String, RemoteError> {
        let endpoint = "POST /v1/asks";
        let body = AskRequest {
            query: question,
            histories: &context.histories,
            project_id: context.project_id.as_deref(),
            configurations: AskConfigurations {
                language: context.language.as_deref(),
                timezone: context.timezone.as_deref(),
            },
        };

        let resp = self
            .send(endpoint, self.client.post(self.url("/v1/asks")).json(&body))
            .await?;
        let parsed: AskResponse = resp.json().await.map_err(|e| RemoteError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(job_id = %parsed.query_id, "Ask submitted");
        Ok(parsed.query_id)
    }

    async fn poll(&self, job_id: &str) -> Result<JobResult, RemoteError> {
        let endpoint = "GET /v1/asks/{id}/result";
        let resp = self
            .send(
                endpoint,
                self.client.get(self.url(&format!("/v1/asks/{job_id}/result"))),
            )
            .await?;
        let body: AskResultBody = resp.json().await.map_err(|e| RemoteError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        body.into_result(endpoint)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), RemoteError> {
        let endpoint = "PATCH /v1/asks/{id}";
        self.send(
            endpoint,
            self.client
                .patch(self.url(&format!("/v1/asks/{job_id}")))
                .json(&serde_json::json!({ "status": "stopped" })),
        )
        .await?;
        tracing::debug!(job_id, "Ask cancellation sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Result<JobResult, RemoteError> {
        let body: AskResultBody = serde_json::from_value(json).unwrap();
        body.into_result("test")
    }

    #[test]
    fn parses_finished_result_with_view() {
        let result = parse(serde_json::json!({
            "status": "finished",
            "type": "TEXT_TO_SQL",
            "response": [{"sql": "SELECT 1", "type": "view", "viewId": 9}],
            "rephrased_question": "count of rows",
            "retrieved_tables": ["orders"]
        }))
        .unwrap();

        assert_eq!(result.status, JobStatus::Finished);
        assert_eq!(result.kind, Some(JobKind::TextToSql));
        assert_eq!(result.candidates[0].view_id, Some(9));
        assert_eq!(result.candidates[0].summary, "");
        assert_eq!(result.retrieved_tables, vec!["orders".to_string()]);
        assert_eq!(result.rephrased_question.as_deref(), Some("count of rows"));
    }

    #[test]
    fn parses_failure() {
        let result = parse(serde_json::json!({
            "status": "failed",
            "error": {"code": "NO_RELEVANT_DATA", "message": "nothing matched"}
        }))
        .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.error.unwrap().code, "NO_RELEVANT_DATA");
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn unknown_status_is_invalid_response() {
        let err = parse(serde_json::json!({"status": "sleeping"})).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse { .. }));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = HttpRemoteClient::new(&RemoteConfig::new("http://ai:5555/"));
        assert_eq!(client.url("/v1/asks"), "http://ai:5555/v1/asks");
    }
}
