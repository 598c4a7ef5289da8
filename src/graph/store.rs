//! Graph store transport.
//!
//! `GraphStore` is the thin request/response seam the rest of the crate
//! talks to. `HttpGraphStore` implements it against the graph database's
//! HTTP transactional endpoint: every call is a single auto-commit
//! transaction, so nothing is held open between calls.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::types::{Params, QueryError, QueryResult, Rows};
use crate::config::GraphSettings;

/// Executes pattern-match queries. Holds no retry logic.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn execute(&self, query: &str, params: &Params) -> QueryResult<Rows>;
}

/// Graph store reached over HTTP (`POST {url}/db/{database}/tx/commit`)
pub struct HttpGraphStore {
    client: reqwest::Client,
    commit_url: String,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<StoreError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<RowData>,
}

#[derive(Debug, Deserialize)]
struct RowData {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StoreError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpGraphStore {
    pub fn new(settings: &GraphSettings) -> QueryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .build()
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            commit_url: format!(
                "{}/db/{}/tx/commit",
                settings.url.trim_end_matches('/'),
                settings.database
            ),
            user: settings.user.clone(),
            password: settings.password.clone(),
        })
    }

    pub fn commit_url(&self) -> &str {
        &self.commit_url
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn execute(&self, query: &str, params: &Params) -> QueryResult<Rows> {
        debug!("[graph] executing query:\n{}", query.trim());

        let payload = serde_json::json!({
            "statements": [{
                "statement": query,
                "parameters": params,
            }]
        });

        let resp = self
            .client
            .post(&self.commit_url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| QueryError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(QueryError::Transport(format!("HTTP {}: {}", status, body)));
        }

        parse_commit_response(&body)
    }
}

/// Parse the commit endpoint body into a row set, surfacing store errors
pub(crate) fn parse_commit_response(body: &str) -> QueryResult<Rows> {
    let response: CommitResponse = serde_json::from_str(body)
        .map_err(|e| QueryError::InvalidResponse(e.to_string()))?;

    if let Some(err) = response.errors.into_iter().next() {
        return Err(QueryError::Store {
            code: err.code,
            message: err.message,
        });
    }

    let result = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| QueryError::InvalidResponse("no statement result".to_string()))?;

    Ok(Rows::new(
        result.columns,
        result.data.into_iter().map(|d| d.row).collect(),
    ))
}
