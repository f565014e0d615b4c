use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

/// Upper bound on in-flight query groups against the graph database.
const MAX_CONCURRENT_QUERIES: usize = 8;

/// Client for the graph database's transactional Cypher endpoint.
///
/// Handles are pool-acquired per query: [`execute`] takes a permit
/// from the semaphore and holds it for the duration of the request,
/// releasing on every exit path including errors.
///
/// [`execute`]: CypherClient::execute
#[derive(Clone)]
pub struct CypherClient {
    http: Client,
    endpoint: String,
    auth: Option<(String, String)>,
    permits: Arc<Semaphore>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl CypherClient {
    /// Build a client from the environment: `ENVCTL_GRAPHDB_URL`
    /// (default `http://localhost:7474`), `ENVCTL_GRAPHDB_NAME`
    /// (default `neo4j`), and optional `ENVCTL_GRAPHDB_AUTH` as
    /// `user:password`.
    pub fn from_env() -> Self {
        let base = std::env::var("ENVCTL_GRAPHDB_URL")
            .unwrap_or_else(|_| "http://localhost:7474".to_string());
        let database =
            std::env::var("ENVCTL_GRAPHDB_NAME").unwrap_or_else(|_| "neo4j".to_string());
        let auth = std::env::var("ENVCTL_GRAPHDB_AUTH").ok().and_then(|raw| {
            raw.split_once(':')
                .map(|(user, pass)| (user.to_string(), pass.to_string()))
        });
        Self::new(&base, &database, auth)
    }

    pub fn new(base_url: &str, database: &str, auth: Option<(String, String)>) -> Self {
        let endpoint = format!(
            "{}/db/{}/tx/commit",
            base_url.trim_end_matches('/'),
            database
        );
        Self {
            http: Client::new(),
            endpoint,
            auth,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_QUERIES)),
        }
    }

    /// Run one parameterized statement and return its rows. Query
    /// failure surfaces upward; there is no automatic retry.
    pub async fn execute(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("graph query pool closed")?;

        debug!(statement, "running graph query");

        let mut request = self.http.post(&self.endpoint).json(&json!({
            "statements": [{"statement": statement, "parameters": parameters}]
        }));
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .context("graph database request failed")?
            .error_for_status()
            .context("graph database rejected the request")?;

        let decoded: TxResponse = response
            .json()
            .await
            .context("graph database sent an undecodable response")?;

        if let Some(error) = decoded.errors.first() {
            anyhow::bail!("graph query failed ({}): {}", error.code, error.message);
        }

        let rows = decoded
            .results
            .into_iter()
            .next()
            .map(|result| result.data.into_iter().map(|d| d.row).collect())
            .unwrap_or_default();
        Ok(rows)
    }
}
