//! Minimal GraphQL request runner used by the directory, identity-provider and
//! scope-policy clients. Every query aliases its root field as `result`.

use crate::error::RemoteError;
use crate::http_client::HttpClient;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<ResultEnvelope<T>>,
    #[serde(default)]
    errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ResultEnvelope<T> {
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Clone, Debug)]
pub struct GraphQlClient {
    url: String,
    http: HttpClient,
}

impl GraphQlClient {
    pub fn new(url: impl Into<String>, http: HttpClient) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run `query` and return the aliased `result` field, `None` when it is null.
    pub async fn run<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Map<String, Value>,
    ) -> Result<Option<T>, RemoteError> {
        let payload = serde_json::json!({
            "query": query,
            "variables": variables,
        });
        let response: GraphQlResponse<T> = self.http.post_json(&self.url, &payload).await?;
        if !response.errors.is_empty() {
            let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
            return Err(RemoteError::GraphQl(messages.join("; ")));
        }
        Ok(response.data.and_then(|d| d.result))
    }
}

/// Build a GraphQL variables map from `(name, value)` pairs.
pub fn vars<const N: usize>(pairs: [(&str, &str); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}
