//! Elasticsearch search API wire types.

use serde::Deserialize;
use serde_json::Value;

/// Response from `_search` and `_search/scroll`.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    /// Continuation handle, present when the request asked for a scroll.
    #[serde(rename = "_scroll_id")]
    pub scroll_id: Option<String>,
    /// Matching documents.
    #[serde(default)]
    pub hits: HitsEnvelope,
}

/// The `hits` object of a search response.
#[derive(Debug, Default, Deserialize)]
pub struct HitsEnvelope {
    /// Page of documents.
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// A single search hit.
#[derive(Debug, Deserialize)]
pub struct Hit {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Stored document.
    #[serde(rename = "_source", default)]
    pub source: Value,
}

/// Error body returned by Elasticsearch.
#[derive(Debug, Deserialize)]
pub struct ElasticErrorResponse {
    pub error: ElasticError,
}

/// Error details.
#[derive(Debug, Deserialize)]
pub struct ElasticError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub reason: Option<String>,
}

impl ElasticError {
    /// Human-readable summary.
    pub fn describe(&self) -> String {
        match (&self.error_type, &self.reason) {
            (Some(t), Some(r)) => format!("{t}: {r}"),
            (None, Some(r)) => r.clone(),
            (Some(t), None) => t.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}
