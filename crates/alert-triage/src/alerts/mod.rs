//! Alert retrieval from the security alerts index.
//!
//! - [`AlertRecord`] is the read-only unit of work handed to the pipeline
//! - [`AlertSource`] is the capability the pipeline depends on
//! - [`ElasticsearchAlertSource`] implements it with the scroll API

mod elasticsearch;
mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TriageResult;

pub use elasticsearch::{window_start, ElasticsearchAlertSource, SCROLL_KEEP_ALIVE};

/// One security alert as stored in the alerts index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Document id, also the key for the note write-back.
    pub id: String,
    /// When the underlying event was raised.
    pub timestamp: Option<DateTime<Utc>>,
    /// The untouched `_source` document. No field is guaranteed.
    pub raw: Value,
}

impl AlertRecord {
    /// Create a record from its parts.
    pub fn new(id: impl Into<String>, timestamp: Option<DateTime<Utc>>, raw: Value) -> Self {
        Self {
            id: id.into(),
            timestamp,
            raw,
        }
    }

    /// Create a record from a search hit, reading the timestamp from `@timestamp`.
    pub fn from_source(id: impl Into<String>, raw: Value) -> Self {
        let timestamp = raw
            .get("@timestamp")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc));
        Self::new(id, timestamp, raw)
    }
}

/// Read access to the alert store.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Every alert raised in the trailing `window_days`, most recent first.
    ///
    /// Any query or pagination failure is a `Retrieval` error; partial results
    /// are never returned.
    async fn fetch(&self, window_days: u32, page_size: usize) -> TriageResult<Vec<AlertRecord>>;

    /// Look up a single alert by document id. `NotFound` when nothing matches.
    async fn fetch_by_id(&self, id: &str) -> TriageResult<AlertRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_source_parses_timestamp() {
        let record = AlertRecord::from_source("a1", json!({"@timestamp": "2024-05-01T12:30:00.000Z"}));
        let ts = record.timestamp.unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    }

    #[test]
    fn test_from_source_tolerates_missing_timestamp() {
        assert!(AlertRecord::from_source("a1", json!({})).timestamp.is_none());
        assert!(AlertRecord::from_source("a1", json!({"@timestamp": 42})).timestamp.is_none());
        assert!(AlertRecord::from_source("a1", json!({"@timestamp": "yesterday"})).timestamp.is_none());
    }
}
