//! Elasticsearch scroll client for the security alerts index.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::models::{ElasticErrorResponse, Hit, SearchResponse};
use super::{AlertRecord, AlertSource};
use crate::config::{http_client, Credentials, StackConfig};
use crate::error::{TriageError, TriageResult};

/// How long Elasticsearch keeps a scroll context alive between pages.
pub const SCROLL_KEEP_ALIVE: &str = "5m";

/// Start of a trailing window of `days` ending at `now`.
///
/// `None` when the window reaches past the earliest representable time.
#[must_use]
pub fn window_start(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    Duration::try_days(i64::from(days)).and_then(|span| now.checked_sub_signed(span))
}

/// Alert source backed by the Elasticsearch search and scroll APIs.
#[derive(Debug, Clone)]
pub struct ElasticsearchAlertSource {
    client: Client,
    base_url: String,
    index: String,
    credentials: Credentials,
}

impl ElasticsearchAlertSource {
    /// Create a source for the alert index of the configured space.
    pub fn new(config: &StackConfig) -> TriageResult<Self> {
        if config.elastic_url.is_empty() {
            return Err(TriageError::Configuration(
                "Elasticsearch URL is required".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(config.verify_tls)?,
            base_url: config.elastic_url.trim_end_matches('/').to_string(),
            index: config.alert_index(),
            credentials: config.credentials.clone(),
        })
    }

    /// Range query over `@timestamp`, newest first.
    fn window_query(since: DateTime<Utc>, page_size: usize) -> Value {
        json!({
            "size": page_size,
            "query": {
                "bool": {
                    "must": [
                        { "range": { "@timestamp": { "gte": since.to_rfc3339() } } }
                    ]
                }
            },
            "sort": [ { "@timestamp": { "order": "desc" } } ]
        })
    }

    /// Exact-id query returning at most one document.
    fn id_query(id: &str) -> Value {
        json!({
            "size": 1,
            "query": {
                "bool": {
                    "must": [ { "term": { "_id": id } } ]
                }
            }
        })
    }

    /// Send a request with a JSON body and decode the response.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: &Value,
    ) -> TriageResult<T> {
        debug!(%method, url = %url, "Making Elasticsearch request");

        let request = self.client.request(method, url).json(body);
        let response = self
            .credentials
            .apply(request)
            .send()
            .await
            .map_err(|e| TriageError::Retrieval(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TriageError::Retrieval(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ElasticErrorResponse>(&text)
                .map(|e| e.error.describe())
                .unwrap_or(text);
            return Err(TriageError::Retrieval(format!(
                "Elasticsearch returned {status}: {detail}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| TriageError::Retrieval(format!("failed to parse search response: {e}")))
    }

    /// Run the initial windowed search and open a scroll context.
    async fn open_scroll(
        &self,
        since: DateTime<Utc>,
        page_size: usize,
    ) -> TriageResult<SearchResponse> {
        let url = format!(
            "{}/{}/_search?scroll={SCROLL_KEEP_ALIVE}",
            self.base_url, self.index
        );
        self.send(Method::POST, &url, &Self::window_query(since, page_size))
            .await
    }

    /// Fetch the next page of an open scroll.
    async fn continue_scroll(&self, scroll_id: &str) -> TriageResult<SearchResponse> {
        let url = format!("{}/_search/scroll", self.base_url);
        let body = json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id });
        self.send(Method::POST, &url, &body).await
    }

    /// Keep resuming the scroll until a page comes back empty.
    async fn drain_scroll(
        &self,
        scroll_id: &mut String,
        mut last_page_len: usize,
        alerts: &mut Vec<AlertRecord>,
    ) -> TriageResult<()> {
        while last_page_len > 0 {
            let page = self.continue_scroll(scroll_id).await?;
            if let Some(next) = page.scroll_id {
                *scroll_id = next;
            }
            last_page_len = page.hits.hits.len();
            debug!(page_len = last_page_len, total = alerts.len(), "Scroll page received");
            alerts.extend(page.hits.hits.into_iter().map(into_record));
        }
        Ok(())
    }

    /// Free the server-side scroll context. Only the status is checked.
    async fn release_scroll(&self, scroll_id: &str) -> TriageResult<()> {
        let url = format!("{}/_search/scroll", self.base_url);
        let request = self
            .client
            .delete(&url)
            .json(&json!({ "scroll_id": [scroll_id] }));
        let response = self
            .credentials
            .apply(request)
            .send()
            .await
            .map_err(|e| TriageError::Retrieval(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TriageError::Retrieval(format!(
                "clearing scroll returned {status}"
            )))
        }
    }
}

fn into_record(hit: Hit) -> AlertRecord {
    AlertRecord::from_source(hit.id, hit.source)
}

#[async_trait]
impl AlertSource for ElasticsearchAlertSource {
    #[instrument(skip(self), fields(index = %self.index))]
    async fn fetch(&self, window_days: u32, page_size: usize) -> TriageResult<Vec<AlertRecord>> {
        if page_size == 0 {
            return Err(TriageError::Configuration(
                "page size must be at least 1".to_string(),
            ));
        }

        let since = window_start(Utc::now(), window_days).ok_or_else(|| {
            TriageError::Configuration(format!("window of {window_days} days is out of range"))
        })?;
        let first = self.open_scroll(since, page_size).await?;

        let mut alerts: Vec<AlertRecord> = Vec::new();
        let first_len = first.hits.hits.len();
        alerts.extend(first.hits.hits.into_iter().map(into_record));

        let Some(mut scroll_id) = first.scroll_id else {
            return Err(TriageError::Retrieval(
                "search response did not include a scroll id".to_string(),
            ));
        };

        // The context is released on both the success and the error path
        let outcome = self
            .drain_scroll(&mut scroll_id, first_len, &mut alerts)
            .await;
        if let Err(e) = self.release_scroll(&scroll_id).await {
            warn!(error = %e, "Failed to clear scroll context");
        }
        outcome?;

        info!(count = alerts.len(), since = %since, "Fetched alerts");
        Ok(alerts)
    }

    #[instrument(skip(self), fields(index = %self.index))]
    async fn fetch_by_id(&self, id: &str) -> TriageResult<AlertRecord> {
        let url = format!("{}/{}/_search", self.base_url, self.index);
        let response: SearchResponse = self.send(Method::POST, &url, &Self::id_query(id)).await?;

        response
            .hits
            .hits
            .into_iter()
            .next()
            .map(into_record)
            .ok_or_else(|| TriageError::NotFound(format!("alert {id}")))
    }
}
