//! Kibana detection-engine client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::models::{DetectionRule, FindRulesPage, KibanaErrorResponse, NoteBody, NoteRequest};
use super::RuleCatalog;
use crate::analysis::AnalysisResult;
use crate::annotation::{format_note, AnnotationSink};
use crate::config::{http_client, Credentials, StackConfig, DEFAULT_RULES_PAGE_SIZE};
use crate::error::{TriageError, TriageResult};

/// Failed Kibana call, before it is mapped to the caller's error variant.
#[derive(Debug)]
struct ApiFailure {
    status: Option<u16>,
    message: String,
}

impl ApiFailure {
    fn into_rules(self) -> TriageError {
        match self.status {
            Some(status) => TriageError::Rules(format!("{} ({status})", self.message)),
            None => TriageError::Rules(self.message),
        }
    }

    fn into_annotation(self) -> TriageError {
        TriageError::Annotation {
            status: self.status,
            message: self.message,
        }
    }
}

/// Client for the detection-engine and note APIs of one Kibana space.
#[derive(Debug, Clone)]
pub struct KibanaClient {
    client: Client,
    api_root: String,
    credentials: Credentials,
    rules_page_size: usize,
}

impl KibanaClient {
    /// Create a client for the configured space.
    pub fn new(config: &StackConfig) -> TriageResult<Self> {
        if config.kibana_url.trim().is_empty() {
            return Err(TriageError::Configuration(
                "Kibana URL is required".to_string(),
            ));
        }

        Ok(Self {
            client: http_client(config.verify_tls)?,
            api_root: config.kibana_api_root(),
            credentials: config.credentials.clone(),
            rules_page_size: DEFAULT_RULES_PAGE_SIZE,
        })
    }

    /// Override the `_find` page size.
    pub fn with_rules_page_size(mut self, per_page: usize) -> TriageResult<Self> {
        if per_page == 0 {
            return Err(TriageError::Configuration(
                "rules page size must be greater than zero".to_string(),
            ));
        }
        self.rules_page_size = per_page;
        Ok(self)
    }

    /// Space-aware API root this client talks to.
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.api_root);
        debug!(method = %method, url = %url, "Kibana request");
        self.credentials
            .apply(self.client.request(method, url))
            .header("kbn-xsrf", "true")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiFailure> {
        let response = request.send().await.map_err(|e| ApiFailure {
            status: e.status().map(|s| s.as_u16()),
            message: format!("request failed: {e}"),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ApiFailure {
            status: Some(status.as_u16()),
            message: format!("failed to read response: {e}"),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<KibanaErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or(body);
            return Err(ApiFailure {
                status: Some(status.as_u16()),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiFailure {
            status: Some(status.as_u16()),
            message: format!("malformed response: {e}"),
        })
    }

    /// Page through `_find` until a short page comes back.
    #[instrument(skip(self), fields(api_root = %self.api_root))]
    pub async fn list_rules(&self) -> TriageResult<Vec<DetectionRule>> {
        let per_page = self.rules_page_size.to_string();
        let mut rules = Vec::new();
        let mut page: u32 = 1;

        loop {
            let request = self
                .request(Method::GET, "/detection_engine/rules/_find")
                .query(&[("page", page.to_string().as_str()), ("per_page", per_page.as_str())]);
            let batch: FindRulesPage = self.send(request).await.map_err(ApiFailure::into_rules)?;

            let received = batch.data.len();
            rules.extend(batch.data);
            debug!(page, received, "Received rules page");

            if received < self.rules_page_size {
                break;
            }
            page += 1;
        }

        info!(count = rules.len(), "Listed detection rules");
        Ok(rules)
    }

    /// Read one rule by its `rule_id`.
    #[instrument(skip(self))]
    pub async fn get_rule(&self, rule_id: &str) -> TriageResult<DetectionRule> {
        let request = self
            .request(Method::GET, "/detection_engine/rules")
            .query(&[("rule_id", rule_id)]);

        self.send(request).await.map_err(|failure| {
            if failure.status == Some(StatusCode::NOT_FOUND.as_u16()) {
                TriageError::NotFound(format!("rule {rule_id}"))
            } else {
                failure.into_rules()
            }
        })
    }

    /// Partially update a rule. `updates` must be a JSON object.
    #[instrument(skip(self, updates))]
    pub async fn patch_rule(&self, rule_id: &str, updates: &Value) -> TriageResult<DetectionRule> {
        let Value::Object(fields) = updates else {
            return Err(TriageError::Rules(
                "rule updates must be a JSON object".to_string(),
            ));
        };

        let mut payload = fields.clone();
        payload.insert("rule_id".to_string(), Value::String(rule_id.to_string()));

        let request = self
            .request(Method::PATCH, "/detection_engine/rules")
            .json(&payload);
        self.send(request).await.map_err(ApiFailure::into_rules)
    }

    /// Attach a free-text note to an alert. `timeline_id` may be empty.
    #[instrument(skip(self, note))]
    pub async fn add_note(&self, event_id: &str, note: &str, timeline_id: &str) -> TriageResult<Value> {
        let body = NoteRequest {
            note: NoteBody {
                timeline_id,
                event_id,
                note,
            },
        };

        let request = self.request(Method::PATCH, "/note").json(&body);
        self.send(request).await.map_err(ApiFailure::into_annotation)
    }
}

#[async_trait]
impl RuleCatalog for KibanaClient {
    async fn list_rules(&self) -> TriageResult<Vec<DetectionRule>> {
        KibanaClient::list_rules(self).await
    }
}

#[async_trait]
impl AnnotationSink for KibanaClient {
    async fn attach(&self, alert_id: &str, result: &AnalysisResult) -> TriageResult<()> {
        self.add_note(alert_id, &format_note(result), "").await?;
        Ok(())
    }
}
