//! Connection settings and credentials for the Elastic stack and the analysis service.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use crate::error::{TriageError, TriageResult};

/// Default Kibana space.
pub const DEFAULT_SPACE: &str = "default";

/// Default trailing window for alert retrieval, in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Default number of alerts per scroll page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of rules per `_find` page.
pub const DEFAULT_RULES_PAGE_SIZE: usize = 100;

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default sampling temperature. Kept low for repeatable narratives.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Default chat-completions endpoint.
pub const DEFAULT_ANALYST_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Per-request timeout for every outbound call.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Authentication scheme for Elasticsearch and Kibana.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: ApiKey <key>`.
    ApiKey(String),
    /// HTTP basic auth.
    Basic { username: String, password: String },
}

impl Credentials {
    /// Pick exactly one scheme from the optional inputs.
    ///
    /// Neither scheme, both schemes, or a username without a password (or the
    /// reverse) is a configuration error.
    pub fn resolve(
        api_key: Option<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> TriageResult<Self> {
        let api_key = api_key.filter(|k| !k.is_empty());
        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());

        match (api_key, username, password) {
            (Some(key), None, None) => Ok(Self::ApiKey(key)),
            (None, Some(username), Some(password)) => Ok(Self::Basic { username, password }),
            (Some(_), _, _) => Err(TriageError::Configuration(
                "both an API key and username/password were supplied; use exactly one".to_string(),
            )),
            (None, Some(_), None) | (None, None, Some(_)) => Err(TriageError::Configuration(
                "username and password must be supplied together".to_string(),
            )),
            (None, None, None) => Err(TriageError::Configuration(
                "either an API key or username/password must be provided".to_string(),
            )),
        }
    }

    /// Attach these credentials to a request.
    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::ApiKey(key) => request.header("Authorization", format!("ApiKey {key}")),
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(***)"),
            Self::Basic { username, .. } => write!(f, "Basic({username}:***)"),
        }
    }
}

/// Settings shared by the Elasticsearch and Kibana connectors.
#[derive(Debug, Clone)]
pub struct StackConfig {
    /// Elasticsearch base URL.
    pub elastic_url: String,
    /// Kibana base URL.
    pub kibana_url: String,
    /// Kibana space the alerts live in.
    pub space: String,
    /// Validated credentials.
    pub credentials: Credentials,
    /// Verify TLS certificates.
    pub verify_tls: bool,
}

impl StackConfig {
    /// Index pattern holding security alerts for the configured space.
    #[must_use]
    pub fn alert_index(&self) -> String {
        format!(".internal.alerts-security.alerts-{}-*", self.space)
    }

    /// Kibana API root, space-aware.
    #[must_use]
    pub fn kibana_api_root(&self) -> String {
        let base = self.kibana_url.trim_end_matches('/');
        if self.space == DEFAULT_SPACE {
            format!("{base}/api")
        } else {
            format!("{base}/s/{}/api", self.space)
        }
    }
}

/// Settings for the analysis service.
#[derive(Debug, Clone)]
pub struct AnalystConfig {
    /// Bearer token for the chat-completions API.
    pub api_key: String,
    /// Full chat-completions URL.
    pub endpoint: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Sampling temperature, always sent.
    pub temperature: f32,
    /// Optional completion length cap.
    pub max_tokens: Option<u32>,
    /// NDJSON transcript of prompts and responses.
    pub transcript: Option<PathBuf>,
}

impl AnalystConfig {
    /// Create a config with default endpoint, model and temperature.
    pub fn new(api_key: impl Into<String>) -> TriageResult<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(TriageError::Configuration(
                "analysis service API key is required".to_string(),
            ));
        }
        Ok(Self {
            api_key,
            endpoint: DEFAULT_ANALYST_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            transcript: None,
        })
    }

    /// Reject temperatures outside the service's accepted range.
    pub fn validate(&self) -> TriageResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(TriageError::Configuration(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.model.is_empty() {
            return Err(TriageError::Configuration("model must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Build the shared HTTP client.
pub(crate) fn http_client(verify_tls: bool) -> TriageResult<Client> {
    Client::builder()
        .user_agent(concat!("alert-triage/", env!("CARGO_PKG_VERSION")))
        .timeout(HTTP_TIMEOUT)
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .map_err(|e| TriageError::Configuration(format!("failed to build HTTP client: {e}")))
}
