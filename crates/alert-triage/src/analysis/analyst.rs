//! Chat-completions client producing the triage narrative.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::prompts::{PromptManager, SYSTEM_PROMPT};
use super::request::AnalysisRequest;
use super::transcript::{NdjsonTranscript, NoTranscript, Transcript};
use crate::config::{http_client, AnalystConfig};
use crate::error::{TriageError, TriageResult};

/// Outcome of analyzing one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Id of the alert the narrative is about.
    pub alert_id: String,
    /// Free-text (markdown) assessment.
    pub narrative: String,
    /// Model that produced the narrative.
    pub model_identifier: String,
    /// Timestamp of the source alert.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// Capability to turn an analysis request into a narrative.
///
/// Implementations make a single attempt per call. Retrying is the caller's decision.
#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> TriageResult<AnalysisResult>;
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

/// One message of the chat payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Exact body POSTed to the chat-completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: ChatError,
}

#[derive(Debug, Deserialize)]
struct ChatError {
    message: String,
}

/// Analyst backed by an OpenAI-compatible chat-completions API.
pub struct ChatAnalyst {
    client: Client,
    config: AnalystConfig,
    prompts: PromptManager,
    transcript: Arc<dyn Transcript>,
}

impl ChatAnalyst {
    /// Create an analyst. A configured transcript path enables the NDJSON transcript.
    pub fn new(config: AnalystConfig) -> TriageResult<Self> {
        config.validate()?;
        let transcript: Arc<dyn Transcript> = match &config.transcript {
            Some(path) => Arc::new(NdjsonTranscript::new(path)),
            None => Arc::new(NoTranscript),
        };

        Ok(Self {
            client: http_client(true)?,
            prompts: PromptManager::new()?,
            config,
            transcript,
        })
    }

    /// Replace the transcript sink.
    #[must_use]
    pub fn with_transcript(mut self, transcript: Arc<dyn Transcript>) -> Self {
        self.transcript = transcript;
        self
    }

    /// Compose the payload for one alert: fixed system instruction, then the rendered alert.
    pub fn build_request(&self, request: &AnalysisRequest) -> TriageResult<ChatRequest> {
        let prompt = self.prompts.render(request)?;
        Ok(ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        })
    }
}

#[async_trait]
impl Analyst for ChatAnalyst {
    #[instrument(skip(self, request), fields(alert_id = %request.alert_id, model = %self.config.model))]
    async fn analyze(&self, request: &AnalysisRequest) -> TriageResult<AnalysisResult> {
        self.transcript.record(
            "Alert Input",
            &json!({ "alert_id": request.alert_id, "fields": request }),
        );

        let payload = self.build_request(request)?;
        self.transcript.record(
            "Generated Prompt",
            &json!({ "alert_id": request.alert_id, "request": &payload }),
        );

        debug!(endpoint = %self.config.endpoint, "Requesting analysis");
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TriageError::analysis(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TriageError::Analysis {
                status: Some(status.as_u16()),
                message: format!("failed to read response: {e}"),
            })?;

        self.transcript.record(
            "AI Response",
            &json!({
                "alert_id": request.alert_id,
                "status": status.as_u16(),
                "body": serde_json::from_str::<Value>(&body).unwrap_or_else(|_| Value::String(body.clone())),
            }),
        );

        if !status.is_success() {
            let message = serde_json::from_str::<ChatErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(TriageError::Analysis {
                status: Some(status.as_u16()),
                message,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| TriageError::Analysis {
            status: Some(status.as_u16()),
            message: format!("malformed response: {e}"),
        })?;

        let narrative = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| TriageError::Analysis {
                status: Some(status.as_u16()),
                message: "response contained no narrative".to_string(),
            })?;

        Ok(AnalysisResult {
            alert_id: request.alert_id.clone(),
            narrative,
            model_identifier: parsed
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| self.config.model.clone()),
            source_timestamp: request.source_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertRecord;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingTranscript {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl Transcript for RecordingTranscript {
        fn record(&self, message: &str, data: &Value) {
            self.events
                .lock()
                .unwrap()
                .push((message.to_string(), data.clone()));
        }
    }

    fn analyst(server: &MockServer) -> ChatAnalyst {
        let mut config = AnalystConfig::new("sk-test").unwrap();
        config.endpoint = format!("{}/v1/chat/completions", server.uri());
        config.temperature = 0.5;
        ChatAnalyst::new(config).unwrap()
    }

    fn request() -> AnalysisRequest {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        AnalysisRequest::from_alert(&AlertRecord::new("a1", Some(ts), json!({})))
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-2024-08-06",
            "choices": [ { "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" } ]
        })
    }

    #[tokio::test]
    async fn test_build_request_composition() {
        let server = MockServer::start().await;
        let analyst = analyst(&server);
        let payload = analyst.build_request(&request()).unwrap();

        assert_eq!(payload.model, "gpt-4o");
        assert!((payload.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(payload.messages.len(), 2);
        assert_eq!(payload.messages[0].role, ChatRole::System);
        assert_eq!(payload.messages[0].content, SYSTEM_PROMPT);
        assert_eq!(payload.messages[1].role, ChatRole::User);
        assert_eq!(
            payload.messages[1].content,
            PromptManager::new().unwrap().render(&request()).unwrap()
        );

        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["messages"][0]["role"], "system");
        assert!(wire.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn test_analyze_sends_exact_payload() {
        let server = MockServer::start().await;
        let analyst = analyst(&server);
        let expected = serde_json::to_value(analyst.build_request(&request()).unwrap()).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("low risk")))
            .expect(1)
            .mount(&server)
            .await;

        let result = analyst.analyze(&request()).await.unwrap();

        assert_eq!(result.alert_id, "a1");
        assert_eq!(result.narrative, "low risk");
        assert_eq!(result.model_identifier, "gpt-4o-2024-08-06");
        assert_eq!(result.source_timestamp, request().source_timestamp);
    }

    #[tokio::test]
    async fn test_analyze_reports_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "Rate limit reached", "type": "requests" }
            })))
            .mount(&server)
            .await;

        let err = analyst(&server).analyze(&request()).await.unwrap_err();
        match err {
            TriageError::Analysis { status, message } => {
                assert_eq!(status, Some(429));
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_analyze_rejects_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
            .mount(&server)
            .await;

        let err = analyst(&server).analyze(&request()).await.unwrap_err();
        assert!(matches!(err, TriageError::Analysis { .. }));
        assert!(err.to_string().contains("no narrative"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = analyst(&server).analyze(&request()).await.unwrap_err();
        assert!(err.to_string().contains("malformed response"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_missing_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        assert!(analyst(&server).analyze(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_transcript_records_prompt_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("low risk")))
            .mount(&server)
            .await;

        let transcript = Arc::new(RecordingTranscript::default());
        let analyst = analyst(&server).with_transcript(transcript.clone());
        analyst.analyze(&request()).await.unwrap();

        let events = transcript.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].0, "Alert Input");
        assert_eq!(events[0].1["alert_id"], "a1");
        assert_eq!(events[0].1["fields"]["rule_name"], "N/A");
        assert_eq!(events[1].0, "Generated Prompt");
        assert_eq!(events[1].1["alert_id"], "a1");
        assert_eq!(events[1].1["request"]["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(events[2].0, "AI Response");
        assert_eq!(events[2].1["body"]["choices"][0]["message"]["content"], "low risk");
    }
}
