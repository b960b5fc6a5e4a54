//! Kibana detection-engine wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A detection rule as returned by the detection engine.
///
/// Only the identifying fields are typed; everything else is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    /// Saved-object id.
    #[serde(default)]
    pub id: String,
    /// Stable rule id used by the read and patch endpoints.
    pub rule_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One page of `_find`.
#[derive(Debug, Deserialize)]
pub(crate) struct FindRulesPage {
    #[serde(default)]
    pub data: Vec<DetectionRule>,
}

/// Body of `PATCH /api/note`.
#[derive(Debug, Serialize)]
pub(crate) struct NoteRequest<'a> {
    pub note: NoteBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NoteBody<'a> {
    pub timeline_id: &'a str,
    pub event_id: &'a str,
    pub note: &'a str,
}

/// Kibana error body.
#[derive(Debug, Deserialize)]
pub(crate) struct KibanaErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    pub message: String,
}

impl KibanaErrorResponse {
    pub fn describe(&self) -> String {
        match &self.error {
            Some(error) => format!("{error}: {}", self.message),
            None => self.message.clone(),
        }
    }
}
