//! Writing analysis results back onto alerts as notes.

use async_trait::async_trait;

use crate::analysis::{AnalysisResult, NOT_AVAILABLE};
use crate::error::TriageResult;

/// Heading every generated note starts with.
pub const NOTE_HEADING: &str = "AI Security Analysis";

/// Capability to attach a note to an alert.
#[async_trait]
pub trait AnnotationSink: Send + Sync {
    /// Attach the formatted result to `alert_id`. A single attempt; never retried.
    async fn attach(&self, alert_id: &str, result: &AnalysisResult) -> TriageResult<()>;
}

/// Render the note text for a result.
#[must_use]
pub fn format_note(result: &AnalysisResult) -> String {
    let timestamp = result
        .source_timestamp
        .map_or_else(|| NOT_AVAILABLE.to_string(), |ts| ts.to_rfc3339());

    format!(
        "{NOTE_HEADING}\n\n{}\n\nAlert ID: {}\nAlert Timestamp: {timestamp}\nModel Used: {}",
        result.narrative.trim_end(),
        result.alert_id,
        result.model_identifier,
    )
}
