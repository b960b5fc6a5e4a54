//! Error types for the triage pipeline.

use thiserror::Error;

/// Errors raised by the triage connectors and the pipeline.
///
/// `Configuration` and `Retrieval` abort a run. Everything else is caught at
/// the per-alert boundary and recorded in the run summary.
#[derive(Debug, Error)]
pub enum TriageError {
    /// Missing or contradictory configuration, raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Alert query or scroll pagination failed.
    #[error("Alert retrieval failed: {0}")]
    Retrieval(String),

    /// The analysis service failed or returned unusable content.
    #[error("Analysis failed{}: {message}", status_suffix(.status))]
    Analysis { status: Option<u16>, message: String },

    /// Writing the note back onto the alert failed.
    #[error("Annotation failed{}: {message}", status_suffix(.status))]
    Annotation { status: Option<u16>, message: String },

    /// Point lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Detection rule API call failed.
    #[error("Rule API error: {0}")]
    Rules(String),
}

impl TriageError {
    /// Build an analysis failure without an upstream status.
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis {
            status: None,
            message: message.into(),
        }
    }

    /// Build an annotation failure without an upstream status.
    pub fn annotation(message: impl Into<String>) -> Self {
        Self::Annotation {
            status: None,
            message: message.into(),
        }
    }

    /// Whether this error ends the whole run rather than a single alert.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Retrieval(_))
    }
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// Result alias used across the crate.
pub type TriageResult<T> = Result<T, TriageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TriageError::Configuration("x".into()).is_fatal());
        assert!(TriageError::Retrieval("x".into()).is_fatal());
        assert!(!TriageError::analysis("x").is_fatal());
        assert!(!TriageError::annotation("x").is_fatal());
        assert!(!TriageError::NotFound("x".into()).is_fatal());
        assert!(!TriageError::Rules("x".into()).is_fatal());
    }

    #[test]
    fn test_status_in_message() {
        let err = TriageError::Analysis {
            status: Some(429),
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "Analysis failed (429): rate limited");
        assert_eq!(
            TriageError::annotation("boom").to_string(),
            "Annotation failed: boom"
        );
    }
}
