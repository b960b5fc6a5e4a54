//! AI triage for Elastic Security alerts.
//!
//! This crate provides:
//! - Alert retrieval from the security alerts index with the scroll API
//! - Defensive extraction of alert fields into a fixed prompt
//! - Analysis through an OpenAI-compatible chat-completions API
//! - Note write-back and rule listing through the Kibana detection engine
//! - A pipeline that isolates per-alert failures and reports a run summary

pub mod alerts;
pub mod analysis;
pub mod annotation;
pub mod config;
pub mod error;
pub mod kibana;
pub mod pipeline;

// Re-export main types
pub use alerts::{AlertRecord, AlertSource, ElasticsearchAlertSource};
pub use analysis::{AnalysisRequest, AnalysisResult, Analyst, ChatAnalyst};
pub use annotation::{format_note, AnnotationSink};
pub use config::{AnalystConfig, Credentials, StackConfig};
pub use error::{TriageError, TriageResult};
pub use kibana::{DetectionRule, KibanaClient, RuleCatalog};
pub use pipeline::{AlertFailure, AlertOutcome, Pipeline, PipelineConfig, RunSummary};
