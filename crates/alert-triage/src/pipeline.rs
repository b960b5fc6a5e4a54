//! Triage pipeline - orchestrates the list-fetch-analyze-annotate flow.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alerts::{AlertRecord, AlertSource};
use crate::analysis::{AnalysisRequest, AnalysisResult, Analyst};
use crate::annotation::AnnotationSink;
use crate::config::{DEFAULT_PAGE_SIZE, DEFAULT_WINDOW_DAYS};
use crate::error::{TriageError, TriageResult};
use crate::kibana::RuleCatalog;

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Trailing window in days.
    pub window_days: u32,
    /// Alerts per scroll page.
    pub page_size: usize,
    /// Alerts processed at once.
    pub concurrency: usize,
    /// Analyst attempts per alert, including the first.
    pub max_attempts: u32,
    /// Pause between analyst attempts.
    pub retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: 1,
            max_attempts: 1,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// A single alert that could not be annotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertFailure {
    pub alert_id: String,
    pub reason: String,
}

/// What happened to one alert, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AlertOutcome {
    Annotated { alert_id: String },
    Failed(AlertFailure),
}

impl AlertOutcome {
    /// Id of the alert this outcome is about.
    pub fn alert_id(&self) -> &str {
        match self {
            Self::Annotated { alert_id } => alert_id,
            Self::Failed(failure) => &failure.alert_id,
        }
    }
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Rules listed, `None` when the listing failed.
    pub rules_found: Option<usize>,
    /// Alerts retrieved for processing.
    pub alerts_found: usize,
    /// Per-alert outcomes in source order.
    pub outcomes: Vec<AlertOutcome>,
}

impl RunSummary {
    /// Number of alerts that received a note.
    #[must_use]
    pub fn annotated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, AlertOutcome::Annotated { .. }))
            .count()
    }

    /// Ids that received a note, in order.
    pub fn annotated_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                AlertOutcome::Annotated { alert_id } => Some(alert_id.as_str()),
                AlertOutcome::Failed(_) => None,
            })
            .collect()
    }

    /// Failures, in order.
    pub fn failures(&self) -> Vec<&AlertFailure> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                AlertOutcome::Failed(failure) => Some(failure),
                AlertOutcome::Annotated { .. } => None,
            })
            .collect()
    }
}

/// Triage pipeline orchestrator.
pub struct Pipeline {
    rules: Arc<dyn RuleCatalog>,
    source: Arc<dyn AlertSource>,
    analyst: Arc<dyn Analyst>,
    sink: Arc<dyn AnnotationSink>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline from its capabilities.
    #[must_use]
    pub fn new(
        rules: Arc<dyn RuleCatalog>,
        source: Arc<dyn AlertSource>,
        analyst: Arc<dyn Analyst>,
        sink: Arc<dyn AnnotationSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            rules,
            source,
            analyst,
            sink,
            config,
        }
    }

    /// Run one full pass over the configured window.
    ///
    /// Only a failed fetch aborts the run. Every per-alert failure is recorded
    /// in the summary and processing moves on.
    pub async fn run(&self) -> TriageResult<RunSummary> {
        info!(window_days = self.config.window_days, "Starting triage run");

        let rules_found = match self.rules.list_rules().await {
            Ok(rules) => {
                info!(count = rules.len(), "Detection rules listed");
                Some(rules.len())
            }
            Err(e) => {
                warn!(error = %e, "Failed to list detection rules - continuing");
                None
            }
        };

        let alerts = self
            .source
            .fetch(self.config.window_days, self.config.page_size)
            .await?;
        info!(count = alerts.len(), "Alerts fetched");

        let outcomes = self.process_all(&alerts).await;
        let summary = RunSummary {
            rules_found,
            alerts_found: alerts.len(),
            outcomes,
        };

        info!(
            alerts = summary.alerts_found,
            annotated = summary.annotated(),
            failed = summary.failures().len(),
            "Triage run complete"
        );
        Ok(summary)
    }

    /// Re-run analysis and annotation for explicit alert ids.
    ///
    /// Ids that cannot be found are recorded as failures. A fatal store error
    /// still aborts.
    pub async fn reprocess(&self, ids: &[String]) -> TriageResult<RunSummary> {
        info!(count = ids.len(), "Reprocessing alerts by id");

        let mut lookups = Vec::with_capacity(ids.len());
        for id in ids {
            match self.source.fetch_by_id(id).await {
                Ok(record) => lookups.push(Ok(record)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(alert_id = %id, error = %e, "Alert lookup failed");
                    lookups.push(Err(AlertFailure {
                        alert_id: id.clone(),
                        reason: e.to_string(),
                    }));
                }
            }
        }

        let records: Vec<AlertRecord> = lookups
            .iter()
            .filter_map(|l| l.as_ref().ok().cloned())
            .collect();
        let mut processed = self.process_all(&records).await.into_iter();

        let mut outcomes = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            match lookup {
                Ok(_) => outcomes.extend(processed.next()),
                Err(failure) => outcomes.push(AlertOutcome::Failed(failure)),
            }
        }

        Ok(RunSummary {
            rules_found: None,
            alerts_found: records.len(),
            outcomes,
        })
    }

    /// Process records with bounded concurrency, keeping source order.
    async fn process_all(&self, records: &[AlertRecord]) -> Vec<AlertOutcome> {
        let concurrency = self.config.concurrency.max(1);

        stream::iter(records)
            .map(|record| async move {
                match self.process_one(record).await {
                    Ok(()) => {
                        info!(alert_id = %record.id, "Alert annotated");
                        AlertOutcome::Annotated {
                            alert_id: record.id.clone(),
                        }
                    }
                    Err(e) => {
                        warn!(alert_id = %record.id, error = %e, "Alert processing failed");
                        AlertOutcome::Failed(AlertFailure {
                            alert_id: record.id.clone(),
                            reason: e.to_string(),
                        })
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn process_one(&self, record: &AlertRecord) -> TriageResult<()> {
        debug!(alert_id = %record.id, "Processing alert");
        let request = AnalysisRequest::from_alert(record);
        let result = self.analyze_with_retry(&request).await?;

        if result.alert_id != record.id {
            return Err(TriageError::analysis(format!(
                "result belongs to alert {} instead of {}",
                result.alert_id, record.id
            )));
        }

        self.sink.attach(&record.id, &result).await
    }

    async fn analyze_with_retry(&self, request: &AnalysisRequest) -> TriageResult<AnalysisResult> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.analyst.analyze(request).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        alert_id = %request.alert_id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Analysis attempt failed - retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        RunSummary {
            rules_found: Some(3),
            alerts_found: 3,
            outcomes: vec![
                AlertOutcome::Annotated {
                    alert_id: "a1".into(),
                },
                AlertOutcome::Failed(AlertFailure {
                    alert_id: "a2".into(),
                    reason: "Analysis failed (500): boom".into(),
                }),
                AlertOutcome::Annotated {
                    alert_id: "a3".into(),
                },
            ],
        }
    }

    #[test]
    fn test_summary_accounting() {
        let summary = summary();
        assert_eq!(summary.annotated(), 2);
        assert_eq!(summary.annotated_ids(), ["a1", "a3"]);
        assert_eq!(summary.failures().len(), 1);
        assert_eq!(summary.failures()[0].alert_id, "a2");
    }

    #[test]
    fn test_outcome_alert_id() {
        let summary = summary();
        let ids: Vec<&str> = summary.outcomes.iter().map(AlertOutcome::alert_id).collect();
        assert_eq!(ids, ["a1", "a2", "a3"]);
    }

    #[test]
    fn test_summary_serializes_outcomes() {
        let value = serde_json::to_value(summary()).unwrap();
        assert_eq!(value["outcomes"][0]["status"], "annotated");
        assert_eq!(value["outcomes"][1]["status"], "failed");
        assert_eq!(value["outcomes"][1]["alert_id"], "a2");
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.window_days, 30);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.max_attempts, 1);
    }
}
