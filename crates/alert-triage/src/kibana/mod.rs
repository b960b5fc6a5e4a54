//! Kibana detection-engine access: rule catalog and note write-back.

mod client;
mod models;

use async_trait::async_trait;

use crate::error::TriageResult;

pub use client::KibanaClient;
pub use models::DetectionRule;

/// Read access to the detection rule catalog.
#[async_trait]
pub trait RuleCatalog: Send + Sync {
    /// Every rule in the configured space.
    async fn list_rules(&self) -> TriageResult<Vec<DetectionRule>>;
}
