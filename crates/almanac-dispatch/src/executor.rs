use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::ReportJob;

/// What the executor reports back for a rendered and delivered report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    /// Identifier of the stored artifact (file name, object key, ...).
    #[serde(default)]
    pub artifact_ref: Option<String>,
    /// Number of recipients the report was delivered to.
    #[serde(default)]
    pub recipient_count: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor ran but could not produce or deliver the report.
    #[error("report execution failed: {0}")]
    Failed(String),

    /// The executor could not be reached.
    #[error("executor unreachable: {0}")]
    Transport(String),

    #[error("no report executor configured")]
    NotConfigured,
}

/// Renders a report and delivers it to the recipients.
///
/// Every returned error becomes a recorded failure. The dispatcher drops the
/// future once the schedule's lease expires.
#[async_trait]
pub trait ReportExecutor: Send + Sync {
    /// Executor name for logs.
    fn name(&self) -> &str;

    async fn execute(&self, job: &ReportJob) -> Result<ExecutionReceipt, ExecutorError>;
}
