use std::sync::Arc;
use std::time::Duration;

use almanac_core::config::ExecutorConfig;
use almanac_dispatch::{ExecutionReceipt, ExecutorError, ReportExecutor, ReportJob};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Report executor reached over HTTP: the job is POSTed as JSON and the
/// response body, if any, is read as an [`ExecutionReceipt`].
pub struct HttpReportExecutor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpReportExecutor {
    pub fn new(endpoint: String, token: Option<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl ReportExecutor for HttpReportExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, job: &ReportJob) -> Result<ExecutionReceipt, ExecutorError> {
        debug!(job_id = %job.job_id, endpoint = %self.endpoint, "posting report job");

        let mut req = self.client.post(&self.endpoint).json(job);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %text, "report executor error");
            return Err(ExecutorError::Failed(format!(
                "executor returned {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ExecutorError::Transport(e.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ExecutionReceipt::default());
        }
        serde_json::from_slice(&body)
            .map_err(|e| ExecutorError::Failed(format!("unreadable executor response: {e}")))
    }
}

/// Placeholder executor when no endpoint is configured.
pub struct NullExecutor;

#[async_trait]
impl ReportExecutor for NullExecutor {
    fn name(&self) -> &str {
        "null"
    }

    async fn execute(&self, _job: &ReportJob) -> Result<ExecutionReceipt, ExecutorError> {
        Err(ExecutorError::NotConfigured)
    }
}

/// Build the report executor from config.
pub fn build_executor(config: &ExecutorConfig) -> anyhow::Result<Arc<dyn ReportExecutor>> {
    match config.endpoint {
        Some(ref endpoint) => {
            info!(%endpoint, timeout_secs = config.timeout_secs, "report executor: http");
            Ok(Arc::new(HttpReportExecutor::new(
                endpoint.clone(),
                config.token.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        None => {
            warn!("No report executor configured; every run will be recorded as failed");
            Ok(Arc::new(NullExecutor))
        }
    }
}
