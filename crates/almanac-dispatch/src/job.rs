use almanac_core::{JobId, ScheduleId, TenantId};
use almanac_scheduler::types::{OutputFormat, ReportParameters, ReportType, ScheduledReport};
use almanac_scheduler::window::{resolve_window, ReportWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What caused a job to be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobTrigger {
    /// Picked up by the poller because `next_run` elapsed.
    Scheduled,
    /// Requested through the run-now endpoint.
    Manual,
}

/// Queue priority of a report type. Higher runs first.
pub fn priority_for(report_type: ReportType) -> u8 {
    match report_type {
        ReportType::FinancialSummary => 10,
        ReportType::Sales => 8,
        ReportType::BranchPerformance => 6,
        ReportType::StaffPerformance => 4,
        ReportType::CustomerAnalytics => 2,
        ReportType::MenuPerformance => 1,
    }
}

/// Everything the report executor needs to render and deliver one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub job_id: JobId,
    pub schedule_id: ScheduleId,
    pub tenant_id: TenantId,
    pub title: String,
    pub report_type: ReportType,
    pub format: OutputFormat,
    pub recipients: Vec<String>,
    pub parameters: ReportParameters,
    /// Resolved reporting period; absent for an unknown timezone or an
    /// unrepresentable range.
    pub window: Option<ReportWindow>,
    pub timezone: String,
    pub trigger: JobTrigger,
    /// 1 for the first execution, incremented on every retry.
    pub attempt: u32,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
}

impl ReportJob {
    pub fn from_schedule(
        schedule: &ScheduledReport,
        trigger: JobTrigger,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: JobId::for_run(
                trigger == JobTrigger::Manual,
                &schedule.id,
                now.timestamp_millis(),
            ),
            schedule_id: schedule.id.clone(),
            tenant_id: schedule.tenant_id.clone(),
            title: schedule.title.clone(),
            report_type: schedule.report_type,
            format: schedule.format,
            recipients: schedule.recipients.clone(),
            parameters: schedule.parameters.clone(),
            window: resolve_window(schedule.parameters.date_range, &schedule.rule.timezone, now),
            timezone: schedule.rule.timezone.clone(),
            trigger,
            attempt: 1,
            priority: priority_for(schedule.report_type),
            enqueued_at: now,
        }
    }

    /// The next attempt of this job. Keeps the job id and the reporting
    /// window of the first attempt.
    pub fn retry(&self, now: DateTime<Utc>) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            enqueued_at: now,
            ..self.clone()
        }
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}
