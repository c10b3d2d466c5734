use almanac_core::ScheduleId;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{ExecutionStatus, ReportType, ScheduledReport};

/// Caps for the list sections of a [`DashboardSummary`].
#[derive(Debug, Clone, Copy)]
pub struct DashboardLimits {
    pub upcoming: usize,
    pub recent_activity: usize,
}

impl Default for DashboardLimits {
    fn default() -> Self {
        Self {
            upcoming: 5,
            recent_activity: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingSchedule {
    pub id: ScheduleId,
    pub title: String,
    pub report_type: ReportType,
    pub next_run: DateTime<Utc>,
}

/// One history entry lifted out of its schedule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub schedule_id: ScheduleId,
    pub title: String,
    pub report_type: ReportType,
    pub run_date: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_schedules: usize,
    pub active_schedules: usize,
    /// Schedules whose last run falls within the past 24 hours.
    pub executed_last_24h: usize,
    /// Schedules with a non-zero failure streak.
    pub failing_schedules: usize,
    pub upcoming: Vec<UpcomingSchedule>,
    pub recent_activity: Vec<ActivityEntry>,
}

/// Aggregate a tenant's schedules into the dashboard view.
pub fn summarize(
    schedules: &[ScheduledReport],
    now: DateTime<Utc>,
    limits: DashboardLimits,
) -> DashboardSummary {
    let day_ago = now - Duration::hours(24);
    let day_ahead = now + Duration::hours(24);

    let mut upcoming: Vec<UpcomingSchedule> = schedules
        .iter()
        .filter(|s| s.is_active)
        .filter_map(|s| {
            let next_run = s.next_run.filter(|n| *n >= now && *n <= day_ahead)?;
            Some(UpcomingSchedule {
                id: s.id.clone(),
                title: s.title.clone(),
                report_type: s.report_type,
                next_run,
            })
        })
        .collect();
    upcoming.sort_by_key(|u| u.next_run);
    upcoming.truncate(limits.upcoming);

    let mut recent_activity: Vec<ActivityEntry> = schedules
        .iter()
        .flat_map(|s| {
            s.execution_history.iter().map(move |e| ActivityEntry {
                schedule_id: s.id.clone(),
                title: s.title.clone(),
                report_type: s.report_type,
                run_date: e.run_date,
                status: e.status,
                error: e.error.clone(),
                execution_time_ms: e.execution_time_ms,
                recipient_count: e.recipient_count,
            })
        })
        .collect();
    recent_activity.sort_by(|a, b| b.run_date.cmp(&a.run_date));
    recent_activity.truncate(limits.recent_activity);

    DashboardSummary {
        total_schedules: schedules.len(),
        active_schedules: schedules.iter().filter(|s| s.is_active).count(),
        executed_last_24h: schedules
            .iter()
            .filter(|s| s.last_run.is_some_and(|r| r >= day_ago))
            .count(),
        failing_schedules: schedules.iter().filter(|s| s.failure_count >= 1).count(),
        upcoming,
        recent_activity,
    }
}
