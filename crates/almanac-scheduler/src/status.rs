use chrono::{DateTime, Utc};

use crate::types::{ScheduleStatus, ScheduleView, ScheduledReport};

/// Derive the display status of a schedule at `now`.
///
/// Precedence: inactive, failed, ready (due or never computed), scheduled.
pub fn classify(schedule: &ScheduledReport, now: DateTime<Utc>) -> ScheduleStatus {
    if !schedule.is_active {
        ScheduleStatus::Inactive
    } else if schedule.failure_count >= schedule.max_failures {
        ScheduleStatus::Failed
    } else if schedule.next_run.is_none_or(|next| next <= now) {
        ScheduleStatus::Ready
    } else {
        ScheduleStatus::Scheduled
    }
}

/// Successful runs as a rounded percentage of all runs; 0 before the first run.
pub fn success_rate(schedule: &ScheduledReport) -> u8 {
    if schedule.total_runs == 0 {
        return 0;
    }
    let ratio = f64::from(schedule.successful_runs) / f64::from(schedule.total_runs);
    (ratio * 100.0).round().clamp(0.0, 100.0) as u8
}

pub fn view(schedule: ScheduledReport, now: DateTime<Utc>) -> ScheduleView {
    ScheduleView {
        success_rate: success_rate(&schedule),
        status: classify(&schedule, now),
        schedule,
    }
}
