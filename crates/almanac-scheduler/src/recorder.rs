use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::schedule::compute_next_run;
use crate::types::{ExecutionEntry, ExecutionOutcome, ScheduledReport, MAX_HISTORY};

/// What a recorded execution changed beyond the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordEffect {
    /// This call moved the schedule from active to inactive.
    pub auto_disabled: bool,
    pub next_run: Option<DateTime<Utc>>,
}

/// Apply one execution outcome to `schedule` at `now`.
///
/// Appends to the bounded history, updates run counters and the failure
/// streak, recomputes `next_run` from `now`, and deactivates the schedule once
/// the streak reaches `max_failures`.
pub fn record_execution(
    schedule: &mut ScheduledReport,
    outcome: ExecutionOutcome,
    now: DateTime<Utc>,
) -> RecordEffect {
    let status = outcome.status;
    let success = outcome.is_success();

    push_history(
        &mut schedule.execution_history,
        ExecutionEntry {
            run_date: now,
            status,
            error: outcome.error,
            artifact_ref: outcome.artifact_ref,
            execution_time_ms: outcome.execution_time_ms,
            recipient_count: outcome.recipient_count,
        },
    );

    schedule.total_runs += 1;
    if success {
        schedule.successful_runs += 1;
        schedule.last_success = Some(now);
        schedule.failure_count = 0;
    } else {
        schedule.failure_count += 1;
        schedule.last_failure = Some(now);
    }
    schedule.last_run = Some(now);
    schedule.next_run = compute_next_run(&schedule.rule, now);
    schedule.updated_at = now;

    let was_active = schedule.is_active;
    if schedule.failure_count >= schedule.max_failures {
        schedule.is_active = false;
    }
    let auto_disabled = was_active && !schedule.is_active;

    if auto_disabled {
        warn!(
            schedule_id = %schedule.id,
            failures = schedule.failure_count,
            max_failures = schedule.max_failures,
            "schedule auto-disabled after consecutive failures"
        );
    } else {
        info!(
            schedule_id = %schedule.id,
            %status,
            total_runs = schedule.total_runs,
            "execution recorded"
        );
    }

    RecordEffect {
        auto_disabled,
        next_run: schedule.next_run,
    }
}

/// Pause or resume. Resuming clears the failure streak; nothing else changes.
pub fn apply_toggle(schedule: &mut ScheduledReport, is_active: bool, now: DateTime<Utc>) {
    if is_active {
        schedule.failure_count = 0;
    }
    schedule.is_active = is_active;
    schedule.updated_at = now;
}

fn push_history(history: &mut Vec<ExecutionEntry>, entry: ExecutionEntry) {
    history.push(entry);
    if history.len() > MAX_HISTORY {
        let excess = history.len() - MAX_HISTORY;
        history.drain(..excess);
    }
}
