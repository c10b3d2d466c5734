use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use almanac_core::{JobId, ScheduleId, TenantId};
use almanac_scheduler::types::ReportType;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{JobTrigger, ReportJob};

/// Snapshot returned by `GET /queue/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    /// Failed jobs waiting out their retry backoff.
    pub delayed: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    /// Dropped before running (schedule paused, deleted or leased elsewhere).
    Skipped,
    Cancelled,
}

/// One line of the recent-jobs list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub schedule_id: ScheduleId,
    pub tenant_id: TenantId,
    pub title: String,
    pub report_type: ReportType,
    pub trigger: JobTrigger,
    pub attempt: u32,
    pub priority: u8,
    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counters plus a bounded log of the most recent jobs, newest last.
pub struct JobLog {
    records: Mutex<VecDeque<JobRecord>>,
    limit: usize,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl JobLog {
    pub fn new(limit: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
            limit: limit.max(1),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn enqueued(&self, job: &ReportJob) {
        let mut records = self.records();
        records.push_back(JobRecord {
            job_id: job.job_id.clone(),
            schedule_id: job.schedule_id.clone(),
            tenant_id: job.tenant_id.clone(),
            title: job.title.clone(),
            report_type: job.report_type,
            trigger: job.trigger,
            attempt: job.attempt,
            priority: job.priority,
            state: JobState::Waiting,
            enqueued_at: job.enqueued_at,
            started_at: None,
            finished_at: None,
            error: None,
        });
        while records.len() > self.limit {
            records.pop_front();
        }
    }

    pub fn started(&self, job: &JobId, at: DateTime<Utc>) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.update(job, |r| {
            r.state = JobState::Active;
            r.started_at = Some(at);
        });
    }

    /// A started job finished; `error` is `None` on success.
    pub fn finished(&self, job: &JobId, at: DateTime<Utc>, error: Option<String>) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let counter = if error.is_none() {
            &self.completed
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.update(job, |r| {
            r.state = if error.is_none() {
                JobState::Completed
            } else {
                JobState::Failed
            };
            r.finished_at = Some(at);
            r.error = error;
        });
    }

    /// A job left the queue without running.
    pub fn dropped(&self, job: &JobId, state: JobState, at: DateTime<Utc>, reason: &str) {
        self.update(job, |r| {
            r.state = state;
            r.finished_at = Some(at);
            r.error = Some(reason.to_string());
        });
    }

    pub fn stats(&self, waiting: usize, delayed: usize, paused: bool) -> QueueStats {
        QueueStats {
            waiting,
            delayed,
            active: self.active.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            paused,
        }
    }

    /// Most recent first.
    pub fn recent(&self) -> Vec<JobRecord> {
        self.records().iter().rev().cloned().collect()
    }

    fn update(&self, job: &JobId, f: impl FnOnce(&mut JobRecord)) {
        if let Some(record) = self.records().iter_mut().rev().find(|r| &r.job_id == job) {
            f(record);
        }
    }

    fn records(&self) -> std::sync::MutexGuard<'_, VecDeque<JobRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}
