use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use almanac_core::config::DispatcherConfig;
use almanac_core::{JobId, ScheduleId, TenantId};
use almanac_scheduler::{Clock, ExecutionOutcome, ScheduleStore, SchedulerError};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DispatchError, Result};
use crate::executor::ReportExecutor;
use crate::job::{JobTrigger, ReportJob};
use crate::lease::LeaseTable;
use crate::queue::JobQueue;
use crate::stats::{JobLog, JobRecord, JobState, QueueStats};

/// Selects eligible schedules, executes them through a [`ReportExecutor`]
/// and reports every outcome back to the [`ScheduleStore`].
///
/// A schedule has at most one outstanding job per dispatcher (tracked in
/// `outstanding`) and at most one running job across dispatchers (tracked by
/// the persistent [`LeaseTable`]). A failed job is retried with exponential
/// backoff up to `max_attempts`, keeping its slot while it waits.
pub struct Dispatcher {
    store: Arc<ScheduleStore>,
    leases: LeaseTable,
    executor: Arc<dyn ReportExecutor>,
    clock: Arc<dyn Clock>,
    queue: JobQueue,
    log: JobLog,
    /// schedule id → id of its queued or running job.
    outstanding: DashMap<ScheduleId, JobId>,
    /// Failed jobs and the instant their next attempt becomes eligible.
    retries: Mutex<Vec<(DateTime<Utc>, ReportJob)>>,
    instance: String,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<ScheduleStore>,
        leases: LeaseTable,
        executor: Arc<dyn ReportExecutor>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            clock: store.clock(),
            store,
            leases,
            executor,
            queue: JobQueue::new(),
            log: JobLog::new(config.recent_jobs_limit),
            outstanding: DashMap::new(),
            retries: Mutex::new(Vec::new()),
            instance: Uuid::now_v7().to_string(),
            config,
        }
    }

    /// Main loop: poll every `poll_interval_secs` and feed the worker pool
    /// until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            instance = %self.instance,
            workers = self.config.workers,
            poll_interval_secs = self.config.poll_interval_secs,
            executor = self.executor.name(),
            "dispatcher started"
        );

        let workers: Vec<_> = (0..self.config.workers.max(1))
            .map(|n| {
                let me = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { me.worker(n, shutdown).await })
            })
            .collect();

        let period = std::time::Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once() {
                        error!("dispatcher poll error: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("dispatcher shutting down");
                        break;
                    }
                }
            }
        }

        for worker in workers {
            if let Err(e) = worker.await {
                error!("dispatch worker panicked: {e}");
            }
        }
    }

    /// Enqueue retries whose backoff has elapsed, then every eligible
    /// schedule that has no outstanding job. Returns the number of jobs
    /// enqueued.
    #[instrument(skip(self))]
    pub fn poll_once(&self) -> Result<usize> {
        let now = self.clock.now();
        self.leases.purge_expired(now)?;

        let mut enqueued = 0;
        for job in self.take_due_retries(now) {
            info!(job_id = %job.job_id, attempt = job.attempt, "retry enqueued");
            self.enqueue(job);
            enqueued += 1;
        }
        for schedule in self.store.find_ready(now)? {
            let job = ReportJob::from_schedule(&schedule, JobTrigger::Scheduled, now);
            if self.claim_slot(&job) {
                self.enqueue(job);
                enqueued += 1;
            } else {
                debug!(schedule_id = %schedule.id, "already outstanding; skipped");
            }
        }
        if enqueued > 0 {
            info!(count = enqueued, "due schedules enqueued");
        }
        Ok(enqueued)
    }

    /// Queue an immediate run of one of `tenant`'s schedules, bypassing
    /// `next_run`. The outcome goes through the same recorder as scheduled
    /// runs.
    #[instrument(skip(self), fields(tenant = %tenant, schedule_id = %id))]
    pub fn run_now(&self, tenant: &TenantId, id: &ScheduleId) -> Result<JobId> {
        let schedule = self.store.get(tenant, id)?;
        let now = self.clock.now();

        if self.leases.holder(id, now)?.is_some() {
            return Err(DispatchError::AlreadyInFlight { id: id.to_string() });
        }
        let job = ReportJob::from_schedule(&schedule, JobTrigger::Manual, now);
        if !self.claim_slot(&job) {
            return Err(DispatchError::AlreadyInFlight { id: id.to_string() });
        }
        let job_id = job.job_id.clone();
        self.enqueue(job);
        info!(job_id = %job_id, "manual run queued");
        Ok(job_id)
    }

    /// Drop waiting jobs and pending retries of `schedule`. A job that is
    /// already running is not interrupted. Returns how many jobs were removed.
    pub fn cancel_pending(&self, schedule: &ScheduleId) -> usize {
        let removed = self.queue.remove_schedule(schedule);
        let now = self.clock.now();
        for job in &removed {
            self.release_slot(job);
            self.log
                .dropped(&job.job_id, JobState::Cancelled, now, "cancelled");
        }

        let mut retries = self.retries();
        let before = retries.len();
        retries.retain(|(_, job)| {
            let keep = &job.schedule_id != schedule;
            if !keep {
                self.release_slot(job);
            }
            keep
        });
        let count = removed.len() + (before - retries.len());
        drop(retries);

        if count > 0 {
            info!(schedule_id = %schedule, count, "pending jobs cancelled");
        }
        count
    }

    pub fn pause(&self) {
        self.queue.pause();
        info!("dispatch queue paused");
    }

    pub fn resume(&self) {
        self.queue.resume();
        info!("dispatch queue resumed");
    }

    pub fn stats(&self) -> QueueStats {
        let delayed = self.retries().len();
        self.log.stats(self.queue.len(), delayed, self.queue.is_paused())
    }

    /// Most recent jobs first.
    pub fn recent_jobs(&self) -> Vec<JobRecord> {
        self.log.recent()
    }

    /// Execute everything currently waiting on the calling task, then return
    /// the number of jobs processed. Used for one-shot runs. Retries stay
    /// parked until a later poll.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while let Some(job) = self.queue.try_pop() {
            self.process(job).await;
            processed += 1;
        }
        processed
    }

    // --- private helpers ---------------------------------------------------

    async fn worker(&self, n: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = n, "dispatch worker started");
        loop {
            let job = tokio::select! {
                job = self.queue.pop() => job,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            self.process(job).await;
        }
        debug!(worker = n, "dispatch worker stopped");
    }

    /// Reserve the per-schedule slot for `job`. False if one is taken.
    fn claim_slot(&self, job: &ReportJob) -> bool {
        match self.outstanding.entry(job.schedule_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job.job_id.clone());
                true
            }
        }
    }

    fn enqueue(&self, job: ReportJob) {
        self.log.enqueued(&job);
        self.queue.push(job);
    }

    #[instrument(skip_all, fields(job_id = %job.job_id, schedule_id = %job.schedule_id))]
    async fn process(&self, job: ReportJob) {
        let owner = format!("{}/{}", self.instance, job.job_id);

        match self.begin(&job, &owner) {
            Ok(None) => {}
            Ok(Some(reason)) => {
                debug!(%reason, "job skipped");
                self.log
                    .dropped(&job.job_id, JobState::Skipped, self.clock.now(), reason);
                self.release_slot(&job);
                return;
            }
            Err(e) => {
                error!("could not start job: {e}");
                self.log
                    .dropped(&job.job_id, JobState::Skipped, self.clock.now(), "start failed");
                self.release_slot(&job);
                return;
            }
        }

        self.log.started(&job.job_id, self.clock.now());
        let outcome = self.execute(&job).await;
        let error = outcome.error.clone();

        // Every attempt is recorded, retries included.
        let still_active = match self.store.record_execution(&job.schedule_id, outcome) {
            Ok((report, effect)) => {
                if effect.auto_disabled {
                    warn!("schedule disabled by failure policy");
                }
                report.is_active
            }
            Err(SchedulerError::NotFound { .. }) => {
                warn!("schedule deleted while running; outcome discarded");
                false
            }
            Err(e) => {
                error!("failed to record execution: {e}");
                false
            }
        };

        if let Err(e) = self.leases.release(&job.schedule_id, &owner) {
            error!("failed to release lease: {e}");
        }
        let now = self.clock.now();
        let failed = error.is_some();
        self.log.finished(&job.job_id, now, error);

        if failed && still_active && job.attempt < self.config.max_attempts {
            self.schedule_retry(job, now);
        } else {
            self.release_slot(&job);
        }
    }

    /// Park `job` until its backoff elapses. The slot stays claimed.
    fn schedule_retry(&self, job: ReportJob, now: DateTime<Utc>) {
        let delay = retry_delay(self.config.retry_backoff_secs, job.attempt);
        let due = now + delay;
        info!(
            attempt = job.attempt,
            max_attempts = self.config.max_attempts,
            retry_at = %due,
            "execution failed; retry scheduled"
        );
        self.retries().push((due, job.retry(due)));
    }

    fn take_due_retries(&self, now: DateTime<Utc>) -> Vec<ReportJob> {
        let mut retries = self.retries();
        let (due, waiting): (Vec<_>, Vec<_>) = retries.drain(..).partition(|(at, _)| *at <= now);
        *retries = waiting;
        due.into_iter().map(|(_, job)| job).collect()
    }

    fn retries(&self) -> MutexGuard<'_, Vec<(DateTime<Utc>, ReportJob)>> {
        self.retries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the lease, then re-check the schedule while holding it.
    /// `Ok(Some(reason))` means the job must not run; the lease is released
    /// again in that case and on error.
    fn begin(&self, job: &ReportJob, owner: &str) -> Result<Option<&'static str>> {
        let now = self.clock.now();
        if !self.leases.acquire(&job.schedule_id, owner, now)? {
            return Ok(Some("leased by another dispatcher"));
        }

        let verdict = self.recheck(job, now);
        if !matches!(verdict, Ok(None)) {
            if let Err(e) = self.leases.release(&job.schedule_id, owner) {
                error!("failed to release lease: {e}");
            }
        }
        verdict
    }

    fn recheck(&self, job: &ReportJob, now: DateTime<Utc>) -> Result<Option<&'static str>> {
        let schedule = match self.store.get_by_id(&job.schedule_id) {
            Ok(s) => s,
            Err(SchedulerError::NotFound { .. }) => return Ok(Some("schedule deleted")),
            Err(e) => return Err(e.into()),
        };
        if job.trigger == JobTrigger::Scheduled {
            if !schedule.is_active {
                return Ok(Some("schedule inactive"));
            }
            // Another dispatcher may have run it since it was selected.
            // A retry already moved `next_run` past this slot.
            if !job.is_retry() && schedule.next_run.is_none_or(|next| next > now) {
                return Ok(Some("no longer due"));
            }
        }
        Ok(None)
    }

    async fn execute(&self, job: &ReportJob) -> ExecutionOutcome {
        let started = Instant::now();
        let deadline = self
            .leases
            .ttl()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(self.config.lease_ttl_secs));
        let result = tokio::time::timeout(deadline, self.executor.execute(job)).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(Ok(receipt)) => {
                let recipients = receipt
                    .recipient_count
                    .unwrap_or(u32::try_from(job.recipients.len()).unwrap_or(u32::MAX));
                info!(elapsed_ms, recipients, "report executed");
                let outcome = ExecutionOutcome::success()
                    .with_execution_time(elapsed_ms)
                    .with_recipients(recipients);
                match receipt.artifact_ref {
                    Some(artifact) => outcome.with_artifact(artifact),
                    None => outcome,
                }
            }
            Ok(Err(e)) => {
                warn!(elapsed_ms, "report execution failed: {e}");
                ExecutionOutcome::failure(e.to_string()).with_execution_time(elapsed_ms)
            }
            Err(_) => {
                warn!(elapsed_ms, "report execution timed out");
                ExecutionOutcome::failure(format!("execution exceeded lease of {deadline:?}"))
                    .with_execution_time(elapsed_ms)
            }
        }
    }

    fn release_slot(&self, job: &ReportJob) {
        self.outstanding
            .remove_if(&job.schedule_id, |_, job_id| job_id == &job.job_id);
    }
}

/// `base * 2^(attempt - 1)`, capped at a day.
fn retry_delay(base_secs: u64, attempt: u32) -> chrono::Duration {
    const MAX_DELAY_SECS: u64 = 24 * 60 * 60;
    let factor = 1u64 << attempt.saturating_sub(1).min(32);
    let secs = base_secs.saturating_mul(factor).min(MAX_DELAY_SECS);
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(retry_delay(60, 1), chrono::Duration::seconds(60));
        assert_eq!(retry_delay(60, 2), chrono::Duration::seconds(120));
        assert_eq!(retry_delay(60, 3), chrono::Duration::seconds(240));
        assert_eq!(retry_delay(0, 5), chrono::Duration::zero());
        assert_eq!(retry_delay(60, 40), chrono::Duration::days(1));
    }
}
