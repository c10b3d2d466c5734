use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use almanac_core::ScheduleId;
use tokio::sync::Notify;

use crate::job::ReportJob;

/// Heap entry: higher priority first, then FIFO by sequence number.
struct Queued {
    seq: u64,
    job: ReportJob,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.job
            .priority
            .cmp(&other.job.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// In-memory prioritised work queue shared by the poller and the workers.
#[derive(Default)]
pub struct JobQueue {
    heap: Mutex<BinaryHeap<Queued>>,
    seq: AtomicU64,
    paused: AtomicBool,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: ReportJob) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap().push(Queued { seq, job });
        self.notify.notify_one();
    }

    /// Wait for the next job. Never returns while the queue is paused.
    pub async fn pop(&self) -> ReportJob {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.try_pop() {
                return job;
            }
            notified.await;
        }
    }

    pub fn try_pop(&self) -> Option<ReportJob> {
        if self.is_paused() {
            return None;
        }
        let job = self.heap().pop().map(|q| q.job);
        if job.is_some() && !self.heap().is_empty() {
            // Hand the remaining work to another idle worker.
            self.notify.notify_one();
        }
        job
    }

    /// Remove every waiting job of `schedule` and return them.
    pub fn remove_schedule(&self, schedule: &ScheduleId) -> Vec<ReportJob> {
        let mut heap = self.heap();
        let (removed, kept): (Vec<Queued>, Vec<Queued>) = std::mem::take(&mut *heap)
            .into_vec()
            .into_iter()
            .partition(|q| &q.job.schedule_id == schedule);
        *heap = BinaryHeap::from(kept);
        removed.into_iter().map(|q| q.job).collect()
    }

    pub fn len(&self) -> usize {
        self.heap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pause(&self) {
        self.paused.store(true, AtomicOrdering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, AtomicOrdering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(AtomicOrdering::SeqCst)
    }

    fn heap(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Queued>> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }
}
