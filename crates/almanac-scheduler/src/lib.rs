//! `almanac-scheduler` — recurrence math, execution bookkeeping and SQLite
//! persistence for scheduled reports.
//!
//! # Overview
//!
//! Schedules are persisted to a SQLite `scheduled_reports` table by the
//! tenant-scoped [`store::ScheduleStore`]. The pure modules compute the next
//! run, fold execution outcomes into a schedule, and derive read-side views;
//! the store wraps each of them in the right transaction.
//!
//! # Frequencies
//!
//! | Frequency | Behaviour                                                      |
//! |-----------|----------------------------------------------------------------|
//! | `daily`   | HH:MM local time every day                                     |
//! | `weekly`  | HH:MM on a weekday (1 = Monday); today always means next week  |
//! | `monthly` | HH:MM on a day of month, clamped to short months               |
//! | `custom`  | Opaque cron expression; placeholder next run 24 h out          |

pub mod clock;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod recorder;
pub mod schedule;
pub mod status;
pub mod store;
pub mod types;
pub mod validate;
pub mod window;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Result, SchedulerError};
pub use store::{ListFilter, Page, PageRequest, Pagination, ScheduleStore};
pub use types::{
    DateRange, ExecutionOutcome, ExecutionStatus, Frequency, RecurrenceRule, ReportType,
    ScheduleDraft, ScheduleStatus, ScheduledReport,
};
pub use validate::ValidationError;
