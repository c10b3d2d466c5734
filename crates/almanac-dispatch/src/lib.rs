//! `almanac-dispatch` — turns due schedules into report jobs and runs them.
//!
//! The [`Dispatcher`] polls the [`almanac_scheduler::ScheduleStore`] for
//! eligible schedules, pushes a [`ReportJob`] per schedule onto a priority
//! [`queue::JobQueue`], and lets a fixed pool of workers hand each job to a
//! [`ReportExecutor`]. Every outcome is folded back into the schedule through
//! the store's execution recorder.
//!
//! Overlap is prevented at two levels: one outstanding job per schedule inside
//! a dispatcher, and one unexpired [`lease::LeaseTable`] row per schedule
//! across every dispatcher sharing the database.

pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod job;
pub mod lease;
pub mod queue;
pub mod stats;

pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Result};
pub use executor::{ExecutionReceipt, ExecutorError, ReportExecutor};
pub use job::{JobTrigger, ReportJob};
pub use lease::LeaseTable;
pub use stats::{JobRecord, JobState, QueueStats};
