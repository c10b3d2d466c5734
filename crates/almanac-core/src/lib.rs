//! `almanac-core` — configuration, shared error type and id newtypes used by
//! every other Almanac crate.

pub mod config;
pub mod error;
pub mod types;

pub use error::{AlmanacError, Result};
pub use types::{JobId, ScheduleId, TenantId, UserId};
