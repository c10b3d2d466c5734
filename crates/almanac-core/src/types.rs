use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Defines a `String` newtype id with the conversions every id shares.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Owning tenant. Every schedule query is scoped by it.
    TenantId
);

string_id!(
    /// User who authored a schedule.
    UserId
);

string_id!(
    /// Unique identifier for a scheduled report (UUIDv7, time-sortable).
    ScheduleId
);

string_id!(
    /// Identifier of one dispatch attempt handed out by the dispatcher.
    JobId
);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// `scheduled_{schedule}_{millis}` or `manual_{schedule}_{millis}`.
    pub fn for_run(manual: bool, schedule: &ScheduleId, at_millis: i64) -> Self {
        let prefix = if manual { "manual" } else { "scheduled" };
        Self(format!("{prefix}_{schedule}_{at_millis}"))
    }
}
