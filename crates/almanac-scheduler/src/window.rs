use chrono::{DateTime, Days, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::schedule::local_instant;
use crate::types::DateRange;

/// Inclusive reporting period handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Resolve `range` against `now` in `timezone`.
///
/// `Auto` covers all of yesterday; `Days(n)` runs from the start of the day
/// `n` days ago to the end of today. `None` for an unknown timezone or a
/// range reaching past the calendar's first representable date.
pub fn resolve_window(range: DateRange, timezone: &str, now: DateTime<Utc>) -> Option<ReportWindow> {
    let tz: Tz = timezone.parse().ok()?;
    let today = now.with_timezone(&tz).date_naive();
    let (first, last) = match range {
        DateRange::Auto => {
            let yesterday = today.pred_opt()?;
            (yesterday, yesterday)
        }
        DateRange::Days(n) => (today.checked_sub_days(Days::new(u64::from(n)))?, today),
    };

    let day_start = NaiveTime::from_hms_opt(0, 0, 0)?;
    let day_end = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?;
    Some(ReportWindow {
        start: local_instant(&tz, first, day_start)?,
        end: local_instant(&tz, last, day_end)?,
    })
}
