use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::types::{Frequency, RecurrenceRule};

/// Compute the next UTC execution time for `rule` strictly *after* `from`.
///
/// Wall-clock arithmetic happens in the rule's timezone. Returns `None`
/// (unresolved) when the rule cannot be evaluated: unknown timezone, a
/// missing or out-of-range day selector, or time fields out of range.
///
/// `Custom` rules carry a cron expression that this crate does not interpret;
/// they get a `from + 24h` placeholder and the dispatcher owns the real
/// evaluation.
pub fn compute_next_run(rule: &RecurrenceRule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let time = rule.scheduled_time;
    let at = NaiveTime::from_hms_opt(u32::from(time.hour), u32::from(time.minute), 0)?;

    if rule.frequency == Frequency::Custom {
        return Some(from + Duration::hours(24));
    }

    let tz: Tz = match rule.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            debug!(timezone = %rule.timezone, "unknown timezone; next run unresolved");
            return None;
        }
    };
    let today = from.with_timezone(&tz).date_naive();

    match rule.frequency {
        Frequency::Daily => {
            let candidate = local_instant(&tz, today, at)?;
            if candidate > from {
                Some(candidate)
            } else {
                local_instant(&tz, today.succ_opt()?, at)
            }
        }

        Frequency::Weekly => {
            // 1 = Monday … 7 = Sunday on both sides.
            let target = i64::from(time.day_of_week.filter(|d| (1..=7).contains(d))?);
            let current = i64::from(today.weekday().number_from_monday());
            // Zero distance counts as "next week": a weekly schedule never
            // fires later on the day it is computed on.
            let distance = match (target - current + 7) % 7 {
                0 => 7,
                d => d,
            };
            local_instant(&tz, today + Duration::days(distance), at)
        }

        Frequency::Monthly => {
            let day = time.day_of_month.filter(|d| (1..=31).contains(d))?;
            let this_month = clamp_day(today.year(), today.month(), day)?;
            let candidate = local_instant(&tz, this_month, at)?;
            if candidate > from {
                Some(candidate)
            } else {
                let (year, month) = following_month(today.year(), today.month());
                local_instant(&tz, clamp_day(year, month, day)?, at)
            }
        }

        Frequency::Custom => None,
    }
}

/// Resolve a local wall-clock time to UTC.
///
/// Ambiguous times (clocks falling back) take the earlier instant; times that
/// do not exist (clocks springing forward) move one hour later.
pub(crate) fn local_instant(tz: &Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `day` in the given month, or the month's last day if the month is shorter.
fn clamp_day(year: i32, month: u32, day: u8) -> Option<NaiveDate> {
    let (next_year, next_month) = following_month(year, month);
    let last = NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()?
        .day();
    NaiveDate::from_ymd_opt(year, month, u32::from(day).min(last))
}

fn following_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScheduledTime;
    use chrono::Weekday;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid test instant")
    }

    #[test]
    fn daily_before_time_fires_today() {
        let rule = RecurrenceRule::daily(8, 0);
        let next = compute_next_run(&rule, utc(2025, 3, 10, 7, 0));
        assert_eq!(next, Some(utc(2025, 3, 10, 8, 0)));
    }

    #[test]
    fn daily_after_time_fires_tomorrow() {
        let rule = RecurrenceRule::daily(8, 0);
        let next = compute_next_run(&rule, utc(2025, 3, 10, 9, 0));
        assert_eq!(next, Some(utc(2025, 3, 11, 8, 0)));
    }

    #[test]
    fn daily_exactly_at_time_moves_to_tomorrow() {
        let rule = RecurrenceRule::daily(8, 0);
        let next = compute_next_run(&rule, utc(2025, 3, 10, 8, 0));
        assert_eq!(next, Some(utc(2025, 3, 11, 8, 0)));
    }

    #[test]
    fn daily_rolls_over_year_end() {
        let rule = RecurrenceRule::daily(6, 15);
        let next = compute_next_run(&rule, utc(2024, 12, 31, 23, 0));
        assert_eq!(next, Some(utc(2025, 1, 1, 6, 15)));
    }

    #[test]
    fn weekly_same_day_after_time_jumps_a_week() {
        // 2025-03-10 is a Monday.
        assert_eq!(utc(2025, 3, 10, 0, 0).weekday(), Weekday::Mon);
        let rule = RecurrenceRule::weekly(1, 9, 0);
        let next = compute_next_run(&rule, utc(2025, 3, 10, 10, 0));
        assert_eq!(next, Some(utc(2025, 3, 17, 9, 0)));
    }

    #[test]
    fn weekly_same_day_before_time_still_jumps_a_week() {
        // Compatibility: the target day being today always means next week.
        let rule = RecurrenceRule::weekly(1, 9, 0);
        let next = compute_next_run(&rule, utc(2025, 3, 10, 8, 0));
        assert_eq!(next, Some(utc(2025, 3, 17, 9, 0)));
    }

    #[test]
    fn weekly_later_in_week() {
        // Monday → Friday (5) is four days ahead.
        let rule = RecurrenceRule::weekly(5, 17, 30);
        let next = compute_next_run(&rule, utc(2025, 3, 10, 12, 0));
        assert_eq!(next, Some(utc(2025, 3, 14, 17, 30)));
    }

    #[test]
    fn weekly_sunday_maps_to_seven() {
        // From Sunday 2025-03-16, target Monday is one day ahead and target
        // Sunday is a full week ahead.
        let sunday = utc(2025, 3, 16, 12, 0);
        assert_eq!(sunday.weekday(), Weekday::Sun);
        assert_eq!(
            compute_next_run(&RecurrenceRule::weekly(1, 9, 0), sunday),
            Some(utc(2025, 3, 17, 9, 0))
        );
        assert_eq!(
            compute_next_run(&RecurrenceRule::weekly(7, 9, 0), sunday),
            Some(utc(2025, 3, 23, 9, 0))
        );
    }

    #[test]
    fn monthly_day_31_in_february_clamps_to_last_day() {
        let rule = RecurrenceRule::monthly(31, 8, 0);
        let next = compute_next_run(&rule, utc(2025, 2, 15, 12, 0));
        assert_eq!(next, Some(utc(2025, 2, 28, 8, 0)));
    }

    #[test]
    fn monthly_leap_february_clamps_to_29th() {
        let rule = RecurrenceRule::monthly(30, 8, 0);
        let next = compute_next_run(&rule, utc(2024, 2, 1, 0, 0));
        assert_eq!(next, Some(utc(2024, 2, 29, 8, 0)));
    }

    #[test]
    fn monthly_passed_moves_to_next_month() {
        let rule = RecurrenceRule::monthly(5, 8, 0);
        let next = compute_next_run(&rule, utc(2025, 3, 20, 12, 0));
        assert_eq!(next, Some(utc(2025, 4, 5, 8, 0)));
    }

    #[test]
    fn monthly_passed_in_january_clamps_february() {
        let rule = RecurrenceRule::monthly(31, 8, 0);
        let next = compute_next_run(&rule, utc(2025, 1, 31, 9, 0));
        assert_eq!(next, Some(utc(2025, 2, 28, 8, 0)));
    }

    #[test]
    fn monthly_december_rolls_into_january() {
        let rule = RecurrenceRule::monthly(1, 0, 0);
        let next = compute_next_run(&rule, utc(2025, 12, 2, 0, 0));
        assert_eq!(next, Some(utc(2026, 1, 1, 0, 0)));
    }

    #[test]
    fn custom_is_a_day_later_placeholder() {
        let rule = RecurrenceRule::custom("*/5 * * * *");
        let now = utc(2025, 3, 10, 7, 3);
        assert_eq!(compute_next_run(&rule, now), Some(now + Duration::hours(24)));
    }

    #[test]
    fn daily_uses_schedule_timezone() {
        // 08:00 in New York during EDT is 12:00 UTC.
        let rule = RecurrenceRule::daily(8, 0).in_timezone("America/New_York");
        let next = compute_next_run(&rule, utc(2025, 6, 2, 11, 0));
        assert_eq!(next, Some(utc(2025, 6, 2, 12, 0)));
    }

    #[test]
    fn local_date_differs_from_utc_date() {
        // 23:30 UTC on the 10th is 08:30 on the 11th in Tokyo (UTC+9), so
        // 09:00 local is half an hour away.
        let rule = RecurrenceRule::daily(9, 0).in_timezone("Asia/Tokyo");
        let next = compute_next_run(&rule, utc(2025, 3, 10, 23, 30));
        assert_eq!(next, Some(utc(2025, 3, 11, 0, 0)));
    }

    #[test]
    fn nonexistent_local_time_shifts_forward() {
        // 2025-03-30 02:30 does not exist in Berlin; 03:30 CEST is 01:30 UTC.
        let rule = RecurrenceRule::daily(2, 30).in_timezone("Europe/Berlin");
        let next = compute_next_run(&rule, utc(2025, 3, 29, 23, 0));
        assert_eq!(next, Some(utc(2025, 3, 30, 1, 30)));
    }

    #[test]
    fn unknown_timezone_is_unresolved() {
        let rule = RecurrenceRule::daily(8, 0).in_timezone("Mars/Olympus_Mons");
        assert_eq!(compute_next_run(&rule, utc(2025, 3, 10, 7, 0)), None);
    }

    #[test]
    fn missing_day_selector_is_unresolved() {
        let mut rule = RecurrenceRule::weekly(1, 9, 0);
        rule.scheduled_time.day_of_week = None;
        assert_eq!(compute_next_run(&rule, utc(2025, 3, 10, 7, 0)), None);

        let mut rule = RecurrenceRule::monthly(0, 9, 0);
        assert_eq!(compute_next_run(&rule, utc(2025, 3, 10, 7, 0)), None);
        rule.scheduled_time = ScheduledTime::at(9, 0);
        assert_eq!(compute_next_run(&rule, utc(2025, 3, 10, 7, 0)), None);
    }

    #[test]
    fn out_of_range_time_is_unresolved() {
        let rule = RecurrenceRule::daily(24, 0);
        assert_eq!(compute_next_run(&rule, utc(2025, 3, 10, 7, 0)), None);
    }

    #[test]
    fn next_run_is_always_strictly_after_now() {
        let rules = [
            RecurrenceRule::daily(0, 0),
            RecurrenceRule::daily(23, 59),
            RecurrenceRule::weekly(3, 12, 0),
            RecurrenceRule::weekly(7, 0, 0),
            RecurrenceRule::monthly(1, 0, 0),
            RecurrenceRule::monthly(31, 23, 59),
            RecurrenceRule::daily(2, 30).in_timezone("America/New_York"),
            RecurrenceRule::monthly(15, 6, 0).in_timezone("Australia/Sydney"),
        ];
        let start = utc(2024, 1, 1, 0, 0);
        // Walk a leap year in uneven steps so every weekday, month end and
        // DST transition is crossed at several times of day.
        for step in 0..(366 * 24 / 7) {
            let now = start + Duration::hours(7 * step) + Duration::minutes(step % 60);
            for rule in &rules {
                let next = compute_next_run(rule, now).expect("rule resolves");
                assert!(next > now, "{rule:?} at {now} gave {next}");
            }
        }
    }
}
