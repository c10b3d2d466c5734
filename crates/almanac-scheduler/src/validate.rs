use std::sync::LazyLock;

use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

use crate::types::{DateRange, Frequency, ScheduleDraft};

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_FAILURES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;
/// Longest `dateRange` accepted, in days.
pub const MAX_DATE_RANGE_DAYS: u32 = 3650;

pub const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| match Regex::new(EMAIL_PATTERN) {
    Ok(re) => Some(re),
    Err(e) => {
        tracing::error!(error = %e, "e-mail pattern failed to compile; rejecting all recipients");
        None
    }
});

/// Why a [`ScheduleDraft`] was rejected. One variant per authoring field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must be between 1 and 255 characters")]
    Title,

    #[error("description must be at most 1000 characters")]
    Description,

    #[error("at least one recipient is required")]
    NoRecipients,

    #[error("invalid recipient e-mail address: {0}")]
    Recipient(String),

    #[error("hour must be between 0 and 23, got {0}")]
    Hour(u8),

    #[error("minute must be between 0 and 59, got {0}")]
    Minute(u8),

    #[error("dayOfWeek {0}")]
    DayOfWeek(&'static str),

    #[error("dayOfMonth {0}")]
    DayOfMonth(&'static str),

    #[error("cronExpression {0}")]
    CronExpression(&'static str),

    #[error("unknown timezone: {0}")]
    Timezone(String),

    #[error("dateRange must be \"auto\" or between 1 and 3650 days")]
    DateRange,

    #[error("maxFailures must be between 1 and 10, got {0}")]
    MaxFailures(u32),
}

impl ValidationError {
    /// Wire name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::NoRecipients | Self::Recipient(_) => "recipients",
            Self::Hour(_) | Self::Minute(_) => "scheduledTime",
            Self::DayOfWeek(_) => "scheduledTime.dayOfWeek",
            Self::DayOfMonth(_) => "scheduledTime.dayOfMonth",
            Self::CronExpression(_) => "cronExpression",
            Self::Timezone(_) => "timezone",
            Self::DateRange => "parameters.dateRange",
            Self::MaxFailures(_) => "maxFailures",
        }
    }
}

/// Trim free-text fields. Blank descriptions and cron expressions become absent.
pub fn normalize(mut draft: ScheduleDraft) -> ScheduleDraft {
    draft.title = draft.title.trim().to_string();
    draft.description = draft
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    draft.rule.cron_expression = draft
        .rule
        .cron_expression
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    draft.rule.timezone = draft.rule.timezone.trim().to_string();
    draft.recipients = draft
        .recipients
        .into_iter()
        .map(|r| r.trim().to_string())
        .collect();
    draft
}

/// Check a (normalized) draft. Returns the first problem found.
pub fn validate(draft: &ScheduleDraft) -> Result<(), ValidationError> {
    let title_len = draft.title.chars().count();
    if title_len == 0 || title_len > MAX_TITLE_LEN {
        return Err(ValidationError::Title);
    }
    if draft
        .description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(ValidationError::Description);
    }

    if draft.recipients.is_empty() {
        return Err(ValidationError::NoRecipients);
    }
    if let Some(bad) = draft.recipients.iter().find(|r| !is_email(r)) {
        return Err(ValidationError::Recipient(bad.clone()));
    }

    validate_rule(draft)?;

    if let DateRange::Days(n) = draft.parameters.date_range {
        if n == 0 || n > MAX_DATE_RANGE_DAYS {
            return Err(ValidationError::DateRange);
        }
    }
    if let Some(max) = draft.max_failures {
        if !MAX_FAILURES_RANGE.contains(&max) {
            return Err(ValidationError::MaxFailures(max));
        }
    }
    Ok(())
}

fn validate_rule(draft: &ScheduleDraft) -> Result<(), ValidationError> {
    let rule = &draft.rule;
    let time = rule.scheduled_time;

    if time.hour > 23 {
        return Err(ValidationError::Hour(time.hour));
    }
    if time.minute > 59 {
        return Err(ValidationError::Minute(time.minute));
    }

    let weekly = rule.frequency == Frequency::Weekly;
    match time.day_of_week {
        None if weekly => return Err(ValidationError::DayOfWeek("is required for weekly schedules")),
        Some(_) if !weekly => {
            return Err(ValidationError::DayOfWeek("is only allowed for weekly schedules"))
        }
        Some(d) if !(1..=7).contains(&d) => {
            return Err(ValidationError::DayOfWeek("must be between 1 (Monday) and 7 (Sunday)"))
        }
        _ => {}
    }

    let monthly = rule.frequency == Frequency::Monthly;
    match time.day_of_month {
        None if monthly => {
            return Err(ValidationError::DayOfMonth("is required for monthly schedules"))
        }
        Some(_) if !monthly => {
            return Err(ValidationError::DayOfMonth("is only allowed for monthly schedules"))
        }
        Some(d) if !(1..=31).contains(&d) => {
            return Err(ValidationError::DayOfMonth("must be between 1 and 31"))
        }
        _ => {}
    }

    let custom = rule.frequency == Frequency::Custom;
    match rule.cron_expression {
        None if custom => {
            return Err(ValidationError::CronExpression("is required for custom schedules"))
        }
        Some(_) if !custom => {
            return Err(ValidationError::CronExpression("is only allowed for custom schedules"))
        }
        _ => {}
    }

    if rule.timezone.parse::<Tz>().is_err() {
        return Err(ValidationError::Timezone(rule.timezone.clone()));
    }
    Ok(())
}

fn is_email(address: &str) -> bool {
    EMAIL.as_ref().is_some_and(|re| re.is_match(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecurrenceRule, ReportType};

    fn draft(rule: RecurrenceRule) -> ScheduleDraft {
        ScheduleDraft::new("Daily sales", ReportType::Sales, rule).recipient("ops@example.com")
    }

    #[test]
    fn accepts_well_formed_drafts() {
        for rule in [
            RecurrenceRule::daily(8, 0),
            RecurrenceRule::weekly(7, 23, 59),
            RecurrenceRule::monthly(31, 0, 0).in_timezone("Europe/Berlin"),
            RecurrenceRule::custom("0 6 * * 1-5"),
        ] {
            assert_eq!(validate(&draft(rule)), Ok(()));
        }
    }

    #[test]
    fn normalize_trims_title_and_recipients() {
        let mut d = draft(RecurrenceRule::daily(8, 0));
        d.title = "  Sales  ".into();
        d.description = Some("   ".into());
        d.recipients = vec!["  a@b.io ".into()];
        let d = normalize(d);
        assert_eq!(d.title, "Sales");
        assert_eq!(d.description, None);
        assert_eq!(d.recipients, vec!["a@b.io".to_string()]);
        assert_eq!(validate(&d), Ok(()));
    }

    #[test]
    fn rejects_blank_or_long_title() {
        let mut d = normalize(draft(RecurrenceRule::daily(8, 0)));
        d.title = String::new();
        assert_eq!(validate(&d), Err(ValidationError::Title));
        d.title = "x".repeat(256);
        assert_eq!(validate(&d), Err(ValidationError::Title));
        d.title = "é".repeat(255);
        assert_eq!(validate(&d), Ok(()));
    }

    #[test]
    fn email_pattern_compiles_and_accepts_plain_addresses() {
        assert!(Regex::new(EMAIL_PATTERN).is_ok());
        assert!(EMAIL.is_some());
        for good in ["ops@example.com", "first.last+tag@mail.example.co.uk"] {
            assert!(is_email(good), "{good} should be accepted");
        }
    }

    #[test]
    fn rejects_long_description() {
        let mut d = draft(RecurrenceRule::daily(8, 0));
        d.description = Some("d".repeat(1001));
        assert_eq!(validate(&d), Err(ValidationError::Description));
    }

    #[test]
    fn rejects_bad_recipients() {
        let mut d = draft(RecurrenceRule::daily(8, 0));
        d.recipients.clear();
        assert_eq!(validate(&d), Err(ValidationError::NoRecipients));

        for bad in ["plain", "a@b", "a b@c.io", "@c.io"] {
            d.recipients = vec![bad.into()];
            assert_eq!(
                validate(&d),
                Err(ValidationError::Recipient(bad.into())),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_out_of_range_time() {
        let d = draft(RecurrenceRule::daily(24, 0));
        assert_eq!(validate(&d), Err(ValidationError::Hour(24)));
        let d = draft(RecurrenceRule::daily(0, 60));
        assert_eq!(validate(&d), Err(ValidationError::Minute(60)));
    }

    #[test]
    fn day_selectors_must_match_frequency() {
        let mut weekly = RecurrenceRule::weekly(1, 9, 0);
        weekly.scheduled_time.day_of_week = None;
        assert!(matches!(validate(&draft(weekly)), Err(ValidationError::DayOfWeek(_))));
        assert!(matches!(
            validate(&draft(RecurrenceRule::weekly(8, 9, 0))),
            Err(ValidationError::DayOfWeek(_))
        ));

        let mut daily = RecurrenceRule::daily(9, 0);
        daily.scheduled_time.day_of_month = Some(3);
        let err = validate(&draft(daily)).unwrap_err();
        assert_eq!(err.field(), "scheduledTime.dayOfMonth");

        assert!(matches!(
            validate(&draft(RecurrenceRule::monthly(0, 9, 0))),
            Err(ValidationError::DayOfMonth(_))
        ));
    }

    #[test]
    fn cron_expression_only_for_custom() {
        let mut custom = RecurrenceRule::custom("x");
        custom.cron_expression = None;
        assert!(matches!(
            validate(&draft(custom)),
            Err(ValidationError::CronExpression(_))
        ));

        let mut daily = RecurrenceRule::daily(9, 0);
        daily.cron_expression = Some("0 9 * * *".into());
        assert!(matches!(
            validate(&draft(daily)),
            Err(ValidationError::CronExpression(_))
        ));
    }

    #[test]
    fn rejects_unknown_timezone() {
        let d = draft(RecurrenceRule::daily(9, 0).in_timezone("Nowhere/Special"));
        assert_eq!(
            validate(&d),
            Err(ValidationError::Timezone("Nowhere/Special".into()))
        );
    }

    #[test]
    fn rejects_out_of_range_day_range_and_bad_max_failures() {
        let mut d = draft(RecurrenceRule::daily(9, 0));
        d.parameters.date_range = DateRange::Days(0);
        assert_eq!(validate(&d), Err(ValidationError::DateRange));

        d.parameters.date_range = DateRange::Days(MAX_DATE_RANGE_DAYS + 1);
        assert_eq!(validate(&d), Err(ValidationError::DateRange));
        d.parameters.date_range = DateRange::Days(4_000_000_000);
        assert_eq!(validate(&d), Err(ValidationError::DateRange));
        d.parameters.date_range = DateRange::Days(MAX_DATE_RANGE_DAYS);
        assert_eq!(validate(&d), Ok(()));

        d.parameters.date_range = DateRange::Days(30);
        d.max_failures = Some(0);
        assert_eq!(validate(&d), Err(ValidationError::MaxFailures(0)));
        d.max_failures = Some(11);
        assert_eq!(validate(&d), Err(ValidationError::MaxFailures(11)));
        d.max_failures = Some(10);
        assert_eq!(validate(&d), Ok(()));
    }
}
