use std::fmt;
use std::str::FromStr;

use almanac_core::{ScheduleId, TenantId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of execution history entries kept per schedule.
pub const MAX_HISTORY: usize = 50;
/// Failure streak length that auto-disables a schedule unless overridden.
pub const DEFAULT_MAX_FAILURES: u32 = 3;
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Implements `Display`/`FromStr` over the serde wire names of a unit enum.
macro_rules! wire_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($ty), ": {}"), other)),
                }
            }
        }
    };
}

/// Which analytics report a schedule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportType {
    Sales,
    MenuPerformance,
    CustomerAnalytics,
    FinancialSummary,
    StaffPerformance,
    BranchPerformance,
}

wire_names!(ReportType {
    Sales => "sales",
    MenuPerformance => "menu-performance",
    CustomerAnalytics => "customer-analytics",
    FinancialSummary => "financial-summary",
    StaffPerformance => "staff-performance",
    BranchPerformance => "branch-performance",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pdf,
    Excel,
}

wire_names!(OutputFormat {
    Pdf => "pdf",
    Excel => "excel",
});

/// Recurrence class of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    /// Driven by an opaque cron expression evaluated by the dispatcher.
    Custom,
}

wire_names!(Frequency {
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
    Custom => "custom",
});

/// Wall-clock time of day (in the schedule's timezone) plus the day selector
/// the frequency needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTime {
    /// 0-23
    pub hour: u8,
    /// 0-59
    pub minute: u8,
    /// 1 = Monday … 7 = Sunday. Weekly schedules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// 1-31, clamped to the month's last day. Monthly schedules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
}

impl ScheduledTime {
    pub fn at(hour: u8, minute: u8) -> Self {
        Self {
            hour,
            minute,
            day_of_week: None,
            day_of_month: None,
        }
    }
}

/// Everything that determines when a schedule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub scheduled_time: ScheduledTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// IANA timezone name, e.g. `Europe/Berlin`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl RecurrenceRule {
    pub fn daily(hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Daily,
            scheduled_time: ScheduledTime::at(hour, minute),
            cron_expression: None,
            timezone: default_timezone(),
        }
    }

    pub fn weekly(day_of_week: u8, hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Weekly,
            scheduled_time: ScheduledTime {
                day_of_week: Some(day_of_week),
                ..ScheduledTime::at(hour, minute)
            },
            cron_expression: None,
            timezone: default_timezone(),
        }
    }

    pub fn monthly(day_of_month: u8, hour: u8, minute: u8) -> Self {
        Self {
            frequency: Frequency::Monthly,
            scheduled_time: ScheduledTime {
                day_of_month: Some(day_of_month),
                ..ScheduledTime::at(hour, minute)
            },
            cron_expression: None,
            timezone: default_timezone(),
        }
    }

    pub fn custom(expression: &str) -> Self {
        Self {
            frequency: Frequency::Custom,
            scheduled_time: ScheduledTime::at(0, 0),
            cron_expression: Some(expression.to_string()),
            timezone: default_timezone(),
        }
    }

    pub fn in_timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    /// True when `other` would fire at different instants. The cron string is
    /// opaque here, so only the fields the calculator reads are compared.
    pub fn timing_differs(&self, other: &RecurrenceRule) -> bool {
        self.frequency != other.frequency
            || self.scheduled_time != other.scheduled_time
            || self.timezone != other.timezone
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// Reporting period handed to the executor.
///
/// Serialised as the string `"auto"` or a bare number of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "DateRangeRepr", into = "DateRangeRepr")]
pub enum DateRange {
    /// Yesterday, in the schedule's timezone.
    #[default]
    Auto,
    /// The last `n` days up to the end of today.
    Days(u32),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum DateRangeRepr {
    Days(u32),
    Tag(String),
}

impl TryFrom<DateRangeRepr> for DateRange {
    type Error = String;

    fn try_from(repr: DateRangeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            DateRangeRepr::Days(n) => Ok(DateRange::Days(n)),
            DateRangeRepr::Tag(tag) if tag == "auto" => Ok(DateRange::Auto),
            DateRangeRepr::Tag(other) => Err(format!(
                "date range must be \"auto\" or a number of days, got {other:?}"
            )),
        }
    }
}

impl From<DateRange> for DateRangeRepr {
    fn from(range: DateRange) -> Self {
        match range {
            DateRange::Auto => DateRangeRepr::Tag("auto".to_string()),
            DateRange::Days(n) => DateRangeRepr::Days(n),
        }
    }
}

/// Report-scoping options forwarded verbatim to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub date_range: DateRange,
    #[serde(default = "bool_true")]
    pub include_charts: bool,
    #[serde(default = "bool_true")]
    pub include_details: bool,
    #[serde(default)]
    pub custom_filters: serde_json::Map<String, serde_json::Value>,
}

impl Default for ReportParameters {
    fn default() -> Self {
        Self {
            branch_id: None,
            date_range: DateRange::Auto,
            include_charts: true,
            include_details: true,
            custom_filters: serde_json::Map::new(),
        }
    }
}

fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

wire_names!(ExecutionStatus {
    Success => "success",
    Failure => "failure",
});

/// One row of a schedule's execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEntry {
    pub run_date: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Identifier of the rendered report, as returned by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_count: Option<u32>,
}

/// Terminal result of one dispatch attempt, reported to the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub recipient_count: Option<u32>,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            status: ExecutionStatus::Success,
            error: None,
            artifact_ref: None,
            execution_time_ms: None,
            recipient_count: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            error: Some(error.into()),
            ..Self::success()
        }
    }

    pub fn with_artifact(mut self, artifact_ref: impl Into<String>) -> Self {
        self.artifact_ref = Some(artifact_ref.into());
        self
    }

    pub fn with_execution_time(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    pub fn with_recipients(mut self, count: u32) -> Self {
        self.recipient_count = Some(count);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Authoring input for create and (full-replacement) update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub report_type: ReportType,
    #[serde(flatten)]
    pub rule: RecurrenceRule,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub parameters: ReportParameters,
    /// Defaults to [`DEFAULT_MAX_FAILURES`].
    #[serde(default)]
    pub max_failures: Option<u32>,
}

impl ScheduleDraft {
    pub fn new(title: &str, report_type: ReportType, rule: RecurrenceRule) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            report_type,
            rule,
            recipients: Vec::new(),
            format: OutputFormat::default(),
            parameters: ReportParameters::default(),
            max_failures: None,
        }
    }

    pub fn recipient(mut self, email: &str) -> Self {
        self.recipients.push(email.to_string());
        self
    }
}

/// A persisted scheduled report with its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReport {
    pub id: ScheduleId,
    pub tenant_id: TenantId,
    pub created_by: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub report_type: ReportType,
    #[serde(flatten)]
    pub rule: RecurrenceRule,
    pub recipients: Vec<String>,
    pub format: OutputFormat,
    pub parameters: ReportParameters,
    pub is_active: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// Current failure streak.
    pub failure_count: u32,
    pub max_failures: u32,
    pub total_runs: u32,
    pub successful_runs: u32,
    /// Oldest first, at most [`MAX_HISTORY`] entries.
    pub execution_history: Vec<ExecutionEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived display state of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Inactive,
    Failed,
    Ready,
    Scheduled,
}

wire_names!(ScheduleStatus {
    Inactive => "inactive",
    Failed => "failed",
    Ready => "ready",
    Scheduled => "scheduled",
});

/// A schedule plus the fields derived from it for list/detail responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleView {
    #[serde(flatten)]
    pub schedule: ScheduledReport,
    pub success_rate: u8,
    pub status: ScheduleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn date_range_accepts_auto_and_days() {
        let auto: DateRange = serde_json::from_value(json!("auto")).expect("auto");
        assert_eq!(auto, DateRange::Auto);
        let days: DateRange = serde_json::from_value(json!(7)).expect("days");
        assert_eq!(days, DateRange::Days(7));
        assert_eq!(serde_json::to_value(DateRange::Days(3)).expect("ser"), json!(3));
        assert_eq!(serde_json::to_value(DateRange::Auto).expect("ser"), json!("auto"));
    }

    #[test]
    fn date_range_rejects_other_strings() {
        assert!(serde_json::from_value::<DateRange>(json!("weekly")).is_err());
        assert!(serde_json::from_value::<DateRange>(json!(-2)).is_err());
    }

    #[test]
    fn draft_parses_camel_case_payload() {
        let draft: ScheduleDraft = serde_json::from_value(json!({
            "title": "Weekly sales",
            "reportType": "sales",
            "frequency": "weekly",
            "scheduledTime": { "hour": 9, "minute": 30, "dayOfWeek": 1 },
            "timezone": "Europe/Berlin",
            "recipients": ["ops@example.com"],
            "format": "excel",
            "parameters": { "dateRange": 14, "includeCharts": false }
        }))
        .expect("draft should parse");

        assert_eq!(draft.rule.frequency, Frequency::Weekly);
        assert_eq!(draft.rule.scheduled_time.day_of_week, Some(1));
        assert_eq!(draft.rule.timezone, "Europe/Berlin");
        assert_eq!(draft.format, OutputFormat::Excel);
        assert_eq!(draft.parameters.date_range, DateRange::Days(14));
        assert!(!draft.parameters.include_charts);
        assert!(draft.parameters.include_details);
        assert_eq!(draft.max_failures, None);
    }

    #[test]
    fn timezone_defaults_to_utc() {
        let rule: RecurrenceRule = serde_json::from_value(json!({
            "frequency": "daily",
            "scheduledTime": { "hour": 8, "minute": 0 }
        }))
        .expect("rule should parse");
        assert_eq!(rule.timezone, "UTC");
    }

    #[test]
    fn wire_names_round_trip_through_from_str() {
        assert_eq!("menu-performance".parse::<ReportType>(), Ok(ReportType::MenuPerformance));
        assert_eq!(ReportType::FinancialSummary.to_string(), "financial-summary");
        assert!("quarterly".parse::<Frequency>().is_err());
    }

    #[test]
    fn timing_differs_ignores_cron_text() {
        let a = RecurrenceRule::custom("0 6 * * *");
        let b = RecurrenceRule::custom("0 7 * * *");
        assert!(!a.timing_differs(&b));
        assert!(RecurrenceRule::daily(8, 0).timing_differs(&RecurrenceRule::daily(9, 0)));
        assert!(RecurrenceRule::daily(8, 0)
            .timing_differs(&RecurrenceRule::daily(8, 0).in_timezone("Asia/Tokyo")));
    }
}
