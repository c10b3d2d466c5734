use std::sync::{Arc, Mutex, MutexGuard};

use almanac_core::{ScheduleId, TenantId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::dashboard::{summarize, DashboardLimits, DashboardSummary};
use crate::db::{from_db, init_db, to_db};
use crate::error::{Result, SchedulerError};
use crate::recorder::{self, RecordEffect};
use crate::schedule::compute_next_run;
use crate::status::success_rate;
use crate::types::{
    ExecutionEntry, ExecutionOutcome, ReportType, ScheduleDraft, ScheduledReport,
    DEFAULT_MAX_FAILURES,
};
use crate::validate::{normalize, validate};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

const COLUMNS: &str = "id, tenant_id, created_by, title, description, report_type, rule,
    recipients, format, parameters, is_active, next_run, last_run, last_success,
    last_failure, failure_count, max_failures, total_runs, successful_runs, history,
    created_at, updated_at";

/// Narrowing applied by [`ScheduleStore::list`]. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub is_active: Option<bool>,
    pub report_type: Option<ReportType>,
}

/// 1-based page request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None, DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    fn new(request: PageRequest, total: u64) -> Self {
        Self {
            page: request.page,
            limit: request.limit,
            total,
            pages: total.div_ceil(u64::from(request.limit)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

/// Run statistics returned alongside a history page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub total_runs: u32,
    pub successful_runs: u32,
    pub success_rate: u8,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub failure_count: u32,
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    /// Most recent first.
    pub entries: Vec<ExecutionEntry>,
    pub pagination: Pagination,
    pub summary: HistorySummary,
}

/// Tenant-scoped persistence for scheduled reports.
///
/// Wraps a single SQLite connection in a `Mutex`. Every read-modify-write
/// (update, toggle, record) runs inside an IMMEDIATE transaction so the
/// dispatcher and API handlers never lose each other's updates.
pub struct ScheduleStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl ScheduleStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        Self::with_clock(conn, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
        })
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Validate `draft` and persist it as a new active schedule.
    #[instrument(skip_all, fields(tenant = %tenant, created_by = %created_by))]
    pub fn create(
        &self,
        tenant: &TenantId,
        created_by: &UserId,
        draft: ScheduleDraft,
    ) -> Result<ScheduledReport> {
        let draft = normalize(draft);
        validate(&draft)?;

        let now = self.clock.now();
        let report = ScheduledReport {
            id: ScheduleId::new(),
            tenant_id: tenant.clone(),
            created_by: created_by.clone(),
            title: draft.title,
            description: draft.description,
            report_type: draft.report_type,
            next_run: compute_next_run(&draft.rule, now),
            rule: draft.rule,
            recipients: draft.recipients,
            format: draft.format,
            parameters: draft.parameters,
            is_active: true,
            last_run: None,
            last_success: None,
            last_failure: None,
            failure_count: 0,
            max_failures: draft.max_failures.unwrap_or(DEFAULT_MAX_FAILURES),
            total_runs: 0,
            successful_runs: 0,
            execution_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let db = self.lock()?;
        db.execute(
            &format!(
                "INSERT INTO scheduled_reports ({COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)"
            ),
            params_from_iter(encode(&report)?),
        )?;

        info!(
            schedule_id = %report.id,
            report_type = %report.report_type,
            frequency = %report.rule.frequency,
            next_run = ?report.next_run,
            "schedule created"
        );
        Ok(report)
    }

    /// Fetch one schedule of `tenant`. Another tenant's schedule is `NotFound`.
    #[instrument(skip_all, fields(tenant = %tenant, schedule_id = %id))]
    pub fn get(&self, tenant: &TenantId, id: &ScheduleId) -> Result<ScheduledReport> {
        let now = self.clock.now();
        let db = self.lock()?;
        let mut report = load(&db, id, Some(tenant))?;
        repair_next_run(&db, &mut report, now)?;
        Ok(report)
    }

    /// Fetch a schedule regardless of tenant. Used by the dispatcher, which
    /// works from ids it selected itself.
    pub fn get_by_id(&self, id: &ScheduleId) -> Result<ScheduledReport> {
        let db = self.lock()?;
        load(&db, id, None)
    }

    /// Replace the authoring fields of a schedule.
    ///
    /// `next_run` is recomputed only when the timing fields changed; runtime
    /// counters and history are untouched.
    #[instrument(skip_all, fields(tenant = %tenant, schedule_id = %id))]
    pub fn update(
        &self,
        tenant: &TenantId,
        id: &ScheduleId,
        draft: ScheduleDraft,
    ) -> Result<ScheduledReport> {
        let draft = normalize(draft);
        validate(&draft)?;

        let now = self.clock.now();
        let mut db = self.lock()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = load(&tx, id, Some(tenant))?;

        let rule_changed = report.rule.timing_differs(&draft.rule);
        report.title = draft.title;
        report.description = draft.description;
        report.report_type = draft.report_type;
        report.rule = draft.rule;
        report.recipients = draft.recipients;
        report.format = draft.format;
        report.parameters = draft.parameters;
        if let Some(max) = draft.max_failures {
            report.max_failures = max;
        }
        if rule_changed || report.next_run.is_none() {
            report.next_run = compute_next_run(&report.rule, now);
        }
        report.updated_at = now;

        save(&tx, &report)?;
        tx.commit()?;

        info!(rule_changed, next_run = ?report.next_run, "schedule updated");
        Ok(report)
    }

    #[instrument(skip_all, fields(tenant = %tenant, schedule_id = %id))]
    pub fn delete(&self, tenant: &TenantId, id: &ScheduleId) -> Result<()> {
        let db = self.lock()?;
        let rows_changed = db.execute(
            "DELETE FROM scheduled_reports WHERE id = ?1 AND tenant_id = ?2",
            rusqlite::params![id.as_str(), tenant.as_str()],
        )?;
        if rows_changed == 0 {
            return Err(SchedulerError::NotFound { id: id.to_string() });
        }
        info!("schedule deleted");
        Ok(())
    }

    /// Page through a tenant's schedules, newest first.
    #[instrument(skip_all, fields(tenant = %tenant, page = page.page, limit = page.limit))]
    pub fn list(
        &self,
        tenant: &TenantId,
        filter: &ListFilter,
        page: PageRequest,
    ) -> Result<Page<ScheduledReport>> {
        let mut clauses = vec!["tenant_id = ?"];
        let mut args = vec![Value::Text(tenant.to_string())];
        if let Some(active) = filter.is_active {
            clauses.push("is_active = ?");
            args.push(Value::Integer(i64::from(active)));
        }
        if let Some(report_type) = filter.report_type {
            clauses.push("report_type = ?");
            args.push(Value::Text(report_type.to_string()));
        }
        let where_clause = clauses.join(" AND ");

        let db = self.lock()?;
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM scheduled_reports WHERE {where_clause}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        args.push(Value::Integer(i64::from(page.limit)));
        args.push(Value::Integer(page.offset() as i64));
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM scheduled_reports
             WHERE {where_clause}
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_raw)?;
        let items = decode_rows(rows)?;

        Ok(Page {
            items,
            pagination: Pagination::new(page, total.max(0) as u64),
        })
    }

    /// Pause (`false`) or resume (`true`) a schedule.
    #[instrument(skip_all, fields(tenant = %tenant, schedule_id = %id, is_active))]
    pub fn toggle(
        &self,
        tenant: &TenantId,
        id: &ScheduleId,
        is_active: bool,
    ) -> Result<ScheduledReport> {
        let now = self.clock.now();
        let mut db = self.lock()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = load(&tx, id, Some(tenant))?;
        recorder::apply_toggle(&mut report, is_active, now);
        save(&tx, &report)?;
        tx.commit()?;

        info!("schedule {}", if is_active { "resumed" } else { "paused" });
        Ok(report)
    }

    /// Atomically apply an execution outcome reported by the dispatcher.
    #[instrument(skip_all, fields(schedule_id = %id, status = %outcome.status))]
    pub fn record_execution(
        &self,
        id: &ScheduleId,
        outcome: ExecutionOutcome,
    ) -> Result<(ScheduledReport, RecordEffect)> {
        let now = self.clock.now();
        let mut db = self.lock()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut report = load(&tx, id, None)?;
        let effect = recorder::record_execution(&mut report, outcome, now);
        save(&tx, &report)?;
        tx.commit()?;
        Ok((report, effect))
    }

    /// Active schedules whose `next_run` has elapsed, earliest first.
    ///
    /// Active rows without a `next_run` are recomputed first so a schedule can
    /// never silently stall.
    #[instrument(skip_all)]
    pub fn find_ready(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledReport>> {
        self.ready(None, now)
    }

    #[instrument(skip_all, fields(tenant = %tenant))]
    pub fn find_ready_for_tenant(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledReport>> {
        self.ready(Some(tenant), now)
    }

    /// A page of one schedule's history plus its run statistics.
    #[instrument(skip_all, fields(tenant = %tenant, schedule_id = %id))]
    pub fn history(
        &self,
        tenant: &TenantId,
        id: &ScheduleId,
        page: PageRequest,
    ) -> Result<HistoryPage> {
        let db = self.lock()?;
        let report = load(&db, id, Some(tenant))?;
        drop(db);

        let total = report.execution_history.len() as u64;
        let entries = report
            .execution_history
            .iter()
            .rev()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(HistoryPage {
            entries,
            pagination: Pagination::new(page, total),
            summary: HistorySummary {
                total_runs: report.total_runs,
                successful_runs: report.successful_runs,
                success_rate: success_rate(&report),
                last_run: report.last_run,
                last_success: report.last_success,
                last_failure: report.last_failure,
                failure_count: report.failure_count,
            },
        })
    }

    /// Dashboard over all of a tenant's schedules.
    #[instrument(skip_all, fields(tenant = %tenant))]
    pub fn dashboard(&self, tenant: &TenantId) -> Result<DashboardSummary> {
        let now = self.clock.now();
        let schedules = self.all_for_tenant(tenant)?;
        Ok(summarize(&schedules, now, DashboardLimits::default()))
    }

    // --- private helpers ---------------------------------------------------

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| SchedulerError::LockPoisoned)
    }

    fn all_for_tenant(&self, tenant: &TenantId) -> Result<Vec<ScheduledReport>> {
        let db = self.lock()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {COLUMNS} FROM scheduled_reports WHERE tenant_id = ?1"
        ))?;
        let rows = stmt.query_map([tenant.as_str()], row_to_raw)?;
        let reports = decode_rows(rows)?;
        Ok(reports)
    }

    fn ready(&self, tenant: Option<&TenantId>, now: DateTime<Utc>) -> Result<Vec<ScheduledReport>> {
        let mut db = self.lock()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stalled = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {COLUMNS} FROM scheduled_reports
                 WHERE is_active = 1 AND next_run IS NULL
                   AND (?1 IS NULL OR tenant_id = ?1)"
            ))?;
            let rows = stmt.query_map([tenant.map(TenantId::as_str)], row_to_raw)?;
            decode_rows(rows)?
        };
        for mut report in stalled {
            repair_next_run(&tx, &mut report, now)?;
        }

        let ready = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM scheduled_reports
                 WHERE is_active = 1 AND next_run IS NOT NULL AND next_run <= ?1
                   AND (?2 IS NULL OR tenant_id = ?2)
                 ORDER BY next_run ASC"
            ))?;
            let rows = stmt.query_map(
                rusqlite::params![to_db(now), tenant.map(TenantId::as_str)],
                row_to_raw,
            )?;
            decode_rows(rows)?
        };
        tx.commit()?;

        debug!(count = ready.len(), "eligible schedules");
        Ok(ready)
    }
}

/// Recompute and persist `next_run` for an active schedule that lacks one.
fn repair_next_run(conn: &Connection, report: &mut ScheduledReport, now: DateTime<Utc>) -> Result<()> {
    if !report.is_active || report.next_run.is_some() {
        return Ok(());
    }
    let Some(next) = compute_next_run(&report.rule, now) else {
        warn!(schedule_id = %report.id, "next run cannot be resolved; schedule stays idle");
        return Ok(());
    };
    conn.execute(
        "UPDATE scheduled_reports SET next_run = ?1 WHERE id = ?2",
        rusqlite::params![to_db(next), report.id.as_str()],
    )?;
    warn!(schedule_id = %report.id, next_run = %next, "repaired missing next run");
    report.next_run = Some(next);
    Ok(())
}

fn load(conn: &Connection, id: &ScheduleId, tenant: Option<&TenantId>) -> Result<ScheduledReport> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM scheduled_reports
                 WHERE id = ?1 AND (?2 IS NULL OR tenant_id = ?2)"
            ),
            rusqlite::params![id.as_str(), tenant.map(TenantId::as_str)],
            row_to_raw,
        )
        .optional()?;
    match raw {
        Some(raw) => raw.decode(),
        None => Err(SchedulerError::NotFound { id: id.to_string() }),
    }
}

/// Overwrite every mutable column of an existing row.
fn save(conn: &Connection, report: &ScheduledReport) -> Result<()> {
    let rows_changed = conn.execute(
        "UPDATE scheduled_reports SET
            title = ?2, description = ?3, report_type = ?4, rule = ?5,
            recipients = ?6, format = ?7, parameters = ?8, is_active = ?9,
            next_run = ?10, last_run = ?11, last_success = ?12, last_failure = ?13,
            failure_count = ?14, max_failures = ?15, total_runs = ?16,
            successful_runs = ?17, history = ?18, updated_at = ?19
         WHERE id = ?1",
        rusqlite::params![
            report.id.as_str(),
            report.title,
            report.description,
            report.report_type.as_str(),
            serde_json::to_string(&report.rule)?,
            serde_json::to_string(&report.recipients)?,
            report.format.as_str(),
            serde_json::to_string(&report.parameters)?,
            report.is_active,
            report.next_run.map(to_db),
            report.last_run.map(to_db),
            report.last_success.map(to_db),
            report.last_failure.map(to_db),
            report.failure_count,
            report.max_failures,
            report.total_runs,
            report.successful_runs,
            serde_json::to_string(&report.execution_history)?,
            to_db(report.updated_at),
        ],
    )?;
    if rows_changed == 0 {
        return Err(SchedulerError::NotFound {
            id: report.id.to_string(),
        });
    }
    Ok(())
}

/// Column values in `COLUMNS` order.
fn encode(report: &ScheduledReport) -> Result<Vec<Value>> {
    let text = |s: &str| Value::Text(s.to_string());
    let opt_ts = |ts: Option<DateTime<Utc>>| ts.map(|t| Value::Text(to_db(t))).unwrap_or(Value::Null);
    Ok(vec![
        text(report.id.as_str()),
        text(report.tenant_id.as_str()),
        text(report.created_by.as_str()),
        text(&report.title),
        report.description.clone().map(Value::Text).unwrap_or(Value::Null),
        text(report.report_type.as_str()),
        Value::Text(serde_json::to_string(&report.rule)?),
        Value::Text(serde_json::to_string(&report.recipients)?),
        text(report.format.as_str()),
        Value::Text(serde_json::to_string(&report.parameters)?),
        Value::Integer(i64::from(report.is_active)),
        opt_ts(report.next_run),
        opt_ts(report.last_run),
        opt_ts(report.last_success),
        opt_ts(report.last_failure),
        Value::Integer(i64::from(report.failure_count)),
        Value::Integer(i64::from(report.max_failures)),
        Value::Integer(i64::from(report.total_runs)),
        Value::Integer(i64::from(report.successful_runs)),
        Value::Text(serde_json::to_string(&report.execution_history)?),
        Value::Text(to_db(report.created_at)),
        Value::Text(to_db(report.updated_at)),
    ])
}

/// A row as stored, before enum/JSON/timestamp decoding.
struct RawReport {
    id: String,
    tenant_id: String,
    created_by: String,
    title: String,
    description: Option<String>,
    report_type: String,
    rule: String,
    recipients: String,
    format: String,
    parameters: String,
    is_active: bool,
    next_run: Option<String>,
    last_run: Option<String>,
    last_success: Option<String>,
    last_failure: Option<String>,
    failure_count: u32,
    max_failures: u32,
    total_runs: u32,
    successful_runs: u32,
    history: String,
    created_at: String,
    updated_at: String,
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawReport> {
    Ok(RawReport {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        created_by: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        report_type: row.get(5)?,
        rule: row.get(6)?,
        recipients: row.get(7)?,
        format: row.get(8)?,
        parameters: row.get(9)?,
        is_active: row.get(10)?,
        next_run: row.get(11)?,
        last_run: row.get(12)?,
        last_success: row.get(13)?,
        last_failure: row.get(14)?,
        failure_count: row.get(15)?,
        max_failures: row.get(16)?,
        total_runs: row.get(17)?,
        successful_runs: row.get(18)?,
        history: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

impl RawReport {
    fn decode(self) -> Result<ScheduledReport> {
        let id = self.id;
        let corrupt = |reason: String| SchedulerError::CorruptRecord {
            id: id.clone(),
            reason,
        };
        let ts = |field: &str, text: &str| {
            from_db(text).ok_or_else(|| corrupt(format!("bad {field} timestamp {text:?}")))
        };
        let opt_ts = |field: &str, text: Option<String>| {
            text.map(|t| ts(field, &t)).transpose()
        };

        Ok(ScheduledReport {
            tenant_id: TenantId(self.tenant_id),
            created_by: UserId(self.created_by),
            title: self.title,
            description: self.description,
            report_type: self.report_type.parse().map_err(&corrupt)?,
            rule: serde_json::from_str(&self.rule).map_err(|e| corrupt(format!("rule: {e}")))?,
            recipients: serde_json::from_str(&self.recipients)
                .map_err(|e| corrupt(format!("recipients: {e}")))?,
            format: self.format.parse().map_err(&corrupt)?,
            parameters: serde_json::from_str(&self.parameters)
                .map_err(|e| corrupt(format!("parameters: {e}")))?,
            is_active: self.is_active,
            next_run: opt_ts("next_run", self.next_run)?,
            last_run: opt_ts("last_run", self.last_run)?,
            last_success: opt_ts("last_success", self.last_success)?,
            last_failure: opt_ts("last_failure", self.last_failure)?,
            failure_count: self.failure_count,
            max_failures: self.max_failures,
            total_runs: self.total_runs,
            successful_runs: self.successful_runs,
            execution_history: serde_json::from_str(&self.history)
                .map_err(|e| corrupt(format!("history: {e}")))?,
            created_at: ts("created_at", &self.created_at)?,
            updated_at: ts("updated_at", &self.updated_at)?,
            id: ScheduleId(id.clone()),
        })
    }
}

/// Decode a row set, skipping (and logging) rows that fail to decode.
fn decode_rows<I>(rows: I) -> Result<Vec<ScheduledReport>>
where
    I: Iterator<Item = rusqlite::Result<RawReport>>,
{
    let mut reports = Vec::new();
    for row in rows {
        match row?.decode() {
            Ok(report) => reports.push(report),
            Err(e) => warn!("skipping undecodable schedule row: {e}"),
        }
    }
    Ok(reports)
}
