// Repository behaviour against an in-memory SQLite database with a
// manually driven clock.

use std::sync::Arc;

use almanac_core::{ScheduleId, TenantId, UserId};
use almanac_scheduler::store::DEFAULT_HISTORY_LIMIT;
use almanac_scheduler::{
    ExecutionOutcome, FixedClock, ListFilter, PageRequest, RecurrenceRule, ReportType,
    ScheduleDraft, ScheduleStore, SchedulerError, ValidationError,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap()
}

fn setup() -> (ScheduleStore, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(t0()));
    let store = ScheduleStore::with_clock(Connection::open_in_memory().unwrap(), clock.clone())
        .unwrap();
    (store, clock)
}

fn tenant(name: &str) -> TenantId {
    TenantId::from(name)
}

fn author() -> UserId {
    UserId::from("user-1")
}

fn daily_draft(title: &str) -> ScheduleDraft {
    ScheduleDraft::new(title, ReportType::Sales, RecurrenceRule::daily(8, 0))
        .recipient("ops@example.com")
}

#[test]
fn create_computes_next_run_and_defaults() {
    let (store, _) = setup();
    let report = store
        .create(&tenant("acme"), &author(), daily_draft("  Morning sales "))
        .unwrap();

    assert_eq!(report.title, "Morning sales");
    assert!(report.is_active);
    assert_eq!(report.max_failures, 3);
    assert_eq!(report.next_run, Some(t0() + Duration::hours(1)));

    let fetched = store.get(&tenant("acme"), &report.id).unwrap();
    assert_eq!(fetched, report);
}

#[test]
fn create_rejects_invalid_draft() {
    let (store, _) = setup();
    let mut draft = daily_draft("Sales");
    draft.recipients = vec!["not-an-address".into()];
    let err = store.create(&tenant("acme"), &author(), draft).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Validation(ValidationError::Recipient(_))
    ));
}

#[test]
fn other_tenants_cannot_see_or_touch_a_schedule() {
    let (store, _) = setup();
    let report = store
        .create(&tenant("acme"), &author(), daily_draft("Sales"))
        .unwrap();
    let intruder = tenant("globex");

    assert!(matches!(
        store.get(&intruder, &report.id),
        Err(SchedulerError::NotFound { .. })
    ));
    assert!(matches!(
        store.toggle(&intruder, &report.id, false),
        Err(SchedulerError::NotFound { .. })
    ));
    assert!(matches!(
        store.delete(&intruder, &report.id),
        Err(SchedulerError::NotFound { .. })
    ));
    assert!(store
        .list(&intruder, &ListFilter::default(), PageRequest::default())
        .unwrap()
        .items
        .is_empty());
    assert!(store.get(&tenant("acme"), &report.id).unwrap().is_active);
}

#[test]
fn update_recomputes_next_run_only_when_timing_changes() {
    let (store, clock) = setup();
    let acme = tenant("acme");
    let report = store.create(&acme, &author(), daily_draft("Sales")).unwrap();

    clock.advance(Duration::minutes(30));
    let mut draft = daily_draft("Sales (renamed)");
    draft.description = Some("same timing".into());
    let updated = store.update(&acme, &report.id, draft).unwrap();
    assert_eq!(updated.next_run, report.next_run);
    assert_eq!(updated.title, "Sales (renamed)");

    let mut draft = daily_draft("Sales");
    draft.rule = RecurrenceRule::daily(7, 45);
    let updated = store.update(&acme, &report.id, draft).unwrap();
    // 07:30 now, 07:45 today is still ahead.
    assert_eq!(updated.next_run, Some(t0() + Duration::minutes(45)));
    assert_eq!(updated.created_at, report.created_at);
}

#[test]
fn list_filters_and_paginates_newest_first() {
    let (store, clock) = setup();
    let acme = tenant("acme");
    for i in 0..5 {
        let mut draft = daily_draft(&format!("report {i}"));
        if i % 2 == 1 {
            draft.report_type = ReportType::FinancialSummary;
        }
        let created = store.create(&acme, &author(), draft).unwrap();
        if i == 4 {
            store.toggle(&acme, &created.id, false).unwrap();
        }
        clock.advance(Duration::seconds(1));
    }

    let page = store
        .list(&acme, &ListFilter::default(), PageRequest::new(Some(1), Some(2), 10))
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].title, "report 4");
    assert_eq!(page.items[1].title, "report 3");
    assert_eq!(page.pagination.total, 5);
    assert_eq!(page.pagination.pages, 3);

    let last = store
        .list(&acme, &ListFilter::default(), PageRequest::new(Some(3), Some(2), 10))
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].title, "report 0");

    let financial = ListFilter {
        report_type: Some(ReportType::FinancialSummary),
        ..ListFilter::default()
    };
    let page = store.list(&acme, &financial, PageRequest::default()).unwrap();
    assert_eq!(page.pagination.total, 2);

    let inactive = ListFilter {
        is_active: Some(false),
        ..ListFilter::default()
    };
    let page = store.list(&acme, &inactive, PageRequest::default()).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].title, "report 4");
}

#[test]
fn record_execution_auto_disables_and_resume_resets() {
    let (store, clock) = setup();
    let acme = tenant("acme");
    let report = store.create(&acme, &author(), daily_draft("Sales")).unwrap();

    for i in 0..3 {
        clock.set(t0() + Duration::days(i) + Duration::hours(1));
        let (_, effect) = store
            .record_execution(&report.id, ExecutionOutcome::failure("renderer down"))
            .unwrap();
        assert_eq!(effect.auto_disabled, i == 2);
    }

    let disabled = store.get(&acme, &report.id).unwrap();
    assert!(!disabled.is_active);
    assert_eq!(disabled.failure_count, 3);
    assert_eq!(disabled.total_runs, 3);

    let resumed = store.toggle(&acme, &report.id, true).unwrap();
    assert!(resumed.is_active);
    assert_eq!(resumed.failure_count, 0);
    assert_eq!(resumed.total_runs, 3);
    assert_eq!(resumed.execution_history.len(), 3);
}

#[test]
fn find_ready_returns_due_active_schedules_in_order() {
    let (store, clock) = setup();
    let acme = tenant("acme");
    let globex = tenant("globex");

    let late = store.create(&acme, &author(), daily_draft("eight")).unwrap();
    let mut early_draft = daily_draft("seven-thirty");
    early_draft.rule = RecurrenceRule::daily(7, 30);
    let early = store.create(&globex, &author(), early_draft).unwrap();
    let paused = store.create(&acme, &author(), daily_draft("paused")).unwrap();
    store.toggle(&acme, &paused.id, false).unwrap();

    assert!(store.find_ready(t0()).unwrap().is_empty());

    clock.set(t0() + Duration::hours(2));
    let ready: Vec<ScheduleId> = store
        .find_ready(t0() + Duration::hours(2))
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ready, vec![early.id.clone(), late.id.clone()]);

    let acme_ready = store
        .find_ready_for_tenant(&acme, t0() + Duration::hours(2))
        .unwrap();
    assert_eq!(acme_ready.len(), 1);
    assert_eq!(acme_ready[0].id, late.id);

    // Recording moves next_run past now, so the schedule drops out.
    store
        .record_execution(&late.id, ExecutionOutcome::success())
        .unwrap();
    let ready = store.find_ready(t0() + Duration::hours(2)).unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, early.id);
}

#[test]
fn find_ready_repairs_missing_next_run() {
    let path = std::env::temp_dir().join(format!("almanac-repair-{}.db", ScheduleId::new()));
    let clock = Arc::new(FixedClock::new(t0()));
    let store =
        ScheduleStore::with_clock(Connection::open(&path).unwrap(), clock.clone()).unwrap();
    let report = store
        .create(&tenant("acme"), &author(), daily_draft("Sales"))
        .unwrap();

    // Simulate a row written by an older release without next_run.
    let side = Connection::open(&path).unwrap();
    side.execute(
        "UPDATE scheduled_reports SET next_run = NULL WHERE id = ?1",
        [report.id.as_str()],
    )
    .unwrap();

    assert!(store.find_ready(t0()).unwrap().is_empty());
    let repaired = store.get_by_id(&report.id).unwrap();
    assert_eq!(repaired.next_run, Some(t0() + Duration::hours(1)));

    drop(side);
    drop(store);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn history_is_paginated_most_recent_first_with_summary() {
    let (store, clock) = setup();
    let acme = tenant("acme");
    let mut draft = daily_draft("Sales");
    draft.max_failures = Some(10);
    let report = store.create(&acme, &author(), draft).unwrap();

    for i in 0..25 {
        clock.set(t0() + Duration::hours(i));
        let outcome = if i % 5 == 4 {
            ExecutionOutcome::failure("timeout")
        } else {
            ExecutionOutcome::success().with_execution_time(1200)
        };
        store.record_execution(&report.id, outcome).unwrap();
    }

    let first = store
        .history(&acme, &report.id, PageRequest::new(None, None, DEFAULT_HISTORY_LIMIT))
        .unwrap();
    assert_eq!(first.entries.len(), 20);
    assert_eq!(first.entries[0].run_date, t0() + Duration::hours(24));
    assert_eq!(first.pagination.total, 25);
    assert_eq!(first.pagination.pages, 2);
    assert_eq!(first.summary.total_runs, 25);
    assert_eq!(first.summary.successful_runs, 20);
    assert_eq!(first.summary.success_rate, 80);
    assert_eq!(first.summary.failure_count, 1);

    let second = store
        .history(&acme, &report.id, PageRequest::new(Some(2), None, DEFAULT_HISTORY_LIMIT))
        .unwrap();
    assert_eq!(second.entries.len(), 5);
    assert_eq!(second.entries[4].run_date, t0());
}

#[test]
fn dashboard_covers_one_tenant() {
    let (store, clock) = setup();
    let acme = tenant("acme");
    let a = store.create(&acme, &author(), daily_draft("a")).unwrap();
    store.create(&acme, &author(), daily_draft("b")).unwrap();
    store
        .create(&tenant("globex"), &author(), daily_draft("c"))
        .unwrap();

    clock.set(t0() + Duration::hours(1));
    store
        .record_execution(&a.id, ExecutionOutcome::failure("x"))
        .unwrap();

    let summary = store.dashboard(&acme).unwrap();
    assert_eq!(summary.total_schedules, 2);
    assert_eq!(summary.active_schedules, 2);
    assert_eq!(summary.executed_last_24h, 1);
    assert_eq!(summary.failing_schedules, 1);
    assert_eq!(summary.recent_activity.len(), 1);
    assert_eq!(summary.recent_activity[0].schedule_id, a.id);
    // b is due right now, a tomorrow at 08:00.
    assert_eq!(summary.upcoming.len(), 2);
}

#[test]
fn delete_removes_the_schedule() {
    let (store, _) = setup();
    let acme = tenant("acme");
    let report = store.create(&acme, &author(), daily_draft("Sales")).unwrap();
    store.delete(&acme, &report.id).unwrap();
    assert!(matches!(
        store.get(&acme, &report.id),
        Err(SchedulerError::NotFound { .. })
    ));
}
