use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduled-report schema in `conn`.
///
/// Creates the `scheduled_reports` table (idempotent) plus the two indexes
/// the tenant listing and the eligibility query scan.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_reports (
            id               TEXT    NOT NULL PRIMARY KEY,
            tenant_id        TEXT    NOT NULL,
            created_by       TEXT    NOT NULL,
            title            TEXT    NOT NULL,
            description      TEXT,
            report_type      TEXT    NOT NULL,
            rule             TEXT    NOT NULL,   -- JSON-encoded RecurrenceRule
            recipients       TEXT    NOT NULL,   -- JSON array of addresses
            format           TEXT    NOT NULL,
            parameters       TEXT    NOT NULL,   -- JSON-encoded ReportParameters
            is_active        INTEGER NOT NULL DEFAULT 1,
            next_run         TEXT,               -- RFC 3339 ms UTC or NULL
            last_run         TEXT,
            last_success     TEXT,
            last_failure     TEXT,
            failure_count    INTEGER NOT NULL DEFAULT 0,
            max_failures     INTEGER NOT NULL DEFAULT 3,
            total_runs       INTEGER NOT NULL DEFAULT 0,
            successful_runs  INTEGER NOT NULL DEFAULT 0,
            history          TEXT    NOT NULL DEFAULT '[]',
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_reports_tenant_active
            ON scheduled_reports (tenant_id, is_active);

        -- Eligibility: WHERE is_active = 1 AND next_run <= ? ORDER BY next_run
        CREATE INDEX IF NOT EXISTS idx_reports_next_run_active
            ON scheduled_reports (next_run, is_active);
        ",
    )?;
    Ok(())
}

/// Fixed-width UTC text so that string comparison in SQL orders by time.
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_db(&conn).expect("first init");
        init_db(&conn).expect("second init");
    }

    #[test]
    fn timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2025, 3, 9, 23, 59, 59)
            .single()
            .expect("valid");
        let b = a + Duration::milliseconds(1);
        let c = a + Duration::days(40);
        assert!(to_db(a) < to_db(b));
        assert!(to_db(b) < to_db(c));
        assert_eq!(to_db(a), "2025-03-09T23:59:59.000Z");
        assert_eq!(from_db(&to_db(b)), Some(b));
    }
}
