use std::sync::{Mutex, MutexGuard};

use almanac_core::ScheduleId;
use almanac_scheduler::db::to_db;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::Result;

/// Initialise the lease schema in `conn`.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS dispatch_leases (
            schedule_id  TEXT NOT NULL PRIMARY KEY,
            owner        TEXT NOT NULL,   -- '{instance}/{job_id}'
            acquired_at  TEXT NOT NULL,
            expires_at   TEXT NOT NULL
        ) STRICT;
        ",
    )
}

/// Persistent per-schedule leases. At most one unexpired lease exists per
/// schedule, across every dispatcher sharing the database.
pub struct LeaseTable {
    db: Mutex<Connection>,
    ttl: Duration,
}

impl LeaseTable {
    pub fn new(conn: Connection, ttl: Duration) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim `schedule` for `owner`. Returns `false` when another owner holds
    /// an unexpired lease.
    pub fn acquire(&self, schedule: &ScheduleId, owner: &str, now: DateTime<Utc>) -> Result<bool> {
        let db = self.lock();
        // The conditional upsert takes over a row only when it has expired
        // (or already belongs to `owner`).
        let rows_changed = db.execute(
            "INSERT INTO dispatch_leases (schedule_id, owner, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (schedule_id) DO UPDATE SET
                owner       = excluded.owner,
                acquired_at = excluded.acquired_at,
                expires_at  = excluded.expires_at
             WHERE dispatch_leases.expires_at <= ?3 OR dispatch_leases.owner = ?2",
            rusqlite::params![
                schedule.as_str(),
                owner,
                to_db(now),
                to_db(now + self.ttl)
            ],
        )?;
        let acquired = rows_changed == 1;
        debug!(schedule_id = %schedule, %owner, acquired, "lease acquire");
        Ok(acquired)
    }

    /// Drop `owner`'s lease on `schedule`. A lease that was meanwhile taken
    /// over by someone else is left alone.
    pub fn release(&self, schedule: &ScheduleId, owner: &str) -> Result<()> {
        let db = self.lock();
        let rows_changed = db.execute(
            "DELETE FROM dispatch_leases WHERE schedule_id = ?1 AND owner = ?2",
            rusqlite::params![schedule.as_str(), owner],
        )?;
        if rows_changed == 0 {
            warn!(schedule_id = %schedule, %owner, "lease was lost before release");
        }
        Ok(())
    }

    /// Current unexpired holder of `schedule`, if any.
    pub fn holder(&self, schedule: &ScheduleId, now: DateTime<Utc>) -> Result<Option<String>> {
        let db = self.lock();
        let owner = db
            .query_row(
                "SELECT owner FROM dispatch_leases WHERE schedule_id = ?1 AND expires_at > ?2",
                rusqlite::params![schedule.as_str(), to_db(now)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Delete every expired lease. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let db = self.lock();
        let n = db.execute(
            "DELETE FROM dispatch_leases WHERE expires_at <= ?1",
            [to_db(now)],
        )?;
        if n > 0 {
            warn!(count = n, "expired dispatch leases purged");
        }
        Ok(n)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn table() -> LeaseTable {
        LeaseTable::new(Connection::open_in_memory().unwrap(), Duration::minutes(15)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn second_owner_is_refused_until_expiry() {
        let leases = table();
        let id = ScheduleId::from("s-1");

        assert!(leases.acquire(&id, "a/job-1", t0()).unwrap());
        assert!(!leases.acquire(&id, "b/job-2", t0() + Duration::minutes(5)).unwrap());
        assert_eq!(
            leases.holder(&id, t0() + Duration::minutes(5)).unwrap().as_deref(),
            Some("a/job-1")
        );

        // Expired: b may take over.
        assert!(leases.acquire(&id, "b/job-2", t0() + Duration::minutes(15)).unwrap());
        assert_eq!(
            leases.holder(&id, t0() + Duration::minutes(16)).unwrap().as_deref(),
            Some("b/job-2")
        );
    }

    #[test]
    fn release_frees_the_schedule() {
        let leases = table();
        let id = ScheduleId::from("s-1");
        assert!(leases.acquire(&id, "a/job-1", t0()).unwrap());
        leases.release(&id, "a/job-1").unwrap();
        assert_eq!(leases.holder(&id, t0()).unwrap(), None);
        assert!(leases.acquire(&id, "b/job-2", t0()).unwrap());
    }

    #[test]
    fn release_by_stale_owner_keeps_new_lease() {
        let leases = table();
        let id = ScheduleId::from("s-1");
        assert!(leases.acquire(&id, "a/job-1", t0()).unwrap());
        assert!(leases.acquire(&id, "b/job-2", t0() + Duration::hours(1)).unwrap());
        leases.release(&id, "a/job-1").unwrap();
        assert_eq!(
            leases.holder(&id, t0() + Duration::hours(1)).unwrap().as_deref(),
            Some("b/job-2")
        );
    }

    #[test]
    fn purge_removes_only_expired() {
        let leases = table();
        leases.acquire(&ScheduleId::from("old"), "a/1", t0()).unwrap();
        leases
            .acquire(&ScheduleId::from("new"), "a/2", t0() + Duration::minutes(10))
            .unwrap();
        assert_eq!(leases.purge_expired(t0() + Duration::minutes(20)).unwrap(), 1);
        assert!(leases
            .holder(&ScheduleId::from("new"), t0() + Duration::minutes(20))
            .unwrap()
            .is_some());
    }
}
