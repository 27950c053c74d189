//! Durable at-time jobs stored in `scheduled_jobs`.
//!
//! Jobs are inserted inside the transaction of the command that schedules
//! them, so a command and its future action commit together. Lifecycle:
//! `pending → running → done | failed`. A job left `running` by a crash is
//! put back to `pending` on startup and delivered again.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::Action;
use crate::db::{enum_col, fmt_ts, json_col, opt_ts_col, ts_col, Database};
use crate::error::{Error, Result};
use crate::types::string_enum;

string_enum! {
    /// State of a scheduled job.
    JobStatus {
        Pending => "pending",
        Running => "running",
        Done => "done",
        Failed => "failed",
    }
}

/// A row of `scheduled_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    /// Optional dedup key; a second job with the same key is never inserted
    pub job_key: Option<String>,
    pub action: Action,
    pub run_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Inserts a pending job. Returns `None` when `job_key` was already used.
pub(crate) fn enqueue(
    conn: &Connection,
    job_key: Option<&str>,
    action: &Action,
    run_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO scheduled_jobs (job_key, action, run_at, status, attempts, created_at)
        VALUES (?1, ?2, ?3, 'pending', 0, ?4)
        "#,
        params![
            job_key,
            serde_json::to_string(action)?,
            fmt_ts(run_at),
            fmt_ts(now),
        ],
    )?;

    if inserted == 0 {
        tracing::debug!(job_key, action = action.name(), "Job already scheduled");
        return Ok(None);
    }

    let id = conn.last_insert_rowid();
    tracing::debug!(id, job_key, action = action.name(), run_at = %run_at, "Job scheduled");
    Ok(Some(id))
}

/// Marks up to `limit` due pending jobs as running and returns them.
///
/// Must run inside a write transaction so two schedulers cannot claim the
/// same job.
pub(crate) fn claim_due(conn: &Connection, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM scheduled_jobs
        WHERE status = 'pending' AND run_at <= ?1
        ORDER BY run_at, id
        LIMIT ?2
        "#,
    )?;
    let mut jobs = stmt
        .query_map(params![fmt_ts(now), limit as i64], row_to_job)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for job in &mut jobs {
        conn.execute(
            "UPDATE scheduled_jobs SET status = 'running', attempts = attempts + 1 WHERE id = ?",
            [job.id],
        )?;
        job.status = JobStatus::Running;
        job.attempts += 1;
    }
    Ok(jobs)
}

pub(crate) fn mark_done(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        r#"
        UPDATE scheduled_jobs SET status = 'done', finished_at = ?2, last_error = NULL
        WHERE id = ?1
        "#,
        params![id, fmt_ts(at)],
    )?;
    Ok(())
}

pub(crate) fn mark_failed(
    conn: &Connection,
    id: i64,
    at: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE scheduled_jobs SET status = 'failed', finished_at = ?2, last_error = ?3
        WHERE id = ?1
        "#,
        params![id, fmt_ts(at), error],
    )?;
    Ok(())
}

/// Puts jobs left `running` back to `pending`. Returns how many were reset.
pub(crate) fn requeue_running(conn: &Connection) -> Result<usize> {
    let reset = conn.execute(
        "UPDATE scheduled_jobs SET status = 'pending' WHERE status = 'running'",
        [],
    )?;
    Ok(reset)
}

pub(crate) fn find_by_key(conn: &Connection, job_key: &str) -> Result<Option<Job>> {
    conn.query_row(
        "SELECT * FROM scheduled_jobs WHERE job_key = ?",
        [job_key],
        row_to_job,
    )
    .optional()
    .map_err(Error::from)
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get("id")?,
        job_key: row.get("job_key")?,
        action: json_col(row, "action")?,
        run_at: ts_col(row, "run_at")?,
        status: enum_col(row, "status")?,
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        created_at: ts_col(row, "created_at")?,
        finished_at: opt_ts_col(row, "finished_at")?,
    })
}

impl Database {
    /// List scheduled jobs, optionally restricted to one status, by run time
    pub fn list_jobs(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY run_at, id
            LIMIT ?2
            "#,
        )?;
        let jobs = stmt
            .query_map(params![status.map(|s| s.as_str()), limit as i64], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Look up a job by its dedup key
    pub fn job_by_key(&self, job_key: &str) -> Result<Option<Job>> {
        find_by_key(&self.connection(), job_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_job_key_deduplicates() {
        let db = test_db();
        let conn = db.connection();

        let first = enqueue(&conn, Some("daily"), &Action::ReminderSweep, t0(), t0()).unwrap();
        let second = enqueue(&conn, Some("daily"), &Action::ReminderSweep, t0(), t0()).unwrap();
        let unkeyed = enqueue(&conn, None, &Action::ReminderSweep, t0(), t0()).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(unkeyed.is_some());
    }

    #[test]
    fn test_claim_only_due_in_run_order() {
        let db = test_db();
        let conn = db.connection();

        enqueue(&conn, Some("late"), &Action::RecurringExecute, t0() + Duration::hours(2), t0())
            .unwrap();
        enqueue(&conn, Some("b"), &Action::ReminderSweep, t0(), t0()).unwrap();
        enqueue(&conn, Some("a"), &Action::RecurringExecute, t0() - Duration::minutes(1), t0())
            .unwrap();

        let claimed = claim_due(&conn, t0(), 10).unwrap();
        let keys: Vec<_> = claimed.iter().filter_map(|j| j.job_key.as_deref()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert!(claimed.iter().all(|j| j.status == JobStatus::Running && j.attempts == 1));

        // Claimed jobs are not handed out twice
        assert!(claim_due(&conn, t0(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_requeue_running_redelivers() {
        let db = test_db();
        let conn = db.connection();
        enqueue(&conn, Some("crash"), &Action::ReminderSweep, t0(), t0()).unwrap();

        let claimed = claim_due(&conn, t0(), 1).unwrap();
        assert_eq!(claimed.len(), 1);

        assert_eq!(requeue_running(&conn).unwrap(), 1);
        let again = claim_due(&conn, t0(), 1).unwrap();
        assert_eq!(again[0].id, claimed[0].id);
        assert_eq!(again[0].attempts, 2);
    }

    #[test]
    fn test_failure_is_recorded() {
        let db = test_db();
        {
            let conn = db.connection();
            let id = enqueue(&conn, Some("boom"), &Action::ReminderSweep, t0(), t0())
                .unwrap()
                .unwrap();
            claim_due(&conn, t0(), 1).unwrap();
            mark_failed(&conn, id, t0(), "envelope not found").unwrap();
        }

        let job = db.job_by_key("boom").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_error.as_deref(), Some("envelope not found"));
        assert_eq!(job.finished_at, Some(t0()));
        assert_eq!(db.list_jobs(Some(JobStatus::Pending), 10).unwrap().len(), 0);
    }
}
