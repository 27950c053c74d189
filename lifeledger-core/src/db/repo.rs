//! Database repository layer
//!
//! Row-level reads and writes for the entity tables. The `pub(crate)` free
//! functions take a `&Connection` so commands can call them inside their own
//! transaction; the [`Database`] methods lock the shared connection and serve
//! the read-side queries.

use super::{day_col, enum_col, fmt_day, fmt_ts, json_col, opt_json_col, opt_ts_col, ts_col};
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Singleton row naming the active hard-mode session.
pub const ACTIVE_HARD_MODE_SESSION: &str = "active_hard_mode_session";

/// Filters for listing transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Only transactions with `occurred_at >= since`
    pub since: Option<DateTime<Utc>>,
    /// Only transactions with `occurred_at < until`
    pub until: Option<DateTime<Utc>>,
    pub envelope_id: Option<String>,
    pub include_voided: bool,
    pub limit: Option<usize>,
}

/// Database handle with a single shared connection
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets the CLI read while the daemon writes; the busy timeout
        // covers IMMEDIATE transactions from another process.
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Task queries
    // ============================================

    /// Get a task by ID
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        get_task(&self.connection(), id)
    }

    /// List tasks, optionally restricted to one status, oldest first
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, id",
        )?;
        let tasks = stmt
            .query_map([status.map(|s| s.as_str())], row_to_task)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    /// Tasks currently in focus
    pub fn focus_list(&self) -> Result<Vec<Task>> {
        self.list_tasks(Some(TaskStatus::Focus))
    }

    // ============================================
    // Mood queries
    // ============================================

    /// Most recent check-ins first
    pub fn mood_history(&self, limit: usize) -> Result<Vec<MoodCheckIn>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT * FROM mood_checkins ORDER BY checked_in_at DESC, id DESC LIMIT ?",
        )?;
        let entries = stmt
            .query_map([limit as i64], row_to_mood)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ============================================
    // Finance queries
    // ============================================

    pub fn get_envelope(&self, id: &str) -> Result<Option<Envelope>> {
        get_envelope(&self.connection(), id)
    }

    pub fn list_envelopes(&self) -> Result<Vec<Envelope>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT * FROM envelopes ORDER BY name, id")?;
        let envelopes = stmt
            .query_map([], row_to_envelope)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(envelopes)
    }

    pub fn get_transaction(&self, id: &str) -> Result<Option<Transaction>> {
        get_transaction(&self.connection(), id)
    }

    /// List transactions with optional filtering, oldest first
    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let conn = self.connection();

        let mut sql = String::from("SELECT * FROM transactions WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(since) = filter.since {
            sql.push_str(" AND occurred_at >= ?");
            params.push(Box::new(fmt_ts(since)));
        }

        if let Some(until) = filter.until {
            sql.push_str(" AND occurred_at < ?");
            params.push(Box::new(fmt_ts(until)));
        }

        if let Some(envelope_id) = &filter.envelope_id {
            sql.push_str(" AND envelope_id = ?");
            params.push(Box::new(envelope_id.clone()));
        }

        if !filter.include_voided {
            sql.push_str(" AND voided_at IS NULL");
        }

        sql.push_str(" ORDER BY occurred_at, created_at, id");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map(params_refs.as_slice(), row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    // ============================================
    // Quiet day queries
    // ============================================

    pub fn get_quiet_day(&self, day: NaiveDate) -> Result<Option<QuietDay>> {
        get_quiet_day(&self.connection(), day)
    }

    // ============================================
    // Hard-mode queries
    // ============================================

    pub fn get_hard_mode_session(&self, id: &str) -> Result<Option<HardModeSession>> {
        get_session(&self.connection(), id)
    }

    /// The session the singleton row points at, if any
    pub fn active_hard_mode_session(&self) -> Result<Option<HardModeSession>> {
        let conn = self.connection();
        match active_session_id(&conn)? {
            Some(id) => get_session(&conn, &id),
            None => Ok(None),
        }
    }
}

// ============================================
// Task rows
// ============================================

pub(crate) fn insert_task(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tasks (id, title, status, due_at, reminders_enabled, reminder_offset_minutes,
                           reminder_snoozed_until, last_reminder_at, created_at, updated_at,
                           completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            task.id,
            task.title,
            task.status.as_str(),
            task.due_at.map(fmt_ts),
            task.reminders_enabled,
            task.reminder_offset_minutes,
            task.reminder_snoozed_until.map(fmt_ts),
            task.last_reminder_at.map(fmt_ts),
            fmt_ts(task.created_at),
            fmt_ts(task.updated_at),
            task.completed_at.map(fmt_ts),
        ],
    )?;
    Ok(())
}

/// Writes every mutable column of an existing task.
pub(crate) fn update_task(conn: &Connection, task: &Task) -> Result<()> {
    let changed = conn.execute(
        r#"
        UPDATE tasks SET
            title = ?2,
            status = ?3,
            due_at = ?4,
            reminders_enabled = ?5,
            reminder_offset_minutes = ?6,
            reminder_snoozed_until = ?7,
            last_reminder_at = ?8,
            updated_at = ?9,
            completed_at = ?10
        WHERE id = ?1
        "#,
        params![
            task.id,
            task.title,
            task.status.as_str(),
            task.due_at.map(fmt_ts),
            task.reminders_enabled,
            task.reminder_offset_minutes,
            task.reminder_snoozed_until.map(fmt_ts),
            task.last_reminder_at.map(fmt_ts),
            fmt_ts(task.updated_at),
            task.completed_at.map(fmt_ts),
        ],
    )?;
    if changed == 0 {
        return Err(Error::not_found("task", &task.id));
    }
    Ok(())
}

pub(crate) fn get_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    conn.query_row("SELECT * FROM tasks WHERE id = ?", [id], row_to_task)
        .optional()
        .map_err(Error::from)
}

pub(crate) fn count_tasks_with_status(conn: &Connection, status: TaskStatus) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE status = ?",
        [status.as_str()],
        |r| r.get(0),
    )?;
    Ok(count as usize)
}

/// Open tasks with reminders enabled and `start <= due_at < end`.
pub(crate) fn reminder_candidates(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM tasks
        WHERE reminders_enabled = 1
          AND status NOT IN ('completed', 'abandoned')
          AND due_at >= ?1 AND due_at < ?2
        ORDER BY due_at, id
        "#,
    )?;
    let tasks = stmt
        .query_map([fmt_ts(start), fmt_ts(end)], row_to_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Open tasks in plan order: focus first, then inbox by due date (undated
/// last), then creation.
pub(crate) fn plannable_tasks(conn: &Connection, limit: usize) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM tasks
        WHERE status IN ('focus', 'inbox')
        ORDER BY CASE status WHEN 'focus' THEN 0 ELSE 1 END,
                 due_at IS NULL,
                 due_at,
                 created_at,
                 id
        LIMIT ?
        "#,
    )?;
    let tasks = stmt
        .query_map([limit as i64], row_to_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        status: enum_col(row, "status")?,
        due_at: opt_ts_col(row, "due_at")?,
        reminders_enabled: row.get("reminders_enabled")?,
        reminder_offset_minutes: row.get("reminder_offset_minutes")?,
        reminder_snoozed_until: opt_ts_col(row, "reminder_snoozed_until")?,
        last_reminder_at: opt_ts_col(row, "last_reminder_at")?,
        created_at: ts_col(row, "created_at")?,
        updated_at: ts_col(row, "updated_at")?,
        completed_at: opt_ts_col(row, "completed_at")?,
    })
}

// ============================================
// Mood rows
// ============================================

pub(crate) fn insert_mood(conn: &Connection, entry: &MoodCheckIn) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO mood_checkins (id, score, note, tags, checked_in_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            entry.id,
            entry.score,
            entry.note,
            serde_json::to_string(&entry.tags)?,
            fmt_ts(entry.checked_in_at),
        ],
    )?;
    Ok(())
}

fn row_to_mood(row: &Row) -> rusqlite::Result<MoodCheckIn> {
    Ok(MoodCheckIn {
        id: row.get("id")?,
        score: row.get("score")?,
        note: row.get("note")?,
        tags: json_col(row, "tags")?,
        checked_in_at: ts_col(row, "checked_in_at")?,
    })
}

// ============================================
// Envelope and transaction rows
// ============================================

pub(crate) fn insert_envelope(conn: &Connection, envelope: &Envelope) -> Result<()> {
    conn.execute(
        "INSERT INTO envelopes (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![envelope.id, envelope.name, fmt_ts(envelope.created_at)],
    )?;
    Ok(())
}

pub(crate) fn get_envelope(conn: &Connection, id: &str) -> Result<Option<Envelope>> {
    conn.query_row("SELECT * FROM envelopes WHERE id = ?", [id], row_to_envelope)
        .optional()
        .map_err(Error::from)
}

fn row_to_envelope(row: &Row) -> rusqlite::Result<Envelope> {
    Ok(Envelope {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: ts_col(row, "created_at")?,
    })
}

pub(crate) fn insert_transaction(conn: &Connection, txn: &Transaction) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO transactions (id, amount_minor, flow, merchant, category, envelope_id,
                                  envelope_source, occurred_at, source, recurring_id,
                                  voided_at, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            txn.id,
            txn.amount_minor,
            txn.flow.as_str(),
            txn.merchant,
            txn.category,
            txn.envelope_id,
            txn.envelope_source.as_str(),
            fmt_ts(txn.occurred_at),
            txn.source.as_str(),
            txn.recurring_id,
            txn.voided_at.map(fmt_ts),
            fmt_ts(txn.created_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    conn.query_row(
        "SELECT * FROM transactions WHERE id = ?",
        [id],
        row_to_transaction,
    )
    .optional()
    .map_err(Error::from)
}

pub(crate) fn mark_transaction_voided(
    conn: &Connection,
    id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET voided_at = ?2 WHERE id = ?1 AND voided_at IS NULL",
        params![id, fmt_ts(at)],
    )?;
    Ok(())
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get("id")?,
        amount_minor: row.get("amount_minor")?,
        flow: enum_col(row, "flow")?,
        merchant: row.get("merchant")?,
        category: row.get("category")?,
        envelope_id: row.get("envelope_id")?,
        envelope_source: enum_col(row, "envelope_source")?,
        occurred_at: ts_col(row, "occurred_at")?,
        source: enum_col(row, "source")?,
        recurring_id: row.get("recurring_id")?,
        voided_at: opt_ts_col(row, "voided_at")?,
        created_at: ts_col(row, "created_at")?,
    })
}

// ============================================
// Quiet day rows
// ============================================

pub(crate) fn upsert_quiet_day(conn: &Connection, quiet: &QuietDay) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO quiet_days (day, is_quiet, reason, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(day) DO UPDATE SET
            is_quiet = excluded.is_quiet,
            reason = excluded.reason,
            updated_at = excluded.updated_at
        "#,
        params![
            fmt_day(quiet.day),
            quiet.is_quiet,
            quiet.reason,
            fmt_ts(quiet.updated_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn get_quiet_day(conn: &Connection, day: NaiveDate) -> Result<Option<QuietDay>> {
    conn.query_row(
        "SELECT * FROM quiet_days WHERE day = ?",
        [fmt_day(day)],
        row_to_quiet_day,
    )
    .optional()
    .map_err(Error::from)
}

/// Whether `day` is flagged quiet. Days without a row are not quiet.
pub(crate) fn is_quiet_day(conn: &Connection, day: NaiveDate) -> Result<bool> {
    Ok(get_quiet_day(conn, day)?.is_some_and(|q| q.is_quiet))
}

fn row_to_quiet_day(row: &Row) -> rusqlite::Result<QuietDay> {
    Ok(QuietDay {
        day: day_col(row, "day")?,
        is_quiet: row.get("is_quiet")?,
        reason: row.get("reason")?,
        updated_at: ts_col(row, "updated_at")?,
    })
}

// ============================================
// Hard-mode rows
// ============================================

pub(crate) fn insert_session(conn: &Connection, session: &HardModeSession) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO hard_mode_sessions (id, is_active, window_start, window_end, plan,
                                        created_at, deactivated_at, crisis_overridden_at,
                                        closed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            session.id,
            session.is_active,
            fmt_ts(session.window_start),
            fmt_ts(session.window_end),
            session.plan.as_ref().map(serde_json::to_string).transpose()?,
            fmt_ts(session.created_at),
            session.deactivated_at.map(fmt_ts),
            session.crisis_overridden_at.map(fmt_ts),
            session.closed_at.map(fmt_ts),
        ],
    )?;
    Ok(())
}

/// Writes every mutable column of an existing session.
pub(crate) fn update_session(conn: &Connection, session: &HardModeSession) -> Result<()> {
    let changed = conn.execute(
        r#"
        UPDATE hard_mode_sessions SET
            is_active = ?2,
            window_end = ?3,
            plan = ?4,
            deactivated_at = ?5,
            crisis_overridden_at = ?6,
            closed_at = ?7
        WHERE id = ?1
        "#,
        params![
            session.id,
            session.is_active,
            fmt_ts(session.window_end),
            session.plan.as_ref().map(serde_json::to_string).transpose()?,
            session.deactivated_at.map(fmt_ts),
            session.crisis_overridden_at.map(fmt_ts),
            session.closed_at.map(fmt_ts),
        ],
    )?;
    if changed == 0 {
        return Err(Error::not_found("hard_mode_session", &session.id));
    }
    Ok(())
}

pub(crate) fn get_session(conn: &Connection, id: &str) -> Result<Option<HardModeSession>> {
    conn.query_row(
        "SELECT * FROM hard_mode_sessions WHERE id = ?",
        [id],
        row_to_session,
    )
    .optional()
    .map_err(Error::from)
}

fn row_to_session(row: &Row) -> rusqlite::Result<HardModeSession> {
    Ok(HardModeSession {
        id: row.get("id")?,
        is_active: row.get("is_active")?,
        window_start: ts_col(row, "window_start")?,
        window_end: ts_col(row, "window_end")?,
        plan: opt_json_col(row, "plan")?,
        created_at: ts_col(row, "created_at")?,
        deactivated_at: opt_ts_col(row, "deactivated_at")?,
        crisis_overridden_at: opt_ts_col(row, "crisis_overridden_at")?,
        closed_at: opt_ts_col(row, "closed_at")?,
    })
}

// ============================================
// Singletons
// ============================================

pub(crate) fn active_session_id(conn: &Connection) -> Result<Option<String>> {
    get_singleton(conn, ACTIVE_HARD_MODE_SESSION)
}

pub(crate) fn get_singleton(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM singletons WHERE name = ?",
        [name],
        |r| r.get(0),
    )
    .optional()
    .map_err(Error::from)
}

pub(crate) fn set_singleton(
    conn: &Connection,
    name: &str,
    value: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO singletons (name, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        params![name, value, fmt_ts(at)],
    )?;
    Ok(())
}

/// Removes the singleton only while it still holds `value`.
pub(crate) fn clear_singleton_if(conn: &Connection, name: &str, value: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM singletons WHERE name = ?1 AND value = ?2",
        params![name, value],
    )?;
    Ok(removed > 0)
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
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
    }

    fn create_test_task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: format!("task {id}"),
            status,
            due_at: None,
            reminders_enabled: false,
            reminder_offset_minutes: None,
            reminder_snoozed_until: None,
            last_reminder_at: None,
            created_at: t0(),
            updated_at: t0(),
            completed_at: None,
        }
    }

    #[test]
    fn test_task_insert_and_update() {
        let db = test_db();
        let mut task = create_test_task("t1", TaskStatus::Inbox);
        task.due_at = Some(t0() + Duration::hours(3));
        insert_task(&db.connection(), &task).unwrap();

        let loaded = db.get_task("t1").unwrap().unwrap();
        assert_eq!(loaded, task);

        task.status = TaskStatus::Focus;
        task.reminder_offset_minutes = Some(15);
        update_task(&db.connection(), &task).unwrap();
        assert_eq!(db.focus_list().unwrap(), vec![task]);
    }

    #[test]
    fn test_update_missing_task_is_not_found() {
        let db = test_db();
        let task = create_test_task("ghost", TaskStatus::Inbox);
        let err = update_task(&db.connection(), &task).unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "task", .. }));
    }

    #[test]
    fn test_plannable_tasks_order() {
        let db = test_db();
        let conn = db.connection();

        let mut late = create_test_task("inbox-late", TaskStatus::Inbox);
        late.due_at = Some(t0() + Duration::days(2));
        let mut soon = create_test_task("inbox-soon", TaskStatus::Inbox);
        soon.due_at = Some(t0() + Duration::hours(1));
        let undated = create_test_task("inbox-undated", TaskStatus::Inbox);
        let focus = create_test_task("focus", TaskStatus::Focus);
        let done = create_test_task("done", TaskStatus::Completed);

        for task in [&late, &soon, &undated, &focus, &done] {
            insert_task(&conn, task).unwrap();
        }

        let ids: Vec<String> = plannable_tasks(&conn, 10)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, ["focus", "inbox-soon", "inbox-late", "inbox-undated"]);
    }

    #[test]
    fn test_quiet_day_upsert() {
        let db = test_db();
        let day = NaiveDate::from_ymd_opt(2026, 4, 2).unwrap();
        let conn = db.connection();

        assert!(!is_quiet_day(&conn, day).unwrap());

        let mut quiet = QuietDay {
            day,
            is_quiet: true,
            reason: Some("travel".to_string()),
            updated_at: t0(),
        };
        upsert_quiet_day(&conn, &quiet).unwrap();
        assert!(is_quiet_day(&conn, day).unwrap());

        quiet.is_quiet = false;
        upsert_quiet_day(&conn, &quiet).unwrap();
        assert!(!is_quiet_day(&conn, day).unwrap());
    }

    #[test]
    fn test_singleton_clear_is_conditional() {
        let db = test_db();
        let conn = db.connection();
        set_singleton(&conn, ACTIVE_HARD_MODE_SESSION, "s1", t0()).unwrap();

        assert!(!clear_singleton_if(&conn, ACTIVE_HARD_MODE_SESSION, "s2").unwrap());
        assert_eq!(active_session_id(&conn).unwrap().as_deref(), Some("s1"));

        assert!(clear_singleton_if(&conn, ACTIVE_HARD_MODE_SESSION, "s1").unwrap());
        assert_eq!(active_session_id(&conn).unwrap(), None);
    }
}
