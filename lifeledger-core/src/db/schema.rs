//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: ledger and entity tables
    r#"
    -- ============================================
    -- Event ledger (source of truth)
    -- ============================================

    CREATE TABLE IF NOT EXISTS events (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type       TEXT NOT NULL,
        occurred_at      DATETIME NOT NULL,   -- fixed-width RFC 3339 UTC, sorts as text
        idempotency_key  TEXT NOT NULL,
        command          TEXT NOT NULL,       -- command that appended the event
        entity_id        TEXT,
        payload          JSON NOT NULL,
        result           JSON                 -- command outcome, primary events only
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_events_idempotency_key ON events(idempotency_key);
    CREATE INDEX IF NOT EXISTS idx_events_occurred_at ON events(occurred_at);

    -- ============================================
    -- Entities written by commands
    -- ============================================

    CREATE TABLE IF NOT EXISTS tasks (
        id                      TEXT PRIMARY KEY,
        title                   TEXT NOT NULL,
        status                  TEXT NOT NULL,  -- inbox|focus|deferred|completed|abandoned
        due_at                  DATETIME,
        reminders_enabled       INTEGER NOT NULL DEFAULT 0,
        reminder_offset_minutes INTEGER,
        reminder_snoozed_until  DATETIME,
        last_reminder_at        DATETIME,
        created_at              DATETIME NOT NULL,
        updated_at              DATETIME NOT NULL,
        completed_at            DATETIME
    );

    CREATE TABLE IF NOT EXISTS mood_checkins (
        id             TEXT PRIMARY KEY,
        score          INTEGER NOT NULL,
        note           TEXT,
        tags           JSON NOT NULL,
        checked_in_at  DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS envelopes (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS transactions (
        id               TEXT PRIMARY KEY,
        amount_minor     INTEGER NOT NULL CHECK (amount_minor > 0),
        flow             TEXT NOT NULL,
        merchant         TEXT,
        category         TEXT,
        envelope_id      TEXT REFERENCES envelopes(id),
        envelope_source  TEXT NOT NULL,
        occurred_at      DATETIME NOT NULL,
        source           TEXT NOT NULL,
        recurring_id     TEXT,
        voided_at        DATETIME,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS quiet_days (
        day         TEXT PRIMARY KEY,   -- local calendar date, YYYY-MM-DD
        is_quiet    INTEGER NOT NULL,
        reason      TEXT,
        updated_at  DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS hard_mode_sessions (
        id                    TEXT PRIMARY KEY,
        is_active             INTEGER NOT NULL,
        window_start          DATETIME NOT NULL,
        window_end            DATETIME NOT NULL,
        plan                  JSON,
        created_at            DATETIME NOT NULL,
        deactivated_at        DATETIME,
        crisis_overridden_at  DATETIME,
        closed_at             DATETIME
    );

    -- Well-known pointers, e.g. the one active hard-mode session
    CREATE TABLE IF NOT EXISTS singletons (
        name        TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  DATETIME NOT NULL
    );

    -- ============================================
    -- Scheduler
    -- ============================================

    CREATE TABLE IF NOT EXISTS scheduled_jobs (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        job_key      TEXT UNIQUE,
        action       JSON NOT NULL,
        run_at       DATETIME NOT NULL,
        status       TEXT NOT NULL,     -- pending|running|done|failed
        attempts     INTEGER NOT NULL DEFAULT 0,
        last_error   TEXT,
        created_at   DATETIME NOT NULL,
        finished_at  DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_due ON scheduled_jobs(status, run_at);
    "#,
    // Version 2: lookup indexes for projections and sweeps
    r#"
    CREATE INDEX IF NOT EXISTS idx_events_type_time ON events(event_type, occurred_at);
    CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
    CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(due_at) WHERE reminders_enabled = 1;
    CREATE INDEX IF NOT EXISTS idx_transactions_occurred ON transactions(occurred_at);
    CREATE INDEX IF NOT EXISTS idx_mood_checked_in ON mood_checkins(checked_in_at);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    tracing::debug!(current_version, target_version = SCHEMA_VERSION, "Checking migrations");

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "events",
            "tasks",
            "mood_checkins",
            "envelopes",
            "transactions",
            "quiet_days",
            "hard_mode_sessions",
            "singletons",
            "scheduled_jobs",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_idempotency_key_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = "
            INSERT INTO events (event_type, occurred_at, idempotency_key, command, payload)
            VALUES ('task.created', '2026-01-01T00:00:00.000000Z', 'k-1', 'create_task', '{}')
        ";
        conn.execute(insert, []).unwrap();
        let err = conn.execute(insert, []).unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
    }
}
