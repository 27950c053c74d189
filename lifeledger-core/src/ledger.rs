//! The append-only event ledger.
//!
//! Every state change appends exactly one primary event whose
//! `idempotency_key` is unique across the whole table. The stored `result`
//! column lets a repeated command return its first outcome without running
//! again.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{enum_col, fmt_ts, json_col, opt_json_col, ts_col, Database};
use crate::error::{Error, Result};
use crate::types::string_enum;

string_enum! {
    /// Kind of ledger event; the text form is the stored `event_type`.
    EventType {
        TaskCreated => "task.created",
        TaskFocused => "task.focused",
        TaskDeferred => "task.deferred",
        TaskCompleted => "task.completed",
        TaskAbandoned => "task.abandoned",
        TaskReopened => "task.reopened",
        TaskReminderConfigured => "task.reminder_configured",
        TaskReminderSnoozed => "task.reminder_snoozed",
        ReminderSent => "reminder.sent",
        ReminderSuppressedQuiet => "reminder.suppressed_quiet",
        ReminderSnoozed => "reminder.snoozed",
        MoodCheckedIn => "mood.checked_in",
        EnvelopeCreated => "envelope.created",
        TransactionLogged => "transaction.logged",
        TransactionVoided => "transaction.voided",
        MerchantHintSet => "merchant_hint.set",
        RecurringScheduled => "recurring.scheduled",
        RecurringUpdated => "recurring.updated",
        RecurringCanceled => "recurring.canceled",
        RecurringRunCompleted => "recurring.run_completed",
        QuietDaySet => "quiet_day.set",
        HardModeActivated => "hard_mode.activated",
        HardModeExtended => "hard_mode.extended",
        HardModeCrisisOverride => "hard_mode.crisis_override",
        HardModeDeactivated => "hard_mode.deactivated",
        HardModePlanGenerated => "hard_mode.plan_generated",
        HardModeDayClosed => "hard_mode.day_closed",
        HardModeClosed => "hard_mode.closed",
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Insertion order; breaks ties between equal `occurred_at`
    pub id: i64,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub idempotency_key: String,
    /// Command that appended the event
    pub command: String,
    pub entity_id: Option<String>,
    pub payload: serde_json::Value,
    /// Serialized command outcome; only present on primary events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl Event {
    /// Decodes the payload into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// An event about to be appended.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub entity_id: Option<String>,
    pub payload: serde_json::Value,
}

impl NewEvent {
    pub fn new(
        event_type: EventType,
        entity_id: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            event_type,
            entity_id: Some(entity_id.into()),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// An event not tied to a single entity (telemetry, sweeps).
    pub fn unscoped(event_type: EventType, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            event_type,
            entity_id: None,
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Filters for listing events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Empty means every type
    pub types: Vec<EventType>,
    pub entity_id: Option<String>,
    /// Only events with `occurred_at >= since`
    pub since: Option<DateTime<Utc>>,
    /// Only events with `occurred_at < until`
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Appends one event and returns its id.
///
/// A duplicate key surfaces as a `Database` error; see [`is_unique_violation`].
pub(crate) fn append(
    conn: &Connection,
    key: &str,
    command: &str,
    occurred_at: DateTime<Utc>,
    event: &NewEvent,
    result: Option<&serde_json::Value>,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO events (event_type, occurred_at, idempotency_key, command, entity_id,
                            payload, result)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            event.event_type.as_str(),
            fmt_ts(occurred_at),
            key,
            command,
            event.entity_id,
            event.payload.to_string(),
            result.map(|r| r.to_string()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Whether an error is the unique index rejecting a second event for a key.
pub(crate) fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(e, _)) => {
            e.code == ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}

pub(crate) fn find_by_key(conn: &Connection, key: &str) -> Result<Option<Event>> {
    conn.query_row(
        "SELECT * FROM events WHERE idempotency_key = ?",
        [key],
        row_to_event,
    )
    .optional()
    .map_err(Error::from)
}

/// Events matching `filter`, ordered by `occurred_at` then insertion order.
pub(crate) fn list(conn: &Connection, filter: &EventFilter) -> Result<Vec<Event>> {
    let mut sql = String::from("SELECT * FROM events WHERE 1=1");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

    if !filter.types.is_empty() {
        let placeholders = vec!["?"; filter.types.len()].join(", ");
        sql.push_str(&format!(" AND event_type IN ({})", placeholders));
        for event_type in &filter.types {
            params.push(Box::new(event_type.as_str()));
        }
    }

    if let Some(entity_id) = &filter.entity_id {
        sql.push_str(" AND entity_id = ?");
        params.push(Box::new(entity_id.clone()));
    }

    if let Some(since) = filter.since {
        sql.push_str(" AND occurred_at >= ?");
        params.push(Box::new(fmt_ts(since)));
    }

    if let Some(until) = filter.until {
        sql.push_str(" AND occurred_at < ?");
        params.push(Box::new(fmt_ts(until)));
    }

    sql.push_str(" ORDER BY occurred_at, id");

    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params_refs.as_slice(), row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Events of the given types, in fold order.
pub(crate) fn of_types(conn: &Connection, types: &[EventType]) -> Result<Vec<Event>> {
    list(
        conn,
        &EventFilter {
            types: types.to_vec(),
            ..Default::default()
        },
    )
}

/// Every event in `[start, end)`.
pub(crate) fn between(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Event>> {
    list(
        conn,
        &EventFilter {
            since: Some(start),
            until: Some(end),
            ..Default::default()
        },
    )
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        event_type: enum_col(row, "event_type")?,
        occurred_at: ts_col(row, "occurred_at")?,
        idempotency_key: row.get("idempotency_key")?,
        command: row.get("command")?,
        entity_id: row.get("entity_id")?,
        payload: json_col(row, "payload")?,
        result: opt_json_col(row, "result")?,
    })
}

// ============================================
// Read-side queries
// ============================================

impl Database {
    /// List ledger events with optional filtering
    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        list(&self.connection(), filter)
    }

    /// Look up the event recorded under an idempotency key
    pub fn event_by_key(&self, key: &str) -> Result<Option<Event>> {
        find_by_key(&self.connection(), key)
    }

    /// Total number of ledger events
    pub fn count_events(&self) -> Result<i64> {
        let conn = self.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_event_type_text_round_trip() {
        assert_eq!(EventType::HardModeCrisisOverride.as_str(), "hard_mode.crisis_override");
        assert_eq!(
            "merchant_hint.set".parse::<EventType>().unwrap(),
            EventType::MerchantHintSet
        );
        assert_eq!(
            serde_json::to_value(EventType::ReminderSent).unwrap(),
            json!("reminder.sent")
        );
    }

    #[test]
    fn test_duplicate_key_is_unique_violation() {
        let db = test_db();
        let conn = db.connection();
        let event = NewEvent::new(EventType::QuietDaySet, "2026-06-01", &json!({"is_quiet": true}))
            .unwrap();

        append(&conn, "k", "set_quiet_day", t0(), &event, None).unwrap();
        let err = append(&conn, "k", "set_quiet_day", t0(), &event, None).unwrap_err();
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&Error::Validation("x".into())));
    }

    #[test]
    fn test_list_orders_by_time_then_insertion() {
        let db = test_db();
        let conn = db.connection();
        let later = NewEvent::unscoped(EventType::RecurringRunCompleted, &json!({"n": 1})).unwrap();
        let tie_a = NewEvent::unscoped(EventType::RecurringRunCompleted, &json!({"n": 2})).unwrap();
        let tie_b = NewEvent::unscoped(EventType::RecurringRunCompleted, &json!({"n": 3})).unwrap();

        append(&conn, "a", "c", t0() + Duration::minutes(5), &later, None).unwrap();
        append(&conn, "b", "c", t0(), &tie_a, None).unwrap();
        append(&conn, "c", "c", t0(), &tie_b, None).unwrap();

        let order: Vec<i64> = of_types(&conn, &[EventType::RecurringRunCompleted])
            .unwrap()
            .iter()
            .map(|e| e.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![2, 3, 1]);

        let window = between(&conn, t0(), t0() + Duration::minutes(1)).unwrap();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_result_round_trips() {
        let db = test_db();
        let conn = db.connection();
        let event = NewEvent::new(EventType::EnvelopeCreated, "env-1", &json!({"name": "Food"}))
            .unwrap();
        let result = json!({"id": "env-1"});

        let id = append(&conn, "key-1", "create_envelope", t0(), &event, Some(&result)).unwrap();
        let stored = find_by_key(&conn, "key-1").unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.result, Some(result));
        assert_eq!(stored.entity_id.as_deref(), Some("env-1"));
        assert!(find_by_key(&conn, "missing").unwrap().is_none());
    }
}
