//! Recurring schedules, folded from `recurring.*` events.
//!
//! `recurring.scheduled` carries the full schedule, `recurring.updated` a
//! [`RecurringPatch`] and `recurring.canceled` the cancel time. Cancel is
//! terminal: later events for the same id, whatever their timestamp, leave a
//! canceled schedule untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::fold;
use crate::db::Database;
use crate::error::Result;
use crate::ledger::{self, Event, EventFilter, EventType};
use crate::types::{Cadence, Flow, RecurringSchedule};

/// Event types that make up a schedule's history.
pub const EVENT_TYPES: [EventType; 3] = [
    EventType::RecurringScheduled,
    EventType::RecurringUpdated,
    EventType::RecurringCanceled,
];

/// Field changes carried by a `recurring.updated` event. Absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_minor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Flow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<Cadence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_id: Option<String>,
}

impl RecurringPatch {
    pub fn is_empty(&self) -> bool {
        *self == RecurringPatch::default()
    }

    /// Applies the patch to `schedule`, stamping `updated_at`.
    pub fn apply_to(&self, schedule: &mut RecurringSchedule, at: DateTime<Utc>) {
        if let Some(amount) = self.amount_minor {
            schedule.amount_minor = amount;
        }
        if let Some(flow) = self.flow {
            schedule.flow = flow;
        }
        if let Some(cadence) = self.cadence {
            schedule.cadence = cadence;
        }
        if let Some(next) = self.next_due_at {
            schedule.next_due_at = next;
        }
        if let Some(day) = self.anchor_day {
            schedule.anchor_day = day;
        }
        if let Some(description) = &self.description {
            schedule.description = Some(description.clone());
        }
        if let Some(merchant) = &self.merchant {
            schedule.merchant = Some(merchant.clone());
        }
        if let Some(category) = &self.category {
            schedule.category = Some(category.clone());
        }
        if let Some(envelope_id) = &self.envelope_id {
            schedule.envelope_id = Some(envelope_id.clone());
        }
        schedule.updated_at = at;
    }
}

/// Payload of `recurring.canceled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRecord {
    pub canceled_at: DateTime<Utc>,
}

/// One fold step for a single schedule.
pub fn reduce(
    state: Option<RecurringSchedule>,
    event: &Event,
) -> Result<Option<RecurringSchedule>> {
    match (state, event.event_type) {
        // Terminal
        (Some(s), _) if s.canceled => Ok(Some(s)),
        (None, EventType::RecurringScheduled) => Ok(Some(event.decode()?)),
        (Some(mut s), EventType::RecurringUpdated) => {
            let patch: RecurringPatch = event.decode()?;
            patch.apply_to(&mut s, event.occurred_at);
            Ok(Some(s))
        }
        (Some(mut s), EventType::RecurringCanceled) => {
            let record: CancelRecord = event.decode()?;
            s.canceled = true;
            s.canceled_at = Some(record.canceled_at);
            s.updated_at = event.occurred_at;
            Ok(Some(s))
        }
        // A second "scheduled" for a live id, or history for an id never scheduled
        (state, _) => Ok(state),
    }
}

/// Folds schedule events into schedules keyed by id.
pub fn project<'a>(
    events: impl IntoIterator<Item = &'a Event>,
) -> Result<BTreeMap<String, RecurringSchedule>> {
    fold(
        events.into_iter().filter(|e| EVENT_TYPES.contains(&e.event_type)),
        |e| e.entity_id.clone(),
        reduce,
    )
}

/// Every schedule ever created, canceled ones included.
pub(crate) fn load(conn: &Connection) -> Result<BTreeMap<String, RecurringSchedule>> {
    let events = ledger::of_types(conn, &EVENT_TYPES)?;
    project(&events)
}

pub(crate) fn load_one(conn: &Connection, id: &str) -> Result<Option<RecurringSchedule>> {
    let events = ledger::list(
        conn,
        &EventFilter {
            types: EVENT_TYPES.to_vec(),
            entity_id: Some(id.to_string()),
            ..Default::default()
        },
    )?;
    Ok(project(&events)?.remove(id))
}

impl Database {
    /// All recurring schedules, ordered by id
    pub fn recurring_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        Ok(load(&self.connection())?.into_values().collect())
    }

    pub fn get_recurring_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>> {
        load_one(&self.connection(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    fn schedule() -> RecurringSchedule {
        RecurringSchedule {
            id: "r1".to_string(),
            amount_minor: 1500,
            flow: Flow::Outflow,
            cadence: Cadence::Monthly,
            next_due_at: t0(),
            anchor_day: 1,
            description: Some("Gym".to_string()),
            merchant: None,
            category: None,
            envelope_id: None,
            canceled: false,
            canceled_at: None,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn scheduled_payload() -> serde_json::Value {
        serde_json::to_value(schedule()).unwrap()
    }

    fn event(
        id: i64,
        at: DateTime<Utc>,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Event {
        Event {
            id,
            event_type,
            occurred_at: at,
            idempotency_key: format!("k{id}"),
            command: "test".to_string(),
            entity_id: Some("r1".to_string()),
            payload,
            result: None,
        }
    }

    #[test]
    fn test_updates_merge_fields() {
        let events = vec![
            event(1, t0(), EventType::RecurringScheduled, scheduled_payload()),
            event(
                2,
                t0() + Duration::hours(1),
                EventType::RecurringUpdated,
                serde_json::json!({ "amount_minor": 2000 }),
            ),
            event(
                3,
                t0() + Duration::hours(2),
                EventType::RecurringUpdated,
                serde_json::json!({ "category": "health" }),
            ),
        ];

        let schedules = project(&events).unwrap();
        let s = &schedules["r1"];
        assert_eq!(s.amount_minor, 2000);
        assert_eq!(s.category.as_deref(), Some("health"));
        assert_eq!(s.description.as_deref(), Some("Gym"));
        assert_eq!(s.updated_at, t0() + Duration::hours(2));
    }

    #[test]
    fn test_cancel_is_terminal() {
        let canceled_at = t0() + Duration::days(1);
        let events = vec![
            event(1, t0(), EventType::RecurringScheduled, scheduled_payload()),
            event(
                2,
                canceled_at,
                EventType::RecurringCanceled,
                serde_json::to_value(CancelRecord { canceled_at }).unwrap(),
            ),
            // Later-timestamped update after the cancel
            event(
                3,
                t0() + Duration::days(5),
                EventType::RecurringUpdated,
                serde_json::json!({ "amount_minor": 99 }),
            ),
        ];

        let s = &project(&events).unwrap()["r1"];
        assert!(s.canceled);
        assert_eq!(s.canceled_at, Some(canceled_at));
        assert_eq!(s.amount_minor, 1500);
        assert!(!s.is_due(t0() + Duration::days(30)));
    }

    #[test]
    fn test_update_before_schedule_is_ignored() {
        let events = vec![event(
            1,
            t0(),
            EventType::RecurringUpdated,
            serde_json::json!({ "amount_minor": 1 }),
        )];
        assert!(project(&events).unwrap().is_empty());
    }

    #[test]
    fn test_empty_patch() {
        assert!(RecurringPatch::default().is_empty());
        let patch = RecurringPatch {
            next_due_at: Some(t0()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({ "next_due_at": "2026-02-01T09:00:00Z" })
        );
    }
}
