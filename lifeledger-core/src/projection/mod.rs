//! State reconstructed by folding ledger events.
//!
//! Two views are never stored in tables: recurring schedules and merchant
//! hints. Both are rebuilt on read by [`fold`], which is pure and treats the
//! ledger as the only source of truth.

pub mod merchant_hints;
pub mod recurring;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::ledger::Event;

/// Folds events into a keyed map.
///
/// Events are applied in `occurred_at` order, with the ledger insertion id
/// breaking ties. `key_of` picks the map entry an event belongs to (events
/// it returns `None` for are ignored). `reduce` receives the current value
/// for that key, if any, and returns the next one; returning `None` removes
/// the entry.
pub fn fold<'a, K, V, I, KF, RF>(events: I, key_of: KF, mut reduce: RF) -> Result<BTreeMap<K, V>>
where
    K: Ord,
    I: IntoIterator<Item = &'a Event>,
    KF: Fn(&Event) -> Option<K>,
    RF: FnMut(Option<V>, &Event) -> Result<Option<V>>,
{
    let mut ordered: Vec<&Event> = events.into_iter().collect();
    ordered.sort_by_key(|e| (e.occurred_at, e.id));

    let mut state = BTreeMap::new();
    for event in ordered {
        let Some(key) = key_of(event) else {
            continue;
        };
        let current = state.remove(&key);
        if let Some(next) = reduce(current, event)? {
            state.insert(key, next);
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EventType;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn event(id: i64, at: DateTime<Utc>, entity: &str, n: i64) -> Event {
        Event {
            id,
            event_type: EventType::RecurringUpdated,
            occurred_at: at,
            idempotency_key: format!("k{id}"),
            command: "test".to_string(),
            entity_id: Some(entity.to_string()),
            payload: json!({ "n": n }),
            result: None,
        }
    }

    #[test]
    fn test_fold_orders_by_time_then_id() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        // Supplied out of order on purpose
        let events = [
            event(3, t, "a", 3),
            event(1, t + Duration::seconds(1), "a", 1),
            event(2, t, "a", 2),
        ];

        let trail = fold(
            &events,
            |e| e.entity_id.clone(),
            |acc: Option<Vec<i64>>, e| {
                let mut seen = acc.unwrap_or_default();
                seen.push(e.payload["n"].as_i64().unwrap_or_default());
                Ok(Some(seen))
            },
        )
        .unwrap();

        assert_eq!(trail["a"], vec![2, 3, 1]);
    }

    #[test]
    fn test_fold_can_drop_and_skip() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut orphan = event(4, t, "c", 0);
        orphan.entity_id = None;
        let events = [event(1, t, "a", 1), event(2, t, "b", 0), orphan];

        let kept = fold(
            &events,
            |e| e.entity_id.clone(),
            |_, e| Ok((e.payload["n"] != json!(0)).then_some(())),
        )
        .unwrap();

        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
