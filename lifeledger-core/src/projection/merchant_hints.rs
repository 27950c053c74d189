//! Merchant → envelope hints, folded from `merchant_hint.set` events.
//!
//! Last write wins per normalized merchant key. Two events with the same
//! `occurred_at` resolve to the one appended later.

use std::collections::BTreeMap;

use rusqlite::Connection;

use super::fold;
use crate::db::Database;
use crate::error::Result;
use crate::ledger::{self, Event, EventType};
use crate::types::{merchant_key, MerchantHint};

/// Folds hint events into hints keyed by normalized merchant.
pub fn project<'a>(
    events: impl IntoIterator<Item = &'a Event>,
) -> Result<BTreeMap<String, MerchantHint>> {
    let hints = events
        .into_iter()
        .filter(|e| e.event_type == EventType::MerchantHintSet);
    fold(
        hints,
        |e| {
            e.payload
                .get("merchant_key")
                .and_then(|k| k.as_str())
                .map(str::to_string)
        },
        |_, e| Ok(Some(e.decode::<MerchantHint>()?)),
    )
}

pub(crate) fn load(conn: &Connection) -> Result<BTreeMap<String, MerchantHint>> {
    let events = ledger::of_types(conn, &[EventType::MerchantHintSet])?;
    project(&events)
}

/// The hint for `merchant`, matched after normalization.
pub(crate) fn lookup(conn: &Connection, merchant: &str) -> Result<Option<MerchantHint>> {
    Ok(load(conn)?.remove(&merchant_key(merchant)))
}

impl Database {
    /// All merchant hints, ordered by merchant key
    pub fn merchant_hints(&self) -> Result<Vec<MerchantHint>> {
        Ok(load(&self.connection())?.into_values().collect())
    }

    /// Envelope suggested for a merchant, if a hint exists
    pub fn suggest_envelope(&self, merchant: &str) -> Result<Option<String>> {
        Ok(lookup(&self.connection(), merchant)?.map(|h| h.envelope_id))
    }
}
