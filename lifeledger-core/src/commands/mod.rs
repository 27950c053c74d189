//! Idempotent command processing.
//!
//! Every write goes through [`CommandProcessor::execute`], which runs one
//! `BEGIN IMMEDIATE` transaction:
//!
//! 1. Look the idempotency key up in the ledger. A hit replays the stored
//!    outcome with `deduplicated = true` and writes nothing.
//! 2. Run the command body, which validates, mutates entity rows and
//!    describes the events to append.
//! 3. Append the primary event (carrying the serialized outcome) under the
//!    key, and any secondary events under `<key>:<suffix>`.
//! 4. Commit.
//!
//! An error from the body rolls the whole transaction back. If another
//! writer appended the same key first, the transaction is rolled back and
//! the winner's outcome is returned instead.
//!
//! The individual commands live in the submodules as `impl CommandProcessor`
//! blocks.

pub mod finance;
pub mod hard_mode;
pub mod mood;
pub mod quiet_days;
pub mod recurring;
pub mod reminders;
pub mod tasks;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::{Calendar, Clock};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::ledger::{self, Event, NewEvent};

/// Longest accepted idempotency key, in characters.
pub const MAX_KEY_LEN: usize = 200;

/// What a command returns to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome<T> {
    pub value: T,
    /// True when the key had already been recorded and nothing was written
    pub deduplicated: bool,
    /// Ledger id of the primary event
    pub event_id: i64,
}

/// The result of a command body: its value plus the events to append.
#[derive(Debug)]
pub struct Recorded<T> {
    value: T,
    primary: NewEvent,
    secondary: Vec<(String, NewEvent)>,
}

impl<T> Recorded<T> {
    pub fn new(value: T, primary: NewEvent) -> Self {
        Self {
            value,
            primary,
            secondary: Vec::new(),
        }
    }

    /// Adds an event appended under `<key>:<suffix>`.
    pub fn with_secondary(mut self, suffix: impl Into<String>, event: NewEvent) -> Self {
        self.secondary.push((suffix.into(), event));
        self
    }
}

/// What a command body can see: the open transaction and the command's time.
pub struct Scope<'a> {
    pub conn: &'a Connection,
    pub now: DateTime<Utc>,
    pub calendar: Calendar,
    pub config: &'a Config,
    pub key: &'a str,
}

/// Runs commands against a database.
pub struct CommandProcessor {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    config: Arc<Config>,
}

impl CommandProcessor {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        calendar: Calendar,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            clock,
            calendar,
            config,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Executes `body` at most once per idempotency key.
    ///
    /// `command` names the operation; reusing a key for a different command
    /// fails with [`Error::IdempotencyConflict`].
    pub fn execute<T, F>(
        &self,
        key: &str,
        command: &'static str,
        body: F,
    ) -> Result<CommandOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Scope<'_>) -> Result<Recorded<T>>,
    {
        let key = normalize_key(key)?;
        let now = self.clock.now();

        let mut conn = self.db.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = ledger::find_by_key(&tx, key)? {
            tracing::debug!(key, command, event_id = existing.id, "Replaying recorded outcome");
            return replay(existing, command);
        }

        let scope = Scope {
            conn: &tx,
            now,
            calendar: self.calendar,
            config: &self.config,
            key,
        };
        let recorded = match body(&scope) {
            Ok(recorded) => recorded,
            Err(e) => {
                if e.is_rejection() {
                    tracing::info!(key, command, error = %e, "Command rejected");
                } else {
                    tracing::warn!(key, command, error = %e, "Command failed");
                }
                return Err(e);
            }
        };

        let result = serde_json::to_value(&recorded.value)?;
        let appended = ledger::append(&tx, key, command, now, &recorded.primary, Some(&result));
        let event_id = match appended {
            Ok(id) => id,
            Err(e) if ledger::is_unique_violation(&e) => {
                // Another writer recorded this key between our lookup and insert
                tx.rollback()?;
                let winner = ledger::find_by_key(&conn, key)?.ok_or(e)?;
                tracing::info!(key, command, event_id = winner.id, "Lost idempotency race");
                return replay(winner, command);
            }
            Err(e) => return Err(e),
        };

        for (suffix, event) in &recorded.secondary {
            let derived = format!("{key}:{suffix}");
            ledger::append(&tx, &derived, command, now, event, None)?;
        }

        tx.commit()?;

        tracing::info!(
            key,
            command,
            event_id,
            event_type = %recorded.primary.event_type,
            secondary = recorded.secondary.len(),
            "Command recorded"
        );

        Ok(CommandOutcome {
            value: recorded.value,
            deduplicated: false,
            event_id,
        })
    }
}

/// Trims a caller-supplied key and checks its length.
pub fn normalize_key(key: &str) -> Result<&str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Validation("idempotency key must not be empty".to_string()));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(Error::Validation(format!(
            "idempotency key must be at most {MAX_KEY_LEN} characters"
        )));
    }
    Ok(key)
}

fn replay<T: DeserializeOwned>(event: Event, command: &str) -> Result<CommandOutcome<T>> {
    let conflict = || Error::IdempotencyConflict {
        key: event.idempotency_key.clone(),
        recorded: event.command.clone(),
        requested: command.to_string(),
    };
    if event.command != command {
        return Err(conflict());
    }
    // Secondary events carry no outcome; their derived keys are not reusable
    let Some(result) = event.result.clone() else {
        return Err(conflict());
    };
    Ok(CommandOutcome {
        value: serde_json::from_value(result)?,
        deduplicated: true,
        event_id: event.id,
    })
}

// ============================================
// Shared validation helpers
// ============================================

/// Trims `text` and rejects it when empty.
pub(crate) fn required_text(field: &str, text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Trims optional text, mapping blank values to `None`.
pub(crate) fn optional_text(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

pub(crate) fn positive_amount(amount_minor: i64) -> Result<i64> {
    if amount_minor <= 0 {
        return Err(Error::Validation(format!(
            "amount must be a positive number of minor units, got {amount_minor}"
        )));
    }
    Ok(amount_minor)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
