//! Reminder outcomes recorded by the reminder engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tasks::load_task;
use super::{CommandOutcome, CommandProcessor, Recorded};
use crate::db::repo;
use crate::error::Result;
use crate::ledger::{EventType, NewEvent};
use crate::types::ReminderOutcome;

/// One reminder decision for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRecord {
    pub task_id: String,
    pub title: String,
    pub outcome: ReminderOutcome,
    pub scheduled_for: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<DateTime<Utc>>,
    pub recorded_at: DateTime<Utc>,
}

impl ReminderOutcome {
    fn event_type(&self) -> EventType {
        match self {
            ReminderOutcome::Sent => EventType::ReminderSent,
            ReminderOutcome::SuppressedQuiet => EventType::ReminderSuppressedQuiet,
            ReminderOutcome::Snoozed => EventType::ReminderSnoozed,
        }
    }

    /// Whether the outcome counts as the task having been reminded.
    fn marks_reminded(&self) -> bool {
        matches!(self, ReminderOutcome::Sent | ReminderOutcome::SuppressedQuiet)
    }
}

impl CommandProcessor {
    /// Records a reminder outcome. `sent` and `suppressed_quiet` stamp the
    /// task's `last_reminder_at`.
    pub fn record_reminder(
        &self,
        key: &str,
        task_id: &str,
        outcome: ReminderOutcome,
        scheduled_for: DateTime<Utc>,
    ) -> Result<CommandOutcome<ReminderRecord>> {
        self.execute(key, "record_reminder", |scope| {
            let mut task = load_task(scope.conn, task_id)?;

            let record = ReminderRecord {
                task_id: task.id.clone(),
                title: task.title.clone(),
                outcome,
                scheduled_for,
                due_at: task.due_at,
                snoozed_until: task.reminder_snoozed_until,
                recorded_at: scope.now,
            };

            if outcome.marks_reminded() {
                task.last_reminder_at = Some(scope.now);
                task.updated_at = scope.now;
                repo::update_task(scope.conn, &task)?;
            }

            let event = NewEvent::new(outcome.event_type(), &task.id, &record)?;
            Ok(Recorded::new(record, event))
        })
    }
}
