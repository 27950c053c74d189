//! Task commands: creation, the status lifecycle and reminder settings.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{new_id, required_text, CommandOutcome, CommandProcessor, Recorded};
use crate::db::repo;
use crate::error::{Error, Result};
use crate::ledger::{EventType, NewEvent};
use crate::types::{Task, TaskStatus, FOCUS_CAPACITY};

/// Largest reminder offset, one day.
pub const MAX_REMINDER_OFFSET_MINUTES: u32 = 24 * 60;

/// Arguments for [`CommandProcessor::create_task`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub due_at: Option<DateTime<Utc>>,
    pub reminders_enabled: bool,
    pub reminder_offset_minutes: Option<u32>,
}

/// Payload of status-change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReminderSettings {
    enabled: bool,
    offset_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snooze {
    until: DateTime<Utc>,
}

pub(crate) fn load_task(conn: &Connection, id: &str) -> Result<Task> {
    repo::get_task(conn, id)?.ok_or_else(|| Error::not_found("task", id))
}

fn check_offset(offset: Option<u32>) -> Result<()> {
    match offset {
        Some(minutes) if minutes > MAX_REMINDER_OFFSET_MINUTES => Err(Error::Validation(format!(
            "reminder offset must be between 0 and {MAX_REMINDER_OFFSET_MINUTES} minutes"
        ))),
        _ => Ok(()),
    }
}

fn reject_closed(task: &Task) -> Result<()> {
    if task.status.is_closed() {
        return Err(Error::Validation(format!(
            "task {} is {}",
            task.id, task.status
        )));
    }
    Ok(())
}

impl CommandProcessor {
    /// Creates a task in the inbox.
    pub fn create_task(&self, key: &str, args: NewTask) -> Result<CommandOutcome<Task>> {
        self.execute(key, "create_task", |scope| {
            let title = required_text("title", &args.title)?;
            check_offset(args.reminder_offset_minutes)?;

            let task = Task {
                id: new_id(),
                title,
                status: TaskStatus::Inbox,
                due_at: args.due_at,
                reminders_enabled: args.reminders_enabled,
                reminder_offset_minutes: args.reminder_offset_minutes,
                reminder_snoozed_until: None,
                last_reminder_at: None,
                created_at: scope.now,
                updated_at: scope.now,
                completed_at: None,
            };
            repo::insert_task(scope.conn, &task)?;

            let event = NewEvent::new(EventType::TaskCreated, &task.id, &task)?;
            Ok(Recorded::new(task, event))
        })
    }

    /// Moves a task into focus. At most [`FOCUS_CAPACITY`] tasks may be in focus.
    pub fn focus_task(&self, key: &str, task_id: &str) -> Result<CommandOutcome<Task>> {
        self.move_task(key, "focus_task", task_id, TaskStatus::Focus, EventType::TaskFocused)
    }

    pub fn defer_task(&self, key: &str, task_id: &str) -> Result<CommandOutcome<Task>> {
        self.move_task(key, "defer_task", task_id, TaskStatus::Deferred, EventType::TaskDeferred)
    }

    pub fn complete_task(&self, key: &str, task_id: &str) -> Result<CommandOutcome<Task>> {
        self.move_task(
            key,
            "complete_task",
            task_id,
            TaskStatus::Completed,
            EventType::TaskCompleted,
        )
    }

    pub fn abandon_task(&self, key: &str, task_id: &str) -> Result<CommandOutcome<Task>> {
        self.move_task(
            key,
            "abandon_task",
            task_id,
            TaskStatus::Abandoned,
            EventType::TaskAbandoned,
        )
    }

    /// Returns a completed or abandoned task to the inbox.
    pub fn reopen_task(&self, key: &str, task_id: &str) -> Result<CommandOutcome<Task>> {
        self.execute(key, "reopen_task", |scope| {
            let mut task = load_task(scope.conn, task_id)?;
            let from = task.status;
            if !from.is_closed() {
                return Err(Error::InvalidTransition {
                    entity: "task",
                    id: task.id,
                    from: from.to_string(),
                    to: TaskStatus::Inbox.to_string(),
                });
            }

            task.status = TaskStatus::Inbox;
            task.completed_at = None;
            task.updated_at = scope.now;
            repo::update_task(scope.conn, &task)?;

            let change = StatusChange {
                from,
                to: TaskStatus::Inbox,
            };
            let event = NewEvent::new(EventType::TaskReopened, &task.id, &change)?;
            Ok(Recorded::new(task, event))
        })
    }

    /// Enables or disables reminders for a task and sets its offset.
    pub fn configure_reminder(
        &self,
        key: &str,
        task_id: &str,
        enabled: bool,
        offset_minutes: Option<u32>,
    ) -> Result<CommandOutcome<Task>> {
        self.execute(key, "configure_reminder", |scope| {
            check_offset(offset_minutes)?;
            let mut task = load_task(scope.conn, task_id)?;
            reject_closed(&task)?;

            task.reminders_enabled = enabled;
            task.reminder_offset_minutes = offset_minutes;
            task.updated_at = scope.now;
            repo::update_task(scope.conn, &task)?;

            let settings = ReminderSettings {
                enabled,
                offset_minutes,
            };
            let event = NewEvent::new(EventType::TaskReminderConfigured, &task.id, &settings)?;
            Ok(Recorded::new(task, event))
        })
    }

    /// Holds a task's reminder back until `until`.
    pub fn snooze_reminder(
        &self,
        key: &str,
        task_id: &str,
        until: DateTime<Utc>,
    ) -> Result<CommandOutcome<Task>> {
        self.execute(key, "snooze_reminder", |scope| {
            if until <= scope.now {
                return Err(Error::Validation(
                    "snooze time must be in the future".to_string(),
                ));
            }
            let mut task = load_task(scope.conn, task_id)?;
            reject_closed(&task)?;

            task.reminder_snoozed_until = Some(until);
            task.updated_at = scope.now;
            repo::update_task(scope.conn, &task)?;

            let event = NewEvent::new(EventType::TaskReminderSnoozed, &task.id, &Snooze { until })?;
            Ok(Recorded::new(task, event))
        })
    }

    fn move_task(
        &self,
        key: &str,
        command: &'static str,
        task_id: &str,
        to: TaskStatus,
        event_type: EventType,
    ) -> Result<CommandOutcome<Task>> {
        self.execute(key, command, |scope| {
            let mut task = load_task(scope.conn, task_id)?;
            let from = task.status;
            if !from.can_move_to(to) {
                return Err(Error::InvalidTransition {
                    entity: "task",
                    id: task.id,
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }

            if to == TaskStatus::Focus {
                let in_focus = repo::count_tasks_with_status(scope.conn, TaskStatus::Focus)?;
                if in_focus >= FOCUS_CAPACITY {
                    return Err(Error::Capacity(format!(
                        "focus list already holds {in_focus} of {FOCUS_CAPACITY} tasks"
                    )));
                }
            }

            task.status = to;
            task.updated_at = scope.now;
            if to == TaskStatus::Completed {
                task.completed_at = Some(scope.now);
            }
            repo::update_task(scope.conn, &task)?;

            let event = NewEvent::new(event_type, &task.id, &StatusChange { from, to })?;
            Ok(Recorded::new(task, event))
        })
    }
}
