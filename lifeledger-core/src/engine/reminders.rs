//! Reminder sweep over today's due tasks.
//!
//! Every outcome for a `(task, scheduled_for)` pair shares the key
//! `reminder:<task>:<scheduled_for>`, so sweeping every few minutes records
//! one decision per reminder and the sink sees each reminder at most once.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::commands::reminders::ReminderRecord;
use crate::commands::CommandProcessor;
use crate::db::{fmt_ts, repo};
use crate::error::Result;
use crate::types::{ReminderOutcome, Task};

/// Receives reminders that should reach the user.
pub trait ReminderSink: Send + Sync {
    fn deliver(&self, reminder: &ReminderRecord) -> Result<()>;
}

/// Default sink: one structured log line per reminder.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ReminderSink for LogSink {
    fn deliver(&self, reminder: &ReminderRecord) -> Result<()> {
        tracing::info!(
            task = %reminder.task_id,
            title = %reminder.title,
            due_at = ?reminder.due_at,
            scheduled_for = %reminder.scheduled_for,
            "Reminder"
        );
        Ok(())
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub suppressed_quiet: usize,
    pub snoozed: usize,
    /// Not yet time to remind
    pub pending: usize,
    /// Already recorded by an earlier sweep
    pub already_recorded: usize,
    pub failed: usize,
}

/// What the sweep decided for one task.
enum Decision {
    Snoozed { key: String },
    NotYet,
    Record { key: String, outcome: ReminderOutcome },
}

/// Sweeps reminder-enabled open tasks due during today's local day.
pub fn sweep(processor: &CommandProcessor, sink: &dyn ReminderSink) -> Result<SweepReport> {
    let now = processor.now();
    let calendar = processor.calendar();
    let default_offset = processor.config().reminders.default_offset_minutes;
    let (start, end) = calendar.day_range(now);

    let (candidates, quiet_today) = {
        let conn = processor.database().connection();
        (
            repo::reminder_candidates(&conn, start, end)?,
            repo::is_quiet_day(&conn, calendar.local_date(now))?,
        )
    };

    let mut report = SweepReport {
        candidates: candidates.len(),
        ..Default::default()
    };

    for task in &candidates {
        let Some((scheduled_for, decision)) = decide(task, now, default_offset, quiet_today)
        else {
            continue;
        };

        let (key, outcome) = match decision {
            Decision::NotYet => {
                report.pending += 1;
                continue;
            }
            Decision::Snoozed { key } => (key, ReminderOutcome::Snoozed),
            Decision::Record { key, outcome } => (key, outcome),
        };

        let recorded = match processor.record_reminder(&key, &task.id, outcome, scheduled_for) {
            Ok(recorded) => recorded,
            Err(e) => {
                tracing::warn!(task = %task.id, key = %key, error = %e, "Reminder not recorded");
                report.failed += 1;
                continue;
            }
        };
        if recorded.deduplicated {
            report.already_recorded += 1;
            continue;
        }

        match outcome {
            ReminderOutcome::Sent => {
                if let Err(e) = sink.deliver(&recorded.value) {
                    tracing::error!(task = %task.id, error = %e, "Reminder delivery failed");
                }
                report.sent += 1;
            }
            ReminderOutcome::SuppressedQuiet => report.suppressed_quiet += 1,
            ReminderOutcome::Snoozed => report.snoozed += 1,
        }
    }

    Ok(report)
}

/// Works out the reminder time and decision for one task.
fn decide(
    task: &Task,
    now: DateTime<Utc>,
    default_offset: u32,
    quiet_today: bool,
) -> Option<(DateTime<Utc>, Decision)> {
    let due_at = task.due_at?;
    let offset = task.reminder_offset_minutes.unwrap_or(default_offset);
    let mut scheduled_for = due_at - Duration::minutes(i64::from(offset));

    if let Some(until) = task.reminder_snoozed_until {
        if until > now {
            let key = format!("reminder:{}:snoozed:{}", task.id, fmt_ts(until));
            return Some((scheduled_for, Decision::Snoozed { key }));
        }
        // An elapsed snooze that ran past the reminder time moves it
        if until > scheduled_for {
            scheduled_for = until;
        }
    }

    if now < scheduled_for {
        return Some((scheduled_for, Decision::NotYet));
    }

    let outcome = if quiet_today {
        ReminderOutcome::SuppressedQuiet
    } else {
        ReminderOutcome::Sent
    };
    let key = format!("reminder:{}:{}", task.id, fmt_ts(scheduled_for));
    Some((scheduled_for, Decision::Record { key, outcome }))
}
