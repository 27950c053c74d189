//! Recurring schedule commands.
//!
//! Schedules have no table of their own: each command validates against the
//! folded projection and appends the event the fold will replay.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::finance::require_envelope;
use super::{
    new_id, optional_text, positive_amount, CommandOutcome, CommandProcessor, Recorded, Scope,
};
use crate::error::{Error, Result};
use crate::ledger::{EventType, NewEvent};
use crate::projection::recurring::{self as projection, CancelRecord, RecurringPatch};
use crate::types::{Cadence, Flow, RecurringSchedule};

/// Arguments for [`CommandProcessor::schedule_recurring`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecurring {
    pub amount_minor: i64,
    pub flow: Flow,
    pub cadence: Cadence,
    pub first_due_at: DateTime<Utc>,
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub envelope_id: Option<String>,
}

/// Telemetry appended after each recurring execution run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringRunSummary {
    pub processed: usize,
    pub skipped_due_to_limit: usize,
    pub failed: usize,
    pub total_due: usize,
    pub total_amount_minor: i64,
}

fn load_live(scope: &Scope<'_>, id: &str) -> Result<RecurringSchedule> {
    let schedule = projection::load_one(scope.conn, id)?
        .ok_or_else(|| Error::not_found("recurring_schedule", id))?;
    if schedule.canceled {
        return Err(Error::InvalidTransition {
            entity: "recurring_schedule",
            id: id.to_string(),
            from: "canceled".to_string(),
            to: "updated".to_string(),
        });
    }
    Ok(schedule)
}

impl CommandProcessor {
    /// Creates a schedule. The first due date fixes the monthly anchor day.
    pub fn schedule_recurring(
        &self,
        key: &str,
        args: NewRecurring,
    ) -> Result<CommandOutcome<RecurringSchedule>> {
        self.execute(key, "schedule_recurring", |scope| {
            let amount_minor = positive_amount(args.amount_minor)?;
            if let Some(envelope_id) = &args.envelope_id {
                require_envelope(scope.conn, envelope_id)?;
            }

            let schedule = RecurringSchedule {
                id: new_id(),
                amount_minor,
                flow: args.flow,
                cadence: args.cadence,
                next_due_at: args.first_due_at,
                anchor_day: scope.calendar.local_date(args.first_due_at).day(),
                description: optional_text(args.description.as_deref()),
                merchant: optional_text(args.merchant.as_deref()),
                category: optional_text(args.category.as_deref()),
                envelope_id: args.envelope_id.clone(),
                canceled: false,
                canceled_at: None,
                created_at: scope.now,
                updated_at: scope.now,
            };

            let event = NewEvent::new(EventType::RecurringScheduled, &schedule.id, &schedule)?;
            Ok(Recorded::new(schedule, event))
        })
    }

    /// Applies a field patch to a live schedule.
    pub fn update_recurring(
        &self,
        key: &str,
        id: &str,
        patch: RecurringPatch,
    ) -> Result<CommandOutcome<RecurringSchedule>> {
        self.execute(key, "update_recurring", |scope| {
            if patch.is_empty() {
                return Err(Error::Validation("update changes nothing".to_string()));
            }
            if let Some(amount) = patch.amount_minor {
                positive_amount(amount)?;
            }
            if let Some(day) = patch.anchor_day {
                if !(1..=31).contains(&day) {
                    return Err(Error::Validation(format!(
                        "anchor day must be between 1 and 31, got {day}"
                    )));
                }
            }
            if let Some(envelope_id) = &patch.envelope_id {
                require_envelope(scope.conn, envelope_id)?;
            }

            let mut schedule = load_live(scope, id)?;
            patch.apply_to(&mut schedule, scope.now);

            let event = NewEvent::new(EventType::RecurringUpdated, id, &patch)?;
            Ok(Recorded::new(schedule, event))
        })
    }

    /// Cancels a schedule permanently.
    pub fn cancel_recurring(
        &self,
        key: &str,
        id: &str,
    ) -> Result<CommandOutcome<RecurringSchedule>> {
        self.execute(key, "cancel_recurring", |scope| {
            let mut schedule = load_live(scope, id)?;
            schedule.canceled = true;
            schedule.canceled_at = Some(scope.now);
            schedule.updated_at = scope.now;

            let record = CancelRecord {
                canceled_at: scope.now,
            };
            let event = NewEvent::new(EventType::RecurringCanceled, id, &record)?;
            Ok(Recorded::new(schedule, event))
        })
    }

    /// Appends the telemetry event for one execution run.
    pub fn record_recurring_run(
        &self,
        key: &str,
        summary: RecurringRunSummary,
    ) -> Result<CommandOutcome<RecurringRunSummary>> {
        self.execute(key, "record_recurring_run", |_| {
            let event = NewEvent::unscoped(EventType::RecurringRunCompleted, &summary)?;
            Ok(Recorded::new(summary, event))
        })
    }
}
