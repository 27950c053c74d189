//! Recurring execution: turns due schedules into transactions.
//!
//! Each due schedule gets two commands with keys derived from its id and due
//! time, `recurring:<id>:<due>:transaction` then `recurring:<id>:<due>:advance`.
//! A redelivered or overlapping run replays both instead of double-charging.

use chrono::{DateTime, Utc};

use crate::clock::Calendar;
use crate::commands::finance::NewTransaction;
use crate::commands::recurring::RecurringRunSummary;
use crate::commands::CommandProcessor;
use crate::db::fmt_ts;
use crate::error::Result;
use crate::projection::recurring::RecurringPatch;
use crate::types::{RecurringSchedule, TransactionSource};

/// Executes up to `recurring.max_per_run` due schedules, oldest first.
///
/// Failures are counted and logged; a failed schedule is not advanced and is
/// picked up again by the next run.
pub fn execute_due(processor: &CommandProcessor) -> Result<RecurringRunSummary> {
    let now = processor.now();
    let calendar = processor.calendar();
    let max_per_run = processor.config().recurring.max_per_run;

    let mut due: Vec<RecurringSchedule> = processor
        .database()
        .recurring_schedules()?
        .into_iter()
        .filter(|s| s.is_due(now))
        .collect();
    due.sort_by(|a, b| {
        a.next_due_at
            .cmp(&b.next_due_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    // Idle runs leave no telemetry behind
    if due.is_empty() {
        return Ok(RecurringRunSummary::default());
    }

    let mut summary = RecurringRunSummary {
        total_due: due.len(),
        skipped_due_to_limit: due.len().saturating_sub(max_per_run),
        ..Default::default()
    };

    for schedule in due.iter().take(max_per_run) {
        match execute_one(processor, schedule, &calendar) {
            Ok(amount_minor) => {
                summary.processed += 1;
                summary.total_amount_minor += amount_minor;
            }
            Err(e) => {
                tracing::warn!(
                    schedule = %schedule.id,
                    due_at = %schedule.next_due_at,
                    error = %e,
                    "Recurring schedule failed"
                );
                summary.failed += 1;
            }
        }
    }

    if summary.skipped_due_to_limit > 0 {
        tracing::info!(
            skipped = summary.skipped_due_to_limit,
            max_per_run,
            "Recurring run hit its limit"
        );
    }

    let run_key = format!("recurring.run:{}", uuid::Uuid::new_v4());
    processor.record_recurring_run(&run_key, summary.clone())?;
    Ok(summary)
}

/// Logs the due transaction and advances the schedule by one period.
fn execute_one(
    processor: &CommandProcessor,
    schedule: &RecurringSchedule,
    calendar: &Calendar,
) -> Result<i64> {
    let due: DateTime<Utc> = schedule.next_due_at;
    let base_key = format!("recurring:{}:{}", schedule.id, fmt_ts(due));

    let logged = processor.log_transaction(
        &format!("{base_key}:transaction"),
        NewTransaction {
            amount_minor: schedule.amount_minor,
            flow: schedule.flow,
            merchant: schedule.merchant.clone(),
            category: schedule.category.clone(),
            envelope_id: schedule.envelope_id.clone(),
            occurred_at: Some(due),
            source: TransactionSource::Recurring,
            recurring_id: Some(schedule.id.clone()),
        },
    )?;

    let next_due_at = schedule.cadence.advance(due, schedule.anchor_day, calendar)?;
    processor.update_recurring(
        &format!("{base_key}:advance"),
        &schedule.id,
        RecurringPatch {
            next_due_at: Some(next_due_at),
            ..Default::default()
        },
    )?;

    tracing::debug!(
        schedule = %schedule.id,
        transaction = %logged.value.id,
        next_due_at = %next_due_at,
        replayed = logged.deduplicated,
        "Recurring schedule executed"
    );
    Ok(logged.value.amount_minor)
}
