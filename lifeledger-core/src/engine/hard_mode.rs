//! Scheduled hard-mode actions: plan generation and day close.
//!
//! Both re-read the session before acting and return `NotRun` when the
//! session moved on since the job was queued.

use chrono::{DateTime, Utc};

use crate::commands::hard_mode::{day_close_key, finalize_key, plan_blocker, plan_job_key};
use crate::commands::CommandProcessor;
use crate::error::Result;
use crate::scheduler::ActionStatus;

/// Generates the plan for `day_start` if the session still wants one.
pub fn generate_plan(
    processor: &CommandProcessor,
    session_id: &str,
    day_start: DateTime<Utc>,
) -> Result<ActionStatus> {
    let Some(session) = processor.database().get_hard_mode_session(session_id)? else {
        return Ok(ActionStatus::NotRun(format!("session {session_id} not found")));
    };
    if let Some(reason) = plan_blocker(&session, day_start) {
        return Ok(ActionStatus::NotRun(reason));
    }

    let key = plan_job_key(session_id, day_start);
    match processor.generate_plan(&key, session_id, day_start) {
        Ok(outcome) if outcome.deduplicated => Ok(ActionStatus::NotRun(format!(
            "plan for {day_start} already generated"
        ))),
        Ok(outcome) => Ok(ActionStatus::Ran(format!(
            "planned {} items for {day_start}",
            outcome.value.items.len()
        ))),
        // Lost a race with a state change after the check above
        Err(e) if e.is_rejection() => Ok(ActionStatus::NotRun(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Closes one session day unless the session or the day is already closed.
///
/// An active session closes under the day's key. A deactivated one closes
/// under its finalize key, so it is finalized even when the same day was
/// already rolled over.
pub fn close_day(
    processor: &CommandProcessor,
    session_id: &str,
    day_start: DateTime<Utc>,
) -> Result<ActionStatus> {
    let Some(session) = processor.database().get_hard_mode_session(session_id)? else {
        return Ok(ActionStatus::NotRun(format!("session {session_id} not found")));
    };
    if session.is_closed() {
        return Ok(ActionStatus::NotRun(format!("session {session_id} already closed")));
    }
    let key = if session.is_active {
        day_close_key(session_id, day_start)
    } else {
        finalize_key(session_id)
    };
    if processor.database().event_by_key(&key)?.is_some() {
        return Ok(ActionStatus::NotRun(format!("{day_start} already closed")));
    }

    match processor.close_day(&key, session_id, day_start) {
        Ok(outcome) if outcome.deduplicated => {
            Ok(ActionStatus::NotRun(format!("{day_start} already closed")))
        }
        Ok(outcome) => Ok(ActionStatus::Ran(format!(
            "day {day_start} closed: {:?}, {} tasks completed",
            outcome.value.outcome, outcome.value.tasks_completed
        ))),
        Err(e) if e.is_rejection() => Ok(ActionStatus::NotRun(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Closes today for the active session, if there is one.
pub fn nightly_close(processor: &CommandProcessor) -> Result<ActionStatus> {
    let Some(session) = processor.database().active_hard_mode_session()? else {
        return Ok(ActionStatus::NotRun("no active hard-mode session".to_string()));
    };
    let today = processor.calendar().day_start(processor.now());
    close_day(processor, &session.id, today)
}
