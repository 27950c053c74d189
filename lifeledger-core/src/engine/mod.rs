//! Orchestration engines driven by the scheduler.
//!
//! Engines read current state, decide what is due, and write only through
//! the [`CommandProcessor`] with deterministic idempotency keys. That makes
//! every action safe to redeliver.

pub mod hard_mode;
pub mod recurring;
pub mod reminders;

use std::sync::Arc;

use crate::commands::CommandProcessor;
use crate::error::Result;
use crate::scheduler::{Action, ActionHandler, ActionStatus};

pub use reminders::{LogSink, ReminderSink, SweepReport};

/// Routes scheduled actions to the engine that handles them.
pub struct Engines {
    processor: Arc<CommandProcessor>,
    sink: Arc<dyn ReminderSink>,
}

impl Engines {
    pub fn new(processor: Arc<CommandProcessor>, sink: Arc<dyn ReminderSink>) -> Self {
        Self { processor, sink }
    }

    pub fn processor(&self) -> &Arc<CommandProcessor> {
        &self.processor
    }
}

impl ActionHandler for Engines {
    fn handle(&self, action: &Action) -> Result<ActionStatus> {
        let processor = self.processor.as_ref();
        match action {
            Action::RecurringExecute => {
                let summary = recurring::execute_due(processor)?;
                if summary.total_due == 0 {
                    return Ok(ActionStatus::NotRun("no recurring schedules due".to_string()));
                }
                Ok(ActionStatus::Ran(format!(
                    "processed {} of {} due, {} skipped, {} failed",
                    summary.processed,
                    summary.total_due,
                    summary.skipped_due_to_limit,
                    summary.failed
                )))
            }
            Action::ReminderSweep => {
                let report = reminders::sweep(processor, self.sink.as_ref())?;
                Ok(ActionStatus::Ran(format!(
                    "{} sent, {} suppressed, {} snoozed, {} pending",
                    report.sent, report.suppressed_quiet, report.snoozed, report.pending
                )))
            }
            Action::HardModeGeneratePlan {
                session_id,
                day_start,
            } => hard_mode::generate_plan(processor, session_id, *day_start),
            Action::HardModeDayClose {
                session_id,
                day_start,
            } => hard_mode::close_day(processor, session_id, *day_start),
            Action::HardModeNightlyClose => hard_mode::nightly_close(processor),
        }
    }
}
