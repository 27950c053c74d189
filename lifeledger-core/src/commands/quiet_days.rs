//! Quiet days: local calendar days on which reminders are suppressed.

use chrono::NaiveDate;

use super::{optional_text, CommandOutcome, CommandProcessor, Recorded};
use crate::db::{fmt_day, repo};
use crate::error::Result;
use crate::ledger::{EventType, NewEvent};
use crate::types::QuietDay;

impl CommandProcessor {
    /// Flags (or unflags) a local day as quiet. Upserts the day's row.
    pub fn set_quiet_day(
        &self,
        key: &str,
        day: NaiveDate,
        is_quiet: bool,
        reason: Option<&str>,
    ) -> Result<CommandOutcome<QuietDay>> {
        self.execute(key, "set_quiet_day", |scope| {
            let quiet = QuietDay {
                day,
                is_quiet,
                reason: optional_text(reason),
                updated_at: scope.now,
            };
            repo::upsert_quiet_day(scope.conn, &quiet)?;

            let event = NewEvent::new(EventType::QuietDaySet, fmt_day(day), &quiet)?;
            Ok(Recorded::new(quiet, event))
        })
    }
}
