//! Wiring for a complete lifeledger instance.
//!
//! A [`Runtime`] owns the database, command processor and scheduler that
//! share one clock and calendar. The CLI builds one per invocation; tests
//! build one over an in-memory database and a [`ManualClock`](crate::clock::ManualClock).

use std::path::Path;
use std::sync::Arc;

use crate::clock::{Calendar, Clock, SystemClock};
use crate::commands::CommandProcessor;
use crate::config::Config;
use crate::db::Database;
use crate::engine::{Engines, LogSink, ReminderSink};
use crate::error::Result;
use crate::scheduler::{Action, Scheduler};

/// Trigger names registered by [`Runtime::register_default_triggers`].
pub const RECURRING_TRIGGER: &str = "recurring";
pub const REMINDER_TRIGGER: &str = "reminders";
pub const NIGHTLY_CLOSE_TRIGGER: &str = "hard_mode.nightly_close";

pub struct Runtime {
    config: Arc<Config>,
    db: Arc<Database>,
    processor: Arc<CommandProcessor>,
    scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Opens (and migrates) the database at `path` with the system clock.
    pub fn open(config: Config, path: &Path) -> Result<Self> {
        let db = Database::open(path)?;
        db.migrate()?;
        Self::new(config, db, Arc::new(SystemClock), Arc::new(LogSink))
    }

    /// Builds a runtime over an already migrated database.
    pub fn new(
        config: Config,
        db: Database,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReminderSink>,
    ) -> Result<Self> {
        config.validate()?;
        let calendar = Calendar::new(config.time.utc_offset_minutes)?;
        let config = Arc::new(config);
        let db = Arc::new(db);

        let processor = Arc::new(CommandProcessor::new(
            Arc::clone(&db),
            Arc::clone(&clock),
            calendar,
            Arc::clone(&config),
        ));
        let engines = Arc::new(Engines::new(Arc::clone(&processor), sink));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&db),
            clock,
            calendar,
            engines,
            &config.scheduler,
        ));

        Ok(Self {
            config,
            db,
            processor,
            scheduler,
        })
    }

    /// Registers the recurring and reminder intervals and the nightly close.
    pub fn register_default_triggers(&self) -> Result<()> {
        let settings = &self.config.scheduler;
        self.scheduler.interval(
            RECURRING_TRIGGER,
            settings.recurring_interval(),
            Action::RecurringExecute,
        )?;
        self.scheduler.interval(
            REMINDER_TRIGGER,
            settings.reminder_interval(),
            Action::ReminderSweep,
        )?;
        self.scheduler.cron(
            NIGHTLY_CLOSE_TRIGGER,
            &settings.nightly_close_cron,
            Action::HardModeNightlyClose,
        )?;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn processor(&self) -> &CommandProcessor {
        &self.processor
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::ActionStatus;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_default_triggers_register_and_fire() {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let runtime =
            Runtime::new(Config::default(), db, clock.clone(), Arc::new(LogSink)).unwrap();

        runtime.register_default_triggers().unwrap();

        // Both intervals fire on the first pass; the nightly close waits for 23:55
        assert_eq!(runtime.scheduler().tick().unwrap().triggers_fired, 2);

        clock.set(start + Duration::hours(15) + Duration::minutes(55));
        let report = runtime.scheduler().tick().unwrap();
        let nightly = report
            .outcomes
            .iter()
            .find(|(name, _)| name == "hard_mode_nightly_close")
            .map(|(_, status)| status.clone());
        assert_eq!(
            nightly,
            Some(ActionStatus::NotRun("no active hard-mode session".to_string()))
        );
    }
}
