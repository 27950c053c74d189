//! Time-driven orchestration.
//!
//! Two kinds of schedule feed the same [`ActionHandler`]:
//!
//! - **At-time jobs** (`run_at`, `run_after`): durable rows in
//!   `scheduled_jobs`, usually inserted by a command in its own transaction.
//! - **Cadence triggers** (`interval`, `cron`): kept in memory and
//!   re-registered at startup.
//!
//! [`Scheduler::tick`] claims due jobs, fires due triggers and dispatches
//! each action. Delivery is at-least-once, so every action re-derives what is
//! due from current state and relies on idempotency keys for its writes.

pub mod jobs;

use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use croner::Cron;
use rusqlite::TransactionBehavior;
use serde::{Deserialize, Serialize};

use crate::clock::{Calendar, Clock};
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::error::{Error, Result};

pub use jobs::{Job, JobStatus};

/// Work the scheduler can dispatch. Each variant has one fixed argument shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Execute due recurring schedules
    RecurringExecute,
    /// Send or suppress today's task reminders
    ReminderSweep,
    /// Build the plan for one day of a hard-mode session
    HardModeGeneratePlan {
        session_id: String,
        day_start: DateTime<Utc>,
    },
    /// Close one day of a hard-mode session
    HardModeDayClose {
        session_id: String,
        day_start: DateTime<Utc>,
    },
    /// Close the current day of whichever session is active
    HardModeNightlyClose,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::RecurringExecute => "recurring_execute",
            Action::ReminderSweep => "reminder_sweep",
            Action::HardModeGeneratePlan { .. } => "hard_mode_generate_plan",
            Action::HardModeDayClose { .. } => "hard_mode_day_close",
            Action::HardModeNightlyClose => "hard_mode_nightly_close",
        }
    }
}

/// What an action did. A no-op is `NotRun`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ActionStatus {
    Ran(String),
    NotRun(String),
}

/// Executes scheduled actions.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, action: &Action) -> Result<ActionStatus>;
}

/// Parses a five-field cron expression.
///
/// `Cron::new` only stores the pattern; `parse` validates it and must run
/// before any occurrence search.
pub fn parse_cron(expr: &str) -> Result<Cron> {
    Cron::new(expr)
        .parse()
        .map_err(|e| Error::Schedule(format!("invalid cron expression {expr:?}: {e}")))
}

enum Cadence {
    Interval(chrono::Duration),
    Cron(Box<Cron>),
}

impl Cadence {
    /// First fire time strictly after `after`. Cron fields are read in local time.
    fn next_after(&self, after: DateTime<Utc>, calendar: &Calendar) -> Result<DateTime<Utc>> {
        match self {
            Cadence::Interval(period) => Ok(after + *period),
            Cadence::Cron(cron) => {
                let local = after.with_timezone(&calendar.offset());
                cron.find_next_occurrence(&local, false)
                    .map(|next| next.with_timezone(&Utc))
                    .map_err(|e| Error::Schedule(format!("no next cron occurrence: {e}")))
            }
        }
    }
}

struct Trigger {
    name: String,
    cadence: Cadence,
    action: Action,
    next_fire: DateTime<Utc>,
}

/// Counts from one [`Scheduler::tick`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub jobs_claimed: usize,
    pub jobs_done: usize,
    pub jobs_failed: usize,
    pub triggers_fired: usize,
    /// `(action name, status)` for every dispatch that returned a status
    pub outcomes: Vec<(String, ActionStatus)>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.jobs_claimed == 0 && self.triggers_fired == 0
    }
}

/// Dispatches at-time jobs and cadence triggers.
pub struct Scheduler {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    handler: Arc<dyn ActionHandler>,
    triggers: Mutex<Vec<Trigger>>,
    batch_size: usize,
    poll_interval: std::time::Duration,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        calendar: Calendar,
        handler: Arc<dyn ActionHandler>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            db,
            clock,
            calendar,
            handler,
            triggers: Mutex::new(Vec::new()),
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval(),
        }
    }

    // ============================================
    // Registration
    // ============================================

    /// Fires `action` now and then every `period`.
    pub fn interval(&self, name: &str, period: std::time::Duration, action: Action) -> Result<()> {
        let period = chrono::Duration::from_std(period)
            .map_err(|e| Error::Schedule(format!("interval {name}: {e}")))?;
        if period <= chrono::Duration::zero() {
            return Err(Error::Schedule(format!("interval {name} must be positive")));
        }
        let next_fire = self.clock.now();
        self.add_trigger(name, Cadence::Interval(period), action, next_fire);
        Ok(())
    }

    /// Fires `action` at each occurrence of a cron expression (local time).
    pub fn cron(&self, name: &str, expression: &str, action: Action) -> Result<()> {
        let cadence = Cadence::Cron(Box::new(parse_cron(expression)?));
        let next_fire = cadence.next_after(self.clock.now(), &self.calendar)?;
        self.add_trigger(name, cadence, action, next_fire);
        Ok(())
    }

    fn add_trigger(&self, name: &str, cadence: Cadence, action: Action, next_fire: DateTime<Utc>) {
        tracing::info!(
            trigger = name,
            action = action.name(),
            next_fire = %next_fire,
            "Trigger registered"
        );
        self.triggers.lock().unwrap().push(Trigger {
            name: name.to_string(),
            cadence,
            action,
            next_fire,
        });
    }

    /// Schedules `action` for `at`. Returns `None` when `job_key` is taken.
    pub fn run_at(
        &self,
        at: DateTime<Utc>,
        action: &Action,
        job_key: Option<&str>,
    ) -> Result<Option<i64>> {
        let conn = self.db.connection();
        jobs::enqueue(&conn, job_key, action, at, self.clock.now())
    }

    /// Schedules `action` to run `delay` from now.
    pub fn run_after(
        &self,
        delay: std::time::Duration,
        action: &Action,
        job_key: Option<&str>,
    ) -> Result<Option<i64>> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| Error::Schedule(format!("delay out of range: {e}")))?;
        self.run_at(self.clock.now() + delay, action, job_key)
    }

    /// Resets jobs interrupted mid-dispatch so they are delivered again.
    pub fn recover(&self) -> Result<usize> {
        let reset = jobs::requeue_running(&self.db.connection())?;
        if reset > 0 {
            tracing::warn!(reset, "Requeued jobs interrupted by a previous shutdown");
        }
        Ok(reset)
    }

    // ============================================
    // Dispatch
    // ============================================

    /// Runs one pass at the clock's current time.
    pub fn tick(&self) -> Result<TickReport> {
        self.tick_at(self.clock.now())
    }

    /// Runs one pass as of `now`: due jobs first, then due triggers.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        let claimed = {
            let mut conn = self.db.connection();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let claimed = jobs::claim_due(&tx, now, self.batch_size)?;
            tx.commit()?;
            claimed
        };
        report.jobs_claimed = claimed.len();

        for job in claimed {
            let _span =
                tracing::info_span!("job", id = job.id, action = job.action.name()).entered();
            match self.handler.handle(&job.action) {
                Ok(status) => {
                    tracing::info!(status = ?status, attempts = job.attempts, "Job finished");
                    jobs::mark_done(&self.db.connection(), job.id, self.clock.now())?;
                    report.jobs_done += 1;
                    report.outcomes.push((job.action.name().to_string(), status));
                }
                Err(e) => {
                    tracing::error!(error = %e, attempts = job.attempts, "Job failed");
                    let error = e.to_string();
                    jobs::mark_failed(&self.db.connection(), job.id, self.clock.now(), &error)?;
                    report.jobs_failed += 1;
                }
            }
        }

        for (name, action) in self.due_triggers(now)? {
            let _span =
                tracing::info_span!("trigger", name = %name, action = action.name()).entered();
            report.triggers_fired += 1;
            match self.handler.handle(&action) {
                Ok(status) => {
                    tracing::debug!(status = ?status, "Trigger finished");
                    report.outcomes.push((action.name().to_string(), status));
                }
                // The next occurrence re-derives the same work
                Err(e) => tracing::error!(error = %e, "Trigger failed"),
            }
        }

        Ok(report)
    }

    /// Advances every due trigger past `now` and returns what to run.
    fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<(String, Action)>> {
        let mut triggers = self.triggers.lock().unwrap();
        let mut due = Vec::new();
        for trigger in triggers.iter_mut() {
            if trigger.next_fire > now {
                continue;
            }
            // Fire once even if several periods were missed
            trigger.next_fire = trigger.cadence.next_after(now, &self.calendar)?;
            due.push((trigger.name.clone(), trigger.action.clone()));
        }
        Ok(due)
    }

    /// Runs ticks on a tokio interval until `shutdown` resolves.
    ///
    /// Each tick runs on the blocking pool; a failed tick is logged and the
    /// loop continues.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let scheduler = Arc::clone(&self);
        tokio::task::spawn_blocking(move || scheduler.recover())
            .await
            .map_err(|e| Error::Schedule(format!("join error: {e}")))??;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(poll_ms = self.poll_interval.as_millis() as u64, "Scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || scheduler.tick()).await {
                        Ok(Ok(report)) if !report.is_idle() => {
                            tracing::info!(
                                jobs = report.jobs_claimed,
                                failed = report.jobs_failed,
                                triggers = report.triggers_fired,
                                "Tick complete"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => tracing::error!(error = %e, "Tick failed"),
                        Err(e) => tracing::error!(error = %e, "Tick panicked"),
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};

    /// Records every action it sees; fails on reminder sweeps when asked to.
    struct Recorder {
        seen: Mutex<Vec<Action>>,
        fail_reminders: bool,
    }

    impl ActionHandler for Recorder {
        fn handle(&self, action: &Action) -> Result<ActionStatus> {
            self.seen.lock().unwrap().push(action.clone());
            if self.fail_reminders && *action == Action::ReminderSweep {
                return Err(Error::Validation("boom".to_string()));
            }
            Ok(ActionStatus::Ran(action.name().to_string()))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap()
    }

    fn setup(fail_reminders: bool) -> (Scheduler, Arc<Recorder>, Arc<ManualClock>, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_reminders,
        });
        let scheduler = Scheduler::new(
            db.clone(),
            clock.clone(),
            Calendar::utc(),
            recorder.clone(),
            &SchedulerConfig::default(),
        );
        (scheduler, recorder, clock, db)
    }

    #[test]
    fn test_action_json_shape() {
        let action = Action::HardModeDayClose {
            session_id: "s1".to_string(),
            day_start: t0(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "hard_mode_day_close");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(serde_json::from_value::<Action>(json).unwrap(), action);

        let unit = serde_json::to_value(Action::ReminderSweep).unwrap();
        assert_eq!(unit, serde_json::json!({ "action": "reminder_sweep" }));
    }

    #[test]
    fn test_parse_cron() {
        let cron = parse_cron("55 23 * * *").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        let next = cron.find_next_occurrence(&start, false).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 1, 23, 55, 0).unwrap());

        assert!(matches!(parse_cron("every night"), Err(Error::Schedule(_))));
        assert!(matches!(parse_cron("61 23 * * *"), Err(Error::Schedule(_))));
    }

    #[test]
    fn test_run_after_waits_for_its_time() {
        let (scheduler, recorder, clock, _db) = setup(false);
        scheduler
            .run_after(std::time::Duration::from_secs(600), &Action::RecurringExecute, None)
            .unwrap();

        assert!(scheduler.tick().unwrap().is_idle());

        clock.advance(Duration::minutes(10));
        let report = scheduler.tick().unwrap();
        assert_eq!(report.jobs_done, 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![Action::RecurringExecute]);

        // Done jobs are not redelivered
        assert!(scheduler.tick().unwrap().is_idle());
    }

    #[test]
    fn test_failed_job_is_marked_not_retried() {
        let (scheduler, _recorder, _clock, db) = setup(true);
        scheduler
            .run_at(t0(), &Action::ReminderSweep, Some("sweep-once"))
            .unwrap();

        let report = scheduler.tick().unwrap();
        assert_eq!(report.jobs_failed, 1);

        let job = db.job_by_key("sweep-once").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.last_error.unwrap().contains("boom"));
        assert!(scheduler.tick().unwrap().is_idle());
    }

    #[test]
    fn test_interval_fires_immediately_then_each_period() {
        let (scheduler, recorder, clock, _db) = setup(false);
        scheduler
            .interval("sweep", std::time::Duration::from_secs(600), Action::ReminderSweep)
            .unwrap();

        assert_eq!(scheduler.tick().unwrap().triggers_fired, 1);
        assert_eq!(scheduler.tick().unwrap().triggers_fired, 0);

        clock.advance(Duration::minutes(9));
        assert_eq!(scheduler.tick().unwrap().triggers_fired, 0);
        clock.advance(Duration::minutes(1));
        assert_eq!(scheduler.tick().unwrap().triggers_fired, 1);

        // A long gap fires once, not once per missed period
        clock.advance(Duration::hours(3));
        assert_eq!(scheduler.tick().unwrap().triggers_fired, 1);
        assert_eq!(recorder.seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_cron_uses_local_offset() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_reminders: false,
        });
        // UTC+2: 23:55 local is 21:55 UTC
        let scheduler = Scheduler::new(
            db,
            clock.clone(),
            Calendar::new(120).unwrap(),
            recorder.clone(),
            &SchedulerConfig::default(),
        );
        scheduler
            .cron("nightly", "55 23 * * *", Action::HardModeNightlyClose)
            .unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 8, 3, 21, 54, 0).unwrap());
        assert_eq!(scheduler.tick().unwrap().triggers_fired, 0);
        clock.set(Utc.with_ymd_and_hms(2026, 8, 3, 21, 55, 0).unwrap());
        assert_eq!(scheduler.tick().unwrap().triggers_fired, 1);
        assert_eq!(*recorder.seen.lock().unwrap(), vec![Action::HardModeNightlyClose]);
    }

    #[test]
    fn test_recover_redelivers_running_jobs() {
        let (scheduler, recorder, _clock, db) = setup(false);
        scheduler.run_at(t0(), &Action::RecurringExecute, Some("r")).unwrap();
        {
            // Simulate a crash after claiming
            let conn = db.connection();
            jobs::claim_due(&conn, t0(), 10).unwrap();
        }
        assert!(scheduler.tick().unwrap().is_idle());

        assert_eq!(scheduler.recover().unwrap(), 1);
        assert_eq!(scheduler.tick().unwrap().jobs_done, 1);
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
    }
}
