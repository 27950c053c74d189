//! Integration tests for scheduled orchestration
//!
//! Recurring execution, the reminder sweep and hard-mode sessions, driven by
//! a manual clock through the engines and the scheduler.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use lifeledger_core::commands::hard_mode::{
    day_close_key, finalize_key, plan_job_key, CrisisOverride, DayCloseOutcome,
};
use lifeledger_core::commands::recurring::NewRecurring;
use lifeledger_core::commands::reminders::ReminderRecord;
use lifeledger_core::commands::tasks::NewTask;
use lifeledger_core::engine::{self, LogSink, ReminderSink};
use lifeledger_core::scheduler::JobStatus;
use lifeledger_core::{
    Action, ActionStatus, Cadence, Config, Database, Error, EventFilter, EventType, Flow,
    ManualClock, PlanItemStatus, ReminderOutcome, Runtime, TransactionSource,
};

/// Collects delivered reminders.
#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<ReminderRecord>>,
}

impl ReminderSink for RecordingSink {
    fn deliver(&self, reminder: &ReminderRecord) -> lifeledger_core::Result<()> {
        self.delivered.lock().unwrap().push(reminder.clone());
        Ok(())
    }
}

/// Monday 2026-06-01, 08:00 UTC
fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
}

fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

fn runtime_with(config: Config, sink: Arc<dyn ReminderSink>) -> (Runtime, Arc<ManualClock>) {
    lifeledger_core::logging::init_test();
    let db = Database::open_in_memory().expect("open in-memory db");
    db.migrate().expect("migrate");
    let clock = Arc::new(ManualClock::new(morning()));
    let runtime = Runtime::new(config, db, clock.clone(), sink).expect("build runtime");
    (runtime, clock)
}

fn runtime() -> (Runtime, Arc<ManualClock>) {
    runtime_with(Config::default(), Arc::new(LogSink))
}

fn count_events(rt: &Runtime, event_type: EventType) -> usize {
    rt.database()
        .list_events(&EventFilter {
            types: vec![event_type],
            ..Default::default()
        })
        .unwrap()
        .len()
}

fn pending_plan_jobs(rt: &Runtime) -> Vec<DateTime<Utc>> {
    rt.database()
        .list_jobs(Some(JobStatus::Pending), 100)
        .unwrap()
        .into_iter()
        .filter_map(|job| match job.action {
            Action::HardModeGeneratePlan { day_start, .. } => Some(day_start),
            _ => None,
        })
        .collect()
}

// ============================================
// Recurring execution
// ============================================

fn weekly(amount_minor: i64, first_due_at: DateTime<Utc>) -> NewRecurring {
    NewRecurring {
        amount_minor,
        flow: Flow::Outflow,
        cadence: Cadence::Weekly,
        first_due_at,
        description: None,
        merchant: None,
        category: Some("subscriptions".to_string()),
        envelope_id: None,
    }
}

#[test]
fn test_recurring_cap_spreads_work_over_runs() {
    let mut config = Config::default();
    config.recurring.max_per_run = 5;
    let (rt, _clock) = runtime_with(config, Arc::new(LogSink));
    let p = rt.processor();

    for n in 0..10 {
        let due = morning() - Duration::hours(10 - n);
        p.schedule_recurring(&format!("s{n}"), weekly(100 + n, due)).unwrap();
    }

    let first = engine::recurring::execute_due(p).unwrap();
    assert_eq!(first.total_due, 10);
    assert_eq!(first.processed, 5);
    assert_eq!(first.skipped_due_to_limit, 5);
    assert_eq!(first.failed, 0);
    // Oldest due first: amounts 100..=104
    assert_eq!(first.total_amount_minor, 510);

    let second = engine::recurring::execute_due(p).unwrap();
    assert_eq!(second.total_due, 5);
    assert_eq!(second.processed, 5);
    assert_eq!(second.skipped_due_to_limit, 0);

    let txns = rt
        .database()
        .list_transactions(&Default::default())
        .unwrap();
    assert_eq!(txns.len(), 10);
    assert!(txns.iter().all(|t| t.source == TransactionSource::Recurring));
    assert_eq!(count_events(&rt, EventType::RecurringRunCompleted), 2);

    // Every schedule moved one week on
    for schedule in rt.database().recurring_schedules().unwrap() {
        assert!(schedule.next_due_at > morning());
    }
}

#[test]
fn test_recurring_transaction_uses_due_time_and_advances_monthly() {
    let (rt, clock) = runtime();
    let p = rt.processor();
    clock.set(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap());
    let due = Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap();
    let schedule = p
        .schedule_recurring(
            "rent",
            NewRecurring {
                cadence: Cadence::Monthly,
                ..weekly(90_000, due)
            },
        )
        .unwrap()
        .value;

    clock.set(Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap());
    let summary = engine::recurring::execute_due(p).unwrap();
    assert_eq!(summary.processed, 1);

    let txn_key = format!("recurring:{}:2026-01-31T09:00:00.000000Z:transaction", schedule.id);
    let event = rt.database().event_by_key(&txn_key).unwrap().unwrap();
    assert_eq!(event.event_type, EventType::TransactionLogged);

    let txns = rt.database().list_transactions(&Default::default()).unwrap();
    assert_eq!(txns[0].occurred_at, due);
    assert_eq!(txns[0].recurring_id.as_deref(), Some(schedule.id.as_str()));

    let advanced = rt.database().get_recurring_schedule(&schedule.id).unwrap().unwrap();
    assert_eq!(
        advanced.next_due_at,
        Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap()
    );

    // Nothing due until the next period
    let idle = engine::recurring::execute_due(p).unwrap();
    assert_eq!(idle.total_due, 0);
    assert_eq!(count_events(&rt, EventType::RecurringRunCompleted), 1);
}

#[test]
fn test_canceled_schedule_never_executes() {
    let (rt, _clock) = runtime();
    let p = rt.processor();
    let schedule = p
        .schedule_recurring("s", weekly(700, morning() - Duration::days(1)))
        .unwrap()
        .value;
    p.cancel_recurring("c", &schedule.id).unwrap();

    let summary = engine::recurring::execute_due(p).unwrap();
    assert_eq!(summary.total_due, 0);
    assert!(rt.database().list_transactions(&Default::default()).unwrap().is_empty());
}

// ============================================
// Reminders
// ============================================

fn due_task(rt: &Runtime, key: &str, due_at: DateTime<Utc>) -> String {
    rt.processor()
        .create_task(
            key,
            NewTask {
                title: format!("task {key}"),
                due_at: Some(due_at),
                reminders_enabled: true,
                reminder_offset_minutes: None,
            },
        )
        .unwrap()
        .value
        .id
}

/// Sweeps every ten minutes from midnight to the end of day 0.
fn sweep_all_day(rt: &Runtime, clock: &ManualClock, sink: &dyn ReminderSink) {
    for n in 0..(24 * 6) {
        clock.set(day(0) + Duration::minutes(10 * n));
        engine::reminders::sweep(rt.processor(), sink).unwrap();
    }
}

#[test]
fn test_quiet_day_suppresses_exactly_once() {
    let sink = Arc::new(RecordingSink::default());
    let (rt, clock) = runtime_with(Config::default(), sink.clone());
    let task_id = due_task(&rt, "t", day(0) + Duration::hours(15));
    rt.processor()
        .set_quiet_day("quiet", NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(), true, None)
        .unwrap();

    sweep_all_day(&rt, &clock, sink.as_ref());

    let suppressed = rt
        .database()
        .list_events(&EventFilter {
            types: vec![EventType::ReminderSuppressedQuiet],
            entity_id: Some(task_id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(
        suppressed[0].idempotency_key,
        format!("reminder:{task_id}:2026-06-01T14:30:00.000000Z")
    );
    assert_eq!(count_events(&rt, EventType::ReminderSent), 0);
    assert!(sink.delivered.lock().unwrap().is_empty());

    let task = rt.database().get_task(&task_id).unwrap().unwrap();
    assert_eq!(
        task.last_reminder_at,
        Some(day(0) + Duration::hours(14) + Duration::minutes(30))
    );
}

#[test]
fn test_reminder_sent_once_to_sink() {
    let sink = Arc::new(RecordingSink::default());
    let (rt, clock) = runtime_with(Config::default(), sink.clone());
    let task_id = due_task(&rt, "t", day(0) + Duration::hours(15));
    // Due tomorrow: outside today's window
    due_task(&rt, "later", day(1) + Duration::hours(9));

    sweep_all_day(&rt, &clock, sink.as_ref());

    let delivered = sink.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].task_id, task_id);
    assert_eq!(delivered[0].outcome, ReminderOutcome::Sent);
    assert_eq!(count_events(&rt, EventType::ReminderSent), 1);
}

#[test]
fn test_snooze_moves_reminder() {
    let sink = Arc::new(RecordingSink::default());
    let (rt, clock) = runtime_with(Config::default(), sink.clone());
    let task_id = due_task(&rt, "t", day(0) + Duration::hours(12));

    let until = day(0) + Duration::hours(13);
    rt.processor().snooze_reminder("snooze", &task_id, until).unwrap();

    clock.set(day(0) + Duration::hours(11) + Duration::minutes(40));
    let report = engine::reminders::sweep(rt.processor(), sink.as_ref()).unwrap();
    assert_eq!(report.snoozed, 1);
    let again = engine::reminders::sweep(rt.processor(), sink.as_ref()).unwrap();
    assert_eq!(again.already_recorded, 1);
    assert_eq!(count_events(&rt, EventType::ReminderSnoozed), 1);

    clock.set(until + Duration::minutes(5));
    let report = engine::reminders::sweep(rt.processor(), sink.as_ref()).unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(sink.delivered.lock().unwrap()[0].scheduled_for, until);
}

#[test]
fn test_closed_tasks_get_no_reminders() {
    let sink = Arc::new(RecordingSink::default());
    let (rt, clock) = runtime_with(Config::default(), sink.clone());
    let task_id = due_task(&rt, "t", day(0) + Duration::hours(10));
    rt.processor().complete_task("done", &task_id).unwrap();

    clock.set(day(0) + Duration::hours(10));
    let report = engine::reminders::sweep(rt.processor(), sink.as_ref()).unwrap();
    assert_eq!(report.candidates, 0);
}

// ============================================
// Hard mode
// ============================================

#[test]
fn test_activate_schedules_one_plan_job_per_day() {
    let (rt, _clock) = runtime();
    let session = rt
        .processor()
        .activate_hard_mode("hm", Some(3))
        .unwrap()
        .value;

    assert!(session.is_active);
    assert_eq!(session.window_start, day(0));
    assert_eq!(session.window_end, day(2));
    assert_eq!(pending_plan_jobs(&rt), vec![day(0), day(1), day(2)]);

    // Today's job runs now, later days at their midnight
    let today = rt
        .database()
        .job_by_key(&plan_job_key(&session.id, day(0)))
        .unwrap()
        .unwrap();
    assert_eq!(today.run_at, morning());
    let tomorrow = rt
        .database()
        .job_by_key(&plan_job_key(&session.id, day(1)))
        .unwrap()
        .unwrap();
    assert_eq!(tomorrow.run_at, day(1));

    let active = rt.database().active_hard_mode_session().unwrap().unwrap();
    assert_eq!(active.id, session.id);
}

#[test]
fn test_window_days_are_bounded() {
    let (rt, _clock) = runtime();
    for days in [0, 15] {
        let err = rt
            .processor()
            .activate_hard_mode(&format!("hm-{days}"), Some(days))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
    assert!(rt.database().active_hard_mode_session().unwrap().is_none());
}

#[test]
fn test_extend_adds_exactly_the_new_days() {
    let (rt, _clock) = runtime();
    let p = rt.processor();
    let session = p.activate_hard_mode("hm", Some(2)).unwrap().value;
    assert_eq!(session.window_end, day(1));

    let err = p.extend_hard_mode("x0", None, 3, false).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let extended = p.extend_hard_mode("x1", None, 3, true).unwrap().value;
    assert_eq!(extended.window_end, day(1) + Duration::days(3));

    let jobs = pending_plan_jobs(&rt);
    assert_eq!(jobs.len(), 5);
    assert_eq!(&jobs[2..], &[day(2), day(3), day(4)]);

    // Replaying the extend does not add more days
    let replay = p.extend_hard_mode("x1", None, 3, true).unwrap();
    assert!(replay.deduplicated);
    assert_eq!(pending_plan_jobs(&rt).len(), 5);
    assert_eq!(
        rt.database().get_hard_mode_session(&session.id).unwrap().unwrap().window_end,
        day(4)
    );
}

#[test]
fn test_activate_replaces_previous_session() {
    let (rt, _clock) = runtime();
    let p = rt.processor();
    let first = p.activate_hard_mode("hm-1", Some(2)).unwrap().value;
    let second = p.activate_hard_mode("hm-2", Some(2)).unwrap().value;

    let previous = rt.database().get_hard_mode_session(&first.id).unwrap().unwrap();
    assert!(!previous.is_active);
    assert_eq!(previous.deactivated_at, Some(morning()));

    let event = rt
        .database()
        .event_by_key("hm-2:deactivate_previous")
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, EventType::HardModeDeactivated);
    assert_eq!(event.entity_id.as_deref(), Some(first.id.as_str()));

    let active = rt.database().active_hard_mode_session().unwrap().unwrap();
    assert_eq!(active.id, second.id);
    assert!(rt
        .database()
        .job_by_key(&finalize_key(&first.id))
        .unwrap()
        .is_some());
}

#[test]
fn test_session_runs_through_scheduler() {
    let (rt, clock) = runtime();
    let p = rt.processor();
    for n in 0..4 {
        p.create_task(
            &format!("task-{n}"),
            NewTask {
                title: format!("Task {n}"),
                ..Default::default()
            },
        )
        .unwrap();
    }
    rt.register_default_triggers().unwrap();
    let session = p.activate_hard_mode("hm", Some(2)).unwrap().value;

    // Day 0: today's plan is generated on the next tick
    let report = rt.scheduler().tick().unwrap();
    assert_eq!(report.jobs_done, 1);
    let planned = rt.database().get_hard_mode_session(&session.id).unwrap().unwrap();
    let plan = planned.plan.unwrap();
    assert_eq!(plan.day_start, day(0));
    assert_eq!(plan.items.len(), 3);
    assert_eq!(plan.items[0].scheduled_at, day(0) + Duration::hours(9));
    assert_eq!(
        plan.items[1].scheduled_at,
        day(0) + Duration::hours(10) + Duration::minutes(30)
    );

    // A second delivery of the same plan action is a no-op
    let action = Action::HardModeGeneratePlan {
        session_id: session.id.clone(),
        day_start: day(0),
    };
    rt.scheduler().run_at(morning(), &action, None).unwrap();
    let report = rt.scheduler().tick().unwrap();
    assert!(report
        .outcomes
        .iter()
        .any(|(name, status)| name == "hard_mode_generate_plan"
            && matches!(status, ActionStatus::NotRun(_))));

    // Nightly close of day 0 rolls over
    clock.set(day(0) + Duration::hours(23) + Duration::minutes(55));
    rt.scheduler().tick().unwrap();
    let closed = rt
        .database()
        .event_by_key(&day_close_key(&session.id, day(0)))
        .unwrap()
        .unwrap();
    assert_eq!(closed.event_type, EventType::HardModeDayClosed);

    // Day 1 plan at midnight, then the last nightly close finalizes
    clock.set(day(1));
    rt.scheduler().tick().unwrap();
    let planned = rt.database().get_hard_mode_session(&session.id).unwrap().unwrap();
    assert_eq!(planned.plan.unwrap().day_start, day(1));

    clock.set(day(1) + Duration::hours(23) + Duration::minutes(55));
    rt.scheduler().tick().unwrap();
    let finished = rt.database().get_hard_mode_session(&session.id).unwrap().unwrap();
    assert!(!finished.is_active);
    assert!(finished.is_closed());
    assert!(rt.database().active_hard_mode_session().unwrap().is_none());

    let closed = rt
        .database()
        .event_by_key(&day_close_key(&session.id, day(1)))
        .unwrap()
        .unwrap();
    assert_eq!(closed.event_type, EventType::HardModeClosed);
    let summary: lifeledger_core::commands::hard_mode::DaySummary = closed.decode().unwrap();
    assert_eq!(summary.outcome, DayCloseOutcome::Finalized);
}

#[test]
fn test_deactivate_closes_today() {
    let (rt, clock) = runtime();
    let p = rt.processor();
    let session = p.activate_hard_mode("hm", Some(5)).unwrap().value;

    clock.advance(Duration::hours(2));
    let deactivated = p.deactivate_hard_mode("off", None).unwrap().value;
    assert!(!deactivated.is_active);
    assert!(rt.database().active_hard_mode_session().unwrap().is_none());

    // Plan job for today runs first and is skipped; the close finalizes
    let report = rt.scheduler().tick().unwrap();
    assert_eq!(report.jobs_done, 2);
    let finished = rt.database().get_hard_mode_session(&session.id).unwrap().unwrap();
    assert!(finished.is_closed());
    assert_eq!(count_events(&rt, EventType::HardModeClosed), 1);
    assert_eq!(count_events(&rt, EventType::HardModePlanGenerated), 0);

    let err = p.deactivate_hard_mode("off-again", Some(&session.id)).unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    // Later plan jobs find the session inactive
    clock.set(day(1));
    let report = rt.scheduler().tick().unwrap();
    assert!(report
        .outcomes
        .iter()
        .all(|(_, status)| matches!(status, ActionStatus::NotRun(_))));
}

#[test]
fn test_crisis_override_drops_plan_items() {
    let (rt, clock) = runtime();
    let p = rt.processor();
    p.create_task(
        "task",
        NewTask {
            title: "Write report".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    let session = p.activate_hard_mode("hm", Some(3)).unwrap().value;
    rt.scheduler().tick().unwrap();

    clock.advance(Duration::hours(1));
    let overridden = p
        .crisis_override("crisis", None, Some("sick kid"))
        .unwrap()
        .value;
    assert!(overridden.is_active);
    assert_eq!(overridden.window_end, session.window_end);
    assert_eq!(overridden.crisis_overridden_at, Some(morning() + Duration::hours(1)));

    let plan = overridden.plan.unwrap();
    assert_eq!(plan.items.len(), 1);
    assert!(plan
        .items
        .iter()
        .all(|i| i.status == PlanItemStatus::Dropped
            && i.flagged_at == Some(morning() + Duration::hours(1))));
}

#[test]
fn test_deactivate_after_nightly_rollover_still_finalizes() {
    let (rt, clock) = runtime();
    let p = rt.processor();
    let session = p.activate_hard_mode("hm", Some(3)).unwrap().value;
    rt.scheduler().tick().unwrap();

    clock.set(day(0) + Duration::hours(23) + Duration::minutes(55));
    let status = engine::hard_mode::nightly_close(p).unwrap();
    assert!(matches!(status, ActionStatus::Ran(_)));
    let rolled = rt
        .database()
        .event_by_key(&day_close_key(&session.id, day(0)))
        .unwrap()
        .unwrap();
    assert_eq!(rolled.event_type, EventType::HardModeDayClosed);

    // Same evening: the queued close must not collide with the rollover
    clock.set(day(0) + Duration::hours(23) + Duration::minutes(58));
    p.deactivate_hard_mode("off", None).unwrap();
    let report = rt.scheduler().tick().unwrap();
    assert!(report
        .outcomes
        .iter()
        .any(|(name, status)| name == "hard_mode_day_close"
            && matches!(status, ActionStatus::Ran(_))));

    let finished = rt.database().get_hard_mode_session(&session.id).unwrap().unwrap();
    assert!(!finished.is_active);
    assert!(finished.is_closed());
    assert_eq!(count_events(&rt, EventType::HardModeClosed), 1);

    let closed = rt
        .database()
        .event_by_key(&finalize_key(&session.id))
        .unwrap()
        .unwrap();
    assert_eq!(closed.event_type, EventType::HardModeClosed);
    let summary: lifeledger_core::commands::hard_mode::DaySummary = closed.decode().unwrap();
    assert_eq!(summary.outcome, DayCloseOutcome::Finalized);

    // Nothing is left for later nightly passes
    clock.set(day(1) + Duration::hours(23) + Duration::minutes(55));
    assert!(matches!(
        engine::hard_mode::nightly_close(p).unwrap(),
        ActionStatus::NotRun(_)
    ));
    assert_eq!(count_events(&rt, EventType::HardModeClosed), 1);
}

#[test]
fn test_crisis_before_todays_plan_drops_it_on_generation() {
    let (rt, clock) = runtime();
    let p = rt.processor();
    p.create_task(
        "task",
        NewTask {
            title: "Write report".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    p.activate_hard_mode("hm", Some(3)).unwrap();
    rt.scheduler().tick().unwrap();

    // After midnight, before the day 1 plan job has run
    let flagged_at = day(1) + Duration::minutes(30);
    clock.set(flagged_at);
    let overridden = p.crisis_override("crisis", None, None).unwrap().value;

    let stale = overridden.plan.unwrap();
    assert_eq!(stale.day_start, day(0));
    assert!(stale.items.iter().all(|i| i.status == PlanItemStatus::Active));

    let record: CrisisOverride = rt
        .database()
        .event_by_key("crisis")
        .unwrap()
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(record.day_start, day(1));
    assert_eq!(record.dropped_items, 0);

    rt.scheduler().tick().unwrap();
    let session = rt.database().active_hard_mode_session().unwrap().unwrap();
    let plan = session.plan.unwrap();
    assert_eq!(plan.day_start, day(1));
    assert_eq!(plan.items.len(), 1);
    assert!(plan
        .items
        .iter()
        .all(|i| i.status == PlanItemStatus::Dropped && i.flagged_at == Some(flagged_at)));

    // The override does not carry into the next day
    clock.set(day(2));
    rt.scheduler().tick().unwrap();
    let session = rt.database().active_hard_mode_session().unwrap().unwrap();
    let plan = session.plan.unwrap();
    assert_eq!(plan.day_start, day(2));
    assert!(plan.items.iter().all(|i| i.status == PlanItemStatus::Active));
}
