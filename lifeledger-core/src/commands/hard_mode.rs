//! Hard-mode session commands.
//!
//! A session moves `none → active → (extended)* → closed`, with a crisis
//! override that can be applied at any point while it is active. At most one
//! session is active; the `active_hard_mode_session` singleton row holds its
//! id. Plan generation and day close are scheduled jobs that call back into
//! [`CommandProcessor::generate_plan`] and [`CommandProcessor::close_day`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{new_id, optional_text, CommandOutcome, CommandProcessor, Recorded, Scope};
use crate::clock::Calendar;
use crate::db::{fmt_ts, repo};
use crate::error::{Error, Result};
use crate::ledger::{self, EventFilter, EventType, NewEvent};
use crate::scheduler::{jobs, Action};
use crate::types::{DayPlan, HardModeSession, PlanItem, PlanItemStatus};

/// Longest window accepted by activate, and the most days one extend may add.
pub const MAX_WINDOW_DAYS: u32 = 14;

/// Job key of the plan generation for one session day.
pub fn plan_job_key(session_id: &str, day_start: DateTime<Utc>) -> String {
    format!("hard_mode.plan:{session_id}:{}", fmt_ts(day_start))
}

/// Command key of the nightly close for one session day.
pub fn day_close_key(session_id: &str, day_start: DateTime<Utc>) -> String {
    format!("hard_mode.day_close:{session_id}:{}", fmt_ts(day_start))
}

/// Job key, and command key, of the close that finalizes a deactivated session.
///
/// Distinct from [`day_close_key`] so a rollover already recorded for the
/// same day never masks the final close.
pub fn finalize_key(session_id: &str) -> String {
    format!("hard_mode.finalize:{session_id}")
}

/// Payload of `hard_mode.extended`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub session_id: String,
    pub extend_days: u32,
    pub previous_window_end: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Payload of `hard_mode.crisis_override`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrisisOverride {
    pub session_id: String,
    pub reason: Option<String>,
    /// Local day the override applies to
    pub day_start: DateTime<Utc>,
    /// Items dropped from an already generated plan for that day
    pub dropped_items: usize,
    pub flagged_at: DateTime<Utc>,
}

/// How a day close left the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayCloseOutcome {
    RolledOver,
    Finalized,
}

/// Summary of one closed session day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySummary {
    pub session_id: String,
    pub day_start: DateTime<Utc>,
    pub outcome: DayCloseOutcome,
    /// Ledger events recorded during the day
    pub events: usize,
    pub tasks_completed: usize,
    pub plan_items: usize,
    pub plan_items_dropped: usize,
    /// Day whose plan is scheduled next, when the session rolled over
    pub next_day: Option<DateTime<Utc>>,
}

/// Why a plan cannot be generated for `day_start`, if it cannot.
pub fn plan_blocker(session: &HardModeSession, day_start: DateTime<Utc>) -> Option<String> {
    if !session.is_active {
        return Some(format!("session {} is not active", session.id));
    }
    if !session.covers_day(day_start) {
        return Some(format!("{day_start} is outside session {}", session.id));
    }
    match &session.plan {
        Some(plan) if plan.day_start >= day_start => {
            Some(format!("plan for {day_start} already generated"))
        }
        _ => None,
    }
}

fn load_session(conn: &Connection, id: &str) -> Result<HardModeSession> {
    repo::get_session(conn, id)?.ok_or_else(|| Error::not_found("hard_mode_session", id))
}

/// Loads `session_id`, or the active session when none is given.
fn resolve_session(conn: &Connection, session_id: Option<&str>) -> Result<HardModeSession> {
    match session_id {
        Some(id) => load_session(conn, id),
        None => {
            let id = repo::active_session_id(conn)?
                .ok_or_else(|| Error::not_found("hard_mode_session", "active"))?;
            load_session(conn, &id)
        }
    }
}

fn require_active(session: &HardModeSession, to: &str) -> Result<()> {
    if session.is_active {
        return Ok(());
    }
    Err(Error::InvalidTransition {
        entity: "hard_mode_session",
        id: session.id.clone(),
        from: if session.is_closed() { "closed" } else { "inactive" }.to_string(),
        to: to.to_string(),
    })
}

fn check_days(field: &str, days: u32) -> Result<u32> {
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(Error::Validation(format!(
            "{field} must be between 1 and {MAX_WINDOW_DAYS}, got {days}"
        )));
    }
    Ok(days)
}

fn schedule_plan(scope: &Scope<'_>, session_id: &str, day_start: DateTime<Utc>) -> Result<()> {
    let action = Action::HardModeGeneratePlan {
        session_id: session_id.to_string(),
        day_start,
    };
    let key = plan_job_key(session_id, day_start);
    jobs::enqueue(scope.conn, Some(&key), &action, scope.now.max(day_start), scope.now)?;
    Ok(())
}

fn schedule_finalize(scope: &Scope<'_>, session_id: &str) -> Result<()> {
    let action = Action::HardModeDayClose {
        session_id: session_id.to_string(),
        day_start: scope.calendar.day_start(scope.now),
    };
    let key = finalize_key(session_id);
    jobs::enqueue(scope.conn, Some(&key), &action, scope.now, scope.now)?;
    Ok(())
}

/// Marks a session inactive and queues an immediate close that finalizes it.
fn deactivate_in(scope: &Scope<'_>, session: &mut HardModeSession) -> Result<()> {
    session.is_active = false;
    session.deactivated_at = Some(scope.now);
    repo::update_session(scope.conn, session)?;
    repo::clear_singleton_if(scope.conn, repo::ACTIVE_HARD_MODE_SESSION, &session.id)?;
    schedule_finalize(scope, &session.id)
}

/// Up to `plan_items` open tasks, one per slot from `plan_start_hour`.
///
/// Items start dropped, flagged at `crisis_at`, when a crisis override was
/// recorded for the day before its plan existed.
fn build_plan(
    scope: &Scope<'_>,
    day_start: DateTime<Utc>,
    crisis_at: Option<DateTime<Utc>>,
) -> Result<DayPlan> {
    let settings = &scope.config.hard_mode;
    let first_slot = day_start + Duration::hours(i64::from(settings.plan_start_hour));
    let slot = Duration::minutes(i64::from(settings.plan_slot_minutes));
    let status = match crisis_at {
        Some(_) => PlanItemStatus::Dropped,
        None => PlanItemStatus::Active,
    };

    let items = repo::plannable_tasks(scope.conn, settings.plan_items)?
        .into_iter()
        .zip(0i32..)
        .map(|(task, n)| PlanItem {
            task_id: Some(task.id),
            title: task.title,
            scheduled_at: first_slot + slot * n,
            status,
            flagged_at: crisis_at,
        })
        .collect();

    Ok(DayPlan {
        day_start,
        generated_at: scope.now,
        items,
    })
}

/// Whether the ledger holds a `hard_mode.deactivated` event for the session.
fn was_deactivated(conn: &Connection, session_id: &str) -> Result<bool> {
    let events = ledger::list(
        conn,
        &EventFilter {
            types: vec![EventType::HardModeDeactivated],
            entity_id: Some(session_id.to_string()),
            limit: Some(1),
            ..Default::default()
        },
    )?;
    Ok(!events.is_empty())
}

impl CommandProcessor {
    /// Starts a session covering `window_days` local days from today.
    ///
    /// A previously active session is deactivated in the same transaction.
    pub fn activate_hard_mode(
        &self,
        key: &str,
        window_days: Option<u32>,
    ) -> Result<CommandOutcome<HardModeSession>> {
        self.execute(key, "activate_hard_mode", |scope| {
            let days = window_days.unwrap_or(scope.config.hard_mode.default_window_days);
            let days = check_days("window days", days)?;

            let mut recorded_previous = None;
            if let Some(previous_id) = repo::active_session_id(scope.conn)? {
                let mut previous = load_session(scope.conn, &previous_id)?;
                deactivate_in(scope, &mut previous)?;
                tracing::info!(session = %previous.id, "Replacing active hard-mode session");
                recorded_previous = Some(NewEvent::new(
                    EventType::HardModeDeactivated,
                    &previous.id,
                    &previous,
                )?);
            }

            let window_start = scope.calendar.day_start(scope.now);
            let session = HardModeSession {
                id: new_id(),
                is_active: true,
                window_start,
                window_end: window_start + Duration::days(i64::from(days) - 1),
                plan: None,
                created_at: scope.now,
                deactivated_at: None,
                crisis_overridden_at: None,
                closed_at: None,
            };
            repo::insert_session(scope.conn, &session)?;
            repo::set_singleton(
                scope.conn,
                repo::ACTIVE_HARD_MODE_SESSION,
                &session.id,
                scope.now,
            )?;
            for n in 0..i64::from(days) {
                schedule_plan(scope, &session.id, window_start + Duration::days(n))?;
            }

            let event = NewEvent::new(EventType::HardModeActivated, &session.id, &session)?;
            let recorded = Recorded::new(session, event);
            Ok(match recorded_previous {
                Some(previous) => recorded.with_secondary("deactivate_previous", previous),
                None => recorded,
            })
        })
    }

    /// Extends an active session by `extend_days`. Requires `confirm`.
    pub fn extend_hard_mode(
        &self,
        key: &str,
        session_id: Option<&str>,
        extend_days: u32,
        confirm: bool,
    ) -> Result<CommandOutcome<HardModeSession>> {
        self.execute(key, "extend_hard_mode", |scope| {
            if !confirm {
                return Err(Error::Validation(
                    "extending hard mode must be confirmed".to_string(),
                ));
            }
            let days = check_days("extend days", extend_days)?;
            let mut session = resolve_session(scope.conn, session_id)?;
            require_active(&session, "extended")?;

            let previous_window_end = session.window_end;
            let last_day = scope.calendar.day_start(previous_window_end);
            for n in 1..=i64::from(days) {
                schedule_plan(scope, &session.id, last_day + Duration::days(n))?;
            }
            session.window_end = previous_window_end + Duration::days(i64::from(days));
            repo::update_session(scope.conn, &session)?;

            let extension = Extension {
                session_id: session.id.clone(),
                extend_days: days,
                previous_window_end,
                window_end: session.window_end,
            };
            let event = NewEvent::new(EventType::HardModeExtended, &session.id, &extension)?;
            Ok(Recorded::new(session, event))
        })
    }

    /// Drops every item of today's plan. The window and active flag stay.
    ///
    /// When today's plan has not been generated yet, the recorded override
    /// makes [`CommandProcessor::generate_plan`] produce it already dropped.
    /// A stored plan for an earlier day is left as it was.
    pub fn crisis_override(
        &self,
        key: &str,
        session_id: Option<&str>,
        reason: Option<&str>,
    ) -> Result<CommandOutcome<HardModeSession>> {
        self.execute(key, "crisis_override", |scope| {
            let mut session = resolve_session(scope.conn, session_id)?;
            require_active(&session, "crisis_overridden")?;

            let today = scope.calendar.day_start(scope.now);
            let mut dropped_items = 0;
            if let Some(plan) = session.plan.as_mut().filter(|p| p.day_start == today) {
                for item in &mut plan.items {
                    item.status = PlanItemStatus::Dropped;
                    item.flagged_at = Some(scope.now);
                    dropped_items += 1;
                }
            }
            session.crisis_overridden_at = Some(scope.now);
            repo::update_session(scope.conn, &session)?;

            let record = CrisisOverride {
                session_id: session.id.clone(),
                reason: optional_text(reason),
                day_start: today,
                dropped_items,
                flagged_at: scope.now,
            };
            let event = NewEvent::new(EventType::HardModeCrisisOverride, &session.id, &record)?;
            Ok(Recorded::new(session, event))
        })
    }

    /// Ends an active session early and queues the close of today.
    pub fn deactivate_hard_mode(
        &self,
        key: &str,
        session_id: Option<&str>,
    ) -> Result<CommandOutcome<HardModeSession>> {
        self.execute(key, "deactivate_hard_mode", |scope| {
            let mut session = resolve_session(scope.conn, session_id)?;
            require_active(&session, "deactivated")?;
            deactivate_in(scope, &mut session)?;

            let event = NewEvent::new(EventType::HardModeDeactivated, &session.id, &session)?;
            Ok(Recorded::new(session, event))
        })
    }

    /// Generates the plan for one session day.
    ///
    /// Rejected with a validation error when [`plan_blocker`] finds a reason
    /// not to plan.
    pub fn generate_plan(
        &self,
        key: &str,
        session_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<CommandOutcome<DayPlan>> {
        self.execute(key, "generate_plan", |scope| {
            let mut session = load_session(scope.conn, session_id)?;
            if let Some(reason) = plan_blocker(&session, day_start) {
                return Err(Error::Validation(reason));
            }

            let crisis_at = session
                .crisis_overridden_at
                .filter(|at| scope.calendar.day_start(*at) == day_start);
            let plan = build_plan(scope, day_start, crisis_at)?;
            session.plan = Some(plan.clone());
            repo::update_session(scope.conn, &session)?;

            let event = NewEvent::new(EventType::HardModePlanGenerated, &session.id, &plan)?;
            Ok(Recorded::new(plan, event))
        })
    }

    /// Closes one session day, then rolls into the next day or finalizes.
    ///
    /// The session rolls over only while its row is active, no
    /// `hard_mode.deactivated` event exists for it and the next day is still
    /// inside the window.
    pub fn close_day(
        &self,
        key: &str,
        session_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<CommandOutcome<DaySummary>> {
        self.execute(key, "close_day", |scope| {
            let mut session = load_session(scope.conn, session_id)?;
            if session.is_closed() {
                return Err(Error::InvalidTransition {
                    entity: "hard_mode_session",
                    id: session.id.clone(),
                    from: "closed".to_string(),
                    to: "day_closed".to_string(),
                });
            }

            let summary = summarize_day(scope.conn, &scope.calendar, &session, day_start)?;
            let next_day = day_start + Duration::days(1);
            let continues = session.is_active
                && !was_deactivated(scope.conn, &session.id)?
                && session.covers_day(next_day);

            if continues {
                schedule_plan(scope, &session.id, next_day)?;
                let summary = DaySummary {
                    outcome: DayCloseOutcome::RolledOver,
                    next_day: Some(next_day),
                    ..summary
                };
                let event = NewEvent::new(EventType::HardModeDayClosed, &session.id, &summary)?;
                return Ok(Recorded::new(summary, event));
            }

            session.is_active = false;
            session.deactivated_at.get_or_insert(scope.now);
            session.closed_at = Some(scope.now);
            repo::update_session(scope.conn, &session)?;
            repo::clear_singleton_if(scope.conn, repo::ACTIVE_HARD_MODE_SESSION, &session.id)?;
            tracing::info!(session = %session.id, "Hard-mode session closed");

            let event = NewEvent::new(EventType::HardModeClosed, &session.id, &summary)?;
            Ok(Recorded::new(summary, event))
        })
    }
}

/// Tallies the ledger and plan for one local day. Outcome defaults to finalized.
fn summarize_day(
    conn: &Connection,
    calendar: &Calendar,
    session: &HardModeSession,
    day_start: DateTime<Utc>,
) -> Result<DaySummary> {
    let (start, end) = calendar.day_range(day_start);
    let events = ledger::between(conn, start, end)?;
    let tasks_completed = events
        .iter()
        .filter(|e| e.event_type == EventType::TaskCompleted)
        .count();

    let (plan_items, plan_items_dropped) = match &session.plan {
        Some(plan) if plan.day_start == start => (
            plan.items.len(),
            plan.items
                .iter()
                .filter(|i| i.status == PlanItemStatus::Dropped)
                .count(),
        ),
        _ => (0, 0),
    };

    Ok(DaySummary {
        session_id: session.id.clone(),
        day_start: start,
        outcome: DayCloseOutcome::Finalized,
        events: events.len(),
        tasks_completed,
        plan_items,
        plan_items_dropped,
        next_day: None,
    })
}
