//! Core domain types for lifeledger
//!
//! These types describe the entities written by commands and the views
//! projected from the event ledger.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Task** | An actionable item; at most three may be in focus at once |
//! | **Envelope** | A named budget bucket that transactions are filed under |
//! | **Transaction** | A money movement in integer minor units (cents) |
//! | **RecurringSchedule** | A repeating transaction; projected from the ledger, never stored |
//! | **MerchantHint** | Merchant → envelope suggestion; projected from the ledger |
//! | **QuietDay** | A local calendar day on which reminders are suppressed |
//! | **HardModeSession** | A bounded multi-day commitment window with a daily plan |

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Calendar;
use crate::error::{Error, Result};

/// Declares a string-backed enum with `as_str`, `FromStr`, `Display` and serde impls.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Returns the identifier used in database storage
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!(concat!("unknown ", stringify!($name), ": {}"), s)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        // Serialized with the same text as the database column
        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use string_enum;

// ============================================
// Tasks
// ============================================

string_enum! {
    /// Task lifecycle state.
    TaskStatus {
        Inbox => "inbox",
        Focus => "focus",
        Deferred => "deferred",
        Completed => "completed",
        Abandoned => "abandoned",
    }
}

impl TaskStatus {
    /// Closed tasks only leave their state through an explicit reopen.
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Abandoned)
    }

    /// Whether a regular (non-reopen) command may move a task from `self` to `to`.
    pub fn can_move_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Inbox, Focus | Deferred | Completed | Abandoned) => true,
            (Focus, Deferred | Completed | Abandoned) => true,
            (Deferred, Focus | Completed | Abandoned) => true,
            _ => false,
        }
    }
}

/// An actionable task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub reminders_enabled: bool,
    /// Minutes before `due_at` to remind; falls back to the configured default
    pub reminder_offset_minutes: Option<u32>,
    pub reminder_snoozed_until: Option<DateTime<Utc>>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Maximum number of tasks that may be in focus at the same time.
pub const FOCUS_CAPACITY: usize = 3;

string_enum! {
    /// What the reminder engine recorded for a `(task, scheduled_for)` pair.
    ReminderOutcome {
        Sent => "sent",
        SuppressedQuiet => "suppressed_quiet",
        Snoozed => "snoozed",
    }
}

// ============================================
// Mood
// ============================================

/// A mood check-in on a 1-5 scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodCheckIn {
    pub id: String,
    pub score: u8,
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub checked_in_at: DateTime<Utc>,
}

// ============================================
// Finances
// ============================================

/// A budget envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    /// Direction of a money movement.
    Flow {
        Outflow => "outflow",
        Inflow => "inflow",
    }
}

string_enum! {
    /// Where a transaction came from.
    TransactionSource {
        Manual => "manual",
        Import => "import",
        Recurring => "recurring",
    }
}

string_enum! {
    /// How a transaction's envelope was chosen.
    EnvelopeSource {
        Explicit => "explicit",
        Hint => "hint",
        None => "none",
    }
}

/// A logged transaction. Amounts are positive integers in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount_minor: i64,
    pub flow: Flow,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub envelope_id: Option<String>,
    pub envelope_source: EnvelopeSource,
    pub occurred_at: DateTime<Utc>,
    pub source: TransactionSource,
    pub recurring_id: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_voided(&self) -> bool {
        self.voided_at.is_some()
    }
}

string_enum! {
    /// Recurrence period of a schedule.
    Cadence {
        Weekly => "weekly",
        Biweekly => "biweekly",
        Monthly => "monthly",
    }
}

impl Cadence {
    /// Advances `from` by one period.
    ///
    /// Weekly and biweekly add fixed days; monthly adds one calendar month in
    /// local time, keeping the day of month at `anchor_day` where it exists.
    pub fn advance(
        &self,
        from: DateTime<Utc>,
        anchor_day: u32,
        calendar: &Calendar,
    ) -> Result<DateTime<Utc>> {
        match self {
            Cadence::Weekly => Ok(from + Duration::days(7)),
            Cadence::Biweekly => Ok(from + Duration::days(14)),
            Cadence::Monthly => calendar
                .add_months_anchored(from, 1, anchor_day)
                .ok_or_else(|| Error::Validation(format!("cannot advance {from} by one month"))),
        }
    }
}

/// A recurring transaction schedule, reconstructed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: String,
    pub amount_minor: i64,
    pub flow: Flow,
    pub cadence: Cadence,
    pub next_due_at: DateTime<Utc>,
    /// Local day of month of the first due date, used by monthly cadence
    pub anchor_day: u32,
    pub description: Option<String>,
    pub merchant: Option<String>,
    pub category: Option<String>,
    pub envelope_id: Option<String>,
    pub canceled: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringSchedule {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.canceled && self.next_due_at <= now
    }
}

/// Merchant → envelope suggestion, reconstructed from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantHint {
    /// Normalized key (trimmed, case-folded)
    pub merchant_key: String,
    /// Merchant text as last entered
    pub merchant: String,
    pub envelope_id: String,
    pub set_at: DateTime<Utc>,
}

/// Normalizes merchant text into a hint key.
pub fn merchant_key(merchant: &str) -> String {
    merchant.trim().to_lowercase()
}

// ============================================
// Quiet days
// ============================================

/// A local calendar day flagged to suppress reminders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietDay {
    pub day: NaiveDate,
    pub is_quiet: bool,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Hard mode
// ============================================

string_enum! {
    /// State of a single plan item.
    PlanItemStatus {
        Active => "active",
        Dropped => "dropped",
    }
}

/// One scheduled block in a day plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub task_id: Option<String>,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: PlanItemStatus,
    pub flagged_at: Option<DateTime<Utc>>,
}

/// The plan generated for one day of a hard-mode session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPlan {
    pub day_start: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<PlanItem>,
}

/// A hard-mode session.
///
/// `window_end` is the start of the last day in the window (inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardModeSession {
    pub id: String,
    pub is_active: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub plan: Option<DayPlan>,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub crisis_overridden_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl HardModeSession {
    /// Whether `day_start` falls inside the session window.
    pub fn covers_day(&self, day_start: DateTime<Utc>) -> bool {
        day_start >= self.window_start && day_start <= self.window_end
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}
