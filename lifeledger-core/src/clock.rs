//! Time sources and local-calendar arithmetic.
//!
//! Every engine reads "now" through a [`Clock`] so scheduled behavior can be
//! replayed deterministically in tests with [`ManualClock`].

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveTime, Offset, SubsecRound,
    Utc,
};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, truncated to the microsecond precision used in storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Local calendar in a fixed UTC offset.
///
/// Day boundaries are local midnight expressed as UTC instants. Fixed offsets
/// have no DST transitions, so every day is exactly 24 hours long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    pub fn new(utc_offset_minutes: i32) -> Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::Config(format!("invalid UTC offset: {utc_offset_minutes} minutes"))
            })?;
        Ok(Self { offset })
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date containing `ts`.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.offset).date_naive()
    }

    /// Local midnight of `date`, as a UTC instant.
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        let utc = local_midnight - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(utc, Utc)
    }

    /// Start of the local day containing `ts`.
    pub fn day_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of(self.local_date(ts))
    }

    /// Half-open `[start, end)` range of the local day containing `ts`.
    pub fn day_range(&self, ts: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.day_start(ts);
        (start, start + Duration::days(1))
    }

    /// Adds whole calendar months in local time.
    ///
    /// The day of month is `anchor_day` clamped to the length of the target
    /// month, so a schedule anchored on the 31st lands on Feb 28/29 and then
    /// returns to the 31st in March. Returns `None` on calendar overflow.
    pub fn add_months_anchored(
        &self,
        ts: DateTime<Utc>,
        months: u32,
        anchor_day: u32,
    ) -> Option<DateTime<Utc>> {
        let local = ts.with_timezone(&self.offset).naive_local();
        let first = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)?;
        let target_first = first.checked_add_months(Months::new(months))?;
        let day = anchor_day.clamp(1, days_in_month(target_first)?);
        let target = NaiveDate::from_ymd_opt(target_first.year(), target_first.month(), day)?;
        let naive_utc = target.and_time(local.time())
            - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Some(DateTime::from_naive_utc_and_offset(naive_utc, Utc))
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

fn days_in_month(first_of_month: NaiveDate) -> Option<u32> {
    let next = first_of_month.checked_add_months(Months::new(1))?;
    u32::try_from((next - first_of_month).num_days()).ok()
}
