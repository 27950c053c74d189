//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/lifeledger/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/lifeledger/` (~/.config/lifeledger/)
//! - Data: `$XDG_DATA_HOME/lifeledger/` (~/.local/share/lifeledger/)
//! - State/Logs: `$XDG_STATE_HOME/lifeledger/` (~/.local/state/lifeledger/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Local time settings used for day boundaries
    #[serde(default)]
    pub time: TimeConfig,

    /// Scheduler cadence and batch settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Recurring transaction execution
    #[serde(default)]
    pub recurring: RecurringConfig,

    /// Task reminders
    #[serde(default)]
    pub reminders: ReminderConfig,

    /// Hard-mode sessions
    #[serde(default)]
    pub hard_mode: HardModeConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Local time configuration
///
/// Calendar days (quiet days, "due today", hard-mode days) are computed in a
/// fixed offset from UTC.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TimeConfig {
    /// Offset of local time from UTC, in minutes (e.g. -300 for UTC-5)
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// How often the daemon polls for due jobs and triggers
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum at-time jobs dispatched per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between recurring execution runs
    #[serde(default = "default_recurring_interval")]
    pub recurring_interval_secs: u64,

    /// Interval between reminder sweeps
    #[serde(default = "default_reminder_interval")]
    pub reminder_interval_secs: u64,

    /// Cron expression (local time) for the nightly hard-mode day close
    #[serde(default = "default_nightly_close_cron")]
    pub nightly_close_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            recurring_interval_secs: default_recurring_interval(),
            reminder_interval_secs: default_reminder_interval(),
            nightly_close_cron: default_nightly_close_cron(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recurring_interval(&self) -> Duration {
        Duration::from_secs(self.recurring_interval_secs)
    }

    pub fn reminder_interval(&self) -> Duration {
        Duration::from_secs(self.reminder_interval_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    32
}

fn default_recurring_interval() -> u64 {
    15 * 60
}

fn default_reminder_interval() -> u64 {
    10 * 60
}

fn default_nightly_close_cron() -> String {
    "55 23 * * *".to_string()
}

/// Recurring execution configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecurringConfig {
    /// Maximum schedules executed per run; the rest wait for the next run
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,
}

impl Default for RecurringConfig {
    fn default() -> Self {
        Self {
            max_per_run: default_max_per_run(),
        }
    }
}

fn default_max_per_run() -> usize {
    25
}

/// Reminder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ReminderConfig {
    /// Minutes before the due time a reminder fires when a task sets no offset
    #[serde(default = "default_reminder_offset")]
    pub default_offset_minutes: u32,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            default_offset_minutes: default_reminder_offset(),
        }
    }
}

fn default_reminder_offset() -> u32 {
    30
}

/// Hard-mode configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HardModeConfig {
    /// Window length used when activation does not specify one
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,

    /// Maximum items in a generated day plan
    #[serde(default = "default_plan_items")]
    pub plan_items: usize,

    /// Local hour of the first plan slot
    #[serde(default = "default_plan_start_hour")]
    pub plan_start_hour: u32,

    /// Minutes between plan slots
    #[serde(default = "default_plan_slot_minutes")]
    pub plan_slot_minutes: u32,
}

impl Default for HardModeConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            plan_items: default_plan_items(),
            plan_start_hour: default_plan_start_hour(),
            plan_slot_minutes: default_plan_slot_minutes(),
        }
    }
}

fn default_window_days() -> u32 {
    7
}

fn default_plan_items() -> usize {
    3
}

fn default_plan_start_hour() -> u32 {
    9
}

fn default_plan_slot_minutes() -> u32 {
    90
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.time.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::Config(
                "time.utc_offset_minutes must be within +/- 1439".to_string(),
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(Error::Config(
                "scheduler.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.scheduler.batch_size == 0 {
            return Err(Error::Config(
                "scheduler.batch_size must be positive".to_string(),
            ));
        }
        if self.scheduler.recurring_interval_secs == 0 || self.scheduler.reminder_interval_secs == 0
        {
            return Err(Error::Config(
                "scheduler intervals must be positive".to_string(),
            ));
        }
        crate::scheduler::parse_cron(&self.scheduler.nightly_close_cron)
            .map_err(|e| Error::Config(format!("scheduler.nightly_close_cron: {}", e)))?;
        if self.recurring.max_per_run == 0 {
            return Err(Error::Config(
                "recurring.max_per_run must be positive".to_string(),
            ));
        }
        if self.reminders.default_offset_minutes > 24 * 60 {
            return Err(Error::Config(
                "reminders.default_offset_minutes must be at most 1440".to_string(),
            ));
        }
        if !(1..=14).contains(&self.hard_mode.default_window_days) {
            return Err(Error::Config(
                "hard_mode.default_window_days must be between 1 and 14".to_string(),
            ));
        }
        if self.hard_mode.plan_start_hour > 23 {
            return Err(Error::Config(
                "hard_mode.plan_start_hour must be between 0 and 23".to_string(),
            ));
        }
        if self.hard_mode.plan_slot_minutes == 0 {
            return Err(Error::Config(
                "hard_mode.plan_slot_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/lifeledger/config.toml` (~/.config/lifeledger/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("lifeledger").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/lifeledger/` (~/.local/share/lifeledger/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("lifeledger")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/lifeledger/` (~/.local/state/lifeledger/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("lifeledger")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/lifeledger/data.db` (~/.local/share/lifeledger/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }
}
