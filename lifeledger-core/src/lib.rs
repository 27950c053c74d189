//! # lifeledger-core
//!
//! Core library for lifeledger - a personal ledger for tasks, moods, money
//! and hard-mode commitment windows.
//!
//! This library provides:
//! - An append-only event ledger with idempotent command processing
//! - Projections folded from the ledger (recurring schedules, merchant hints)
//! - A scheduler for at-time jobs and interval/cron triggers
//! - Engines for recurring transactions, reminders and hard-mode sessions
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Writes and reads take separate paths:
//! - **Commands:** every write runs once per idempotency key, mutates entity
//!   rows and appends its events in one SQLite transaction
//! - **Projections:** views with no table of their own, rebuilt by folding events
//! - **Orchestration:** scheduled actions re-derive what is due from current
//!   state and write back through commands with deterministic keys
//!
//! ## Example
//!
//! ```rust,no_run
//! use lifeledger_core::commands::tasks::NewTask;
//! use lifeledger_core::{Config, Runtime};
//!
//! let config = Config::load().expect("failed to load config");
//! let runtime = Runtime::open(config, &Config::database_path()).expect("failed to open");
//!
//! let task = NewTask {
//!     title: "Renew passport".to_string(),
//!     ..Default::default()
//! };
//! let outcome = runtime
//!     .processor()
//!     .create_task("renew-passport", task)
//!     .expect("failed to create task");
//! assert!(!outcome.deduplicated);
//! ```

// Re-export commonly used items at the crate root
pub use clock::{Calendar, Clock, ManualClock, SystemClock};
pub use commands::{CommandOutcome, CommandProcessor};
pub use config::Config;
pub use db::{Database, TransactionFilter};
pub use error::{Error, Result};
pub use ledger::{Event, EventFilter, EventType};
pub use runtime::Runtime;
pub use scheduler::{Action, ActionStatus, Scheduler};
pub use types::*;

// Public modules
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod projection;
pub mod runtime;
pub mod scheduler;
pub mod types;
