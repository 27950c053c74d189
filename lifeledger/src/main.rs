//! lifeledger - personal ledger for tasks, moods, money and hard mode
//!
//! Every write goes through the core command processor under an idempotency
//! key (`--key`, or a fresh UUID when omitted) and prints its outcome as JSON,
//! including whether the key had already been recorded.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/lifeledger/data.db (~/.local/share/lifeledger/data.db)
//! - Logs: $XDG_STATE_HOME/lifeledger/lifeledger.log (~/.local/state/lifeledger/lifeledger.log)
//! - Config: $XDG_CONFIG_HOME/lifeledger/config.toml (~/.config/lifeledger/config.toml)

mod process_lock;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use lifeledger_core::commands::finance::NewTransaction;
use lifeledger_core::commands::mood::NewMoodCheckIn;
use lifeledger_core::commands::recurring::NewRecurring;
use lifeledger_core::commands::tasks::NewTask;
use lifeledger_core::engine::{self, LogSink};
use lifeledger_core::logging::{self, Echo};
use lifeledger_core::projection::recurring::RecurringPatch;
use lifeledger_core::scheduler::JobStatus;
use lifeledger_core::{
    Cadence, Config, EventFilter, EventType, Flow, Runtime, TaskStatus, TransactionFilter,
    TransactionSource,
};
use process_lock::acquire_daemon_guard;
use serde::Serialize;

/// Exit code for commands the domain rejected (nothing was written).
const EXIT_REJECTED: u8 = 2;

#[derive(Parser)]
#[command(name = "lifeledger")]
#[command(about = "Personal ledger for tasks, moods, money and hard mode")]
#[command(version)]
struct Args {
    /// Idempotency key for the command (default: a fresh UUID)
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage tasks and their reminders
    #[command(subcommand)]
    Task(TaskCommand),

    /// Record a mood check-in (score 1-5)
    Mood {
        score: u8,
        #[arg(long)]
        note: Option<String>,
        /// Repeatable tag
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show recent mood check-ins
    Moods {
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Manage budget envelopes
    #[command(subcommand)]
    Envelope(EnvelopeCommand),

    /// Log, void and list transactions
    #[command(subcommand)]
    Txn(TxnCommand),

    /// Merchant to envelope hints
    #[command(subcommand)]
    Hint(HintCommand),

    /// Recurring transaction schedules
    #[command(subcommand)]
    Recurring(RecurringCommand),

    /// Mark a local day quiet (no reminders) or clear it
    Quiet {
        /// Local date, YYYY-MM-DD
        day: NaiveDate,
        /// Clear the quiet flag instead of setting it
        #[arg(long)]
        off: bool,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Hard-mode commitment windows
    #[command(subcommand)]
    Hardmode(HardModeCommand),

    /// Run one reminder sweep now
    Remind,

    /// List ledger events, newest last
    Events {
        /// Event type, e.g. task.created (repeatable)
        #[arg(long = "type")]
        types: Vec<EventType>,
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// List scheduled jobs
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Run due jobs and the default triggers once, then exit
    Tick,

    /// Run the scheduler until interrupted
    Run,
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task in the inbox
    Add {
        title: String,
        /// Due time, RFC 3339
        #[arg(long)]
        due: Option<DateTime<Utc>>,
        /// Enable reminders for this task
        #[arg(long)]
        remind: bool,
        /// Minutes before the due time to remind
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Move a task into the focus list
    Focus { id: String },
    /// Defer a task
    Defer { id: String },
    /// Complete a task
    Done { id: String },
    /// Abandon a task
    Abandon { id: String },
    /// Reopen a completed or abandoned task
    Reopen { id: String },
    /// Configure reminders for a task
    Remind {
        id: String,
        /// Disable reminders
        #[arg(long)]
        off: bool,
        #[arg(long)]
        offset: Option<u32>,
    },
    /// Snooze a task's reminder until a time
    Snooze {
        id: String,
        /// RFC 3339
        #[arg(long)]
        until: DateTime<Utc>,
    },
    /// List tasks
    List {
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only the focus list
        #[arg(long, conflicts_with = "status")]
        focus: bool,
    },
}

#[derive(Subcommand)]
enum EnvelopeCommand {
    /// Create an envelope
    Add { name: String },
    /// List envelopes
    List,
}

#[derive(Subcommand)]
enum TxnCommand {
    /// Log a transaction (amount in minor units)
    Log {
        amount: i64,
        #[arg(long, default_value = "outflow")]
        flow: Flow,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Envelope id; when omitted a merchant hint may fill it
        #[arg(long)]
        envelope: Option<String>,
        /// When it happened, RFC 3339 (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long, default_value = "manual")]
        source: TransactionSource,
    },
    /// Void a transaction
    Void { id: String },
    /// List transactions, oldest first
    List {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        envelope: Option<String>,
        #[arg(long)]
        voided: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum HintCommand {
    /// Suggest an envelope for a merchant
    Set { merchant: String, envelope: String },
    /// List hints
    List,
}

#[derive(Subcommand)]
enum RecurringCommand {
    /// Schedule a recurring transaction
    Add {
        amount: i64,
        #[arg(long)]
        cadence: Cadence,
        /// First due time, RFC 3339
        #[arg(long)]
        first_due: DateTime<Utc>,
        #[arg(long, default_value = "outflow")]
        flow: Flow,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        envelope: Option<String>,
    },
    /// Change fields of a schedule
    Update {
        id: String,
        #[arg(long)]
        amount: Option<i64>,
        #[arg(long)]
        flow: Option<Flow>,
        #[arg(long)]
        cadence: Option<Cadence>,
        #[arg(long)]
        next_due: Option<DateTime<Utc>>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        envelope: Option<String>,
    },
    /// Cancel a schedule
    Cancel { id: String },
    /// List live schedules
    List,
    /// Execute due schedules now
    Execute,
}

#[derive(Subcommand)]
enum HardModeCommand {
    /// Start a session (replaces any active one)
    Activate {
        /// Window length in days (default: from config)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Extend the active session
    Extend {
        #[arg(long)]
        days: u32,
        /// Required confirmation
        #[arg(long)]
        confirm: bool,
        #[arg(long)]
        session: Option<String>,
    },
    /// Drop the remaining plan items for today
    Crisis {
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// End the session; today's close runs right away
    Deactivate {
        #[arg(long)]
        session: Option<String>,
    },
    /// Show a session (default: the active one)
    Status {
        #[arg(long)]
        session: Option<String>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let rejected = e
                .downcast_ref::<lifeledger_core::Error>()
                .is_some_and(|e| e.is_rejection());
            if rejected {
                ExitCode::from(EXIT_REJECTED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let echo = if matches!(args.command, Command::Run) {
        Echo::Stderr
    } else {
        Echo::FileOnly
    };
    let _log_guard = logging::init(&config.logging, &Config::state_dir(), echo)
        .context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::debug!(path = %db_path.display(), "Opening database");
    let runtime = Runtime::open(config, &db_path).context("failed to open database")?;

    let key = args
        .key
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match args.command {
        Command::Task(command) => run_task(&runtime, &key, command),
        Command::Mood { score, note, tags } => {
            let outcome = runtime
                .processor()
                .check_in_mood(&key, NewMoodCheckIn { score, note, tags })?;
            print_json(&outcome)
        }
        Command::Moods { limit } => print_json(&runtime.database().mood_history(limit)?),
        Command::Envelope(EnvelopeCommand::Add { name }) => {
            print_json(&runtime.processor().create_envelope(&key, &name)?)
        }
        Command::Envelope(EnvelopeCommand::List) => {
            print_json(&runtime.database().list_envelopes()?)
        }
        Command::Txn(command) => run_txn(&runtime, &key, command),
        Command::Hint(HintCommand::Set { merchant, envelope }) => {
            print_json(&runtime.processor().set_merchant_hint(&key, &merchant, &envelope)?)
        }
        Command::Hint(HintCommand::List) => print_json(&runtime.database().merchant_hints()?),
        Command::Recurring(command) => run_recurring(&runtime, &key, command),
        Command::Quiet { day, off, reason } => {
            let outcome =
                runtime
                    .processor()
                    .set_quiet_day(&key, day, !off, reason.as_deref())?;
            print_json(&outcome)
        }
        Command::Hardmode(command) => run_hard_mode(&runtime, &key, command),
        Command::Remind => {
            let report = engine::reminders::sweep(runtime.processor(), &LogSink)?;
            print_json(&report)
        }
        Command::Events {
            types,
            entity,
            since,
            limit,
        } => {
            let filter = EventFilter {
                types,
                entity_id: entity,
                since,
                limit: Some(limit),
                ..Default::default()
            };
            print_json(&runtime.database().list_events(&filter)?)
        }
        Command::Jobs { status, limit } => {
            print_json(&runtime.database().list_jobs(status, limit)?)
        }
        Command::Tick => {
            runtime
                .register_default_triggers()
                .context("failed to register triggers")?;
            let report = runtime.scheduler().tick()?;
            print_json(&report)
        }
        Command::Run => run_daemon(runtime, &db_path),
    }
}

fn run_task(runtime: &Runtime, key: &str, command: TaskCommand) -> Result<()> {
    let processor = runtime.processor();
    let outcome = match command {
        TaskCommand::Add {
            title,
            due,
            remind,
            offset,
        } => processor.create_task(
            key,
            NewTask {
                title,
                due_at: due,
                reminders_enabled: remind,
                reminder_offset_minutes: offset,
            },
        )?,
        TaskCommand::Focus { id } => processor.focus_task(key, &id)?,
        TaskCommand::Defer { id } => processor.defer_task(key, &id)?,
        TaskCommand::Done { id } => processor.complete_task(key, &id)?,
        TaskCommand::Abandon { id } => processor.abandon_task(key, &id)?,
        TaskCommand::Reopen { id } => processor.reopen_task(key, &id)?,
        TaskCommand::Remind { id, off, offset } => {
            processor.configure_reminder(key, &id, !off, offset)?
        }
        TaskCommand::Snooze { id, until } => processor.snooze_reminder(key, &id, until)?,
        TaskCommand::List { status, focus } => {
            let tasks = if focus {
                runtime.database().focus_list()?
            } else {
                runtime.database().list_tasks(status)?
            };
            return print_json(&tasks);
        }
    };
    print_json(&outcome)
}

fn run_txn(runtime: &Runtime, key: &str, command: TxnCommand) -> Result<()> {
    let processor = runtime.processor();
    match command {
        TxnCommand::Log {
            amount,
            flow,
            merchant,
            category,
            envelope,
            at,
            source,
        } => {
            let args = NewTransaction {
                amount_minor: amount,
                flow,
                merchant,
                category,
                envelope_id: envelope,
                occurred_at: at,
                source,
                recurring_id: None,
            };
            print_json(&processor.log_transaction(key, args)?)
        }
        TxnCommand::Void { id } => print_json(&processor.void_transaction(key, &id)?),
        TxnCommand::List {
            since,
            until,
            envelope,
            voided,
            limit,
        } => {
            let filter = TransactionFilter {
                since,
                until,
                envelope_id: envelope,
                include_voided: voided,
                limit,
            };
            print_json(&runtime.database().list_transactions(&filter)?)
        }
    }
}

fn run_recurring(runtime: &Runtime, key: &str, command: RecurringCommand) -> Result<()> {
    let processor = runtime.processor();
    match command {
        RecurringCommand::Add {
            amount,
            cadence,
            first_due,
            flow,
            description,
            merchant,
            category,
            envelope,
        } => {
            let args = NewRecurring {
                amount_minor: amount,
                flow,
                cadence,
                first_due_at: first_due,
                description,
                merchant,
                category,
                envelope_id: envelope,
            };
            print_json(&processor.schedule_recurring(key, args)?)
        }
        RecurringCommand::Update {
            id,
            amount,
            flow,
            cadence,
            next_due,
            description,
            merchant,
            category,
            envelope,
        } => {
            let patch = RecurringPatch {
                amount_minor: amount,
                flow,
                cadence,
                next_due_at: next_due,
                description,
                merchant,
                category,
                envelope_id: envelope,
                ..Default::default()
            };
            print_json(&processor.update_recurring(key, &id, patch)?)
        }
        RecurringCommand::Cancel { id } => print_json(&processor.cancel_recurring(key, &id)?),
        RecurringCommand::List => print_json(&runtime.database().recurring_schedules()?),
        RecurringCommand::Execute => print_json(&engine::recurring::execute_due(processor)?),
    }
}

fn run_hard_mode(runtime: &Runtime, key: &str, command: HardModeCommand) -> Result<()> {
    let processor = runtime.processor();
    match command {
        HardModeCommand::Activate { days } => {
            print_json(&processor.activate_hard_mode(key, days)?)
        }
        HardModeCommand::Extend {
            days,
            confirm,
            session,
        } => print_json(&processor.extend_hard_mode(key, session.as_deref(), days, confirm)?),
        HardModeCommand::Crisis { reason, session } => {
            print_json(&processor.crisis_override(key, session.as_deref(), reason.as_deref())?)
        }
        HardModeCommand::Deactivate { session } => {
            let outcome = processor.deactivate_hard_mode(key, session.as_deref())?;
            // Today's close was queued; run it now rather than waiting for a daemon
            runtime.scheduler().tick()?;
            print_json(&outcome)
        }
        HardModeCommand::Status { session } => {
            let found = match session {
                Some(id) => runtime.database().get_hard_mode_session(&id)?,
                None => runtime.database().active_hard_mode_session()?,
            };
            print_json(&found)
        }
    }
}

fn run_daemon(runtime: Runtime, db_path: &std::path::Path) -> Result<()> {
    let _daemon_guard = acquire_daemon_guard(db_path).context("failed to acquire process lock")?;

    runtime
        .register_default_triggers()
        .context("failed to register triggers")?;
    let scheduler = Arc::clone(runtime.scheduler());

    tracing::info!(path = %db_path.display(), "lifeledger daemon starting");
    println!("lifeledger daemon running against {}", db_path.display());
    println!("Press Ctrl+C to stop");

    let tokio_runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    tokio_runtime.block_on(async move {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        };
        scheduler.run(shutdown).await
    })?;

    tracing::info!("lifeledger daemon stopped");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
