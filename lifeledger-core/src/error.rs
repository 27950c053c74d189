//! Error types for lifeledger-core

use thiserror::Error;

/// Main error type for the lifeledger-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error (event payloads, plans, job arguments)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Command arguments failed a domain rule; nothing was written
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A capacity invariant would be violated (e.g. the focus list is full)
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// The entity is not in a state that allows the requested change
    #[error("cannot move {entity} {id} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// The idempotency key was already used by a different command
    #[error("idempotency key {key:?} was recorded by {recorded}, not {requested}")]
    IdempotencyConflict {
        key: String,
        recorded: String,
        requested: String,
    },

    /// Scheduler error (bad cron expression, undecodable job)
    #[error("schedule error: {0}")]
    Schedule(String),
}

impl Error {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Returns true for errors caused by the caller's input rather than the system.
    ///
    /// Rejected commands never leave partial state behind.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound { .. }
                | Error::Capacity(_)
                | Error::InvalidTransition { .. }
                | Error::IdempotencyConflict { .. }
        )
    }
}

/// Result type alias for lifeledger-core
pub type Result<T> = std::result::Result<T, Error>;
