//! SQLite store bootstrap and the store-level error type.
//!
//! # Responsibility
//! - Open and configure one SQLite connection per unit-of-work scope.
//! - Normalize `rusqlite` failures into `StoreError` so callers above the
//!   store never match on driver error types.
//!
//! # Invariants
//! - Returned connections have pragmas from `StoreConfig` applied.
//! - An interrupted statement always surfaces as `StoreError::Interrupted`.

use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod config;
mod open;

pub use config::StoreConfig;
pub use open::open_connection;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure raised by the SQLite store or by the SQL composed for it.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// The running statement was cancelled through an interrupt handle.
    Interrupted,
    /// A predicate or ordering references an identifier that cannot be
    /// rendered safely, or a relation that was not included.
    MalformedPredicate(String),
    UnknownRelation {
        entity: &'static str,
        relation: String,
    },
    /// An `UPDATE`/`DELETE` flushed from the change tracker touched an
    /// unexpected number of rows.
    ConcurrencyConflict {
        table: &'static str,
        expected: usize,
        affected: usize,
    },
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Interrupted => write!(f, "store operation was interrupted"),
            Self::MalformedPredicate(message) => write!(f, "malformed predicate: {message}"),
            Self::UnknownRelation { entity, relation } => {
                write!(f, "entity `{entity}` declares no relation `{relation}`")
            }
            Self::ConcurrencyConflict {
                table,
                expected,
                affected,
            } => write!(
                f,
                "expected {expected} row(s) affected in `{table}`, store reported {affected}"
            ),
            Self::InvalidData(message) => write!(f, "invalid entity data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Interrupted
            | Self::MalformedPredicate(_)
            | Self::UnknownRelation { .. }
            | Self::ConcurrencyConflict { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if value.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            return Self::Interrupted;
        }
        Self::Sqlite(value)
    }
}
