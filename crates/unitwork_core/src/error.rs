//! Error taxonomy surfaced by repositories and the unit of work.
//!
//! # Invariants
//! - Store failures are always wrapped with entity/operation context; no
//!   `rusqlite` error type appears in this enum's variants.
//! - "Not found" is never an error; single reads return `Ok(None)`.

use crate::db::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type UowResult<T> = Result<T, UowError>;

#[derive(Debug)]
pub enum UowError {
    /// The operation is not valid in the current state, e.g. a repository
    /// used after its unit of work was disposed.
    InvalidOperation(String),
    /// A read or staging operation failed in the store.
    Repository {
        entity: &'static str,
        operation: &'static str,
        source: StoreError,
    },
    /// Transaction control or `save` failed.
    Transaction {
        operation: &'static str,
        message: String,
        source: Option<StoreError>,
    },
    /// The scope connection could not be opened.
    Connection(StoreError),
}

impl UowError {
    pub(crate) fn disposed(operation: &str) -> Self {
        Self::InvalidOperation(format!(
            "unit of work has been disposed; `{operation}` is no longer available"
        ))
    }

    pub(crate) fn repository(
        entity: &'static str,
        operation: &'static str,
        source: StoreError,
    ) -> Self {
        Self::Repository {
            entity,
            operation,
            source,
        }
    }

    pub(crate) fn transaction(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transaction {
            operation,
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn transaction_failed(operation: &'static str, source: StoreError) -> Self {
        Self::Transaction {
            operation,
            message: "store rejected the operation".to_string(),
            source: Some(source),
        }
    }

    /// Whether the underlying store operation was cancelled by an interrupt.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Repository {
                source: StoreError::Interrupted,
                ..
            } | Self::Transaction {
                source: Some(StoreError::Interrupted),
                ..
            }
        )
    }

    /// Stable code for structured log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOperation(_) => "invalid_operation",
            Self::Repository { .. } => "repository_error",
            Self::Transaction { .. } => "transaction_error",
            Self::Connection(_) => "connection_error",
        }
    }
}

impl Display for UowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOperation(message) => write!(f, "invalid operation: {message}"),
            Self::Repository {
                entity,
                operation,
                source,
            } => write!(f, "repository `{entity}` failed in `{operation}`: {source}"),
            Self::Transaction {
                operation,
                message,
                source: Some(source),
            } => write!(f, "transaction `{operation}` failed: {message}: {source}"),
            Self::Transaction {
                operation,
                message,
                source: None,
            } => write!(f, "transaction `{operation}` failed: {message}"),
            Self::Connection(err) => write!(f, "failed to open store connection: {err}"),
        }
    }
}

impl Error for UowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidOperation(_) => None,
            Self::Repository { source, .. } => Some(source),
            Self::Transaction { source, .. } => source.as_ref().map(|err| err as &(dyn Error + 'static)),
            Self::Connection(err) => Some(err),
        }
    }
}
