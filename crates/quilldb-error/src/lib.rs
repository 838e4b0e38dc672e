//! The error taxonomy every quilldb crate returns from its public API.
//!
//! Five kinds only (§7): `Io`, `Corruption`, `Constraint`, `Transaction`,
//! `Internal`. `Sql` is reserved for a future SQL layer and is never
//! constructed by this workspace.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Crate-wide result alias, following the teacher's `Result<T>` convention.
pub type Result<T> = std::result::Result<T, QuillError>;

/// The five (six, with the reserved `Sql`) top-level error kinds from §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corruption,
    Constraint,
    Transaction,
    Internal,
    /// Reserved for a future SQL surface; the core never produces this.
    Sql,
}

/// Why a transaction-related operation failed.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// A write was attempted with no active write transaction.
    #[error("no active write transaction")]
    NoActiveTransaction,
    /// A write transaction was started while one was already active.
    #[error("a write transaction is already active")]
    Busy,
    /// A write was attempted against a read-only snapshot.
    #[error("transaction is read-only")]
    ReadOnly,
    /// A checkpoint ran past a reader's snapshot before it could release it.
    #[error("snapshot invalidated by checkpoint")]
    SnapshotInvalidated,
    /// `release`/`rollback_to` named a savepoint that isn't on the stack.
    #[error("no such savepoint: {name}")]
    NoSuchSavepoint { name: String },
}

/// The crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum QuillError {
    #[error("io error during {op} on {path}: {source}")]
    Io {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("corruption detected ({check}): {detail}")]
    Corruption { check: &'static str, detail: String },

    #[error("constraint violation: duplicate key {key}")]
    Constraint { key: String },

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("sql layer is not implemented")]
    Sql,
}

impl QuillError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, op: &'static str, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            op,
            source,
        }
    }

    #[must_use]
    pub fn corruption(check: &'static str, detail: impl fmt::Display) -> Self {
        Self::Corruption {
            check,
            detail: detail.to_string(),
        }
    }

    #[must_use]
    pub fn constraint(key: impl fmt::Display) -> Self {
        Self::Constraint {
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn internal(detail: impl fmt::Display) -> Self {
        Self::Internal(detail.to_string())
    }

    #[must_use]
    pub const fn busy() -> Self {
        Self::Transaction(TransactionError::Busy)
    }

    #[must_use]
    pub const fn read_only() -> Self {
        Self::Transaction(TransactionError::ReadOnly)
    }

    #[must_use]
    pub const fn no_active_transaction() -> Self {
        Self::Transaction(TransactionError::NoActiveTransaction)
    }

    #[must_use]
    pub const fn snapshot_invalidated() -> Self {
        Self::Transaction(TransactionError::SnapshotInvalidated)
    }

    #[must_use]
    pub fn no_such_savepoint(name: impl Into<String>) -> Self {
        Self::Transaction(TransactionError::NoSuchSavepoint { name: name.into() })
    }

    /// Classifies this error into one of the §7 kinds.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Io,
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::Transaction(_) => ErrorKind::Transaction,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Sql => ErrorKind::Sql,
        }
    }
}
