//! Error types for lock construction, acquisition and release.
//!
//! Callers branch on the [LockError] variant: configuration problems are fatal,
//! contention is expected and retryable at the caller's discretion, transport
//! failures leave ownership unknown, and a lost lease means the critical section
//! outlived its TTL.

use std::time::Duration;

use thiserror::Error;

/// Boxed driver error carried through the executor seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid construction input. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported SQL dialect: {0:?}")]
    UnknownDialect(String),

    #[error("lock key must not be empty")]
    EmptyKey,

    #[error("lock key is {len} bytes, at most {max} are allowed")]
    KeyTooLong { len: usize, max: usize },

    #[error("invalid lock table name: {0:?}")]
    InvalidTableName(String),

    #[error("lock TTL must be positive, got {0:?}")]
    InvalidTtl(Duration),

    #[error("lease extension interval must be positive, got {0:?}")]
    InvalidExtendInterval(Duration),
}

/// Failure reported by a [crate::LockExecutor] for a single statement.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The statement hit a unique/primary key constraint.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(#[source] BoxError),

    #[error("{0}")]
    Database(#[source] BoxError),
}

impl ExecError {
    pub fn database(err: impl Into<BoxError>) -> Self {
        ExecError::Database(err.into())
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, ExecError::UniqueViolation(_))
    }
}

/// Why a statement produced no definitive outcome.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("statement did not complete within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Database(#[source] BoxError),
}

impl From<ExecError> for TransportError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::UniqueViolation(e) | ExecError::Database(e) => TransportError::Database(e),
        }
    }
}

/// Lock operation that touched the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Acquire,
    Extend,
    Release,
    PurgeExpired,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A live lease owned by someone else blocks the key.
    #[error("lock {key:?} is held by another owner")]
    Contention { key: String },

    /// The database call failed or timed out; ownership is unknown.
    #[error("{operation} of lock {key:?} failed: {source}")]
    Transport {
        key: String,
        operation: Operation,
        #[source]
        source: TransportError,
    },

    /// No row matched our token: the lease expired and may have been stolen.
    #[error("lease on lock {key:?} expired or was taken over")]
    LostLease { key: String },
}

impl LockError {
    pub(crate) fn transport(
        key: &str,
        operation: Operation,
        source: impl Into<TransportError>,
    ) -> Self {
        LockError::Transport {
            key: key.to_string(),
            operation,
            source: source.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, LockError::Config(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Contention { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, LockError::Transport { .. })
    }

    pub fn is_lost_lease(&self) -> bool {
        matches!(self, LockError::LostLease { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LockError::Transport {
                source: TransportError::Timeout(_),
                ..
            }
        )
    }

    /// Key the error refers to, when there is one.
    pub fn key(&self) -> Option<&str> {
        match self {
            LockError::Config(_) => None,
            LockError::Contention { key }
            | LockError::Transport { key, .. }
            | LockError::LostLease { key } => Some(key),
        }
    }
}

/// Result of [crate::do_exclusively]: either the lock failed or the task did.
#[derive(Debug, Error)]
pub enum ExclusiveError<E> {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("exclusive task failed: {0}")]
    Task(E),
}

impl<E> ExclusiveError<E> {
    pub fn lock_error(&self) -> Option<&LockError> {
        match self {
            ExclusiveError::Lock(e) => Some(e),
            ExclusiveError::Task(_) => None,
        }
    }

    pub fn into_task_error(self) -> Option<E> {
        match self {
            ExclusiveError::Task(e) => Some(e),
            ExclusiveError::Lock(_) => None,
        }
    }
}
