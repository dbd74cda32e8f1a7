//! Retryable-error classification, keyed by dialect.
//!
//! A [RetryableRegistry] is built once at start-up and passed to whatever retry
//! loop needs it. Classifiers registered for the same dialect are combined in
//! registration order and the first one answering `true` wins. The registry is
//! plain data, so tests and independent subsystems can each hold their own.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::{LockError, TransportError};

/// Decides whether one error in a source chain is worth retrying.
pub type IsRetryable = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

pub const PG_SERIALIZATION_FAILURE: &str = "40001";
pub const PG_DEADLOCK_DETECTED: &str = "40P01";
pub const PG_FEATURE_NOT_SUPPORTED: &str = "0A000";
pub const MYSQL_DEADLOCK: u16 = 1213;
pub const MYSQL_LOCK_WAIT_TIMEOUT: u16 = 1205;
pub const SQLITE_BUSY: i32 = 5;
pub const SQLITE_LOCKED: i32 = 6;

#[derive(Clone, Default)]
pub struct RetryableRegistry {
    classifiers: HashMap<Dialect, IsRetryable>,
}

impl fmt::Debug for RetryableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableRegistry")
            .field("dialects", &self.classifiers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RetryableRegistry {
    /// Empty registry: nothing is retryable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the classifiers for every backend compiled in.
    ///
    /// MSSQL has no bundled driver; register its classifier explicitly.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
        {
            registry.register(Dialect::Postgres, sqlx_classifiers::postgres);
            registry.register(Dialect::Pgx, sqlx_classifiers::postgres);
            registry.register(Dialect::Sqlite, sqlx_classifiers::sqlite);
        }
        #[cfg(feature = "mysql")]
        registry.register(Dialect::MySql, sqlx_classifiers::mysql);
        registry
    }

    pub fn register<F>(&mut self, dialect: Dialect, classifier: F)
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        let next: IsRetryable = Arc::new(classifier);
        let combined: IsRetryable = match self.classifiers.remove(&dialect) {
            Some(prev) => Arc::new(move |err: &(dyn StdError + 'static)| prev(err) || next(err)),
            None => next,
        };
        self.classifiers.insert(dialect, combined);
    }

    pub fn unregister_all(&mut self, dialect: Dialect) {
        self.classifiers.remove(&dialect);
    }

    /// Checks `err` and each of its sources against the dialect's classifiers.
    pub fn is_retryable(&self, dialect: Dialect, err: &(dyn StdError + 'static)) -> bool {
        let Some(classifier) = self.classifiers.get(&dialect) else {
            return false;
        };
        let mut current = Some(err);
        while let Some(e) = current {
            if classifier(e) {
                return true;
            }
            current = e.source();
        }
        false
    }

    /// Timeouts are always retryable; other transport failures go through
    /// the dialect's classifiers. Contention, lost leases and configuration
    /// errors are never retryable here.
    pub fn is_retryable_lock_error(&self, dialect: Dialect, err: &LockError) -> bool {
        match err {
            LockError::Transport {
                source: TransportError::Timeout(_),
                ..
            } => true,
            LockError::Transport { source, .. } => self.is_retryable(dialect, source),
            _ => false,
        }
    }
}

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
mod sqlx_classifiers {
    use std::error::Error as StdError;

    use super::*;

    fn database_error<'a>(
        err: &'a (dyn StdError + 'static),
    ) -> Option<&'a dyn sqlx::error::DatabaseError> {
        match err.downcast_ref::<sqlx::Error>()? {
            sqlx::Error::Database(db_err) => Some(&**db_err),
            _ => None,
        }
    }

    pub(super) fn postgres(err: &(dyn StdError + 'static)) -> bool {
        let Some(db_err) = database_error(err) else {
            return false;
        };
        match db_err.code().as_deref() {
            Some(PG_DEADLOCK_DETECTED | PG_SERIALIZATION_FAILURE) => true,
            // The driver re-prepares the statement after this one.
            Some(PG_FEATURE_NOT_SUPPORTED) => {
                db_err.message() == "cached plan must not change result type"
            }
            _ => false,
        }
    }

    /// Primary result code: the low byte of the extended code.
    pub(super) fn sqlite(err: &(dyn StdError + 'static)) -> bool {
        database_error(err)
            .and_then(|db_err| db_err.code())
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
    }

    #[cfg(feature = "mysql")]
    pub(super) fn mysql(err: &(dyn StdError + 'static)) -> bool {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db_err)) => db_err
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .is_some_and(|e| matches!(e.number(), MYSQL_DEADLOCK | MYSQL_LOCK_WAIT_TIMEOUT)),
            Some(sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }
}
