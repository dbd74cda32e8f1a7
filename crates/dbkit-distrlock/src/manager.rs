//! Lock manager: one dialect plus one lease table, and the factory for [Lock]s.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::adapter::{
    validate_table_name, ClaimStatement, ParamValues, Statement, MAX_KEY_LEN,
};
use crate::config::ManagerConfig;
use crate::dialect::Dialect;
use crate::error::{ConfigError, LockError, Operation, TransportError};
use crate::executor::LockExecutor;
use crate::lock::Lock;

/// DDL for the default lease table of `dialect`.
pub fn create_table_sql(dialect: Dialect) -> String {
    dialect
        .adapter()
        .create_table_statement(crate::adapter::DEFAULT_TABLE_NAME)
}

/// Statements rendered once for the bound dialect/table, shared by every lock.
#[derive(Debug)]
pub(crate) struct ManagerInner {
    dialect: Dialect,
    table_name: String,
    statement_timeout: Option<Duration>,
    create_table: String,
    claim: ClaimStatement,
    release: Statement,
    extend: Statement,
    purge_expired: Statement,
}

impl ManagerInner {
    async fn run<E>(
        &self,
        db: &E,
        stmt: &Statement,
        values: &ParamValues<'_>,
        unique_violation_is_miss: bool,
    ) -> Result<u64, TransportError>
    where
        E: LockExecutor + ?Sized,
    {
        let pending = db.execute(&stmt.sql, stmt.bind(values));
        let outcome = match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => pending.await,
        };
        match outcome {
            Ok(rows) => Ok(rows),
            Err(e) if unique_violation_is_miss && e.is_unique_violation() => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs the claim plan; `true` when this attempt now owns the row.
    pub(crate) async fn claim<E>(
        &self,
        db: &E,
        values: &ParamValues<'_>,
    ) -> Result<bool, TransportError>
    where
        E: LockExecutor + ?Sized,
    {
        match &self.claim {
            ClaimStatement::Single(stmt) => Ok(self.run(db, stmt, values, false).await? > 0),
            ClaimStatement::UpdateThenInsert { update, insert } => {
                if self.run(db, update, values, false).await? > 0 {
                    return Ok(true);
                }
                Ok(self.run(db, insert, values, true).await? > 0)
            }
        }
    }

    pub(crate) async fn release<E>(
        &self,
        db: &E,
        values: &ParamValues<'_>,
    ) -> Result<u64, TransportError>
    where
        E: LockExecutor + ?Sized,
    {
        self.run(db, &self.release, values, false).await
    }

    pub(crate) async fn extend<E>(
        &self,
        db: &E,
        values: &ParamValues<'_>,
    ) -> Result<u64, TransportError>
    where
        E: LockExecutor + ?Sized,
    {
        self.run(db, &self.extend, values, false).await
    }
}

/// Binds a dialect and a lease table; hands out [Lock] handles.
///
/// The manager never touches the database on its own: run
/// [LockManager::create_table_sql] through your migration tooling first.
#[derive(Clone, Debug)]
pub struct LockManager {
    inner: Arc<ManagerInner>,
}

impl LockManager {
    pub fn new(dialect: Dialect, config: ManagerConfig) -> Result<Self, LockError> {
        validate_table_name(&config.table_name)?;
        let adapter = dialect.adapter();
        let table = config.table_name.as_str();
        let inner = ManagerInner {
            dialect,
            statement_timeout: config.statement_timeout(),
            create_table: adapter.create_table_statement(table),
            claim: adapter.claim_statement(table),
            release: adapter.release_statement(table),
            extend: adapter.extend_statement(table),
            purge_expired: adapter.purge_expired_statement(table),
            table_name: config.table_name,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Like [LockManager::new] with the dialect given by driver name (`"mysql"`, `"pgx"`, …).
    pub fn from_dialect_name(dialect: &str, config: ManagerConfig) -> Result<Self, LockError> {
        Self::new(dialect.parse()?, config)
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn table_name(&self) -> &str {
        &self.inner.table_name
    }

    /// Idempotent DDL for the bound table; safe to run on every start.
    pub fn create_table_sql(&self) -> &str {
        &self.inner.create_table
    }

    /// Creates an idle lock for `key`. Nothing is written until [Lock::acquire].
    pub fn new_lock(&self, key: impl Into<String>) -> Result<Lock, LockError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ConfigError::EmptyKey.into());
        }
        if key.len() > MAX_KEY_LEN {
            return Err(ConfigError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
            }
            .into());
        }
        Ok(Lock::new(key, Arc::clone(&self.inner)))
    }

    /// Deletes expired rows. Optional: expired rows are stolen in place anyway.
    pub async fn purge_expired<E>(&self, db: &E) -> Result<u64, LockError>
    where
        E: LockExecutor + ?Sized,
    {
        let values = ParamValues {
            key: "",
            token: "",
            previous_token: "",
            unconfirmed_token: "",
            ttl: Duration::ZERO,
        };
        let purged = self
            .inner
            .run(db, &self.inner.purge_expired, &values, false)
            .await
            .map_err(|e| LockError::transport(self.table_name(), Operation::PurgeExpired, e))?;
        debug!(
            "purged {} expired lock rows from {}",
            purged, self.inner.table_name
        );
        Ok(purged)
    }
}
