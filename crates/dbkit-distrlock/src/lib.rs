//! Distributed locks on top of a shared SQL database.
//!
//! A lock is a row in a lease table: `lock_key`, `owner_token`, `expires_at`.
//! Acquiring runs one atomic claim-or-steal statement that inserts the row,
//! overwrites it when its lease has expired, or changes nothing while another
//! owner's lease is live. Releasing deletes the row only if it still carries
//! our token. A crashed holder simply lets its lease run out; there is no
//! cleanup process.
//!
//! Supported dialects: SQLite, MySQL, Postgres (also via pgx-style drivers)
//! and MSSQL. See [Dialect].
//!
//! ```no_run
//! # async fn run(pool: sqlx::SqlitePool) -> Result<(), dbkit_distrlock::LockError> {
//! use std::time::Duration;
//! use dbkit_distrlock::{Dialect, LockExecutor, LockManager, ManagerConfig};
//!
//! let manager = LockManager::new(
//!     Dialect::Sqlite,
//!     ManagerConfig::default().with_table_name("my_distributed_locks"),
//! )?;
//! pool.execute(manager.create_table_sql(), vec![]).await.expect("create lock table");
//!
//! let mut lock = manager.new_lock("test-lock-key-2")?;
//! lock.acquire(&pool, Duration::from_secs(10)).await?;
//! // ... work ...
//! lock.release(&pool).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod dialect;
pub mod error;
pub mod exclusive;
pub mod executor;
pub mod lock;
pub mod manager;
pub mod retryable;

#[cfg(test)]
mod test_support;

pub use adapter::{ClaimStatement, DialectAdapter, Statement, DEFAULT_TABLE_NAME};
pub use config::{ExclusiveOptions, ManagerConfig};
pub use dialect::Dialect;
pub use error::{
    BoxError, ConfigError, ExclusiveError, ExecError, LockError, Operation, TransportError,
};
pub use exclusive::{do_exclusively, do_exclusively_with};
pub use executor::{LockExecutor, SqlArg};
pub use lock::Lock;
pub use manager::{create_table_sql, LockManager};
pub use retryable::{IsRetryable, RetryableRegistry};
