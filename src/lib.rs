//! Database toolkit for services that share a SQL database.
//!
//! Currently this is the [distrlock] crate: mutual exclusion across processes
//! through a lease table, for SQLite, MySQL, Postgres and MSSQL.

pub use dbkit_distrlock as distrlock;

pub use dbkit_distrlock::{
    do_exclusively, do_exclusively_with, Dialect, ExclusiveError, ExclusiveOptions, Lock,
    LockError, LockExecutor, LockManager, ManagerConfig, RetryableRegistry,
};
