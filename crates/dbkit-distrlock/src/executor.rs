//! The database handle the lock core runs its statements through.
//!
//! The lock never opens, pools or retries connections; callers hand in whatever
//! already-configured pool they use elsewhere. sqlx pools implement
//! [LockExecutor] behind the `postgres`, `mysql` and `sqlite` features. Other
//! drivers (for example an MSSQL client) implement the trait themselves.

use async_trait::async_trait;

use crate::error::ExecError;

/// A bound statement parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlArg {
    Text(String),
    Int(i64),
}

/// Executes one parameterized statement and reports the affected row count.
///
/// Implementations must report unique/primary key violations as
/// [ExecError::UniqueViolation]; the MySQL claim path depends on it.
#[async_trait]
pub trait LockExecutor: Send + Sync {
    async fn execute(&self, sql: &str, args: Vec<SqlArg>) -> Result<u64, ExecError>;
}

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
impl ExecError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            ExecError::UniqueViolation(Box::new(err))
        } else {
            ExecError::Database(Box::new(err))
        }
    }
}

#[cfg(any(feature = "postgres", feature = "mysql", feature = "sqlite"))]
macro_rules! impl_sqlx_executor {
    ($db:ty) => {
        #[async_trait]
        impl LockExecutor for sqlx::Pool<$db> {
            async fn execute(&self, sql: &str, args: Vec<SqlArg>) -> Result<u64, ExecError> {
                let mut query = sqlx::query(sql);
                for arg in args {
                    query = match arg {
                        SqlArg::Text(v) => query.bind(v),
                        SqlArg::Int(v) => query.bind(v),
                    };
                }
                let result = query.execute(self).await.map_err(ExecError::from_sqlx)?;
                Ok(result.rows_affected())
            }
        }
    };
}

#[cfg(feature = "postgres")]
impl_sqlx_executor!(sqlx::Postgres);

#[cfg(feature = "mysql")]
impl_sqlx_executor!(sqlx::MySql);

#[cfg(feature = "sqlite")]
impl_sqlx_executor!(sqlx::Sqlite);
