//! Per-backend SQL for the lease table.
//!
//! Every backend expresses claim-or-steal as statements that are atomic on their
//! own: Postgres and SQLite use a native upsert, MySQL a conditional update
//! followed by a plain insert, MSSQL a `MERGE` under a key-range lock. A
//! [DialectAdapter] is picked once per [crate::LockManager] and the rendered
//! statements are cached there.

use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;
use crate::executor::SqlArg;

mod mssql;
mod mysql;
mod postgres;
mod sqlite;

pub use mssql::MssqlAdapter;
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

/// Table used when the caller does not override it.
pub const DEFAULT_TABLE_NAME: &str = "distributed_locks";

/// Width of the `lock_key` column.
pub const MAX_KEY_LEN: usize = 255;

/// Width of the `owner_token` column (hyphenated UUID).
pub const OWNER_TOKEN_LEN: usize = 36;

const MAX_TABLE_NAME_LEN: usize = 64;

/// Millisecond TTLs are capped so their whole seconds still fit a 32-bit `INT`.
pub const MAX_TTL_MILLIS: i64 = i32::MAX as i64 * 1000;

/// Logical parameter slot; statements list them in placeholder order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Key,
    /// Token written by a claim, or matched by release/extend.
    Token,
    /// Token the lock held before this claim; empty when idle.
    PreviousToken,
    /// Token of an earlier claim whose outcome never came back; empty when none.
    UnconfirmedToken,
    TtlMicros,
    TtlMillis,
}

/// Values for one execution of a statement template.
#[derive(Clone, Copy, Debug)]
pub struct ParamValues<'a> {
    pub key: &'a str,
    pub token: &'a str,
    pub previous_token: &'a str,
    pub unconfirmed_token: &'a str,
    pub ttl: Duration,
}

impl ParamValues<'_> {
    fn arg(&self, param: Param) -> SqlArg {
        match param {
            Param::Key => SqlArg::Text(self.key.to_string()),
            Param::Token => SqlArg::Text(self.token.to_string()),
            Param::PreviousToken => SqlArg::Text(self.previous_token.to_string()),
            Param::UnconfirmedToken => SqlArg::Text(self.unconfirmed_token.to_string()),
            Param::TtlMicros => SqlArg::Int(saturating_i64(self.ttl.as_micros())),
            Param::TtlMillis => {
                SqlArg::Int(saturating_i64(self.ttl.as_millis()).min(MAX_TTL_MILLIS))
            }
        }
    }
}

fn saturating_i64(v: u128) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// SQL text plus the parameters its placeholders expect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: &[Param]) -> Self {
        Self {
            sql: sql.into(),
            params: params.to_vec(),
        }
    }

    pub fn bind(&self, values: &ParamValues<'_>) -> Vec<SqlArg> {
        self.params.iter().map(|p| values.arg(*p)).collect()
    }
}

/// How a backend claims a key. Success is always "some statement affected a row".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimStatement {
    /// One upsert/merge that inserts, steals, or leaves a live foreign row alone.
    Single(Statement),
    /// Conditional update of an expired or own row; when it matches nothing the
    /// insert runs, and a duplicate key there means the key is held.
    UpdateThenInsert { update: Statement, insert: Statement },
}

/// Statement generation for one backend family.
pub trait DialectAdapter: Send + Sync + fmt::Debug {
    /// Idempotent DDL for the lease table.
    fn create_table_statement(&self, table: &str) -> String;

    /// Claim-or-steal over `(key, token, ttl, previous_token, unconfirmed_token)`.
    fn claim_statement(&self, table: &str) -> ClaimStatement;

    /// Delete over `(key, token, unconfirmed_token)`; affects a row only while we still own it.
    fn release_statement(&self, table: &str) -> Statement;

    /// Push the deadline over `(key, token, unconfirmed_token, ttl)` while the lease is still live.
    fn extend_statement(&self, table: &str) -> Statement;

    /// Delete every expired row.
    fn purge_expired_statement(&self, table: &str) -> Statement;
}

/// Table names end up inside quoted identifiers, so keep them to plain words.
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start
        && name.len() <= MAX_TABLE_NAME_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(ConfigError::InvalidTableName(name.to_string()))
    }
}
