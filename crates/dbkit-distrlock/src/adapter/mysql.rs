//! MySQL / InnoDB: conditional `UPDATE`, then plain `INSERT`.
//!
//! Both steps are single atomic statements. If a lease is stolen by someone
//! else between them, our insert fails on the primary key and is reported as
//! contention, so the pair never yields two owners whatever the isolation level.
//! The insert is a plain `INSERT`; `INSERT IGNORE` would also swallow truncation errors.

use super::{ClaimStatement, DialectAdapter, Param, Statement, MAX_KEY_LEN, OWNER_TOKEN_LEN};

const NOW: &str = "UTC_TIMESTAMP(6)";
const DEADLINE: &str = "UTC_TIMESTAMP(6) + INTERVAL ? MICROSECOND";

#[derive(Clone, Copy, Debug, Default)]
pub struct MySqlAdapter;

fn quote(table: &str) -> String {
    format!("`{table}`")
}

impl DialectAdapter for MySqlAdapter {
    fn create_table_statement(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    lock_key VARCHAR({MAX_KEY_LEN}) NOT NULL,
    owner_token VARCHAR({OWNER_TOKEN_LEN}) NOT NULL,
    expires_at DATETIME(6) NOT NULL,
    PRIMARY KEY (lock_key)
) ENGINE=InnoDB",
            quote(table)
        )
    }

    fn claim_statement(&self, table: &str) -> ClaimStatement {
        let table = quote(table);
        let update = Statement::new(
            format!(
                "UPDATE {table} SET owner_token = ?, expires_at = {DEADLINE}
WHERE lock_key = ? AND (expires_at <= {NOW} OR owner_token IN (?, ?))"
            ),
            &[
                Param::Token,
                Param::TtlMicros,
                Param::Key,
                Param::PreviousToken,
                Param::UnconfirmedToken,
            ],
        );
        let insert = Statement::new(
            format!(
                "INSERT INTO {table} (lock_key, owner_token, expires_at) VALUES (?, ?, {DEADLINE})"
            ),
            &[Param::Key, Param::Token, Param::TtlMicros],
        );
        ClaimStatement::UpdateThenInsert { update, insert }
    }

    fn release_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!(
                "DELETE FROM {} WHERE lock_key = ? AND owner_token IN (?, ?)",
                quote(table)
            ),
            &[Param::Key, Param::Token, Param::UnconfirmedToken],
        )
    }

    fn extend_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!(
                "UPDATE {} SET expires_at = {DEADLINE}
WHERE lock_key = ? AND owner_token IN (?, ?) AND expires_at > {NOW}",
                quote(table)
            ),
            &[
                Param::TtlMicros,
                Param::Key,
                Param::Token,
                Param::UnconfirmedToken,
            ],
        )
    }

    fn purge_expired_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!("DELETE FROM {} WHERE expires_at <= {NOW}", quote(table)),
            &[],
        )
    }
}
