//! Postgres (lib/pq and pgx style drivers): `INSERT … ON CONFLICT DO UPDATE … WHERE`.
//!
//! The conditional upsert takes the row lock on conflict and re-evaluates the
//! `WHERE` against the latest committed row under READ COMMITTED, so two racing
//! stealers of one expired lease serialize and only the first one matches.

use super::{ClaimStatement, DialectAdapter, Param, Statement, MAX_KEY_LEN, OWNER_TOKEN_LEN};

const DEADLINE: &str = "NOW() + $3::float8 * INTERVAL '1 microsecond'";

#[derive(Clone, Copy, Debug, Default)]
pub struct PostgresAdapter;

fn quote(table: &str) -> String {
    format!("\"{table}\"")
}

impl DialectAdapter for PostgresAdapter {
    fn create_table_statement(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    lock_key VARCHAR({MAX_KEY_LEN}) PRIMARY KEY,
    owner_token VARCHAR({OWNER_TOKEN_LEN}) NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
)",
            quote(table)
        )
    }

    fn claim_statement(&self, table: &str) -> ClaimStatement {
        let sql = format!(
            "INSERT INTO {} AS l (lock_key, owner_token, expires_at)
VALUES ($1, $2, {DEADLINE})
ON CONFLICT (lock_key) DO UPDATE
SET owner_token = EXCLUDED.owner_token, expires_at = EXCLUDED.expires_at
WHERE l.expires_at <= NOW() OR l.owner_token IN ($4, $5)",
            quote(table)
        );
        ClaimStatement::Single(Statement::new(
            sql,
            &[
                Param::Key,
                Param::Token,
                Param::TtlMicros,
                Param::PreviousToken,
                Param::UnconfirmedToken,
            ],
        ))
    }

    fn release_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!(
                "DELETE FROM {} WHERE lock_key = $1 AND owner_token IN ($2, $3)",
                quote(table)
            ),
            &[Param::Key, Param::Token, Param::UnconfirmedToken],
        )
    }

    fn extend_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!(
                "UPDATE {} SET expires_at = {DEADLINE}
WHERE lock_key = $1 AND owner_token IN ($2, $4) AND expires_at > NOW()",
                quote(table)
            ),
            &[
                Param::Key,
                Param::Token,
                Param::TtlMicros,
                Param::UnconfirmedToken,
            ],
        )
    }

    fn purge_expired_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!("DELETE FROM {} WHERE expires_at <= NOW()", quote(table)),
            &[],
        )
    }
}
