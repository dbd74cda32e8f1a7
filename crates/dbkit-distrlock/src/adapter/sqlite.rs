//! SQLite: native upsert (3.24+) with timestamps stored as sortable UTC text.

use super::{ClaimStatement, DialectAdapter, Param, Statement};

const NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";
const DEADLINE: &str = "strftime('%Y-%m-%d %H:%M:%f', julianday('now') + ? / 86400000000.0)";

#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteAdapter;

fn quote(table: &str) -> String {
    format!("\"{table}\"")
}

impl DialectAdapter for SqliteAdapter {
    fn create_table_statement(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    lock_key TEXT NOT NULL PRIMARY KEY,
    owner_token TEXT NOT NULL,
    expires_at TEXT NOT NULL
)",
            quote(table)
        )
    }

    fn claim_statement(&self, table: &str) -> ClaimStatement {
        let table = quote(table);
        let sql = format!(
            "INSERT INTO {table} (lock_key, owner_token, expires_at)
VALUES (?, ?, {DEADLINE})
ON CONFLICT (lock_key) DO UPDATE
SET owner_token = excluded.owner_token, expires_at = excluded.expires_at
WHERE {table}.expires_at <= {NOW} OR {table}.owner_token IN (?, ?)"
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
