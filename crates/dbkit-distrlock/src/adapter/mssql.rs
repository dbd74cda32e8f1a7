//! SQL Server: `MERGE … WITH (HOLDLOCK)`.
//!
//! `HOLDLOCK` makes the merge take a serializable key-range lock, so the
//! matched/not-matched decision and the write cannot interleave with another
//! session's merge on the same key. Placeholders follow the `@P1` convention.

use super::{ClaimStatement, DialectAdapter, Param, Statement, MAX_KEY_LEN, OWNER_TOKEN_LEN};

const NOW: &str = "SYSUTCDATETIME()";

#[derive(Clone, Copy, Debug, Default)]
pub struct MssqlAdapter;

fn quote(table: &str) -> String {
    format!("[{table}]")
}

/// `DATEADD` rejects `bigint`, so split the millisecond TTL into whole seconds
/// and the rest, each cast to `INT`. The bound TTL is capped at
/// [super::MAX_TTL_MILLIS].
fn deadline(ttl_ms: &str) -> String {
    format!(
        "DATEADD(millisecond, CAST({ttl_ms} % 1000 AS INT), \
DATEADD(second, CAST({ttl_ms} / 1000 AS INT), {NOW}))"
    )
}

impl DialectAdapter for MssqlAdapter {
    fn create_table_statement(&self, table: &str) -> String {
        format!(
            "IF OBJECT_ID(N'{table}', N'U') IS NULL
CREATE TABLE {} (
    lock_key NVARCHAR({MAX_KEY_LEN}) NOT NULL PRIMARY KEY,
    owner_token NVARCHAR({OWNER_TOKEN_LEN}) NOT NULL,
    expires_at DATETIME2(6) NOT NULL
)",
            quote(table)
        )
    }

    fn claim_statement(&self, table: &str) -> ClaimStatement {
        let deadline = deadline("@P3");
        let sql = format!(
            "MERGE INTO {} WITH (HOLDLOCK) AS target
USING (SELECT @P1 AS lock_key) AS source
ON target.lock_key = source.lock_key
WHEN MATCHED AND (target.expires_at <= {NOW} OR target.owner_token IN (@P4, @P5)) THEN
    UPDATE SET owner_token = @P2, expires_at = {deadline}
WHEN NOT MATCHED THEN
    INSERT (lock_key, owner_token, expires_at) VALUES (@P1, @P2, {deadline});",
            quote(table)
        );
        ClaimStatement::Single(Statement::new(
            sql,
            &[
                Param::Key,
                Param::Token,
                Param::TtlMillis,
                Param::PreviousToken,
                Param::UnconfirmedToken,
            ],
        ))
    }

    fn release_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!(
                "DELETE FROM {} WHERE lock_key = @P1 AND owner_token IN (@P2, @P3)",
                quote(table)
            ),
            &[Param::Key, Param::Token, Param::UnconfirmedToken],
        )
    }

    fn extend_statement(&self, table: &str) -> Statement {
        Statement::new(
            format!(
                "UPDATE {} SET expires_at = {}
WHERE lock_key = @P1 AND owner_token IN (@P2, @P4) AND expires_at > {NOW}",
                quote(table),
                deadline("@P3")
            ),
            &[
                Param::Key,
                Param::Token,
                Param::TtlMillis,
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
