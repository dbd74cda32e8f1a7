//! SQL dialect identifiers.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::{
    DialectAdapter, MssqlAdapter, MySqlAdapter, PostgresAdapter, SqliteAdapter,
};
use crate::error::ConfigError;

/// Backends the lock table can live in.
///
/// The string form matches the driver names used in DSN configuration
/// (`sqlite3`, `mysql`, `postgres`, `pgx`, `mssql`).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum Dialect {
    #[serde(rename = "sqlite3")]
    #[strum(to_string = "sqlite3")]
    Sqlite,
    #[serde(rename = "mysql")]
    #[strum(to_string = "mysql")]
    MySql,
    #[serde(rename = "postgres")]
    #[strum(to_string = "postgres")]
    Postgres,
    /// Postgres reached through a pgx-style driver. Same SQL as [Dialect::Postgres].
    #[serde(rename = "pgx")]
    #[strum(to_string = "pgx")]
    Pgx,
    #[serde(rename = "mssql")]
    #[strum(to_string = "mssql")]
    Mssql,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::Sqlite,
        Dialect::MySql,
        Dialect::Postgres,
        Dialect::Pgx,
        Dialect::Mssql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite3",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Pgx => "pgx",
            Dialect::Mssql => "mssql",
        }
    }

    /// Returns the statement generator for this backend family.
    pub fn adapter(&self) -> Arc<dyn DialectAdapter> {
        match self {
            Dialect::Sqlite => Arc::new(SqliteAdapter),
            Dialect::MySql => Arc::new(MySqlAdapter),
            Dialect::Postgres | Dialect::Pgx => Arc::new(PostgresAdapter),
            Dialect::Mssql => Arc::new(MssqlAdapter),
        }
    }
}

impl FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dialect::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownDialect(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_name() {
        for dialect in Dialect::ALL {
            let parsed: Dialect = dialect.as_str().parse().unwrap();
            assert_eq!(parsed, dialect);
            assert_eq!(dialect.to_string(), dialect.as_str());
        }
    }

    #[test]
    fn unknown_name_is_config_error() {
        let err = "oracle".parse::<Dialect>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDialect(ref name) if name == "oracle"));
    }

    #[test]
    fn pgx_shares_postgres_sql() {
        let pg = Dialect::Postgres.adapter();
        let pgx = Dialect::Pgx.adapter();
        assert_eq!(
            pg.create_table_statement("locks"),
            pgx.create_table_statement("locks")
        );
    }

    #[test]
    fn deserializes_from_driver_name() {
        let dialect: Dialect = serde_json::from_str("\"sqlite3\"").unwrap();
        assert_eq!(dialect, Dialect::Sqlite);
    }
}
