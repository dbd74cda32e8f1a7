//! Lock manager and exclusive-run configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::DEFAULT_TABLE_NAME;

/// Settings bound into a [crate::LockManager].
///
/// Deserializes from the application's own config files; every field has a
/// default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ManagerConfig {
    /// Lease table; must be a plain identifier.
    pub table_name: String,
    /// Upper bound for one lock statement. `None` waits as long as the driver does.
    pub statement_timeout_ms: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            statement_timeout_ms: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_ms.map(Duration::from_millis)
    }
}

/// Tuning for [crate::do_exclusively_with].
#[derive(Clone, Debug)]
pub struct ExclusiveOptions {
    pub lock_ttl: Duration,
    /// Re-extend the lease at this interval while the task runs.
    pub periodic_extend_interval: Option<Duration>,
    /// Budget for the final release, separate from the task's own runtime.
    pub release_timeout: Duration,
    pub manager: ManagerConfig,
}

impl Default for ExclusiveOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(60),
            periodic_extend_interval: None,
            release_timeout: Duration::from_secs(5),
            manager: ManagerConfig::default(),
        }
    }
}

impl ExclusiveOptions {
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_periodic_extend_interval(mut self, interval: Duration) -> Self {
        self.periodic_extend_interval = Some(interval);
        self
    }

    /// Extend every half TTL.
    pub fn with_auto_extend(mut self) -> Self {
        self.periodic_extend_interval = Some(self.lock_ttl / 2);
        self
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }
}
