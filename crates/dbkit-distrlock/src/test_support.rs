//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::executor::{LockExecutor, SqlArg};

#[derive(Clone, Debug)]
pub(crate) struct RecordedCall {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

/// Replays queued outcomes in order and records every statement it sees.
pub(crate) struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<Result<u64, ExecError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: impl IntoIterator<Item = Result<u64, ExecError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, outcome: Result<u64, ExecError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LockExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str, args: Vec<SqlArg>) -> Result<u64, ExecError> {
        self.calls.lock().unwrap().push(RecordedCall {
            sql: sql.to_string(),
            args,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted outcome left for: {sql}"))
    }
}
