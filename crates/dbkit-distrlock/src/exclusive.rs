//! Run a future while holding a lock, with release on every exit path.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use log::debug;

use crate::config::ExclusiveOptions;
use crate::dialect::Dialect;
use crate::error::{ConfigError, ExclusiveError, LockError, Operation, TransportError};
use crate::executor::LockExecutor;
use crate::lock::Lock;
use crate::manager::LockManager;

enum TaskOutcome<T> {
    Finished(Result<T, Box<dyn Any + Send>>),
    LeaseLost(LockError),
}

/// Acquires `key` for `ttl`, runs `task`, then releases.
///
/// If the lock cannot be acquired the task is not started and the lock error is
/// returned. Otherwise the task runs exactly once and one release is attempted
/// afterwards, even if the task fails or panics (the panic resumes after the
/// release). A task error wins over a lost lease reported by the release.
///
/// ```no_run
/// # async fn run(pool: sqlx::SqlitePool) -> Result<(), Box<dyn std::error::Error>> {
/// use std::time::Duration;
/// use dbkit_distrlock::{do_exclusively, Dialect};
///
/// do_exclusively(&pool, Dialect::Sqlite, "nightly-report", Duration::from_secs(30), || async {
///     // only one process gets here at a time
///     Ok::<_, std::io::Error>(())
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn do_exclusively<E, F, Fut, T, TaskErr>(
    db: &E,
    dialect: Dialect,
    key: &str,
    ttl: Duration,
    task: F,
) -> Result<T, ExclusiveError<TaskErr>>
where
    E: LockExecutor + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TaskErr>>,
{
    let options = ExclusiveOptions::default().with_lock_ttl(ttl);
    do_exclusively_with(db, dialect, key, options, task).await
}

/// [do_exclusively] with periodic extension, a table override and a release budget.
///
/// With `periodic_extend_interval` set, the lease is extended by `lock_ttl` on
/// every tick while the task runs. If an extension fails the task is dropped
/// (cancelled) and the extension error is returned.
pub async fn do_exclusively_with<E, F, Fut, T, TaskErr>(
    db: &E,
    dialect: Dialect,
    key: &str,
    options: ExclusiveOptions,
    task: F,
) -> Result<T, ExclusiveError<TaskErr>>
where
    E: LockExecutor + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, TaskErr>>,
{
    if options.lock_ttl.is_zero() {
        return Err(LockError::from(ConfigError::InvalidTtl(options.lock_ttl)).into());
    }
    if let Some(interval) = options.periodic_extend_interval {
        if interval.is_zero() {
            return Err(LockError::from(ConfigError::InvalidExtendInterval(interval)).into());
        }
    }

    let manager = LockManager::new(dialect, options.manager.clone())?;
    let mut lock = manager.new_lock(key)?;
    lock.acquire(db, options.lock_ttl).await?;

    let task = AssertUnwindSafe(async move { task().await }).catch_unwind();
    let outcome = match options.periodic_extend_interval {
        None => TaskOutcome::Finished(task.await),
        Some(interval) => {
            tokio::select! {
                finished = task => TaskOutcome::Finished(finished),
                lost = keep_extending(&lock, db, options.lock_ttl, interval) => TaskOutcome::LeaseLost(lost),
            }
        }
    };

    let released = release_within(&mut lock, db, options.release_timeout).await;

    match outcome {
        TaskOutcome::Finished(Ok(Ok(value))) => {
            released?;
            Ok(value)
        }
        TaskOutcome::Finished(Ok(Err(task_err))) => {
            if let Err(e) = released {
                debug!("release after failed task on {key:?}: {e}");
            }
            Err(ExclusiveError::Task(task_err))
        }
        TaskOutcome::Finished(Err(panic)) => std::panic::resume_unwind(panic),
        TaskOutcome::LeaseLost(err) => Err(err.into()),
    }
}

/// Extends every `interval` until an extension fails; resolves to that failure.
async fn keep_extending<E>(lock: &Lock, db: &E, ttl: Duration, interval: Duration) -> LockError
where
    E: LockExecutor + ?Sized,
{
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        ticker.tick().await;
        if let Err(e) = lock.extend(db, ttl).await {
            debug!("stopping task on {:?}: extension failed: {e}", lock.key());
            return e;
        }
    }
}

async fn release_within<E>(lock: &mut Lock, db: &E, budget: Duration) -> Result<(), LockError>
where
    E: LockExecutor + ?Sized,
{
    let key = lock.key().to_string();
    match tokio::time::timeout(budget, lock.release(db)).await {
        Ok(released) => released,
        Err(_) => Err(LockError::transport(
            &key,
            Operation::Release,
            TransportError::Timeout(budget),
        )),
    }
}
