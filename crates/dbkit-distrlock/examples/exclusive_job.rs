//! Two workers race for the same nightly job; only one runs it.
//!
//! Run with:
//!   cargo run -p dbkit-distrlock --example exclusive_job
//!   cargo run -p dbkit-distrlock --example exclusive_job -- /tmp/locks.db
//!
//! Start it from several terminals against the same file to see cross-process
//! exclusion. Set `RUST_LOG=debug` to watch claims, extensions and releases.

use std::str::FromStr;
use std::time::Duration;

use dbkit_distrlock::{
    do_exclusively_with, Dialect, ExclusiveError, ExclusiveOptions, LockExecutor, LockManager,
    ManagerConfig,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

const JOB_KEY: &str = "nightly-report";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "distrlock-demo.db".to_string());
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    let manager = LockManager::new(Dialect::Sqlite, ManagerConfig::default())?;
    pool.execute(manager.create_table_sql(), vec![]).await?;

    let opts = ExclusiveOptions::default()
        .with_lock_ttl(Duration::from_secs(2))
        .with_auto_extend();

    let worker = |name: &'static str| {
        let pool = pool.clone();
        let opts = opts.clone();
        async move {
            let outcome = do_exclusively_with(&pool, Dialect::Sqlite, JOB_KEY, opts, || async {
                log::info!("{name}: running {JOB_KEY}");
                // Longer than the TTL: periodic extension keeps the lease alive.
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, std::io::Error>(())
            })
            .await;
            match outcome {
                Ok(()) => log::info!("{name}: finished {JOB_KEY}"),
                Err(ExclusiveError::Lock(err)) if err.is_contention() => {
                    log::info!("{name}: {JOB_KEY} is running elsewhere, skipping")
                }
                Err(err) => log::error!("{name}: {err}"),
            }
        }
    };

    tokio::join!(worker("worker-a"), worker("worker-b"));

    let purged = manager.purge_expired(&pool).await?;
    log::info!("purged {purged} expired lock rows");
    Ok(())
}
