//! Lock semantics against a real SQLite lease table.

#![cfg(feature = "sqlite")]

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dbkit_distrlock::{
    do_exclusively, Dialect, ExecError, LockError, LockExecutor, LockManager, ManagerConfig,
    SqlArg,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One connection, kept forever: every in-memory connection is its own database.
async fn memory_pool() -> SqlitePool {
    init_logger();
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite")
}

/// Several connections to one database file, so claims really interleave.
async fn file_pool(dir: &tempfile::TempDir, connections: u32) -> SqlitePool {
    init_logger();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("locks.db"))
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(10));
    SqlitePoolOptions::new()
        .max_connections(connections)
        .connect_with(options)
        .await
        .expect("open sqlite file")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Blip {
    /// The statement never reaches the database.
    BeforeWrite,
    /// The statement commits but its reply is lost.
    AfterWrite,
}

/// Passes statements to SQLite, failing the next one in the configured way.
struct FlakyDb {
    pool: SqlitePool,
    blip: Mutex<Option<Blip>>,
}

impl FlakyDb {
    fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            blip: Mutex::new(None),
        }
    }

    fn fail_next(&self, blip: Blip) {
        *self.blip.lock().unwrap() = Some(blip);
    }
}

#[async_trait]
impl LockExecutor for FlakyDb {
    async fn execute(&self, sql: &str, args: Vec<SqlArg>) -> Result<u64, ExecError> {
        let blip = self.blip.lock().unwrap().take();
        if blip == Some(Blip::BeforeWrite) {
            return Err(ExecError::database("connection reset"));
        }
        let rows = self.pool.execute(sql, args).await?;
        if blip == Some(Blip::AfterWrite) {
            return Err(ExecError::database("connection reset"));
        }
        Ok(rows)
    }
}

async fn row_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM distributed_locks")
        .fetch_one(pool)
        .await
        .expect("count lock rows")
}

async fn manager_with_table(pool: &SqlitePool, config: ManagerConfig) -> LockManager {
    let manager = LockManager::new(Dialect::Sqlite, config).expect("sqlite manager");
    pool.execute(manager.create_table_sql(), vec![])
        .await
        .expect("create lock table");
    manager
}

async fn stored_token(pool: &SqlitePool, key: &str) -> Option<String> {
    sqlx::query_scalar("SELECT owner_token FROM distributed_locks WHERE lock_key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .expect("read lock row")
}

#[tokio::test]
async fn first_acquire_of_fresh_key_succeeds() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut lock = manager.new_lock("fresh").unwrap();

    lock.acquire(&pool, Duration::from_millis(1)).await.unwrap();

    assert_eq!(stored_token(&pool, "fresh").await.as_deref(), lock.token());
}

#[tokio::test]
async fn create_table_twice_is_idempotent() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;

    pool.execute(manager.create_table_sql(), vec![])
        .await
        .expect("second create must not fail");
}

#[tokio::test]
async fn contention_then_handover() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let ttl = Duration::from_secs(10);
    let mut a = manager.new_lock("job-42").unwrap();
    let mut b = manager.new_lock("job-42").unwrap();

    a.acquire(&pool, ttl).await.unwrap();
    let err = b.acquire(&pool, ttl).await.unwrap_err();
    assert!(err.is_contention(), "{err}");

    a.release(&pool).await.unwrap();
    assert_eq!(stored_token(&pool, "job-42").await, None);

    b.acquire(&pool, ttl).await.unwrap();
    assert_eq!(stored_token(&pool, "job-42").await.as_deref(), b.token());
}

#[tokio::test]
async fn expired_lease_is_stolen_and_stale_release_is_lost() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut a = manager.new_lock("job-7").unwrap();
    let mut b = manager.new_lock("job-7").unwrap();

    a.acquire(&pool, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    b.acquire(&pool, Duration::from_secs(1)).await.unwrap();
    let b_token = b.token().unwrap().to_string();
    assert_ne!(a.token(), Some(b_token.as_str()));

    let err = a.release(&pool).await.unwrap_err();
    assert!(matches!(err, LockError::LostLease { ref key } if key == "job-7"));
    assert_eq!(stored_token(&pool, "job-7").await, Some(b_token));
}

#[tokio::test]
async fn live_lease_blocks_until_its_deadline() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut a = manager.new_lock("deadline").unwrap();
    let mut b = manager.new_lock("deadline").unwrap();

    a.acquire(&pool, Duration::from_millis(400)).await.unwrap();
    assert!(b.acquire(&pool, Duration::from_secs(1)).await.unwrap_err().is_contention());

    tokio::time::sleep(Duration::from_millis(500)).await;
    b.acquire(&pool, Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn same_lock_reacquires_while_held() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut lock = manager.new_lock("again").unwrap();

    lock.acquire(&pool, Duration::from_secs(10)).await.unwrap();
    let first = lock.token().unwrap().to_string();
    lock.acquire(&pool, Duration::from_secs(10)).await.unwrap();

    assert_ne!(lock.token(), Some(first.as_str()));
    assert_eq!(stored_token(&pool, "again").await.as_deref(), lock.token());
}

#[tokio::test]
async fn extend_outlives_initial_ttl() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut a = manager.new_lock("long-job").unwrap();
    let mut b = manager.new_lock("long-job").unwrap();

    a.acquire(&pool, Duration::from_millis(300)).await.unwrap();
    a.extend(&pool, Duration::from_secs(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(b.acquire(&pool, Duration::from_secs(1)).await.unwrap_err().is_contention());
    a.release(&pool).await.unwrap();
}

#[tokio::test]
async fn extend_after_expiry_is_lost_lease() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut lock = manager.new_lock("late").unwrap();

    lock.acquire(&pool, Duration::from_millis(100)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = lock.extend(&pool, Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_lost_lease(), "{err}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(&dir, 8).await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;

    for round in 0..10 {
        let key = format!("race-{round}");
        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let mut lock = manager.new_lock(key.as_str()).unwrap();
            handles.push(tokio::spawn(async move {
                lock.acquire(&pool, Duration::from_secs(30)).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(err) => assert!(err.is_contention(), "{err}"),
            }
        }
        assert_eq!(winners, 1, "{key}");
    }
}

#[tokio::test]
async fn reacquire_recovers_from_lost_request() {
    let pool = memory_pool().await;
    manager_with_table(&pool, ManagerConfig::default()).await;
    let manager = LockManager::new(Dialect::Sqlite, ManagerConfig::default()).unwrap();
    let db = FlakyDb::new(pool.clone());
    let mut lock = manager.new_lock("job").unwrap();
    lock.acquire(&db, Duration::from_secs(10)).await.unwrap();

    db.fail_next(Blip::BeforeWrite);
    let err = lock.acquire(&db, Duration::from_secs(10)).await.unwrap_err();
    assert!(err.is_transport(), "{err}");
    assert!(lock.is_held());

    lock.acquire(&db, Duration::from_secs(10)).await.unwrap();
    lock.release(&db).await.unwrap();
    assert_eq!(row_count(&pool).await, 0);
}

#[tokio::test]
async fn reacquire_recovers_from_lost_reply() {
    let pool = memory_pool().await;
    manager_with_table(&pool, ManagerConfig::default()).await;
    let manager = LockManager::new(Dialect::Sqlite, ManagerConfig::default()).unwrap();
    let db = FlakyDb::new(pool.clone());
    let mut lock = manager.new_lock("job").unwrap();
    lock.acquire(&db, Duration::from_secs(10)).await.unwrap();

    db.fail_next(Blip::AfterWrite);
    lock.acquire(&db, Duration::from_secs(10)).await.unwrap_err();

    lock.acquire(&db, Duration::from_secs(10)).await.unwrap();
    assert_eq!(stored_token(&pool, "job").await.as_deref(), lock.token());
    lock.release(&db).await.unwrap();
    assert_eq!(row_count(&pool).await, 0);
}

#[tokio::test]
async fn release_cleans_up_after_lost_first_reply() {
    let pool = memory_pool().await;
    manager_with_table(&pool, ManagerConfig::default()).await;
    let manager = LockManager::new(Dialect::Sqlite, ManagerConfig::default()).unwrap();
    let db = FlakyDb::new(pool.clone());
    let mut lock = manager.new_lock("job").unwrap();

    db.fail_next(Blip::AfterWrite);
    lock.acquire(&db, Duration::from_secs(10)).await.unwrap_err();
    assert_eq!(row_count(&pool).await, 1);

    lock.release(&db).await.unwrap();
    assert_eq!(row_count(&pool).await, 0);
}

#[tokio::test]
async fn custom_table_name_is_used() {
    let pool = memory_pool().await;
    let manager = manager_with_table(
        &pool,
        ManagerConfig::default().with_table_name("my_distributed_locks"),
    )
    .await;
    let mut lock = manager.new_lock("test-lock-key-2").unwrap();

    lock.acquire(&pool, Duration::from_secs(10)).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM my_distributed_locks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
    lock.release(&pool).await.unwrap();
}

#[tokio::test]
async fn purge_removes_only_expired_rows() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut short = manager.new_lock("short").unwrap();
    let mut long = manager.new_lock("long").unwrap();

    short.acquire(&pool, Duration::from_millis(50)).await.unwrap();
    long.acquire(&pool, Duration::from_secs(30)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(manager.purge_expired(&pool).await.unwrap(), 1);
    assert_eq!(stored_token(&pool, "short").await, None);
    assert_eq!(stored_token(&pool, "long").await.as_deref(), long.token());
}

#[tokio::test]
async fn do_exclusively_releases_the_row() {
    let pool = memory_pool().await;
    manager_with_table(&pool, ManagerConfig::default()).await;

    let seen = do_exclusively(
        &pool,
        Dialect::Sqlite,
        "test-lock-key-1",
        Duration::from_secs(10),
        || async { Ok::<_, std::io::Error>(stored_token(&pool, "test-lock-key-1").await) },
    )
    .await
    .unwrap();

    assert!(seen.is_some(), "row must exist while the task runs");
    assert_eq!(stored_token(&pool, "test-lock-key-1").await, None);
}

#[tokio::test]
async fn do_exclusively_is_refused_while_key_is_held() {
    let pool = memory_pool().await;
    let manager = manager_with_table(&pool, ManagerConfig::default()).await;
    let mut holder = manager.new_lock("busy").unwrap();
    holder.acquire(&pool, Duration::from_secs(10)).await.unwrap();

    let err = do_exclusively(&pool, Dialect::Sqlite, "busy", Duration::from_secs(10), || async {
        Ok::<_, std::io::Error>(())
    })
    .await
    .unwrap_err();

    assert!(err.lock_error().is_some_and(LockError::is_contention));
    assert_eq!(stored_token(&pool, "busy").await.as_deref(), holder.token());
}
