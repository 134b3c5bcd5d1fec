//! Mutual exclusion over the attendance ledger.
//!
//! Every batch update holds the ledger lock from its first read to its last
//! write. `LocalLock` covers a single bot process; `LeaseLock` keeps the token
//! in the database so several processes can share one ledger, and expires it
//! so a crashed holder cannot block everyone forever. A held lease is renewed
//! in the background every third of its length until the guard goes away.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::{LockKind, LockSettings};
use crate::error::LedgerError;
use crate::sheet::StoreError;

#[async_trait]
pub trait LedgerLock: Send + Sync {
    /// Block until the lock is free or the configured timeout elapses.
    async fn acquire(&self) -> Result<LockGuard, LedgerError>;
}

/// Proof of holding the ledger lock.
///
/// Call [`LockGuard::release`] when done; dropping an unreleased guard
/// still frees the lock (lease deletion is then spawned onto the runtime).
#[must_use = "the ledger lock is released when the guard is released or dropped"]
pub struct LockGuard {
    held: Option<Held>,
}

enum Held {
    Local(OwnedMutexGuard<()>),
    Lease(Lease),
}

struct Lease {
    pool: SqlitePool,
    name: String,
    holder: String,
    heartbeat: JoinHandle<()>,
}

impl Lease {
    async fn delete(&self) -> Result<(), StoreError> {
        self.heartbeat.abort();
        sqlx::query("DELETE FROM ledger_locks WHERE name = ? AND holder = ?")
            .bind(&self.name)
            .bind(&self.holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Millisecond expiry `lease` from now, saturating instead of overflowing.
fn expiry_ms(now_ms: i64, lease: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX))
}

/// Push the lease expiry forward until aborted or the row stops being ours.
fn spawn_heartbeat(
    pool: SqlitePool,
    name: String,
    holder: String,
    lease: Duration,
) -> JoinHandle<()> {
    let every = (lease / 3).max(Duration::from_millis(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            let renewed = sqlx::query(
                "UPDATE ledger_locks SET expires_at_ms = ? WHERE name = ? AND holder = ?",
            )
            .bind(expiry_ms(Utc::now().timestamp_millis(), lease))
            .bind(&name)
            .bind(&holder)
            .execute(&pool)
            .await;
            match renewed {
                Ok(done) if done.rows_affected() == 1 => {}
                Ok(_) => {
                    warn!(%name, %holder, "ledger lease lost; stopping renewal");
                    return;
                }
                Err(err) => warn!(?err, %name, "failed to renew ledger lease"),
            }
        }
    })
}

impl LockGuard {
    pub async fn release(mut self) -> Result<(), StoreError> {
        match self.held.take() {
            Some(Held::Lease(lease)) => lease.delete().await,
            Some(Held::Local(guard)) => {
                drop(guard);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(Held::Lease(lease)) = self.held.take() {
            lease.heartbeat.abort();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = lease.delete().await {
                            warn!(?err, name = %lease.name, "failed to drop ledger lease; it will expire");
                        }
                    });
                }
                Err(_) => warn!(name = %lease.name, "no runtime to drop ledger lease; it will expire"),
            }
        }
    }
}

/// In-process lock backed by a tokio mutex.
#[derive(Clone)]
pub struct LocalLock {
    inner: Arc<Mutex<()>>,
    timeout: Duration,
}

impl LocalLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            timeout,
        }
    }
}

#[async_trait]
impl LedgerLock for LocalLock {
    async fn acquire(&self) -> Result<LockGuard, LedgerError> {
        let guard = tokio::time::timeout(self.timeout, self.inner.clone().lock_owned())
            .await
            .map_err(|_| LedgerError::LockTimeout(self.timeout))?;
        Ok(LockGuard {
            held: Some(Held::Local(guard)),
        })
    }
}

/// Lock token stored as a row in `ledger_locks`, polled until free.
#[derive(Debug, Clone)]
pub struct LeaseLock {
    pool: SqlitePool,
    name: String,
    timeout: Duration,
    poll_interval: Duration,
    lease: Duration,
}

impl LeaseLock {
    pub fn new(
        pool: SqlitePool,
        name: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            pool,
            name: name.into(),
            timeout,
            poll_interval,
            lease,
        }
    }

    /// One create-if-absent attempt. Expired leases are cleared first.
    async fn try_acquire(&self, holder: &str) -> Result<bool, StoreError> {
        let now = Utc::now().timestamp_millis();
        let expires = expiry_ms(now, self.lease);
        let cleared = sqlx::query("DELETE FROM ledger_locks WHERE name = ? AND expires_at_ms <= ?")
            .bind(&self.name)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if cleared > 0 {
            warn!(name = %self.name, "reclaimed expired ledger lease");
        }
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO ledger_locks (name, holder, expires_at_ms) VALUES (?, ?, ?)",
        )
        .bind(&self.name)
        .bind(holder)
        .bind(expires)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }
}

#[async_trait]
impl LedgerLock for LeaseLock {
    #[instrument(skip_all, fields(name = %self.name))]
    async fn acquire(&self) -> Result<LockGuard, LedgerError> {
        let holder = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.try_acquire(&holder).await? {
                debug!(%holder, "ledger lease acquired");
                let heartbeat = spawn_heartbeat(
                    self.pool.clone(),
                    self.name.clone(),
                    holder.clone(),
                    self.lease,
                );
                return Ok(LockGuard {
                    held: Some(Held::Lease(Lease {
                        pool: self.pool.clone(),
                        name: self.name.clone(),
                        holder,
                        heartbeat,
                    })),
                });
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(LedgerError::LockTimeout(self.timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Build the lock described by the `lock` config section.
pub fn from_settings(settings: &LockSettings, pool: &SqlitePool) -> Arc<dyn LedgerLock> {
    match settings.kind {
        LockKind::Local => Arc::new(LocalLock::new(settings.timeout())),
        LockKind::Lease => Arc::new(LeaseLock::new(
            pool.clone(),
            settings.name.clone(),
            settings.timeout(),
            settings.poll_interval(),
            settings.lease(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn lease_lock(pool: &SqlitePool, timeout_ms: u64, lease_ms: u64) -> LeaseLock {
        LeaseLock::new(
            pool.clone(),
            "sheet.lock",
            Duration::from_millis(timeout_ms),
            Duration::from_millis(10),
            Duration::from_millis(lease_ms),
        )
    }

    async fn lease_rows(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM ledger_locks")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn local_lock_times_out_while_held() {
        let lock = LocalLock::new(Duration::from_millis(30));
        let held = lock.acquire().await.unwrap();
        let err = lock.acquire().await.err().unwrap();
        assert!(matches!(err, LedgerError::LockTimeout(_)));

        held.release().await.unwrap();
        lock.acquire().await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn local_lock_frees_on_drop() {
        let lock = LocalLock::new(Duration::from_millis(30));
        {
            let _held = lock.acquire().await.unwrap();
        }
        assert!(lock.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn lease_excludes_second_holder_until_released() {
        let pool = setup_pool().await;
        let lock = lease_lock(&pool, 50, 60_000);

        let held = lock.acquire().await.unwrap();
        assert_eq!(lease_rows(&pool).await, 1);
        let err = lock.acquire().await.err().unwrap();
        assert!(err.is_retryable());

        held.release().await.unwrap();
        assert_eq!(lease_rows(&pool).await, 0);
        lock.acquire().await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let pool = setup_pool().await;
        // Row left behind by a holder that died without releasing.
        sqlx::query("INSERT INTO ledger_locks (name, holder, expires_at_ms) VALUES (?, ?, ?)")
            .bind("sheet.lock")
            .bind("crashed")
            .bind(Utc::now().timestamp_millis() - 1)
            .execute(&pool)
            .await
            .unwrap();

        let lock = lease_lock(&pool, 500, 60_000);
        let held = lock.acquire().await.unwrap();
        held.release().await.unwrap();
        assert_eq!(lease_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn held_lease_is_renewed_past_its_length() {
        let pool = setup_pool().await;
        let lock = lease_lock(&pool, 50, 60);
        let held = lock.acquire().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let err = lock.acquire().await.err().unwrap();
        assert!(matches!(err, LedgerError::LockTimeout(_)));

        held.release().await.unwrap();
        assert_eq!(lease_rows(&pool).await, 0);
        lock.acquire().await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn renewal_stops_once_the_lease_is_taken_over() {
        let pool = setup_pool().await;
        let lock = lease_lock(&pool, 50, 30);
        let held = lock.acquire().await.unwrap();
        sqlx::query("UPDATE ledger_locks SET holder = 'someone else'")
            .execute(&pool)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        held.release().await.unwrap();
        let holder: String = sqlx::query_scalar("SELECT holder FROM ledger_locks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(holder, "someone else");
    }

    #[test]
    fn huge_leases_saturate() {
        assert_eq!(expiry_ms(1_000, Duration::from_secs(u64::MAX)), i64::MAX);
        assert_eq!(expiry_ms(i64::MAX - 5, Duration::from_millis(10)), i64::MAX);
        assert_eq!(expiry_ms(1_000, Duration::from_millis(250)), 1_250);
    }

    #[tokio::test]
    async fn waiter_gets_lease_after_release() {
        let pool = setup_pool().await;
        let lock = lease_lock(&pool, 1_000, 60_000);
        let held = lock.acquire().await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await.map(|g| drop(g)) })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        held.release().await.unwrap();
        waiter.await.unwrap().unwrap();
    }
}
