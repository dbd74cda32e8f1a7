//! A lease on one key.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use uuid::Uuid;

use crate::adapter::ParamValues;
use crate::error::{ConfigError, LockError, Operation};
use crate::executor::LockExecutor;
use crate::manager::ManagerInner;

/// Handle for one key in the lease table.
///
/// A lock is idle until [Lock::acquire] succeeds and idle again after
/// [Lock::release]. Ownership is proven by a fresh UUID token minted on every
/// acquire; the database compares it on release and extend, so a lock whose
/// lease expired and was stolen cannot disturb the new owner.
///
/// When a claim fails in transit the handle cannot tell whether the row was
/// written. It keeps the token it held before and remembers the attempted one
/// as unconfirmed; the next acquire (which retries with that same token),
/// extend or release matches either.
///
/// Exclusivity holds only until the lease deadline. There is no background
/// renewal: pick a TTL longer than the critical section, or call
/// [Lock::extend] before it runs out.
#[derive(Debug)]
pub struct Lock {
    key: String,
    token: Option<String>,
    unconfirmed: Option<String>,
    manager: Arc<ManagerInner>,
}

fn ensure_positive(ttl: Duration) -> Result<(), LockError> {
    if ttl.is_zero() {
        return Err(ConfigError::InvalidTtl(ttl).into());
    }
    Ok(())
}

impl Lock {
    pub(crate) fn new(key: String, manager: Arc<ManagerInner>) -> Self {
        Self {
            key,
            token: None,
            unconfirmed: None,
            manager,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token of the last successful acquire, while this handle believes it holds the lease.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Local view only; the lease may already have expired on the database clock.
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    fn lost_lease(&self) -> LockError {
        LockError::LostLease {
            key: self.key.clone(),
        }
    }

    /// Claims the key for `ttl`, measured on the database clock.
    ///
    /// Fails with [LockError::Contention] while someone else holds a live
    /// lease; the handle is idle afterwards. Fails with [LockError::Transport]
    /// when the claim's outcome is unknown; the handle keeps what it held, so
    /// retrying the acquire or releasing still reaches its own row. Calling it
    /// again while held re-claims with a new token and deadline.
    pub async fn acquire<E>(&mut self, db: &E, ttl: Duration) -> Result<(), LockError>
    where
        E: LockExecutor + ?Sized,
    {
        ensure_positive(ttl)?;
        // Retrying an unconfirmed claim reuses its token, so the row can only
        // carry the previous token or this one.
        let token = self
            .unconfirmed
            .take()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let values = ParamValues {
            key: &self.key,
            token: &token,
            previous_token: self.token.as_deref().unwrap_or_default(),
            unconfirmed_token: &token,
            ttl,
        };

        let claimed = match self.manager.claim(db, &values).await {
            Ok(claimed) => claimed,
            Err(e) => {
                let err = LockError::transport(&self.key, Operation::Acquire, e);
                self.unconfirmed = Some(token);
                return Err(err);
            }
        };
        if !claimed {
            self.token = None;
            return Err(LockError::Contention {
                key: self.key.clone(),
            });
        }

        debug!("acquired lock {:?} for {:?}", self.key, ttl);
        self.token = Some(token);
        Ok(())
    }

    /// Moves the deadline to `now + ttl` if the lease is still ours and live.
    pub async fn extend<E>(&self, db: &E, ttl: Duration) -> Result<(), LockError>
    where
        E: LockExecutor + ?Sized,
    {
        ensure_positive(ttl)?;
        if self.token.is_none() && self.unconfirmed.is_none() {
            return Err(self.lost_lease());
        }
        let values = ParamValues {
            key: &self.key,
            token: self.token.as_deref().unwrap_or_default(),
            previous_token: "",
            unconfirmed_token: self.unconfirmed.as_deref().unwrap_or_default(),
            ttl,
        };
        let extended = self
            .manager
            .extend(db, &values)
            .await
            .map_err(|e| LockError::transport(&self.key, Operation::Extend, e))?;
        if extended == 0 {
            return Err(self.lost_lease());
        }
        debug!("extended lock {:?} by {:?}", self.key, ttl);
        Ok(())
    }

    /// Deletes the row if it still carries our token.
    ///
    /// [LockError::LostLease] means the lease had already expired (and maybe
    /// been taken over); the handle is idle afterwards either way. On a
    /// transport error the handle keeps its tokens so the release can be retried.
    pub async fn release<E>(&mut self, db: &E) -> Result<(), LockError>
    where
        E: LockExecutor + ?Sized,
    {
        if self.token.is_none() && self.unconfirmed.is_none() {
            return Err(self.lost_lease());
        }
        let values = ParamValues {
            key: &self.key,
            token: self.token.as_deref().unwrap_or_default(),
            previous_token: "",
            unconfirmed_token: self.unconfirmed.as_deref().unwrap_or_default(),
            ttl: Duration::ZERO,
        };
        let removed = self
            .manager
            .release(db, &values)
            .await
            .map_err(|e| LockError::transport(&self.key, Operation::Release, e))?;
        self.token = None;
        self.unconfirmed = None;
        if removed == 0 {
            debug!("lock {:?} was no longer ours at release", self.key);
            return Err(self.lost_lease());
        }
        debug!("released lock {:?}", self.key);
        Ok(())
    }
}
