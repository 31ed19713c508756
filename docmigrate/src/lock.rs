use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, TimeDelta, Utc};
use docmigrate_store::{Filter, Store, StoreError, Update};
use serde::{Deserialize, Serialize};
use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep_until, timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    config::MigrateConfig,
    error::{MigrateError, Result},
};

/// Lease record stored as the single document of the lock collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    #[serde(rename = "_id")]
    pub key: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Proof of ownership returned by [`LockManager::acquire`].
#[derive(Debug, Clone)]
pub struct LockHandle {
    lock: Lock,
}

impl LockHandle {
    pub fn owner_id(&self) -> &str {
        &self.lock.owner_id
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }
}

enum Attempt {
    Acquired(Lock),
    Held(Option<String>),
}

#[derive(Clone)]
pub struct LockManager {
    store: Store,
    collection: String,
    key: String,
    owner_id: String,
    config: MigrateConfig,
}

impl LockManager {
    pub fn new(store: Store, config: &MigrateConfig) -> Self {
        Self {
            store,
            collection: config.lock_collection.to_owned(),
            key: config.lock_key.to_owned(),
            owner_id: config.executor_id.to_owned(),
            config: config.clone(),
        }
    }

    /// Inserts the lock document, retrying with exponential backoff while a
    /// live lock exists. An expired lock is swapped out only if it is still
    /// the one that was read.
    pub async fn acquire(&self, timeout: Duration, lease: Duration) -> Result<LockHandle> {
        let started = Instant::now();
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.retry_interval)
            .with_max_interval(self.config.max_retry_interval)
            .with_max_elapsed_time(Some(timeout))
            .build();

        let lock = backoff::future::retry(backoff, move || async move {
            match self.try_acquire(lease).await {
                Ok(Attempt::Acquired(lock)) => Ok(lock),
                Ok(Attempt::Held(owner)) => {
                    debug!(
                        owner = owner.as_deref().unwrap_or("unknown"),
                        "migration lock is held, retrying"
                    );

                    Err(backoff::Error::transient(MigrateError::LockTimeout {
                        owner,
                        waited: started.elapsed(),
                    }))
                }
                Err(err) => Err(backoff::Error::permanent(err)),
            }
        })
        .await?;

        debug!(owner = %lock.owner_id, expires_at = %lock.expires_at, "acquired migration lock");

        Ok(LockHandle { lock })
    }

    async fn try_acquire(&self, lease: Duration) -> Result<Attempt> {
        let now = Utc::now();
        let lock = Lock {
            key: self.key.to_owned(),
            owner_id: self.owner_id.to_owned(),
            acquired_at: now,
            expires_at: expiry(now, lease),
        };

        match self.store.insert_one(&self.collection, &lock).await {
            Ok(_) => return Ok(Attempt::Acquired(lock)),
            Err(StoreError::DuplicateKey { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        let Some(current) = self
            .store
            .find_one(&self.collection, &Filter::by_id(&self.key))
            .await?
        else {
            return Ok(Attempt::Held(None));
        };

        let current_lock: Lock = serde_json::from_value(current.clone())?;

        if !current_lock.is_expired(now) {
            return Ok(Attempt::Held(Some(current_lock.owner_id)));
        }

        let prior = Filter::by_id(&self.key)
            .eq("ownerId", current["ownerId"].clone())
            .eq("expiresAt", current["expiresAt"].clone());

        if !self
            .store
            .replace_one(&self.collection, &prior, &lock)
            .await?
        {
            return Ok(Attempt::Held(None));
        }

        warn!(
            previous_owner = %current_lock.owner_id,
            expired_at = %current_lock.expires_at,
            "reclaimed expired migration lock"
        );

        Ok(Attempt::Acquired(lock))
    }

    /// Pushes the expiry of a lock still owned by `handle`. Returns `false`
    /// when the lock belongs to someone else.
    pub async fn renew(&self, handle: &LockHandle, lease: Duration) -> Result<bool> {
        let update = Update::new().set(
            "expiresAt",
            serde_json::to_value(expiry(Utc::now(), lease))?,
        );

        let matched = self
            .store
            .update(&self.collection, &self.owned_by(handle), &update)
            .await?;

        Ok(matched > 0)
    }

    /// Deletes the lock document if `handle` still owns it.
    pub async fn release(&self, handle: LockHandle) -> Result<()> {
        let deleted = self
            .store
            .delete(&self.collection, &self.owned_by(&handle))
            .await?;

        if deleted == 0 {
            return Err(MigrateError::LockLost {
                owner_id: handle.lock.owner_id,
            });
        }

        debug!(owner = %handle.lock.owner_id, "released migration lock");

        Ok(())
    }

    pub async fn current(&self) -> Result<Option<Lock>> {
        let lock = self
            .store
            .find_one(&self.collection, &Filter::by_id(&self.key))
            .await?;

        match lock {
            Some(lock) => Ok(Some(serde_json::from_value(lock)?)),
            None => Ok(None),
        }
    }

    /// Whether any process holds a non-expired lock.
    pub async fn is_held(&self) -> Result<bool> {
        let now = Utc::now();

        Ok(self
            .current()
            .await?
            .map(|lock| !lock.is_expired(now))
            .unwrap_or(false))
    }

    /// Acquires the lock with the configured timeout and lease and keeps it
    /// renewed until the guard is released or dropped.
    pub async fn lock(&self) -> Result<LockGuard> {
        self.config.validate()?;

        let lease = self.config.lease_duration;
        let handle = self.acquire(self.config.acquire_timeout, lease).await?;

        let remaining = (handle.lock.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(lease);

        let lost = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            self.clone(),
            handle.clone(),
            self.config.renew_interval(),
            lease,
            Instant::now() + remaining,
            lost.clone(),
        ));

        Ok(LockGuard {
            manager: self.clone(),
            handle: Some(handle),
            lease,
            heartbeat,
            lost,
        })
    }

    fn owned_by(&self, handle: &LockHandle) -> Filter {
        Filter::by_id(&self.key).eq("ownerId", handle.lock.owner_id.as_str())
    }
}

async fn heartbeat(
    manager: LockManager,
    handle: LockHandle,
    every: Duration,
    lease: Duration,
    mut deadline: Instant,
    lost: CancellationToken,
) {
    let mut interval = interval_at(Instant::now() + every, every);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = sleep_until(deadline) => {
                error!(owner = %handle.lock.owner_id, "migration lock lease ran out");
                lost.cancel();

                return;
            }
        }

        let renewing = Instant::now();

        match timeout_at(deadline, manager.renew(&handle, lease)).await {
            Ok(Ok(true)) => {
                deadline = renewing + lease;
                debug!(owner = %handle.lock.owner_id, "renewed migration lock");
            }
            Ok(Ok(false)) => {
                error!(owner = %handle.lock.owner_id, "migration lock was taken over");
                lost.cancel();

                return;
            }
            Ok(Err(err)) => warn!(error = %err, "failed to renew migration lock"),
            Err(_) => {
                error!(owner = %handle.lock.owner_id, "migration lock lease ran out");
                lost.cancel();

                return;
            }
        }
    }
}

/// Held migration lock with a background lease renewal.
///
/// Dropping the guard without [`LockGuard::release`] releases the lock in a
/// background task when a tokio runtime is available.
pub struct LockGuard {
    manager: LockManager,
    handle: Option<LockHandle>,
    lease: Duration,
    heartbeat: JoinHandle<()>,
    lost: CancellationToken,
}

impl LockGuard {
    /// Cancelled once the lock was taken over or the lease ran out.
    pub fn lost(&self) -> &CancellationToken {
        &self.lost
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Extends the lease if the lock is still ours, otherwise marks the guard
    /// lost and returns [`MigrateError::LockLost`].
    pub async fn ensure_held(&self) -> Result<()> {
        let Some(handle) = self.handle.as_ref().filter(|_| !self.is_lost()) else {
            return Err(self.lost_error());
        };

        if self.manager.renew(handle, self.lease).await? {
            return Ok(());
        }

        error!(owner = %handle.lock.owner_id, "migration lock was taken over");
        self.lost.cancel();

        Err(self.lost_error())
    }

    fn lost_error(&self) -> MigrateError {
        MigrateError::LockLost {
            owner_id: self.manager.owner_id.to_owned(),
        }
    }

    pub async fn release(mut self) -> Result<()> {
        self.heartbeat.abort();

        match self.handle.take() {
            Some(handle) => self.manager.release(handle).await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();

        let Some(handle) = self.handle.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(owner = %handle.lock.owner_id, "migration lock dropped outside a runtime, it will expire");
            return;
        };

        let manager = self.manager.clone();
        runtime.spawn(async move {
            if let Err(err) = manager.release(handle).await {
                warn!(error = %err, "failed to release dropped migration lock");
            }
        });
    }
}

fn expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
