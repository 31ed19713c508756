//! Configuration constants and defaults for docmigrate runs.

use std::time::Duration;
use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// Collection holding one history record per change unit.
pub const HISTORY_COLLECTION: &str = "migration_history";

/// Collection holding the single lock document.
pub const LOCK_COLLECTION: &str = "migration_lock";

/// `_id` of the lock document.
pub const LOCK_KEY: &str = "docmigrate";

/// How long an acquired lock stays valid without renewal.
pub const LEASE_DURATION: Duration = Duration::from_secs(60);

/// How long a run waits for another process to release the lock.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(180);

/// First delay between two acquisition attempts; later delays grow
/// exponentially up to [`MAX_RETRY_INTERVAL`].
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    pub history_collection: String,
    pub lock_collection: String,
    pub lock_key: String,

    /// Identity written into history records and the lock document.
    pub executor_id: String,

    pub lease_duration: Duration,
    pub acquire_timeout: Duration,
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,

    /// Interval between lease renewals, a third of the lease when unset.
    pub renew_interval: Option<Duration>,
}

impl MigrateConfig {
    pub fn renew_interval(&self) -> Duration {
        self.renew_interval.unwrap_or(self.lease_duration / 3)
    }

    /// Checks that the lease can be renewed before it runs out.
    pub fn validate(&self) -> Result<()> {
        let renew = self.renew_interval();

        if self.lease_duration.is_zero() {
            return Err(MigrateError::InvalidConfig(
                "lease duration must be greater than zero".to_owned(),
            ));
        }

        if renew.is_zero() || renew >= self.lease_duration {
            return Err(MigrateError::InvalidConfig(format!(
                "renew interval {renew:?} must be non-zero and shorter than the lease duration {:?}",
                self.lease_duration
            )));
        }

        if self.retry_interval.is_zero() {
            return Err(MigrateError::InvalidConfig(
                "retry interval must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            history_collection: HISTORY_COLLECTION.to_owned(),
            lock_collection: LOCK_COLLECTION.to_owned(),
            lock_key: LOCK_KEY.to_owned(),
            executor_id: format!("{}-{}", std::process::id(), Uuid::new_v4()),
            lease_duration: LEASE_DURATION,
            acquire_timeout: ACQUIRE_TIMEOUT,
            retry_interval: RETRY_INTERVAL,
            max_retry_interval: MAX_RETRY_INTERVAL,
            renew_interval: None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigBuilder {
    config: MigrateConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MigrateConfig::default(),
        }
    }

    pub fn history_collection(mut self, name: impl Into<String>) -> Self {
        self.config.history_collection = name.into();
        self
    }

    pub fn lock_collection(mut self, name: impl Into<String>) -> Self {
        self.config.lock_collection = name.into();
        self
    }

    pub fn lock_key(mut self, key: impl Into<String>) -> Self {
        self.config.lock_key = key.into();
        self
    }

    pub fn executor_id(mut self, id: impl Into<String>) -> Self {
        self.config.executor_id = id.into();
        self
    }

    pub fn lease_duration(mut self, lease: Duration) -> Self {
        self.config.lease_duration = lease;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Sets the first and the maximum delay between acquisition attempts.
    pub fn retry_interval(mut self, initial: Duration, max: Duration) -> Self {
        self.config.retry_interval = initial;
        self.config.max_retry_interval = max.max(initial);
        self
    }

    pub fn renew_interval(mut self, interval: Duration) -> Self {
        self.config.renew_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<MigrateConfig> {
        self.config.validate()?;

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
