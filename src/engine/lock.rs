//! Distributed Session Lock
//!
//! At-most-one-writer access to a session record, surviving worker death
//! through the store's key expiry. Acquisition retries on a fixed delay
//! inside a bounded window; release is identity-checked so a worker that
//! outlived its TTL cannot delete a lock now held by someone else.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::game::GameId;
use crate::store::{keys, Store, StoreResult};

/// Lock timing parameters.
///
/// The TTL must exceed the worst-case mutation latency; a second acquirer
/// running concurrently with a still-executing first owner is the failure
/// mode being bought off here.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lock key expiry.
    pub ttl: Duration,
    /// Delay between acquisition attempts.
    pub retry_interval: Duration,
    /// Total window before acquisition gives up.
    pub acquire_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            retry_interval: Duration::from_millis(100),
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

/// An acquired session lock. Hold it across the whole load-mutate-persist
/// sequence and release it on every exit path.
pub struct SessionLock {
    store: Arc<dyn Store>,
    key: String,
    token: String,
}

impl SessionLock {
    /// Try to acquire the lock for `game_id`, retrying until the
    /// configured window elapses. `None` means the session stayed locked
    /// by someone else for the whole window.
    pub async fn acquire(
        store: Arc<dyn Store>,
        game_id: &GameId,
        config: &LockConfig,
    ) -> StoreResult<Option<SessionLock>> {
        let key = keys::lock(game_id);
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + config.acquire_timeout;
        loop {
            if store.set_if_absent(&key, &token, config.ttl).await? {
                return Ok(Some(Self { store, key, token }));
            }
            if Instant::now() + config.retry_interval > deadline {
                return Ok(None);
            }
            sleep(config.retry_interval).await;
        }
    }

    /// The owner token proving this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock if we still own it. Returns whether the key was
    /// actually deleted; `false` means the TTL already expired and another
    /// acquirer may hold the key.
    pub async fn release(self) -> StoreResult<bool> {
        self.store.delete_if_equals(&self.key, &self.token).await
    }
}
