//! Shared Coordination Store
//!
//! Contract for the external key-value + queue + pub/sub service that
//! serializes all cross-process state. The engine and gateway only ever
//! talk to the [`Store`] trait; adapters live in `redis` (production) and
//! `memory` (tests, single-node runs).

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::game::GameId;

/// Key and channel layout shared by every process.
pub mod keys {
    use super::GameId;

    /// Queue of pending action requests.
    pub const TASK_QUEUE: &str = "blackjack:tasks";

    /// Pub/sub channel carrying all session events.
    pub const EVENTS_CHANNEL: &str = "game-events";

    /// Ordered list of session ids not yet active.
    pub const WAITING_INDEX: &str = "games:waiting";

    /// Session record key.
    pub fn game(id: &GameId) -> String {
        format!("game:{id}")
    }

    /// Session lock key (distinct namespace from the record).
    pub fn lock(id: &GameId) -> String {
        format!("lock:game:{id}")
    }

    /// Task result record key.
    pub fn task(id: &str) -> String {
        format!("task:{id}")
    }
}

/// Store-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend reported an error.
    #[error("store backend error: {0}")]
    Backend(#[from] ::redis::RedisError),

    /// The connection or channel is gone.
    #[error("store connection closed")]
    Closed,
}

/// Convenience alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Messages received from a pub/sub channel subscription.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next published message, or `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// The shared coordination store contract.
///
/// Everything the system needs from the external store: plain key-value
/// access, a blocking FIFO queue, ordered index lists, pub/sub fan-out,
/// and the two conditional operations the distributed lock relies on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value unconditionally.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Set only if the key is absent, with an expiry. Returns whether the
    /// write happened. Lock acquisition primitive.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete only if the stored value equals `value`, as one atomic step.
    /// Returns whether the key was deleted. Lock release primitive.
    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Push onto the head of a queue.
    async fn queue_push(&self, queue: &str, value: &str) -> StoreResult<()>;

    /// Pop from the tail of a queue, blocking until an item arrives.
    async fn queue_pop(&self, queue: &str) -> StoreResult<String>;

    /// Append to an ordered index list.
    async fn index_push(&self, index: &str, value: &str) -> StoreResult<()>;

    /// Remove every occurrence of `value` from an index list.
    async fn index_remove(&self, index: &str, value: &str) -> StoreResult<()>;

    /// Publish a message to a channel.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()>;

    /// Persist `key = value` and publish `message`, atomically: no observer
    /// may see the write without the event or the event without the write.
    async fn set_and_publish(
        &self,
        key: &str,
        value: &str,
        channel: &str,
        message: &str,
    ) -> StoreResult<()>;

    /// Delete `key` and publish `message`, atomically.
    async fn delete_and_publish(&self, key: &str, channel: &str, message: &str)
        -> StoreResult<()>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}
