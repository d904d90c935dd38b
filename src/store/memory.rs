//! In-Memory Store
//!
//! Single-process implementation of the [`Store`] contract. Used by unit
//! tests and single-node runs; every operation takes the one inner mutex,
//! which makes the combined set-and-publish steps trivially atomic.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};

use super::{Store, StoreResult, Subscription};
use async_trait::async_trait;

const CHANNEL_CAPACITY: usize = 256;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct ListSlot {
    items: VecDeque<String>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, Entry>,
    lists: HashMap<String, ListSlot>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl Inner {
    /// Value of a key, dropping it first if its TTL lapsed.
    fn live_value(&mut self, key: &str) -> Option<&str> {
        let now = Instant::now();
        if self.kv.get(key).is_some_and(|e| e.is_expired(now)) {
            self.kv.remove(key);
        }
        self.kv.get(key).map(|e| e.value.as_str())
    }

    fn channel(&mut self, name: &str) -> &broadcast::Sender<String> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
    }

    fn publish(&mut self, channel: &str, message: &str) {
        // A send error just means nobody is subscribed yet.
        let _ = self.channel(channel).send(message.to_string());
    }
}

/// In-process [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_value(key).map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.live_value(key).is_some() {
            return Ok(false);
        }
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.live_value(key) == Some(value) {
            inner.kv.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn queue_push(&self, queue: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner.lists.entry(queue.to_string()).or_default();
        slot.items.push_front(value.to_string());
        slot.notify.notify_one();
        Ok(())
    }

    async fn queue_pop(&self, queue: &str) -> StoreResult<String> {
        loop {
            let notify = {
                let mut inner = self.inner.lock().await;
                let slot = inner.lists.entry(queue.to_string()).or_default();
                if let Some(item) = slot.items.pop_back() {
                    return Ok(item);
                }
                slot.notify.clone()
            };
            notify.notified().await;
        }
    }

    async fn index_push(&self, index: &str, value: &str) -> StoreResult<()> {
        self.queue_push(index, value).await
    }

    async fn index_remove(&self, index: &str, value: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.lists.get_mut(index) {
            slot.items.retain(|item| item != value);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.publish(channel, message);
        Ok(())
    }

    async fn set_and_publish(
        &self,
        key: &str,
        value: &str,
        channel: &str,
        message: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        inner.publish(channel, message);
        Ok(())
    }

    async fn delete_and_publish(
        &self,
        key: &str,
        channel: &str,
        message: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.kv.remove(key);
        inner.publish(channel, message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut rx = {
            let mut inner = self.inner.lock().await;
            inner.channel(channel).subscribe()
        };
        let (tx, out) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_if_absent_excludes_second_writer() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_succeeds_after_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("lock", "a", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_if_absent("lock", "b", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_equals_checks_identity() {
        let store = MemoryStore::new();
        store
            .set_if_absent("lock", "owner", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!store.delete_if_equals("lock", "imposter").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some("owner".to_string()));
        assert!(store.delete_if_equals("lock", "owner").await.unwrap());
        assert_eq!(store.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let store = MemoryStore::new();
        store.queue_push("q", "first").await.unwrap();
        store.queue_push("q", "second").await.unwrap();
        assert_eq!(store.queue_pop("q").await.unwrap(), "first");
        assert_eq!(store.queue_pop("q").await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_queue_pop_blocks_until_push() {
        let store = Arc::new(MemoryStore::new());
        let producer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.queue_push("q", "late").await.unwrap();
        });
        let item = tokio::time::timeout(Duration::from_secs(1), store.queue_pop("q"))
            .await
            .expect("pop should wake on push")
            .unwrap();
        assert_eq!(item, "late");
    }

    #[tokio::test]
    async fn test_index_remove_drops_all_occurrences() {
        let store = MemoryStore::new();
        store.index_push("idx", "a").await.unwrap();
        store.index_push("idx", "b").await.unwrap();
        store.index_push("idx", "a").await.unwrap();
        store.index_remove("idx", "a").await.unwrap();
        assert_eq!(store.queue_pop("idx").await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_subscribe_receives_published_messages() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("events").await.unwrap();
        store.publish("events", "hello").await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert_eq!(message, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_set_and_publish_delivers_both() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("events").await.unwrap();
        store
            .set_and_publish("game:1", "{}", "events", "updated")
            .await
            .unwrap();
        assert_eq!(store.get("game:1").await.unwrap(), Some("{}".to_string()));
        let message = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert_eq!(message, Some("updated".to_string()));
    }
}
