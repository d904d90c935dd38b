//! Redis Store Adapter
//!
//! Maps the [`Store`] contract onto Redis: SET NX PX for locks, a Lua
//! compare-and-delete for identity-checked release, LPUSH/BRPOP for the
//! task queue, and Lua set+publish so persistence and event emission are
//! one atomic step.

use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::{Store, StoreResult, Subscription};
use async_trait::async_trait;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

const SET_PUBLISH_SCRIPT: &str = r#"
redis.call("SET", KEYS[1], ARGV[1])
redis.call("PUBLISH", ARGV[2], ARGV[3])
return 1
"#;

const DELETE_PUBLISH_SCRIPT: &str = r#"
redis.call("DEL", KEYS[1])
redis.call("PUBLISH", ARGV[1], ARGV[2])
return 1
"#;

/// Redis-backed [`Store`] implementation.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
    /// Dedicated connection for BRPOP so a blocked pop cannot stall
    /// unrelated commands multiplexed on the main connection.
    blocking: Mutex<MultiplexedConnection>,
    release: Script,
    set_publish: Script,
    delete_publish: Script,
}

impl RedisStore {
    /// Connect to the Redis instance at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let blocking = Mutex::new(client.get_multiplexed_async_connection().await?);
        Ok(Self {
            client,
            conn,
            blocking,
            release: Script::new(RELEASE_SCRIPT),
            set_publish: Script::new(SET_PUBLISH_SCRIPT),
            delete_publish: Script::new(DELETE_PUBLISH_SCRIPT),
        })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn queue_push(&self, queue: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, value).await?;
        Ok(())
    }

    async fn queue_pop(&self, queue: &str) -> StoreResult<String> {
        let mut conn = self.blocking.lock().await;
        let (_, value): (String, String) = conn.brpop(queue, 0.0).await?;
        Ok(value)
    }

    async fn index_push(&self, index: &str, value: &str) -> StoreResult<()> {
        self.queue_push(index, value).await
    }

    async fn index_remove(&self, index: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lrem(index, 0, value).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn set_and_publish(
        &self,
        key: &str,
        value: &str,
        channel: &str,
        message: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .set_publish
            .key(key)
            .arg(value)
            .arg(channel)
            .arg(message)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_and_publish(
        &self,
        key: &str,
        channel: &str,
        message: &str,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .delete_publish
            .key(key)
            .arg(channel)
            .arg(message)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(rx))
    }
}
