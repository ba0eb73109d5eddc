use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use uuid::Uuid;

pub type QueueResult<T> = Result<T, QueueError>;

/// Handle proving ownership of one lease. A fresh receipt is issued every time
/// a message is received, so a handle from an expired lease can never delete
/// the message after another consumer has leased it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    pub message_id: String,
    pub receipt: String,
}

/// A message received under a lease.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub handle: LeaseHandle,
    pub payload: String,
}

/// At-least-once queue with lease-based receive.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Create the queue if it does not exist. Returns true when it was created.
    async fn create_if_missing(&self) -> QueueResult<bool>;

    /// Append a message, returning its id. Fails with [`QueueError::Missing`]
    /// when the queue does not exist.
    async fn enqueue(&self, payload: &str) -> QueueResult<String>;

    /// Receive at most one message, hiding it from other consumers for
    /// `visibility_timeout`. Fails with [`QueueError::Missing`] when the queue
    /// does not exist.
    async fn lease_receive(&self, visibility_timeout: Duration)
        -> QueueResult<Option<LeasedMessage>>;

    /// Acknowledge a leased message. Returns false, without touching any other
    /// message, when the handle is unknown or its lease has expired.
    async fn delete(&self, handle: &LeaseHandle) -> QueueResult<bool>;
}

/// Enqueue, recreating the queue and retrying once if it was deleted externally.
pub async fn enqueue_healing(queue: &dyn DurableQueue, payload: &str) -> QueueResult<String> {
    match queue.enqueue(payload).await {
        Err(QueueError::Missing(name)) => {
            tracing::warn!(queue = %name, "Queue missing on enqueue, recreating");
            queue.create_if_missing().await?;
            queue.enqueue(payload).await
        }
        other => other,
    }
}

/// Lease-receive, recreating the queue and retrying once if it was deleted externally.
pub async fn receive_healing(
    queue: &dyn DurableQueue,
    visibility_timeout: Duration,
) -> QueueResult<Option<LeasedMessage>> {
    match queue.lease_receive(visibility_timeout).await {
        Err(QueueError::Missing(name)) => {
            tracing::warn!(queue = %name, "Queue missing on receive, recreating");
            queue.create_if_missing().await?;
            queue.lease_receive(visibility_timeout).await
        }
        other => other,
    }
}

/// Moves expired leases back to the ready list, then leases the oldest ready
/// message. Replies `{"missing"}`, `{"empty"}` or `{"ok", id, payload}`.
const RECEIVE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return {'missing'}
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[4], id)
  redis.call('HDEL', KEYS[5], id)
  redis.call('RPUSH', KEYS[2], id)
end
while true do
  local id = redis.call('RPOP', KEYS[2])
  if not id then
    return {'empty'}
  end
  local payload = redis.call('HGET', KEYS[3], id)
  if payload then
    redis.call('ZADD', KEYS[4], ARGV[2], id)
    redis.call('HSET', KEYS[5], id, ARGV[3])
    return {'ok', id, payload}
  end
end
"#;

/// Deletes a message only while the caller's lease is live and its receipt
/// matches. Replies -1 when the queue is missing, 0 for a stale handle, 1 on delete.
const DELETE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
if redis.call('HGET', KEYS[4], ARGV[1]) ~= ARGV[2] then
  return 0
end
local deadline = tonumber(redis.call('ZSCORE', KEYS[3], ARGV[1]))
if deadline == nil or deadline <= tonumber(ARGV[3]) then
  return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return 1
"#;

/// Redis-backed durable queue with visibility-timeout leases.
///
/// Keys under `{name}`: `:meta` marks existence, `:ready` is the FIFO of
/// message ids, `:payloads` maps ids to payloads, `:leases` scores leased ids
/// by deadline (epoch ms) and `:receipts` holds the current receipt per lease.
pub struct RedisQueue {
    client: redis::Client,
    name: String,
    receive_script: redis::Script,
    delete_script: redis::Script,
}

impl RedisQueue {
    pub fn new(redis_url: &str, name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            name: name.to_string(),
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
            delete_script: redis::Script::new(DELETE_SCRIPT),
        })
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.name, suffix)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Number of messages waiting to be leased.
    pub async fn ready_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(self.key("ready")).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Delete the queue with every message and lease in it.
    pub async fn drop_queue(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = ["meta", "ready", "payloads", "leases", "receipts"]
            .iter()
            .map(|suffix| self.key(suffix))
            .collect();
        conn.del::<_, ()>(keys).await.map_err(QueueError::Redis)?;
        tracing::info!(queue = %self.name, "Dropped queue");
        Ok(())
    }
}

#[async_trait]
impl DurableQueue for RedisQueue {
    async fn create_if_missing(&self) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let created: bool = redis::cmd("SET")
            .arg(self.key("meta"))
            .arg(Utc::now().timestamp_millis())
            .arg("NX")
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(QueueError::Redis)?
            .is_some();
        if created {
            tracing::info!(queue = %self.name, "Created queue");
        }
        Ok(created)
    }

    async fn enqueue(&self, payload: &str) -> QueueResult<String> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(self.key("meta")).await.map_err(QueueError::Redis)?;
        if !exists {
            return Err(QueueError::Missing(self.name.clone()));
        }

        let message_id = Uuid::new_v4().to_string();
        redis::pipe()
            .atomic()
            .hset(self.key("payloads"), &message_id, payload)
            .ignore()
            .lpush(self.key("ready"), &message_id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        tracing::debug!(queue = %self.name, message_id = %message_id, "Enqueued message");
        Ok(message_id)
    }

    async fn lease_receive(
        &self,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<LeasedMessage>> {
        let mut conn = self.connection().await?;
        let now = Utc::now().timestamp_millis();
        let deadline = now + visibility_timeout.as_millis() as i64;
        let receipt = Uuid::new_v4().to_string();

        let reply: Vec<String> = self
            .receive_script
            .key(self.key("meta"))
            .key(self.key("ready"))
            .key(self.key("payloads"))
            .key(self.key("leases"))
            .key(self.key("receipts"))
            .arg(now)
            .arg(deadline)
            .arg(&receipt)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        match reply.as_slice() {
            [status] if status == "missing" => Err(QueueError::Missing(self.name.clone())),
            [status] if status == "empty" => Ok(None),
            [status, message_id, payload] if status == "ok" => Ok(Some(LeasedMessage {
                handle: LeaseHandle {
                    message_id: message_id.clone(),
                    receipt,
                },
                payload: payload.clone(),
            })),
            other => Err(QueueError::Protocol(format!("unexpected receive reply: {:?}", other))),
        }
    }

    async fn delete(&self, handle: &LeaseHandle) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let reply: i64 = self
            .delete_script
            .key(self.key("meta"))
            .key(self.key("payloads"))
            .key(self.key("leases"))
            .key(self.key("receipts"))
            .arg(&handle.message_id)
            .arg(&handle.receipt)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        match reply {
            1 => Ok(true),
            0 => Ok(false),
            _ => Err(QueueError::Missing(self.name.clone())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue {0} does not exist")]
    Missing(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue protocol error: {0}")]
    Protocol(String),
}
