//! In-process implementations of the storage and queue seams.
//!
//! They honour the same contracts as the S3 and Redis backends (lease expiry,
//! receipts, missing-queue errors) and back the test suite.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::services::queue::{DurableQueue, LeaseHandle, LeasedMessage, QueueError, QueueResult};
use crate::services::storage::{ArtifactStore, StorageError, StorageResult};

struct Lease {
    receipt: String,
    deadline: Instant,
}

#[derive(Default)]
struct QueueState {
    exists: bool,
    next_id: u64,
    ready: VecDeque<String>,
    payloads: HashMap<String, String>,
    leases: BTreeMap<String, Lease>,
}

/// In-memory durable queue. Lease deadlines use `tokio::time::Instant`, so
/// tests can drive expiry with paused time.
pub struct MemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    never_create: bool,
    create_calls: AtomicUsize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// A queue that does not exist until `create_if_missing` is called.
    pub fn new() -> Self {
        Self {
            name: "memory-queue".to_string(),
            state: Mutex::new(QueueState::default()),
            never_create: false,
            create_calls: AtomicUsize::new(0),
        }
    }

    /// A queue that already exists.
    pub fn created() -> Self {
        let queue = Self::new();
        queue.lock().exists = true;
        queue
    }

    /// A queue whose creation silently never takes effect.
    pub fn always_missing() -> Self {
        Self {
            never_create: true,
            ..Self::new()
        }
    }

    /// Simulate external deletion of the queue and all its messages.
    pub fn drop_queue(&self) {
        *self.lock() = QueueState::default();
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Messages not yet acknowledged, leased or not.
    pub fn unacked(&self) -> usize {
        self.lock().payloads.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    async fn create_if_missing(&self) -> QueueResult<bool> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.never_create {
            return Ok(false);
        }
        let mut state = self.lock();
        let created = !state.exists;
        state.exists = true;
        Ok(created)
    }

    async fn enqueue(&self, payload: &str) -> QueueResult<String> {
        let mut state = self.lock();
        if !state.exists {
            return Err(QueueError::Missing(self.name.clone()));
        }
        state.next_id += 1;
        let message_id = format!("{:08}", state.next_id);
        state.payloads.insert(message_id.clone(), payload.to_string());
        state.ready.push_back(message_id.clone());
        Ok(message_id)
    }

    async fn lease_receive(
        &self,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<LeasedMessage>> {
        let now = Instant::now();
        let mut state = self.lock();
        if !state.exists {
            return Err(QueueError::Missing(self.name.clone()));
        }

        let expired: Vec<String> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired.into_iter().rev() {
            state.leases.remove(&id);
            state.ready.push_front(id);
        }

        while let Some(message_id) = state.ready.pop_front() {
            let Some(payload) = state.payloads.get(&message_id).cloned() else {
                continue;
            };
            let receipt = Uuid::new_v4().to_string();
            state.leases.insert(
                message_id.clone(),
                Lease {
                    receipt: receipt.clone(),
                    deadline: now + visibility_timeout,
                },
            );
            return Ok(Some(LeasedMessage {
                handle: LeaseHandle {
                    message_id,
                    receipt,
                },
                payload,
            }));
        }
        Ok(None)
    }

    async fn delete(&self, handle: &LeaseHandle) -> QueueResult<bool> {
        let now = Instant::now();
        let mut state = self.lock();
        if !state.exists {
            return Err(QueueError::Missing(self.name.clone()));
        }

        let live = state
            .leases
            .get(&handle.message_id)
            .is_some_and(|lease| lease.receipt == handle.receipt && lease.deadline > now);
        if !live {
            return Ok(false);
        }
        state.leases.remove(&handle.message_id);
        state.payloads.remove(&handle.message_id);
        Ok(true)
    }
}

/// In-memory artifact store keyed by `container/key`.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    containers: Mutex<BTreeSet<String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn path(container: &str, key: &str) -> String {
        format!("{}/{}", container, key)
    }

    fn store(&self, container: &str, key: &str, data: Vec<u8>) -> StorageResult<String> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                status: 503,
                key: Self::path(container, key),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(Self::path(container, key), data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(format!("memory://{}", Self::path(container, key)))
    }

    fn load(&self, container: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&Self::path(container, key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn ensure_container(&self, container: &str) -> StorageResult<()> {
        self.containers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(container.to_string());
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: &[u8],
        _content_type: &str,
    ) -> StorageResult<String> {
        self.store(container, key, data.to_vec())
    }

    async fn put_file(&self, container: &str, key: &str, path: &Path) -> StorageResult<String> {
        let data = tokio::fs::read(path).await?;
        self.store(container, key, data)
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.load(container, key)
    }

    async fn get_to_file(&self, container: &str, key: &str, path: &Path) -> StorageResult<()> {
        let data = self.load(container, key)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(&Self::path(container, key)))
    }

    async fn list(&self, container: &str) -> StorageResult<Vec<String>> {
        let prefix = format!("{}/", container);
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_redelivers_same_message() {
        let queue = MemoryQueue::created();
        let id = queue.enqueue("job").await.unwrap();

        let first = queue.lease_receive(LEASE).await.unwrap().unwrap();
        assert_eq!(first.handle.message_id, id);
        assert!(queue.lease_receive(LEASE).await.unwrap().is_none());

        tokio::time::advance(LEASE + Duration::from_millis(1)).await;

        let second = queue.lease_receive(LEASE).await.unwrap().unwrap();
        assert_eq!(second.handle.message_id, id);
        assert_eq!(second.payload, "job");
        assert_ne!(second.handle.receipt, first.handle.receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_delete_is_harmless() {
        let queue = MemoryQueue::created();
        queue.enqueue("a").await.unwrap();
        queue.enqueue("b").await.unwrap();

        let a = queue.lease_receive(LEASE).await.unwrap().unwrap();
        tokio::time::advance(LEASE * 2).await;
        let a_again = queue.lease_receive(LEASE).await.unwrap().unwrap();
        let b = queue.lease_receive(LEASE).await.unwrap().unwrap();
        assert_eq!(a_again.handle.message_id, a.handle.message_id);

        // old receipt for a re-leased message
        assert!(!queue.delete(&a.handle).await.unwrap());
        // unknown handle
        let unknown = LeaseHandle {
            message_id: "nope".to_string(),
            receipt: "nope".to_string(),
        };
        assert!(!queue.delete(&unknown).await.unwrap());
        assert_eq!(queue.unacked(), 2);

        assert!(queue.delete(&a_again.handle).await.unwrap());
        assert!(queue.delete(&b.handle).await.unwrap());
        // double delete
        assert!(!queue.delete(&b.handle).await.unwrap());
        assert_eq!(queue.unacked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_but_unclaimed_handle_cannot_delete() {
        let queue = MemoryQueue::created();
        queue.enqueue("a").await.unwrap();
        let leased = queue.lease_receive(LEASE).await.unwrap().unwrap();
        tokio::time::advance(LEASE).await;
        assert!(!queue.delete(&leased.handle).await.unwrap());
        assert_eq!(queue.unacked(), 1);
    }

    #[tokio::test]
    async fn test_receive_is_fifo() {
        let queue = MemoryQueue::created();
        queue.enqueue("first").await.unwrap();
        queue.enqueue("second").await.unwrap();
        let a = queue.lease_receive(LEASE).await.unwrap().unwrap();
        let b = queue.lease_receive(LEASE).await.unwrap().unwrap();
        assert_eq!(a.payload, "first");
        assert_eq!(b.payload, "second");
    }

    #[tokio::test]
    async fn test_dropped_queue_reports_missing() {
        let queue = MemoryQueue::created();
        queue.enqueue("a").await.unwrap();
        queue.drop_queue();
        assert!(matches!(
            queue.lease_receive(LEASE).await,
            Err(QueueError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn test_store_roundtrip_and_listing() {
        let store = MemoryArtifactStore::new();
        store.put("out", "a.json", b"{}", "application/json").await.unwrap();
        store.put("in", "b.mp4", b"video", "video/mp4").await.unwrap();

        assert!(store.exists("out", "a.json").await.unwrap());
        assert!(!store.exists("out", "b.mp4").await.unwrap());
        assert_eq!(store.list("out").await.unwrap(), vec!["a.json".to_string()]);
        assert!(store.get("out", "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_store_write_failure() {
        let store = MemoryArtifactStore::new();
        store.set_fail_writes(true);
        assert!(store.put("out", "a", b"x", "text/plain").await.is_err());
        assert_eq!(store.write_count(), 0);
    }
}
