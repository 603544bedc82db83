//! qcoord-target: target/distribution snapshots and the observer contracts
//! a job waits on to know a collection has converged.
//!
//! Two independent notification streams exist in the reference design:
//! the target observer announces "current target updated" (the distribution
//! plan changed), and the collection observer announces "collection became
//! Loaded" (query nodes have actually caught up). Jobs only ever block on
//! the latter, bounded by a convergence timeout.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use qcoord_broker::RecoveryInfo;
use qcoord_types::{CollectionId, PartitionId};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("target backend unavailable")]
    Unavailable,
    #[error("convergence timed out")]
    Timeout,
}

/// A snapshot of the channels and segments a collection (or partition) should
/// be served from. `Next` is the plan; `Current` is what query nodes have
/// actually converged to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSnapshot {
    pub channels: Vec<String>,
    pub segment_ids: Vec<i64>,
}

impl From<RecoveryInfo> for TargetSnapshot {
    fn from(info: RecoveryInfo) -> Self {
        Self {
            channels: info.channels,
            segment_ids: info.segments.iter().map(|s| s.segment_id).collect(),
        }
    }
}

/// Announced whenever a collection or one of its partitions reaches `Loaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedEvent {
    pub collection_id: CollectionId,
    pub partition_id: Option<PartitionId>,
}

/// The target observer: computes and stores `Next`/`Current` target
/// snapshots and announces when `Current` changes.
#[async_trait]
pub trait TargetBackend: Send + Sync {
    async fn update_next_target(
        &self,
        collection_id: CollectionId,
        snapshot: TargetSnapshot,
    ) -> Result<(), TargetError>;

    async fn update_current_target(&self, collection_id: CollectionId) -> Result<(), TargetError>;

    fn next_target(&self, collection_id: CollectionId) -> Option<TargetSnapshot>;

    fn current_target(&self, collection_id: CollectionId) -> Option<TargetSnapshot>;

    /// Drops both `Next` and `Current` for a collection, on the release path.
    fn drop_target(&self, collection_id: CollectionId);

    /// Subscribes to "current target updated" notifications.
    fn subscribe_current_target_updated(&self) -> broadcast::Receiver<CollectionId>;
}

/// The collection observer: announces "collection/partition became
/// Loaded". Kept separate from [`TargetBackend`] because in the reference
/// design these are driven by unrelated control loops (distribution sync vs.
/// segment/channel health checks).
pub trait CollectionObserver: Send + Sync {
    fn subscribe_loaded(&self) -> broadcast::Receiver<LoadedEvent>;
}

/// In-memory implementation of both observer contracts, shared by tests and
/// the demo CLI. Production wires these to the real distribution-sync and
/// checker-controller loops, both out of scope for this core.
pub struct InMemoryTargetBackend {
    next: Mutex<HashMap<CollectionId, TargetSnapshot>>,
    current: Mutex<HashMap<CollectionId, TargetSnapshot>>,
    current_updated: broadcast::Sender<CollectionId>,
    loaded: broadcast::Sender<LoadedEvent>,
}

impl Default for InMemoryTargetBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTargetBackend {
    pub fn new() -> Self {
        let (current_updated, _) = broadcast::channel(256);
        let (loaded, _) = broadcast::channel(256);
        Self {
            next: Mutex::new(HashMap::new()),
            current: Mutex::new(HashMap::new()),
            current_updated,
            loaded,
        }
    }

    /// Test/demo helper: simulates query nodes finishing convergence by
    /// announcing that `collection_id` (optionally scoped to one partition)
    /// has become `Loaded`.
    pub fn announce_loaded(&self, collection_id: CollectionId, partition_id: Option<PartitionId>) {
        let _ = self.loaded.send(LoadedEvent {
            collection_id,
            partition_id,
        });
    }
}

#[async_trait]
impl TargetBackend for InMemoryTargetBackend {
    async fn update_next_target(
        &self,
        collection_id: CollectionId,
        snapshot: TargetSnapshot,
    ) -> Result<(), TargetError> {
        self.next.lock().unwrap().insert(collection_id, snapshot);
        Ok(())
    }

    async fn update_current_target(&self, collection_id: CollectionId) -> Result<(), TargetError> {
        let snapshot = self
            .next
            .lock()
            .unwrap()
            .get(&collection_id)
            .cloned()
            .ok_or(TargetError::Unavailable)?;
        self.current.lock().unwrap().insert(collection_id, snapshot);
        let _ = self.current_updated.send(collection_id);
        Ok(())
    }

    fn next_target(&self, collection_id: CollectionId) -> Option<TargetSnapshot> {
        self.next.lock().unwrap().get(&collection_id).cloned()
    }

    fn current_target(&self, collection_id: CollectionId) -> Option<TargetSnapshot> {
        self.current.lock().unwrap().get(&collection_id).cloned()
    }

    fn drop_target(&self, collection_id: CollectionId) {
        self.next.lock().unwrap().remove(&collection_id);
        self.current.lock().unwrap().remove(&collection_id);
    }

    fn subscribe_current_target_updated(&self) -> broadcast::Receiver<CollectionId> {
        self.current_updated.subscribe()
    }
}

impl CollectionObserver for InMemoryTargetBackend {
    fn subscribe_loaded(&self) -> broadcast::Receiver<LoadedEvent> {
        self.loaded.subscribe()
    }
}

/// Blocks until `observer` announces `collection_id` (and, if given,
/// `partition_id`) as `Loaded`, or until `timeout` elapses.
///
/// This is the shape a job's `Wait` step takes: bounded, cancellable, and
/// satisfied by any matching event already in flight on the subscription.
pub async fn wait_for_loaded(
    observer: &dyn CollectionObserver,
    collection_id: CollectionId,
    partition_id: Option<PartitionId>,
    timeout: Duration,
) -> Result<(), TargetError> {
    let mut rx = observer.subscribe_loaded();
    let matches = |event: &LoadedEvent| {
        event.collection_id == collection_id
            && (partition_id.is_none() || event.partition_id == partition_id)
    };
    tokio::time::timeout(timeout, async move {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return Ok(()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(TargetError::Unavailable),
            }
        }
    })
    .await
    .unwrap_or(Err(TargetError::Timeout))
}
