//! qcoord-proxy: proxy cache-invalidation contract.
//!
//! Release jobs invalidate proxy caches before touching the catalog or meta;
//! a failure here is logged and swallowed by the
//! caller, never propagated, since proxy-side staleness is bounded by the
//! proxy's own cache TTL and is not a correctness issue for the coordinator.

use async_trait::async_trait;
use qcoord_types::CollectionId;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to reach proxy manager: {reason}")]
    Unreachable { reason: String },
}

/// The proxy manager: tells every proxy to drop its cached view of a
/// collection's metadata or shard leadership.
#[async_trait]
pub trait ProxyManager: Send + Sync {
    async fn invalidate_collection_meta_cache(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), ProxyError>;

    async fn invalidate_shard_leader_cache(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), ProxyError>;
}

/// A recording [`ProxyManager`] for tests: every call succeeds and is
/// appended to an in-memory log so assertions can check invalidation order.
#[derive(Default)]
pub struct RecordingProxyManager {
    calls: std::sync::Mutex<Vec<ProxyCall>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyCall {
    MetaCache(CollectionId),
    ShardLeaderCache(CollectionId),
}

impl RecordingProxyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ProxyCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProxyManager for RecordingProxyManager {
    async fn invalidate_collection_meta_cache(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), ProxyError> {
        self.calls
            .lock()
            .unwrap()
            .push(ProxyCall::MetaCache(collection_id));
        Ok(())
    }

    async fn invalidate_shard_leader_cache(
        &self,
        collection_id: CollectionId,
    ) -> Result<(), ProxyError> {
        self.calls
            .lock()
            .unwrap()
            .push(ProxyCall::ShardLeaderCache(collection_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_invocation_order() {
        let proxy = RecordingProxyManager::new();
        let id = CollectionId::new(7);
        proxy.invalidate_collection_meta_cache(id).await.unwrap();
        proxy.invalidate_shard_leader_cache(id).await.unwrap();

        assert_eq!(
            proxy.calls(),
            vec![ProxyCall::MetaCache(id), ProxyCall::ShardLeaderCache(id)]
        );
    }
}
