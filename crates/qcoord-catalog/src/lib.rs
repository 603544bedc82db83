//! qcoord-catalog: durable metadata catalog contract for the control plane.
//!
//! The catalog is the authoritative durable shadow of the in-memory `Meta`
//! aggregate (owned by `qcoord-meta`). It exposes exactly the write
//! operations the job subsystem needs; every call
//! is assumed atomic, and "the call returned `Ok`" is the only durability
//! signal a job may rely on — there is no read-back API here, because
//! `Meta` is the system of record for reads once a write has landed.
//!
//! [`InMemoryCatalog`] is the in-process implementation used by tests and
//! by the demo CLI; a production deployment backs [`Catalog`] with the real
//! metadata store (etcd, a KV service, ...), which is explicitly out of
//! scope for this core.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use qcoord_types::{Collection, CollectionId, Partition, PartitionId, Replica, ResourceGroup};

/// Errors a catalog backend can report. All are treated as terminal for the
/// calling step — the job layer decides whether to roll back or bubble up.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog write failed: {reason}")]
    WriteFailed { reason: String },
    #[error("catalog backend unavailable")]
    Unavailable,
}

/// The six atomic write operations the job subsystem drives.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Persists a collection aggregate together with its partitions.
    async fn save_collection(
        &self,
        collection: Collection,
        partitions: Vec<Partition>,
    ) -> Result<(), CatalogError>;

    /// Persists one or more replicas.
    async fn save_replicas(&self, replicas: Vec<Replica>) -> Result<(), CatalogError>;

    /// Removes every replica belonging to a collection. Used both for
    /// release and as a compensation for a failed load.
    async fn release_replicas(&self, collection_id: CollectionId) -> Result<(), CatalogError>;

    /// Persists (creates or updates) a resource group record.
    async fn save_resource_group(&self, group: ResourceGroup) -> Result<(), CatalogError>;

    /// Removes a collection (and, transitively, its partitions) from the catalog.
    async fn release_collection(&self, collection_id: CollectionId) -> Result<(), CatalogError>;

    /// Removes a subset of a collection's partitions.
    async fn release_partitions(
        &self,
        collection_id: CollectionId,
        partition_ids: Vec<PartitionId>,
    ) -> Result<(), CatalogError>;
}

/// A single write operation, named for test failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOp {
    SaveCollection,
    SaveReplicas,
    ReleaseReplicas,
    SaveResourceGroup,
    ReleaseCollection,
    ReleasePartitions,
}

#[derive(Default)]
struct CatalogState {
    collections: HashMap<CollectionId, (Collection, Vec<Partition>)>,
    replicas: HashMap<CollectionId, Vec<Replica>>,
    resource_groups: HashMap<String, ResourceGroup>,
}

/// In-memory [`Catalog`] used by tests and the demo CLI.
///
/// Supports one-shot failure injection via [`InMemoryCatalog::fail_once`],
/// which is how the rollback scenarios (e.g. "SaveCollection fails")
/// are exercised without a real, flaky backend.
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
    fail_once: Mutex<Option<CatalogOp>>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CatalogState::default()),
            fail_once: Mutex::new(None),
        }
    }

    /// Arms a single failure: the next call matching `op` returns
    /// [`CatalogError::WriteFailed`] instead of succeeding, then disarms.
    pub fn fail_once(&self, op: CatalogOp) {
        *self.fail_once.lock().unwrap() = Some(op);
    }

    /// Consumes the armed failure if it matches `op`, returning the error to raise.
    fn take_failure(&self, op: CatalogOp) -> Option<CatalogError> {
        let mut armed = self.fail_once.lock().unwrap();
        if *armed == Some(op) {
            *armed = None;
            Some(CatalogError::WriteFailed {
                reason: format!("injected failure for {op:?}"),
            })
        } else {
            None
        }
    }

    /// Test/CLI helper: returns the collection and its partitions, if persisted.
    pub fn get_collection(&self, id: CollectionId) -> Option<(Collection, Vec<Partition>)> {
        self.state.lock().unwrap().collections.get(&id).cloned()
    }

    /// Test/CLI helper: returns the replicas persisted for a collection.
    pub fn get_replicas(&self, id: CollectionId) -> Vec<Replica> {
        self.state
            .lock()
            .unwrap()
            .replicas
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Test/CLI helper: returns a resource group record, if persisted.
    pub fn get_resource_group(&self, name: &str) -> Option<ResourceGroup> {
        self.state.lock().unwrap().resource_groups.get(name).cloned()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn save_collection(
        &self,
        collection: Collection,
        partitions: Vec<Partition>,
    ) -> Result<(), CatalogError> {
        if let Some(err) = self.take_failure(CatalogOp::SaveCollection) {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        let merged = match state.collections.remove(&collection.collection_id) {
            Some((_, mut existing_partitions)) => {
                for partition in partitions {
                    match existing_partitions.iter_mut().find(|p| p.partition_id == partition.partition_id) {
                        Some(slot) => *slot = partition,
                        None => existing_partitions.push(partition),
                    }
                }
                existing_partitions
            }
            None => partitions,
        };
        state.collections.insert(collection.collection_id, (collection, merged));
        Ok(())
    }

    async fn save_replicas(&self, replicas: Vec<Replica>) -> Result<(), CatalogError> {
        if let Some(err) = self.take_failure(CatalogOp::SaveReplicas) {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        for replica in replicas {
            state
                .replicas
                .entry(replica.collection_id)
                .or_default()
                .push(replica);
        }
        Ok(())
    }

    async fn release_replicas(&self, collection_id: CollectionId) -> Result<(), CatalogError> {
        if let Some(err) = self.take_failure(CatalogOp::ReleaseReplicas) {
            return Err(err);
        }
        self.state.lock().unwrap().replicas.remove(&collection_id);
        Ok(())
    }

    async fn save_resource_group(&self, group: ResourceGroup) -> Result<(), CatalogError> {
        if let Some(err) = self.take_failure(CatalogOp::SaveResourceGroup) {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        state
            .resource_groups
            .insert(group.name.as_str().to_string(), group);
        Ok(())
    }

    async fn release_collection(&self, collection_id: CollectionId) -> Result<(), CatalogError> {
        if let Some(err) = self.take_failure(CatalogOp::ReleaseCollection) {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        state.collections.remove(&collection_id);
        state.replicas.remove(&collection_id);
        Ok(())
    }

    async fn release_partitions(
        &self,
        collection_id: CollectionId,
        partition_ids: Vec<PartitionId>,
    ) -> Result<(), CatalogError> {
        if let Some(err) = self.take_failure(CatalogOp::ReleasePartitions) {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        if let Some((_, partitions)) = state.collections.get_mut(&collection_id) {
            partitions.retain(|p| !partition_ids.contains(&p.partition_id));
        }
        Ok(())
    }
}
