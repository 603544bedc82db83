//! The locked `Meta` aggregate: the single authority job workers and
//! background observers mutate and read.
//!
//! A single coarse lock guards the whole [`State`] snapshot. A consistent
//! lock-ordering rule (resource-group, then replica, then
//! collection/partition) matters only when aggregates are independently
//! lockable; with one lock for the whole aggregate the ordering question
//! collapses, and every top-level mutation is already a single logical
//! transaction.

use std::sync::{Mutex, MutexGuard};

use qcoord_types::{Collection, CollectionId, LoadStatus, Partition, PartitionId, Replica, ResourceGroup, ResourceGroupName};

use crate::state::State;
use crate::MetaError;

/// The in-memory `Meta` aggregate.
#[derive(Default)]
pub struct Meta {
    state: Mutex<State>,
}

impl Meta {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("meta lock poisoned")
    }

    pub fn collection(&self, id: CollectionId) -> Option<Collection> {
        self.lock().collection(id).cloned()
    }

    pub fn collection_exists(&self, id: CollectionId) -> bool {
        self.lock().collection_exists(id)
    }

    pub fn partitions_of(&self, collection_id: CollectionId) -> Vec<Partition> {
        self.lock()
            .partitions_of(collection_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn partition(&self, collection_id: CollectionId, partition_id: PartitionId) -> Option<Partition> {
        self.lock().partition(collection_id, partition_id).cloned()
    }

    pub fn replicas_of(&self, collection_id: CollectionId) -> Vec<Replica> {
        self.lock()
            .replicas_of(collection_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn resource_group(&self, name: &ResourceGroupName) -> Option<ResourceGroup> {
        self.lock().resource_group(name).cloned()
    }

    /// Registers (or updates) a resource group.
    pub fn upsert_resource_group(&self, group: ResourceGroup) {
        let mut guard = self.lock();
        *guard = std::mem::take(&mut *guard).with_resource_group(group);
    }

    /// Installs a newly-loaded collection together with its initial
    /// partitions. Called after the catalog write for the step has already
    /// succeeded: meta never reports success ahead of a durable write.
    pub fn insert_collection(&self, collection: Collection, partitions: Vec<Partition>) {
        let mut guard = self.lock();
        let mut state = std::mem::take(&mut *guard).with_collection(collection);
        for partition in partitions {
            state = state.with_partition(partition);
        }
        *guard = state;
    }

    /// Adds partitions to an already-loaded collection (LoadPartition,
    /// SyncNewCreatedPartition).
    pub fn insert_partitions(&self, partitions: Vec<Partition>) {
        let mut guard = self.lock();
        let mut state = std::mem::take(&mut *guard);
        for partition in partitions {
            state = state.with_partition(partition);
        }
        *guard = state;
    }

    /// Admits a batch of replicas, validating group membership and node
    /// disjointness against the current state before any of them are
    /// installed.
    pub fn insert_replicas(&self, replicas: Vec<Replica>) -> Result<(), MetaError> {
        let mut guard = self.lock();
        let mut state = guard.clone();
        for replica in &replicas {
            state.validate_replica(replica)?;
            state = state.with_replica(replica.clone());
        }
        *guard = state;
        Ok(())
    }

    pub fn remove_replicas_of(&self, collection_id: CollectionId) {
        let mut guard = self.lock();
        *guard = std::mem::take(&mut *guard).without_replicas_of(collection_id);
    }

    pub fn remove_collection(&self, collection_id: CollectionId) {
        let mut guard = self.lock();
        *guard = std::mem::take(&mut *guard)
            .without_replicas_of(collection_id)
            .without_collection(collection_id);
    }

    /// Removes the named partitions. Returns `true` if the collection has no
    /// partitions left, signalling the caller should also drop the
    /// collection itself: a collection is destroyed by a ReleasePartition
    /// call that removes its last partition, same as an explicit release.
    pub fn remove_partitions(&self, collection_id: CollectionId, partition_ids: &[PartitionId]) -> bool {
        let mut guard = self.lock();
        *guard = std::mem::take(&mut *guard).without_partitions(collection_id, partition_ids);
        guard.partitions_of(collection_id).is_empty()
    }

    pub fn set_collection_status(&self, collection_id: CollectionId, status: LoadStatus) {
        let mut guard = self.lock();
        *guard = std::mem::take(&mut *guard).with_collection_status(collection_id, status);
    }

    pub fn set_partition_status(&self, collection_id: CollectionId, partition_id: PartitionId, status: LoadStatus) {
        let mut guard = self.lock();
        *guard = std::mem::take(&mut *guard).with_partition_status(collection_id, partition_id, status);
    }

    pub fn healthy_node_count(&self) -> usize {
        self.lock().healthy_node_count()
    }

    pub fn resource_groups_within_capacity(&self) -> bool {
        self.lock().resource_groups_within_capacity()
    }

    pub fn all_collection_ids(&self) -> Vec<CollectionId> {
        self.lock().all_collection_ids()
    }
}
