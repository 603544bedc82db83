//! Pure, lock-free snapshot of the control plane's in-memory metadata.
//!
//! `State` never does IO and never blocks; it only tracks the invariants of
//! the aggregates it holds. [`crate::Meta`] wraps a `State` behind a lock and
//! is the type job code actually talks to.

use std::collections::BTreeMap;

use qcoord_types::{Collection, CollectionId, Partition, PartitionId, Replica, ReplicaId, ResourceGroup, ResourceGroupName};

use crate::MetaError;

/// In-memory snapshot of every `Collection`, `Partition`, `Replica`, and
/// `ResourceGroup` the control plane currently owns.
#[derive(Debug, Clone, Default)]
pub struct State {
    collections: BTreeMap<CollectionId, Collection>,
    partitions: BTreeMap<CollectionId, BTreeMap<PartitionId, Partition>>,
    replicas: BTreeMap<ReplicaId, Replica>,
    resource_groups: BTreeMap<ResourceGroupName, ResourceGroup>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    // --- collections ---

    pub fn collection(&self, id: CollectionId) -> Option<&Collection> {
        self.collections.get(&id)
    }

    pub fn collection_exists(&self, id: CollectionId) -> bool {
        self.collections.contains_key(&id)
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collections.insert(collection.collection_id, collection);
        self
    }

    pub fn without_collection(mut self, id: CollectionId) -> Self {
        self.collections.remove(&id);
        self.partitions.remove(&id);
        self
    }

    pub fn with_collection_status(mut self, id: CollectionId, status: qcoord_types::LoadStatus) -> Self {
        if let Some(collection) = self.collections.get_mut(&id) {
            collection.status = status;
        }
        self
    }

    pub fn all_collection_ids(&self) -> Vec<CollectionId> {
        self.collections.keys().copied().collect()
    }

    // --- partitions ---

    pub fn partitions_of(&self, collection_id: CollectionId) -> Vec<&Partition> {
        self.partitions
            .get(&collection_id)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    pub fn partition(&self, collection_id: CollectionId, partition_id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&collection_id)?.get(&partition_id)
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partitions
            .entry(partition.collection_id)
            .or_default()
            .insert(partition.partition_id, partition);
        self
    }

    pub fn without_partitions(mut self, collection_id: CollectionId, partition_ids: &[PartitionId]) -> Self {
        if let Some(map) = self.partitions.get_mut(&collection_id) {
            for id in partition_ids {
                map.remove(id);
            }
        }
        self
    }

    pub fn with_partition_status(
        mut self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        status: qcoord_types::LoadStatus,
    ) -> Self {
        if let Some(partition) = self
            .partitions
            .get_mut(&collection_id)
            .and_then(|m| m.get_mut(&partition_id))
        {
            partition.status = status;
        }
        self
    }

    // --- replicas ---

    pub fn replicas_of(&self, collection_id: CollectionId) -> Vec<&Replica> {
        self.replicas
            .values()
            .filter(|r| r.collection_id == collection_id)
            .collect()
    }

    /// Checks the replica aggregate's invariants before the replica is
    /// admitted: its nodes must be disjoint from every other
    /// replica of the same collection, and must all be current members of
    /// its named resource group.
    pub fn validate_replica(&self, replica: &Replica) -> Result<(), MetaError> {
        let group = self
            .resource_groups
            .get(&replica.resource_group)
            .ok_or_else(|| MetaError::ResourceGroupNotFound(replica.resource_group.clone()))?;

        for node in &replica.nodes {
            if !group.nodes.contains(node) {
                return Err(MetaError::ReplicaNodeNotInGroup {
                    node: *node,
                    group: replica.resource_group.clone(),
                });
            }
        }

        for existing in self.replicas_of(replica.collection_id) {
            if existing.replica_id == replica.replica_id {
                continue;
            }
            if !existing.nodes.is_disjoint(&replica.nodes) {
                return Err(MetaError::ReplicaNodeOverlap {
                    collection_id: replica.collection_id,
                });
            }
        }

        Ok(())
    }

    pub fn with_replica(mut self, replica: Replica) -> Self {
        self.replicas.insert(replica.replica_id, replica);
        self
    }

    pub fn without_replicas_of(mut self, collection_id: CollectionId) -> Self {
        self.replicas.retain(|_, r| r.collection_id != collection_id);
        self
    }

    // --- resource groups ---

    pub fn resource_group(&self, name: &ResourceGroupName) -> Option<&ResourceGroup> {
        self.resource_groups.get(name)
    }

    pub fn with_resource_group(mut self, group: ResourceGroup) -> Self {
        self.resource_groups.insert(group.name.clone(), group);
        self
    }

    pub fn healthy_node_count(&self) -> usize {
        self.resource_groups
            .values()
            .map(|g| g.nodes.len())
            .sum()
    }

    /// Invariant check for the resource-group aggregate: the sum of
    /// every group's `requests_node_num` must not exceed the number of
    /// healthy nodes across all groups.
    pub fn resource_groups_within_capacity(&self) -> bool {
        let requested: u32 = self.resource_groups.values().map(|g| g.requests_node_num).sum();
        requested as usize <= self.healthy_node_count()
    }
}
