//! qcoord-meta: the in-memory `Meta` aggregate tracking collections,
//! partitions, replicas, and resource groups under one lock.

mod meta;
mod state;

pub use meta::Meta;
pub use state::State;

use qcoord_types::{CollectionId, NodeId, ResourceGroupName};

/// Errors raised when a mutation would violate a `Meta` aggregate invariant.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("resource group {0} not found")]
    ResourceGroupNotFound(ResourceGroupName),

    #[error("node {node} is not a member of resource group {group}")]
    ReplicaNodeNotInGroup { node: NodeId, group: ResourceGroupName },

    #[error("replica node sets for collection {collection_id} are not disjoint")]
    ReplicaNodeOverlap { collection_id: CollectionId },
}
