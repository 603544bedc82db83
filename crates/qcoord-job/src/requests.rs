//! Request payloads a caller hands to the scheduler.

use qcoord_types::{CollectionId, CollectionSchema, FieldId, PartitionId, ResourceGroupName};

#[derive(Debug, Clone)]
pub struct LoadCollectionRequest {
    pub collection_id: CollectionId,
    pub replica_number: u32,
    pub resource_groups: Vec<ResourceGroupName>,
    pub load_fields: Vec<FieldId>,
    pub schema: Option<CollectionSchema>,
    pub user_specified_replica_mode: bool,
}

#[derive(Debug, Clone)]
pub struct LoadPartitionsRequest {
    pub collection_id: CollectionId,
    pub partition_ids: Vec<PartitionId>,
    pub replica_number: u32,
    pub resource_groups: Vec<ResourceGroupName>,
    pub load_fields: Vec<FieldId>,
    pub schema: Option<CollectionSchema>,
    pub user_specified_replica_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ReleaseCollectionRequest {
    pub collection_id: CollectionId,
}

#[derive(Debug, Clone)]
pub struct ReleasePartitionsRequest {
    pub collection_id: CollectionId,
    pub partition_ids: Vec<PartitionId>,
}

#[derive(Debug, Clone)]
pub struct SyncNewCreatedPartitionRequest {
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
}
