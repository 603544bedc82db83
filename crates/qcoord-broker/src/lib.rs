//! qcoord-broker: the schema/recovery broker contract.
//!
//! The broker is the data-plane's source of truth for a collection's schema,
//! partitions, indexes, and recovery info (channels + segments). The control
//! plane never talks to storage directly; it only ever asks the broker.

use async_trait::async_trait;
use qcoord_types::{CollectionId, FieldId, PartitionId};

/// A DML channel name, as reported by the broker's recovery info.
pub type DmChannelName = String;

/// Minimal segment description needed to seed a target snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub segment_id: i64,
    pub partition_id: PartitionId,
}

/// An index known to exist for a collection's field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub field_id: FieldId,
    pub index_name: String,
}

/// The result of `GetRecoveryInfoV2`: everything needed to build a target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecoveryInfo {
    pub channels: Vec<DmChannelName>,
    pub segments: Vec<SegmentInfo>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("collection {0} not found at broker")]
    CollectionNotFound(CollectionId),
    #[error("broker call failed: {reason}")]
    Transient { reason: String },
}

/// The schema/recovery broker.
///
/// Every method is fallible and every failure is treated by callers as
/// transient (bounded retry inside `PreExecute`); the broker never
/// exposes a distinction between "not found" and "temporarily unreachable"
/// beyond [`BrokerError`]'s two variants.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn describe_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<FieldId>, BrokerError>;

    async fn get_partitions(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<PartitionId>, BrokerError>;

    async fn list_indexes(&self, collection_id: CollectionId) -> Result<Vec<IndexInfo>, BrokerError>;

    async fn get_recovery_info(
        &self,
        collection_id: CollectionId,
        partition_ids: Vec<PartitionId>,
    ) -> Result<RecoveryInfo, BrokerError>;
}

/// A fixed, pre-seeded [`Broker`] for tests and the demo CLI.
///
/// Collections absent from the seeded map answer every call with
/// [`BrokerError::CollectionNotFound`]; this is how the planning-failure and
/// broker-unreachable scenarios are exercised without a real broker.
#[derive(Default)]
pub struct StaticBroker {
    collections: std::collections::HashMap<CollectionId, StaticCollection>,
}

struct StaticCollection {
    fields: Vec<FieldId>,
    partitions: Vec<PartitionId>,
    indexes: Vec<IndexInfo>,
    recovery: RecoveryInfo,
}

impl StaticBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds (or replaces) the broker's answer for `collection_id`.
    pub fn seed(
        &mut self,
        collection_id: CollectionId,
        fields: Vec<FieldId>,
        partitions: Vec<PartitionId>,
        indexes: Vec<IndexInfo>,
        recovery: RecoveryInfo,
    ) {
        self.collections.insert(
            collection_id,
            StaticCollection {
                fields,
                partitions,
                indexes,
                recovery,
            },
        );
    }
}

#[async_trait]
impl Broker for StaticBroker {
    async fn describe_collection(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<FieldId>, BrokerError> {
        self.collections
            .get(&collection_id)
            .map(|c| c.fields.clone())
            .ok_or(BrokerError::CollectionNotFound(collection_id))
    }

    async fn get_partitions(
        &self,
        collection_id: CollectionId,
    ) -> Result<Vec<PartitionId>, BrokerError> {
        self.collections
            .get(&collection_id)
            .map(|c| c.partitions.clone())
            .ok_or(BrokerError::CollectionNotFound(collection_id))
    }

    async fn list_indexes(&self, collection_id: CollectionId) -> Result<Vec<IndexInfo>, BrokerError> {
        self.collections
            .get(&collection_id)
            .map(|c| c.indexes.clone())
            .ok_or(BrokerError::CollectionNotFound(collection_id))
    }

    async fn get_recovery_info(
        &self,
        collection_id: CollectionId,
        partition_ids: Vec<PartitionId>,
    ) -> Result<RecoveryInfo, BrokerError> {
        let collection = self
            .collections
            .get(&collection_id)
            .ok_or(BrokerError::CollectionNotFound(collection_id))?;
        if partition_ids.is_empty() {
            return Ok(collection.recovery.clone());
        }
        let segments = collection
            .recovery
            .segments
            .iter()
            .filter(|s| partition_ids.contains(&s.partition_id))
            .cloned()
            .collect();
        Ok(RecoveryInfo {
            channels: collection.recovery.channels.clone(),
            segments,
        })
    }
}
