//! Core types shared across the collection load/release control plane.
//!
//! This crate holds only plain data: entity ids, the data-model value types
//! from the collection/partition/replica/resource-group aggregate, and the
//! stable error taxonomy surfaced to callers. It owns no behavior beyond
//! small, total helper methods (set comparisons, constructors) so every
//! other crate in the workspace can depend on it without pulling in I/O.

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

mod metrics;
pub use metrics::{JobKindLabel, JobMetricsSink, JobOutcome, NoopMetricsSink};

// ============================================================================
// Entity IDs
// ============================================================================

/// Unique identifier for a collection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CollectionId(i64);

/// Unique identifier for a partition, scoped to exactly one collection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PartitionId(i64);

/// Unique identifier for a replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(i64);

/// Unique identifier for a query worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(i64);

/// Unique identifier for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(i64);

macro_rules! id_newtype {
    ($name:ident) => {
        impl $name {
            /// Creates a new id from its raw value.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw value.
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_newtype!(CollectionId);
id_newtype!(PartitionId);
id_newtype!(ReplicaId);
id_newtype!(NodeId);
id_newtype!(FieldId);

// ============================================================================
// Resource group name
// ============================================================================

/// Name of a resource group; an empty request list resolves to
/// [`ResourceGroupName::default_group`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceGroupName(String);

/// Name of the resource group new collections land in when the caller does
/// not name one explicitly.
pub const DEFAULT_RESOURCE_GROUP: &str = "__default_resource_group";

impl ResourceGroupName {
    /// Creates a resource group name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The implicit resource group used when a request names none.
    pub fn default_group() -> Self {
        Self(DEFAULT_RESOURCE_GROUP.to_string())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceGroupName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceGroupName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceGroupName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Resolves a caller-supplied resource group list: an empty list means
/// "the default group".
pub fn resolve_resource_groups(requested: &[ResourceGroupName]) -> Vec<ResourceGroupName> {
    if requested.is_empty() {
        vec![ResourceGroupName::default_group()]
    } else {
        requested.to_vec()
    }
}

/// Compares two resource-group lists as sets (order-insensitive, dedup'd).
pub fn resource_groups_eq_as_set(a: &[ResourceGroupName], b: &[ResourceGroupName]) -> bool {
    let a: BTreeSet<&ResourceGroupName> = a.iter().collect();
    let b: BTreeSet<&ResourceGroupName> = b.iter().collect();
    a == b
}

// ============================================================================
// Load type / status
// ============================================================================

/// Whether a collection was loaded as a whole or by an explicit partition set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadType {
    LoadCollection,
    LoadPartition,
}

/// Lifecycle status shared by collections and partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    Loading,
    Loaded,
}

// ============================================================================
// Load fields
// ============================================================================

/// The set of fields a collection was asked to load.
///
/// An empty requested set means "all fields"; this is modeled as a
/// distinct variant rather than an empty [`BTreeSet`] so `is_all` callers
/// don't have to remember the convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadFields {
    All,
    Only(BTreeSet<FieldId>),
}

impl Default for LoadFields {
    fn default() -> Self {
        LoadFields::All
    }
}

impl LoadFields {
    /// Builds a [`LoadFields`] from a (possibly empty) requested list,
    /// applying the "empty means all" convention.
    pub fn from_requested(fields: impl IntoIterator<Item = FieldId>) -> Self {
        let set: BTreeSet<FieldId> = fields.into_iter().collect();
        if set.is_empty() {
            LoadFields::All
        } else {
            LoadFields::Only(set)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, LoadFields::All)
    }

    /// Order-insensitive equality, treating `All` as its own singleton set.
    pub fn matches(&self, other: &LoadFields) -> bool {
        self == other
    }
}

// ============================================================================
// Aggregate value types
// ============================================================================

/// A snapshot of the fields known for a collection's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CollectionSchema {
    pub field_ids: BTreeSet<FieldId>,
}

impl CollectionSchema {
    pub fn new(field_ids: impl IntoIterator<Item = FieldId>) -> Self {
        Self {
            field_ids: field_ids.into_iter().collect(),
        }
    }
}

/// Collection aggregate: identity, load shape, and current status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub collection_id: CollectionId,
    pub load_type: LoadType,
    pub replica_number: u32,
    pub resource_groups: Vec<ResourceGroupName>,
    pub load_fields: LoadFields,
    pub user_specified_replica_mode: bool,
    pub status: LoadStatus,
    pub schema: CollectionSchema,
}

/// Partition aggregate, child of exactly one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub status: LoadStatus,
}

/// Replica aggregate: one full copy of a collection, hosted on a disjoint
/// node set within a single resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub replica_id: ReplicaId,
    pub collection_id: CollectionId,
    pub resource_group: ResourceGroupName,
    pub nodes: BTreeSet<NodeId>,
}

/// Resource group aggregate: a named partition of the worker fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub name: ResourceGroupName,
    pub requests_node_num: u32,
    pub limits_node_num: u32,
    pub nodes: BTreeSet<NodeId>,
}

impl ResourceGroup {
    pub fn current_node_count(&self) -> usize {
        self.nodes.len()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Stable error taxonomy surfaced to callers of the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// Caller-supplied parameters are invalid or conflict with existing
    /// state; detected in `PreExecute`, no rollback needed.
    #[error("invalid parameter: {0}")]
    ParameterInvalid(String),

    /// Admission failed: the requested resource groups cannot host the
    /// requested replica count under the distinctness rule.
    #[error(
        "resource group node capacity insufficient: requested {requested} replica(s), \
         {available} node(s) available across the requested group(s)"
    )]
    ResourceGroupNodeNotEnough { requested: u32, available: usize },

    /// The named collection has no loaded (or loading) state in meta.
    #[error("collection {0} is not loaded")]
    CollectionNotLoaded(CollectionId),

    /// A bounded wait for convergence (e.g. target becoming current, or a
    /// collection becoming `Loaded`) expired before the condition held.
    #[error("timed out waiting for convergence")]
    Timeout,

    /// The job's governing context was cancelled before it could complete.
    #[error("operation cancelled")]
    Cancelled,

    /// Wraps an error from a collaborator (catalog, broker, proxy manager,
    /// target backend) verbatim, preserving it for `downcast_ref` so
    /// callers can match on the original cause.
    #[error(transparent)]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ControlPlaneError {
    /// Wraps an arbitrary collaborator error as [`ControlPlaneError::Internal`].
    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ControlPlaneError::Internal(Box::new(err))
    }

    /// Downcasts the wrapped error of an `Internal` variant, if any.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            ControlPlaneError::Internal(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;
