//! The five job kinds and the tagged dispatch enum that wraps them: dynamic
//! dispatch across job kinds is expressed as a tagged variant plus a
//! dispatch table rather than trait objects, so each kind stays a concrete,
//! independently testable type.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use qcoord_broker::{BrokerError, RecoveryInfo};
use qcoord_meta::MetaError;
use qcoord_planner::{plan_replicas, PlannerError, ReplicaPlacement};
use qcoord_target::TargetSnapshot;
use qcoord_types::{
    resolve_resource_groups, resource_groups_eq_as_set, Collection, CollectionId, CollectionSchema, ControlPlaneError,
    ControlPlaneResult, LoadFields, LoadStatus, LoadType, Partition, PartitionId, Replica,
    ReplicaId, ResourceGroupName,
};

use crate::cancellation::CancellationToken;
use crate::context::JobContext;
use crate::requests::{
    LoadCollectionRequest, LoadPartitionsRequest, ReleaseCollectionRequest,
    ReleasePartitionsRequest, SyncNewCreatedPartitionRequest,
};

#[derive(Debug, thiserror::Error)]
#[error("collection {0} recently failed to load; backing off")]
struct RecentlyFailedError(CollectionId);

/// The lifecycle every job kind implements. Separate from the public
/// [`crate::Job`] trait: this one is generic over nothing and is what
/// [`JobKind`] dispatches into, so each concrete job stays independently
/// testable.
#[async_trait]
pub(crate) trait JobSteps {
    fn collection_id(&self) -> CollectionId;
    async fn pre_execute(&mut self, ctx: &JobContext) -> ControlPlaneResult<()>;
    async fn execute(&mut self, ctx: &JobContext, cancel: &CancellationToken) -> ControlPlaneResult<()>;
    async fn post_execute(&mut self, ctx: &JobContext, result: &ControlPlaneResult<()>);
}

/// Resolves the stored `LoadFields` for a request: an explicit list wins;
/// otherwise a legacy `Schema` pins the field set; otherwise "all".
fn resolve_load_fields(requested: &[qcoord_types::FieldId], schema: Option<&CollectionSchema>) -> LoadFields {
    if !requested.is_empty() {
        LoadFields::from_requested(requested.iter().copied())
    } else if let Some(schema) = schema {
        LoadFields::Only(schema.field_ids.clone())
    } else {
        LoadFields::All
    }
}

/// Caps on the bounded exponential backoff `with_broker_retry` applies to
/// `BrokerError::Transient` failures during `PreExecute`.
const BROKER_RETRY_ATTEMPTS: u32 = 3;
const BROKER_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Retries `call` while it fails with `BrokerError::Transient`, doubling the
/// delay each attempt up to `BROKER_RETRY_ATTEMPTS` tries total.
/// `BrokerError::CollectionNotFound` is not transient and is returned
/// immediately.
async fn with_broker_retry<T, F, Fut>(mut call: F) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut attempt = 0;
    let mut delay = BROKER_RETRY_BASE_DELAY;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(BrokerError::Transient { reason }) if attempt + 1 < BROKER_RETRY_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(attempt, %reason, ?delay, "broker call failed, retrying after backoff");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

fn map_planner_error(err: PlannerError) -> ControlPlaneError {
    match err {
        PlannerError::ResourceGroupNodeNotEnough { requested, available } => {
            ControlPlaneError::ResourceGroupNodeNotEnough { requested, available }
        }
    }
}

/// Re-checking admission under the meta lock (cluster membership can shift
/// between PreExecute passing and Execute running) surfaces the same stable
/// `ResourceGroupNodeNotEnough` code a PreExecute-time admission failure
/// would have.
fn map_meta_admission_error(err: MetaError) -> ControlPlaneError {
    match err {
        MetaError::ResourceGroupNotFound(_) | MetaError::ReplicaNodeNotInGroup { .. } => {
            ControlPlaneError::ResourceGroupNodeNotEnough {
                requested: 0,
                available: 0,
            }
        }
        MetaError::ReplicaNodeOverlap { .. } => ControlPlaneError::internal(err),
    }
}

/// Rolls back `collection_id`'s replicas (and, if `release_collection` is
/// set, its catalog collection record too), logging any rollback failure
/// rather than propagating it — the cancellation itself is what's reported
/// to the caller. Used at each cancellation checkpoint inside `Execute` to
/// undo whatever this call has persisted so far before returning `Cancelled`.
async fn rollback_on_cancel(ctx: &JobContext, collection_id: CollectionId, release_collection: bool) -> ControlPlaneError {
    if let Err(rollback_err) = ctx.catalog.release_replicas(collection_id).await {
        tracing::warn!(%collection_id, ?rollback_err, "failed to roll back replicas after cancellation");
    }
    if release_collection {
        if let Err(rollback_err) = ctx.catalog.release_collection(collection_id).await {
            tracing::warn!(%collection_id, ?rollback_err, "failed to roll back collection after cancellation");
        }
    }
    ControlPlaneError::Cancelled
}

async fn allocate_replicas(
    placements: Vec<ReplicaPlacement>,
    collection_id: CollectionId,
    allocate_id: impl Fn() -> ReplicaId,
) -> Vec<Replica> {
    placements
        .into_iter()
        .map(|p| Replica {
            replica_id: allocate_id(),
            collection_id,
            resource_group: p.resource_group,
            nodes: p.nodes.into_iter().collect::<BTreeSet<_>>(),
        })
        .collect()
}

// ============================================================================
// LoadCollectionJob
// ============================================================================

struct LoadPlan {
    schema: CollectionSchema,
    resolved_groups: Vec<ResourceGroupName>,
    partitions: Vec<PartitionId>,
    placements: Vec<ReplicaPlacement>,
    recovery: RecoveryInfo,
}

pub struct LoadCollectionJob {
    request: LoadCollectionRequest,
    plan: Option<LoadPlan>,
}

impl LoadCollectionJob {
    pub fn new(request: LoadCollectionRequest) -> Self {
        Self { request, plan: None }
    }
}

#[async_trait]
impl JobSteps for LoadCollectionJob {
    fn collection_id(&self) -> CollectionId {
        self.request.collection_id
    }

    async fn pre_execute(&mut self, ctx: &JobContext) -> ControlPlaneResult<()> {
        let id = self.request.collection_id;
        if self.request.replica_number == 0 {
            return Err(ControlPlaneError::ParameterInvalid(
                "replica_number must be at least 1".into(),
            ));
        }
        if let Some(cache) = &ctx.failed_load_cache {
            if cache.recently_failed(id) {
                return Err(ControlPlaneError::internal(RecentlyFailedError(id)));
            }
        }

        let schema = self.request.schema.clone().unwrap_or_else(|| {
            CollectionSchema::new(self.request.load_fields.iter().copied())
        });

        if let Some(existing) = ctx.meta.collection(id) {
            if existing.load_type == LoadType::LoadCollection {
                if existing.replica_number != self.request.replica_number {
                    return Err(ControlPlaneError::ParameterInvalid(
                        "replica_number differs from the stored value".into(),
                    ));
                }
                if !resource_groups_eq_as_set(&existing.resource_groups, &resolve_resource_groups(&self.request.resource_groups)) {
                    return Err(ControlPlaneError::ParameterInvalid(
                        "resource_groups differ from the stored set".into(),
                    ));
                }
                // LoadFields mismatch is accepted as a no-op rather than rejected.
                self.plan = None;
                return Ok(());
            }
            // LoadType::LoadPartition: upgrade path, fall through to a fresh plan.
        }

        let resolved_groups = resolve_resource_groups(&self.request.resource_groups);
        let groups = collect_groups(ctx, &resolved_groups);
        let placements = plan_replicas(self.request.replica_number, &resolved_groups, &groups)
            .map_err(map_planner_error)?;

        let partitions = with_broker_retry(|| ctx.broker.get_partitions(id))
            .await
            .map_err(ControlPlaneError::internal)?;
        let recovery = with_broker_retry(|| ctx.broker.get_recovery_info(id, vec![]))
            .await
            .map_err(ControlPlaneError::internal)?;

        self.plan = Some(LoadPlan {
            schema,
            resolved_groups,
            partitions,
            placements,
            recovery,
        });
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext, cancel: &CancellationToken) -> ControlPlaneResult<()> {
        let Some(plan) = self.plan.take() else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Err(ControlPlaneError::Cancelled);
        }

        let id = self.request.collection_id;
        let replicas = allocate_replicas(plan.placements, id, || ctx.allocate_replica_id()).await;

        ctx.catalog
            .save_replicas(replicas.clone())
            .await
            .map_err(ControlPlaneError::internal)?;

        if cancel.is_cancelled() {
            return Err(rollback_on_cancel(ctx, id, false).await);
        }

        let partitions: Vec<Partition> = plan
            .partitions
            .iter()
            .map(|&partition_id| Partition {
                collection_id: id,
                partition_id,
                status: LoadStatus::Loading,
            })
            .collect();

        let collection = Collection {
            collection_id: id,
            load_type: LoadType::LoadCollection,
            replica_number: self.request.replica_number,
            resource_groups: plan.resolved_groups.clone(),
            load_fields: resolve_load_fields(&self.request.load_fields, self.request.schema.as_ref()),
            user_specified_replica_mode: self.request.user_specified_replica_mode,
            status: LoadStatus::Loading,
            schema: plan.schema,
        };

        if let Err(err) = ctx.catalog.save_collection(collection.clone(), partitions.clone()).await {
            if let Err(rollback_err) = ctx.catalog.release_replicas(id).await {
                tracing::warn!(%id, ?rollback_err, "failed to roll back replicas after collection save failure");
            }
            return Err(ControlPlaneError::internal(err));
        }

        if cancel.is_cancelled() {
            return Err(rollback_on_cancel(ctx, id, true).await);
        }

        if let Err(err) = ctx.meta.insert_replicas(replicas.clone()) {
            if let Err(rollback_err) = ctx.catalog.release_replicas(id).await {
                tracing::warn!(%id, ?rollback_err, "failed to roll back replicas after meta admission failure");
            }
            if let Err(rollback_err) = ctx.catalog.release_collection(id).await {
                tracing::warn!(%id, ?rollback_err, "failed to roll back collection after meta admission failure");
            }
            return Err(map_meta_admission_error(err));
        }
        ctx.meta.insert_collection(collection, partitions);

        ctx.target
            .update_next_target(id, TargetSnapshot::from(plan.recovery))
            .await
            .map_err(ControlPlaneError::internal)?;

        ctx.observer_wait(id, None).await?;

        ctx.meta.set_collection_status(id, LoadStatus::Loaded);
        ctx.target
            .update_current_target(id)
            .await
            .map_err(ControlPlaneError::internal)?;

        Ok(())
    }

    async fn post_execute(&mut self, ctx: &JobContext, result: &ControlPlaneResult<()>) {
        let id = self.request.collection_id;
        if let Some(cache) = &ctx.failed_load_cache {
            if result.is_ok() {
                cache.clear(id);
            } else {
                cache.record_failure(id);
            }
        }
        tracing::debug!(%id, ok = result.is_ok(), "load collection job finished");
    }
}

/// Fetches `ResourceGroup` snapshots for the requested names, as a map keyed
/// by name the planner can read directly.
fn collect_groups(
    ctx: &JobContext,
    names: &[ResourceGroupName],
) -> std::collections::BTreeMap<ResourceGroupName, qcoord_types::ResourceGroup> {
    let mut groups = std::collections::BTreeMap::new();
    for name in names {
        if let Some(group) = ctx.meta.resource_group(name) {
            groups.insert(name.clone(), group);
        }
    }
    groups
}

// ============================================================================
// LoadPartitionJob
// ============================================================================

struct LoadPartitionPlan {
    schema: CollectionSchema,
    resolved_groups: Vec<ResourceGroupName>,
    new_partitions: Vec<PartitionId>,
    placements: Vec<ReplicaPlacement>,
    recovery: RecoveryInfo,
    first_load: bool,
    promote_user_specified_replica_mode: bool,
}

pub struct LoadPartitionJob {
    request: LoadPartitionsRequest,
    plan: Option<LoadPartitionPlan>,
}

impl LoadPartitionJob {
    pub fn new(request: LoadPartitionsRequest) -> Self {
        Self { request, plan: None }
    }
}

#[async_trait]
impl JobSteps for LoadPartitionJob {
    fn collection_id(&self) -> CollectionId {
        self.request.collection_id
    }

    async fn pre_execute(&mut self, ctx: &JobContext) -> ControlPlaneResult<()> {
        let id = self.request.collection_id;
        if self.request.partition_ids.is_empty() {
            return Err(ControlPlaneError::ParameterInvalid(
                "partition_ids must be non-empty".into(),
            ));
        }
        if self.request.replica_number == 0 {
            return Err(ControlPlaneError::ParameterInvalid(
                "replica_number must be at least 1".into(),
            ));
        }
        if let Some(cache) = &ctx.failed_load_cache {
            if cache.recently_failed(id) {
                return Err(ControlPlaneError::internal(RecentlyFailedError(id)));
            }
        }

        let resolved_groups = resolve_resource_groups(&self.request.resource_groups);
        let schema = self
            .request
            .schema
            .clone()
            .unwrap_or_else(|| CollectionSchema::new(self.request.load_fields.iter().copied()));

        let existing = ctx.meta.collection(id);
        let first_load = existing.is_none();

        if let Some(existing) = &existing {
            if existing.load_type == LoadType::LoadCollection {
                if existing.replica_number != self.request.replica_number
                    || !resource_groups_eq_as_set(&existing.resource_groups, &resolved_groups)
                {
                    return Err(ControlPlaneError::ParameterInvalid(
                        "replica_number/resource_groups differ from the stored collection".into(),
                    ));
                }
                // All partitions are logically loaded already; no-op.
                self.plan = None;
                return Ok(());
            }

            let existing_ids: BTreeSet<PartitionId> = ctx
                .meta
                .partitions_of(id)
                .into_iter()
                .map(|p| p.partition_id)
                .collect();
            let requested: BTreeSet<PartitionId> = self.request.partition_ids.iter().copied().collect();
            let new: Vec<PartitionId> = requested.difference(&existing_ids).copied().collect();

            if new.is_empty() {
                if existing.replica_number != self.request.replica_number
                    || !resource_groups_eq_as_set(&existing.resource_groups, &resolved_groups)
                {
                    return Err(ControlPlaneError::ParameterInvalid(
                        "replica_number/resource_groups differ from the stored collection".into(),
                    ));
                }
                self.plan = None;
                return Ok(());
            }

            if existing.replica_number != self.request.replica_number
                || !resource_groups_eq_as_set(&existing.resource_groups, &resolved_groups)
            {
                return Err(ControlPlaneError::ParameterInvalid(
                    "replica_number/resource_groups differ from the stored collection".into(),
                ));
            }

            let recovery = with_broker_retry(|| ctx.broker.get_recovery_info(id, new.clone()))
                .await
                .map_err(ControlPlaneError::internal)?;

            self.plan = Some(LoadPartitionPlan {
                schema,
                resolved_groups,
                new_partitions: new,
                placements: Vec::new(),
                recovery,
                first_load: false,
                promote_user_specified_replica_mode: !existing.user_specified_replica_mode
                    && self.request.user_specified_replica_mode,
            });
            return Ok(());
        }

        let groups = collect_groups(ctx, &resolved_groups);
        let placements = plan_replicas(self.request.replica_number, &resolved_groups, &groups)
            .map_err(map_planner_error)?;
        let partition_ids = self.request.partition_ids.clone();
        let recovery = with_broker_retry(|| ctx.broker.get_recovery_info(id, partition_ids.clone()))
            .await
            .map_err(ControlPlaneError::internal)?;

        self.plan = Some(LoadPartitionPlan {
            schema,
            resolved_groups,
            new_partitions: partition_ids,
            placements,
            recovery,
            first_load,
            promote_user_specified_replica_mode: false,
        });
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext, cancel: &CancellationToken) -> ControlPlaneResult<()> {
        let Some(plan) = self.plan.take() else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Err(ControlPlaneError::Cancelled);
        }

        let id = self.request.collection_id;
        let new_partitions: Vec<Partition> = plan
            .new_partitions
            .iter()
            .map(|&partition_id| Partition {
                collection_id: id,
                partition_id,
                status: LoadStatus::Loading,
            })
            .collect();

        let replicas = if plan.first_load {
            allocate_replicas(plan.placements, id, || ctx.allocate_replica_id()).await
        } else {
            Vec::new()
        };

        if !replicas.is_empty() {
            ctx.catalog
                .save_replicas(replicas.clone())
                .await
                .map_err(ControlPlaneError::internal)?;
        }

        if cancel.is_cancelled() {
            if !replicas.is_empty() {
                return Err(rollback_on_cancel(ctx, id, false).await);
            }
            return Err(ControlPlaneError::Cancelled);
        }

        let collection = Collection {
            collection_id: id,
            load_type: LoadType::LoadPartition,
            replica_number: self.request.replica_number,
            resource_groups: plan.resolved_groups.clone(),
            load_fields: resolve_load_fields(&self.request.load_fields, self.request.schema.as_ref()),
            user_specified_replica_mode: self.request.user_specified_replica_mode || plan.promote_user_specified_replica_mode,
            status: LoadStatus::Loading,
            schema: plan.schema,
        };

        if let Err(err) = ctx
            .catalog
            .save_collection(collection.clone(), new_partitions.clone())
            .await
        {
            if !replicas.is_empty() {
                if let Err(rollback_err) = ctx.catalog.release_replicas(id).await {
                    tracing::warn!(%id, ?rollback_err, "failed to roll back replicas after partition save failure");
                }
            }
            return Err(ControlPlaneError::internal(err));
        }

        if cancel.is_cancelled() {
            if plan.first_load {
                return Err(rollback_on_cancel(ctx, id, true).await);
            }
            if let Err(rollback_err) = ctx.catalog.release_partitions(id, plan.new_partitions.clone()).await {
                tracing::warn!(%id, ?rollback_err, "failed to roll back newly added partitions after cancellation");
            }
            return Err(ControlPlaneError::Cancelled);
        }

        if !replicas.is_empty() {
            if let Err(err) = ctx.meta.insert_replicas(replicas.clone()) {
                if let Err(rollback_err) = ctx.catalog.release_replicas(id).await {
                    tracing::warn!(%id, ?rollback_err, "failed to roll back replicas after meta admission failure");
                }
                return Err(map_meta_admission_error(err));
            }
        }
        ctx.meta.insert_partitions(new_partitions);
        if plan.first_load {
            ctx.meta
                .insert_collection(collection, ctx.meta.partitions_of(id));
        } else {
            ctx.meta.set_collection_status(id, LoadStatus::Loading);
        }

        ctx.target
            .update_next_target(id, TargetSnapshot::from(plan.recovery))
            .await
            .map_err(ControlPlaneError::internal)?;

        for partition_id in &plan.new_partitions {
            ctx.observer_wait(id, Some(*partition_id)).await?;
            ctx.meta.set_partition_status(id, *partition_id, LoadStatus::Loaded);
        }
        ctx.target
            .update_current_target(id)
            .await
            .map_err(ControlPlaneError::internal)?;

        Ok(())
    }

    async fn post_execute(&mut self, ctx: &JobContext, result: &ControlPlaneResult<()>) {
        let id = self.request.collection_id;
        if let Some(cache) = &ctx.failed_load_cache {
            if result.is_ok() {
                cache.clear(id);
            } else {
                cache.record_failure(id);
            }
        }
        tracing::debug!(%id, ok = result.is_ok(), "load partition job finished");
    }
}

// ============================================================================
// ReleaseCollectionJob
// ============================================================================

pub struct ReleaseCollectionJob {
    request: ReleaseCollectionRequest,
}

impl ReleaseCollectionJob {
    pub fn new(request: ReleaseCollectionRequest) -> Self {
        Self { request }
    }
}

#[async_trait]
impl JobSteps for ReleaseCollectionJob {
    fn collection_id(&self) -> CollectionId {
        self.request.collection_id
    }

    async fn pre_execute(&mut self, _ctx: &JobContext) -> ControlPlaneResult<()> {
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext, _cancel: &CancellationToken) -> ControlPlaneResult<()> {
        let id = self.request.collection_id;
        if !ctx.meta.collection_exists(id) {
            return Ok(()); // already released, idempotent
        }

        if let Err(err) = ctx.proxy.invalidate_collection_meta_cache(id).await {
            tracing::warn!(%id, ?err, "proxy meta cache invalidation failed, continuing");
        }
        if let Err(err) = ctx.proxy.invalidate_shard_leader_cache(id).await {
            tracing::warn!(%id, ?err, "proxy shard leader cache invalidation failed, continuing");
        }

        ctx.catalog.release_replicas(id).await.map_err(ControlPlaneError::internal)?;
        ctx.catalog.release_collection(id).await.map_err(ControlPlaneError::internal)?;

        ctx.meta.remove_replicas_of(id);
        ctx.meta.remove_collection(id);
        ctx.target.drop_target(id);

        Ok(())
    }

    async fn post_execute(&mut self, _ctx: &JobContext, result: &ControlPlaneResult<()>) {
        tracing::debug!(id = %self.request.collection_id, ok = result.is_ok(), "release collection job finished");
    }
}

// ============================================================================
// ReleasePartitionJob
// ============================================================================

enum ReleasePartitionPlan {
    Noop,
    DowngradeToReleaseCollection,
    Partial { remaining: Vec<PartitionId> },
}

pub struct ReleasePartitionJob {
    request: ReleasePartitionsRequest,
    plan: Option<ReleasePartitionPlan>,
}

impl ReleasePartitionJob {
    pub fn new(request: ReleasePartitionsRequest) -> Self {
        Self { request, plan: None }
    }
}

#[async_trait]
impl JobSteps for ReleasePartitionJob {
    fn collection_id(&self) -> CollectionId {
        self.request.collection_id
    }

    async fn pre_execute(&mut self, ctx: &JobContext) -> ControlPlaneResult<()> {
        if self.request.partition_ids.is_empty() {
            return Err(ControlPlaneError::ParameterInvalid(
                "partition_ids must be non-empty".into(),
            ));
        }
        let id = self.request.collection_id;
        let Some(collection) = ctx.meta.collection(id) else {
            self.plan = Some(ReleasePartitionPlan::Noop);
            return Ok(());
        };

        if collection.load_type == LoadType::LoadCollection {
            return Err(ControlPlaneError::ParameterInvalid(
                "ReleasePartition is not permitted on a LoadCollection-typed collection; use ReleaseCollection".into(),
            ));
        }

        let existing: BTreeSet<PartitionId> = ctx
            .meta
            .partitions_of(id)
            .into_iter()
            .map(|p| p.partition_id)
            .collect();
        let requested: BTreeSet<PartitionId> = self.request.partition_ids.iter().copied().collect();
        let remaining: Vec<PartitionId> = existing.difference(&requested).copied().collect();

        self.plan = Some(if remaining.is_empty() {
            ReleasePartitionPlan::DowngradeToReleaseCollection
        } else {
            ReleasePartitionPlan::Partial { remaining }
        });
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext, _cancel: &CancellationToken) -> ControlPlaneResult<()> {
        let id = self.request.collection_id;
        match self.plan.take() {
            None | Some(ReleasePartitionPlan::Noop) => Ok(()),
            Some(ReleasePartitionPlan::DowngradeToReleaseCollection) => {
                let mut downgraded = ReleaseCollectionJob::new(ReleaseCollectionRequest { collection_id: id });
                downgraded.execute(ctx, _cancel).await
            }
            Some(ReleasePartitionPlan::Partial { remaining }) => {
                ctx.catalog
                    .release_partitions(id, self.request.partition_ids.clone())
                    .await
                    .map_err(ControlPlaneError::internal)?;
                ctx.meta.remove_partitions(id, &self.request.partition_ids);

                let recovery = ctx
                    .broker
                    .get_recovery_info(id, remaining)
                    .await
                    .map_err(ControlPlaneError::internal)?;
                ctx.target
                    .update_next_target(id, TargetSnapshot::from(recovery))
                    .await
                    .map_err(ControlPlaneError::internal)?;
                ctx.target
                    .update_current_target(id)
                    .await
                    .map_err(ControlPlaneError::internal)?;
                Ok(())
            }
        }
    }

    async fn post_execute(&mut self, _ctx: &JobContext, result: &ControlPlaneResult<()>) {
        tracing::debug!(id = %self.request.collection_id, ok = result.is_ok(), "release partition job finished");
    }
}

// ============================================================================
// SyncNewCreatedPartitionJob
// ============================================================================

pub struct SyncNewCreatedPartitionJob {
    request: SyncNewCreatedPartitionRequest,
    should_sync: bool,
}

impl SyncNewCreatedPartitionJob {
    pub fn new(request: SyncNewCreatedPartitionRequest) -> Self {
        Self {
            request,
            should_sync: false,
        }
    }
}

#[async_trait]
impl JobSteps for SyncNewCreatedPartitionJob {
    fn collection_id(&self) -> CollectionId {
        self.request.collection_id
    }

    async fn pre_execute(&mut self, ctx: &JobContext) -> ControlPlaneResult<()> {
        let id = self.request.collection_id;
        self.should_sync = matches!(
            ctx.meta.collection(id),
            Some(collection) if collection.load_type == LoadType::LoadCollection
        );
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext, _cancel: &CancellationToken) -> ControlPlaneResult<()> {
        if !self.should_sync {
            return Ok(());
        }
        let id = self.request.collection_id;
        let partition_id = self.request.partition_id;

        ctx.catalog
            .save_collection(
                ctx.meta.collection(id).expect("checked present in pre_execute"),
                vec![Partition {
                    collection_id: id,
                    partition_id,
                    status: LoadStatus::Loaded,
                }],
            )
            .await
            .map_err(ControlPlaneError::internal)?;

        ctx.meta.insert_partitions(vec![Partition {
            collection_id: id,
            partition_id,
            status: LoadStatus::Loaded,
        }]);

        let recovery = ctx
            .broker
            .get_recovery_info(id, vec![partition_id])
            .await
            .map_err(ControlPlaneError::internal)?;
        ctx.target
            .update_next_target(id, TargetSnapshot::from(recovery))
            .await
            .map_err(ControlPlaneError::internal)?;

        Ok(())
    }

    async fn post_execute(&mut self, _ctx: &JobContext, result: &ControlPlaneResult<()>) {
        tracing::debug!(id = %self.request.collection_id, ok = result.is_ok(), "sync new created partition job finished");
    }
}

/// Tagged union of every job kind, dispatched by match rather than by trait
/// object.
pub enum JobKind {
    LoadCollection(LoadCollectionJob),
    LoadPartition(LoadPartitionJob),
    ReleaseCollection(ReleaseCollectionJob),
    ReleasePartition(ReleasePartitionJob),
    SyncNewCreatedPartition(SyncNewCreatedPartitionJob),
}

impl JobKind {
    pub fn collection_id(&self) -> CollectionId {
        match self {
            JobKind::LoadCollection(j) => j.collection_id(),
            JobKind::LoadPartition(j) => j.collection_id(),
            JobKind::ReleaseCollection(j) => j.collection_id(),
            JobKind::ReleasePartition(j) => j.collection_id(),
            JobKind::SyncNewCreatedPartition(j) => j.collection_id(),
        }
    }

    /// This kind's metric label.
    pub fn label(&self) -> qcoord_types::JobKindLabel {
        match self {
            JobKind::LoadCollection(_) => qcoord_types::JobKindLabel::LoadCollection,
            JobKind::LoadPartition(_) => qcoord_types::JobKindLabel::LoadPartition,
            JobKind::ReleaseCollection(_) => qcoord_types::JobKindLabel::ReleaseCollection,
            JobKind::ReleasePartition(_) => qcoord_types::JobKindLabel::ReleasePartition,
            JobKind::SyncNewCreatedPartition(_) => qcoord_types::JobKindLabel::SyncNewCreatedPartition,
        }
    }

    pub(crate) async fn pre_execute(&mut self, ctx: &JobContext) -> ControlPlaneResult<()> {
        match self {
            JobKind::LoadCollection(j) => j.pre_execute(ctx).await,
            JobKind::LoadPartition(j) => j.pre_execute(ctx).await,
            JobKind::ReleaseCollection(j) => j.pre_execute(ctx).await,
            JobKind::ReleasePartition(j) => j.pre_execute(ctx).await,
            JobKind::SyncNewCreatedPartition(j) => j.pre_execute(ctx).await,
        }
    }

    pub(crate) async fn execute(&mut self, ctx: &JobContext, cancel: &CancellationToken) -> ControlPlaneResult<()> {
        match self {
            JobKind::LoadCollection(j) => j.execute(ctx, cancel).await,
            JobKind::LoadPartition(j) => j.execute(ctx, cancel).await,
            JobKind::ReleaseCollection(j) => j.execute(ctx, cancel).await,
            JobKind::ReleasePartition(j) => j.execute(ctx, cancel).await,
            JobKind::SyncNewCreatedPartition(j) => j.execute(ctx, cancel).await,
        }
    }

    pub(crate) async fn post_execute(&mut self, ctx: &JobContext, result: &ControlPlaneResult<()>) {
        match self {
            JobKind::LoadCollection(j) => j.post_execute(ctx, result).await,
            JobKind::LoadPartition(j) => j.post_execute(ctx, result).await,
            JobKind::ReleaseCollection(j) => j.post_execute(ctx, result).await,
            JobKind::ReleasePartition(j) => j.post_execute(ctx, result).await,
            JobKind::SyncNewCreatedPartition(j) => j.post_execute(ctx, result).await,
        }
    }
}
