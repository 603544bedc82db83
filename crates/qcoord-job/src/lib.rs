//! qcoord-job: the `Job` contract and the five load/release job kinds.

mod cancellation;
mod context;
mod failed_load_cache;
mod jobs;
mod requests;

pub use cancellation::CancellationToken;
pub use context::JobContext;
pub use failed_load_cache::FailedLoadCache;
pub use jobs::{
    JobKind, LoadCollectionJob, LoadPartitionJob, ReleaseCollectionJob, ReleasePartitionJob,
    SyncNewCreatedPartitionJob,
};
pub use requests::{
    LoadCollectionRequest, LoadPartitionsRequest, ReleaseCollectionRequest,
    ReleasePartitionsRequest, SyncNewCreatedPartitionRequest,
};

use qcoord_types::{CollectionId, ControlPlaneError, ControlPlaneResult, JobMetricsSink, JobOutcome};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// A single-use unit of work. Wraps a
/// [`JobKind`] together with the cancellation flag and completion channel
/// the scheduler and caller coordinate through.
pub struct Job {
    kind: JobKind,
    cancel: CancellationToken,
    completion_tx: Option<oneshot::Sender<ControlPlaneResult<()>>>,
}

/// Returned to the caller when a job is enqueued. `Add` is non-blocking;
/// this handle is how the caller later calls `Wait`.
pub struct JobHandle {
    collection_id: CollectionId,
    cancel: CancellationToken,
    completion_rx: oneshot::Receiver<ControlPlaneResult<()>>,
}

impl JobHandle {
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    /// Requests cancellation; takes effect at the job's next checked
    /// boundary, not necessarily immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// `Wait`: blocks until the job terminates, returning its
    /// terminal result. If the job was dropped without running (e.g. the
    /// scheduler stopped before dispatching it), returns `Cancelled`.
    pub async fn wait(self) -> ControlPlaneResult<()> {
        self.completion_rx.await.unwrap_or(Err(ControlPlaneError::Cancelled))
    }
}

impl Job {
    pub fn new(kind: JobKind) -> (Self, JobHandle) {
        let cancel = CancellationToken::new();
        let (completion_tx, completion_rx) = oneshot::channel();
        let collection_id = kind.collection_id();
        (
            Self {
                kind,
                cancel: cancel.clone(),
                completion_tx: Some(completion_tx),
            },
            JobHandle {
                collection_id,
                cancel,
                completion_rx,
            },
        )
    }

    pub fn collection_id(&self) -> CollectionId {
        self.kind.collection_id()
    }

    /// Resolves the job's handle with `err` without running any of its
    /// steps. Used by a scheduler to fail queued-but-not-yet-dispatched
    /// jobs on shutdown.
    pub fn fail(mut self, err: ControlPlaneError, metrics: &dyn JobMetricsSink) {
        metrics.record_completed(self.kind.label(), JobOutcome::Cancelled, Duration::ZERO);
        if let Some(tx) = self.completion_tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    /// Runs `PreExecute → Execute → PostExecute` and signals the paired
    /// [`JobHandle`]'s `Wait`. Called by the scheduler's per-collection
    /// worker; never call both this and a manual `Wait` race — there is
    /// exactly one terminal result per job.
    pub async fn run(mut self, ctx: &JobContext) {
        let label = self.kind.label();
        let started = Instant::now();
        let result = self.run_steps(ctx).await;
        ctx.metrics.record_completed(label, outcome_of(&result), started.elapsed());
        if let Some(tx) = self.completion_tx.take() {
            let _ = tx.send(result);
        }
    }

    async fn run_steps(&mut self, ctx: &JobContext) -> ControlPlaneResult<()> {
        if self.cancel.is_cancelled() {
            let result = Err(ControlPlaneError::Cancelled);
            self.kind.post_execute(ctx, &result).await;
            return result;
        }

        if let Err(err) = self.kind.pre_execute(ctx).await {
            let result = Err(err);
            self.kind.post_execute(ctx, &result).await;
            return result;
        }

        let result = self.kind.execute(ctx, &self.cancel).await;
        self.kind.post_execute(ctx, &result).await;
        result
    }
}

/// Maps a job's terminal result to its metric outcome label.
fn outcome_of(result: &ControlPlaneResult<()>) -> JobOutcome {
    match result {
        Ok(()) => JobOutcome::Succeeded,
        Err(ControlPlaneError::Timeout) => JobOutcome::TimedOut,
        Err(ControlPlaneError::Cancelled) => JobOutcome::Cancelled,
        Err(_) => JobOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use qcoord_broker::{RecoveryInfo, SegmentInfo, StaticBroker};
    use qcoord_catalog::InMemoryCatalog;
    use qcoord_meta::Meta;
    use qcoord_proxy::RecordingProxyManager;
    use qcoord_target::InMemoryTargetBackend;
    use qcoord_types::{FieldId, NodeId, PartitionId, ResourceGroup, ResourceGroupName};

    fn test_context(broker: StaticBroker) -> (JobContext, Arc<InMemoryTargetBackend>, Arc<InMemoryCatalog>) {
        let target = Arc::new(InMemoryTargetBackend::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let meta = Arc::new(Meta::new());
        meta.upsert_resource_group(ResourceGroup {
            name: ResourceGroupName::default_group(),
            requests_node_num: 3,
            limits_node_num: 3,
            nodes: BTreeSet::from([NodeId::new(1), NodeId::new(2), NodeId::new(3)]),
        });

        let ctx = JobContext::new(
            catalog.clone(),
            Arc::new(broker),
            Arc::new(RecordingProxyManager::new()),
            target.clone(),
            target.clone(),
            meta,
            None,
            Duration::from_millis(200),
        );
        (ctx, target, catalog)
    }

    fn seeded_broker(collection_id: CollectionId, partitions: &[i64]) -> StaticBroker {
        let mut broker = StaticBroker::new();
        broker.seed(
            collection_id,
            vec![FieldId::new(100)],
            partitions.iter().map(|&p| PartitionId::new(p)).collect(),
            vec![],
            RecoveryInfo {
                channels: vec!["ch-0".into()],
                segments: partitions
                    .iter()
                    .map(|&p| SegmentInfo {
                        segment_id: p * 10,
                        partition_id: PartitionId::new(p),
                    })
                    .collect(),
            },
        );
        broker
    }

    #[tokio::test]
    async fn load_collection_job_converges_to_loaded() {
        let id = CollectionId::new(1);
        let (ctx, target, catalog) = test_context(seeded_broker(id, &[10, 11]));

        let (job, handle) = Job::new(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
            collection_id: id,
            replica_number: 1,
            resource_groups: vec![],
            load_fields: vec![],
            schema: None,
            user_specified_replica_mode: false,
        })));

        let target_for_announce = target.clone();
        let runner = tokio::spawn(async move { job.run(&ctx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        target_for_announce.announce_loaded(id, None);

        runner.await.unwrap();
        let result = handle.wait().await;
        assert!(result.is_ok(), "{result:?}");
        assert!(catalog.get_collection(id).is_some());
    }

    #[tokio::test]
    async fn load_collection_job_rejects_insufficient_capacity() {
        let id = CollectionId::new(1);
        let (ctx, _target, _catalog) = test_context(seeded_broker(id, &[10]));

        let (job, handle) = Job::new(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
            collection_id: id,
            replica_number: 10,
            resource_groups: vec![],
            load_fields: vec![],
            schema: None,
            user_specified_replica_mode: false,
        })));
        job.run(&ctx).await;

        let result = handle.wait().await;
        assert!(matches!(result, Err(ControlPlaneError::ResourceGroupNodeNotEnough { .. })));
    }

    #[tokio::test]
    async fn release_collection_job_is_idempotent_when_absent() {
        let id = CollectionId::new(42);
        let (ctx, _target, _catalog) = test_context(StaticBroker::new());

        let (job, handle) = Job::new(JobKind::ReleaseCollection(ReleaseCollectionJob::new(
            ReleaseCollectionRequest { collection_id: id },
        )));
        job.run(&ctx).await;

        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn release_partition_rejects_on_load_collection_typed_collection() {
        let id = CollectionId::new(1);
        let (ctx, target, _catalog) = test_context(seeded_broker(id, &[10, 11]));

        let (job, handle) = Job::new(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
            collection_id: id,
            replica_number: 1,
            resource_groups: vec![],
            load_fields: vec![],
            schema: None,
            user_specified_replica_mode: false,
        })));
        let runner = tokio::spawn(async move { job.run(&ctx.clone()).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        target.announce_loaded(id, None);
        runner.await.unwrap();
        handle.wait().await.unwrap();

        let (ctx, _target, _catalog) = test_context(seeded_broker(id, &[10, 11]));
        let (job, handle) = Job::new(JobKind::ReleasePartition(ReleasePartitionJob::new(
            ReleasePartitionsRequest {
                collection_id: id,
                partition_ids: vec![PartitionId::new(10)],
            },
        )));
        job.run(&ctx).await;
        let result = handle.wait().await;
        assert!(matches!(result, Err(ControlPlaneError::ParameterInvalid(_))));
    }

    #[tokio::test]
    async fn catalog_failure_rolls_back_replicas_and_leaves_collection_absent() {
        let id = CollectionId::new(1);
        let (ctx, _target, catalog) = test_context(seeded_broker(id, &[10]));
        catalog.fail_once(qcoord_catalog::CatalogOp::SaveCollection);

        let (job, handle) = Job::new(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
            collection_id: id,
            replica_number: 1,
            resource_groups: vec![],
            load_fields: vec![],
            schema: None,
            user_specified_replica_mode: false,
        })));
        job.run(&ctx).await;

        let result = handle.wait().await;
        assert!(result.is_err());
        assert!(catalog.get_collection(id).is_none());
        assert!(catalog.get_replicas(id).is_empty());
    }
}
