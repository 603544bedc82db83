//! qcoord: wires the catalog, broker, proxy, target, meta, job and
//! scheduler crates into one constructible entry point.
//!
//! This crate is the boundary an embedder actually depends on; everything
//! below it is an implementation detail reachable only through here.

use std::sync::Arc;
use std::time::Duration;

mod metrics;
pub use metrics::PrometheusMetrics;

use qcoord_broker::Broker;
use qcoord_catalog::Catalog;
use qcoord_job::{
    FailedLoadCache, JobContext, JobKind, LoadCollectionJob, LoadPartitionJob, ReleaseCollectionJob,
    ReleasePartitionJob, SyncNewCreatedPartitionJob,
};
use qcoord_meta::Meta;
use qcoord_proxy::ProxyManager;
use qcoord_scheduler::Scheduler;
use qcoord_target::{CollectionObserver, TargetBackend};
use qcoord_types::ControlPlaneResult;

pub use qcoord_job::{
    JobHandle, LoadCollectionRequest, LoadPartitionsRequest, ReleaseCollectionRequest,
    ReleasePartitionsRequest, SyncNewCreatedPartitionRequest,
};
pub use qcoord_types::{ControlPlaneError, ResourceGroup, ResourceGroupName};

/// Tunables an embedder sets before constructing a [`ControlPlane`].
///
/// Mirrors the reference workspace's simulation config: a plain struct with
/// a hand-written `Default` plus chainable `with_*` builder methods, no
/// external config-file parsing.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Bound on how long a job's `Execute` step waits for convergence
    /// before returning `Timeout`.
    pub convergence_timeout: Duration,
    /// Capacity of each collection's FIFO job queue.
    pub scheduler_queue_depth: usize,
    /// Resource group substituted in when a request specifies none.
    pub default_resource_group: ResourceGroupName,
    /// Replica count substituted in when a request leaves it unset (0).
    pub default_replica_number: u32,
    /// How long a collection stays in the failed-load cache after a load
    /// fails, suppressing retries of the identical request. `None` disables
    /// the cache.
    pub failed_load_backoff: Option<Duration>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            convergence_timeout: Duration::from_secs(30),
            scheduler_queue_depth: 256,
            default_resource_group: ResourceGroupName::default_group(),
            default_replica_number: 1,
            failed_load_backoff: Some(Duration::from_secs(60)),
        }
    }
}

impl ControlPlaneConfig {
    pub fn with_convergence_timeout(mut self, timeout: Duration) -> Self {
        self.convergence_timeout = timeout;
        self
    }

    pub fn with_scheduler_queue_depth(mut self, depth: usize) -> Self {
        self.scheduler_queue_depth = depth;
        self
    }

    pub fn with_default_resource_group(mut self, name: ResourceGroupName) -> Self {
        self.default_resource_group = name;
        self
    }

    pub fn with_default_replica_number(mut self, replica_number: u32) -> Self {
        self.default_replica_number = replica_number;
        self
    }

    pub fn without_failed_load_backoff(mut self) -> Self {
        self.failed_load_backoff = None;
        self
    }
}

/// Installs a `tracing` subscriber reading `RUST_LOG`, defaulting to `info`
/// when unset. Safe to call more than once; only the first call wins.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The collection load/release control plane. Construct once
/// per process with the external collaborators wired in, then drive it
/// through `load_collection`, `load_partitions`, `release_collection`,
/// `release_partitions` and `sync_new_created_partition`.
pub struct ControlPlane {
    config: ControlPlaneConfig,
    meta: Arc<Meta>,
    scheduler: Scheduler,
    metrics: Arc<PrometheusMetrics>,
}

impl ControlPlane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ControlPlaneConfig,
        catalog: Arc<dyn Catalog>,
        broker: Arc<dyn Broker>,
        proxy: Arc<dyn ProxyManager>,
        target: Arc<dyn TargetBackend>,
        observer: Arc<dyn CollectionObserver>,
        meta: Arc<Meta>,
    ) -> Self {
        if meta.resource_group(&config.default_resource_group).is_none() {
            meta.upsert_resource_group(ResourceGroup {
                name: config.default_resource_group.clone(),
                requests_node_num: 0,
                limits_node_num: 0,
                nodes: Default::default(),
            });
        }

        let failed_load_cache = config.failed_load_backoff.map(|window| Arc::new(FailedLoadCache::new(window)));
        let metrics = Arc::new(PrometheusMetrics::new());
        let ctx = JobContext::new(
            catalog,
            broker,
            proxy,
            target,
            observer,
            meta.clone(),
            failed_load_cache,
            config.convergence_timeout,
        )
        .with_metrics(metrics.clone());
        let scheduler = Scheduler::new(ctx, config.scheduler_queue_depth);
        Self { config, meta, scheduler, metrics }
    }

    fn resolve_resource_groups(&self, resource_groups: Vec<ResourceGroupName>) -> Vec<ResourceGroupName> {
        if resource_groups.is_empty() {
            vec![self.config.default_resource_group.clone()]
        } else {
            resource_groups
        }
    }

    fn resolve_replica_number(&self, replica_number: u32) -> u32 {
        if replica_number == 0 {
            self.config.default_replica_number
        } else {
            replica_number
        }
    }

    pub fn load_collection(&self, mut request: LoadCollectionRequest) -> ControlPlaneResult<JobHandle> {
        request.replica_number = self.resolve_replica_number(request.replica_number);
        request.resource_groups = self.resolve_resource_groups(request.resource_groups);
        self.scheduler.add(JobKind::LoadCollection(LoadCollectionJob::new(request)))
    }

    pub fn load_partitions(&self, mut request: LoadPartitionsRequest) -> ControlPlaneResult<JobHandle> {
        request.replica_number = self.resolve_replica_number(request.replica_number);
        request.resource_groups = self.resolve_resource_groups(request.resource_groups);
        self.scheduler.add(JobKind::LoadPartition(LoadPartitionJob::new(request)))
    }

    pub fn release_collection(&self, request: ReleaseCollectionRequest) -> ControlPlaneResult<JobHandle> {
        self.scheduler.add(JobKind::ReleaseCollection(ReleaseCollectionJob::new(request)))
    }

    pub fn release_partitions(&self, request: ReleasePartitionsRequest) -> ControlPlaneResult<JobHandle> {
        self.scheduler.add(JobKind::ReleasePartition(ReleasePartitionJob::new(request)))
    }

    pub fn sync_new_created_partition(&self, request: SyncNewCreatedPartitionRequest) -> ControlPlaneResult<JobHandle> {
        self.scheduler
            .add(JobKind::SyncNewCreatedPartition(SyncNewCreatedPartitionJob::new(request)))
    }

    /// Registers or updates a resource group nodes can be assigned from.
    pub fn upsert_resource_group(&self, group: ResourceGroup) {
        self.meta.upsert_resource_group(group);
    }

    /// Renders job submission, completion, and queue-rejection counters in
    /// Prometheus text exposition format, for serving from a `/metrics`
    /// endpoint.
    pub fn export_metrics(&self) -> String {
        self.metrics.export_prometheus()
    }

    /// Stops accepting new jobs; in-flight jobs finish, anything still
    /// queued is resolved with `Cancelled`.
    pub fn stop(&self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use qcoord_broker::{RecoveryInfo, SegmentInfo, StaticBroker};
    use qcoord_catalog::InMemoryCatalog;
    use qcoord_proxy::RecordingProxyManager;
    use qcoord_target::InMemoryTargetBackend;
    use qcoord_types::{CollectionId, FieldId, NodeId, PartitionId};

    fn control_plane(config: ControlPlaneConfig, broker: StaticBroker) -> (ControlPlane, Arc<InMemoryTargetBackend>) {
        let target = Arc::new(InMemoryTargetBackend::new());
        let meta = Arc::new(Meta::new());
        meta.upsert_resource_group(ResourceGroup {
            name: ResourceGroupName::default_group(),
            requests_node_num: 3,
            limits_node_num: 3,
            nodes: BTreeSet::from([NodeId::new(1), NodeId::new(2), NodeId::new(3)]),
        });

        let plane = ControlPlane::new(
            config,
            Arc::new(InMemoryCatalog::new()),
            Arc::new(broker),
            Arc::new(RecordingProxyManager::new()),
            target.clone(),
            target.clone(),
            meta,
        );
        (plane, target)
    }

    fn seeded_broker(collection_id: CollectionId) -> StaticBroker {
        let mut broker = StaticBroker::new();
        broker.seed(
            collection_id,
            vec![FieldId::new(100)],
            vec![PartitionId::new(10)],
            vec![],
            RecoveryInfo {
                channels: vec!["ch-0".into()],
                segments: vec![SegmentInfo { segment_id: 100, partition_id: PartitionId::new(10) }],
            },
        );
        broker
    }

    #[tokio::test]
    async fn load_collection_defaults_replica_number_and_resource_group() {
        let id = CollectionId::new(1);
        let (plane, target) =
            control_plane(ControlPlaneConfig::default().with_convergence_timeout(Duration::from_millis(200)), seeded_broker(id));

        let handle = plane
            .load_collection(LoadCollectionRequest {
                collection_id: id,
                replica_number: 0,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        target.announce_loaded(id, None);

        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn load_collection_records_submission_and_completion_metrics() {
        let id = CollectionId::new(1);
        let (plane, target) =
            control_plane(ControlPlaneConfig::default().with_convergence_timeout(Duration::from_millis(200)), seeded_broker(id));

        let handle = plane
            .load_collection(LoadCollectionRequest {
                collection_id: id,
                replica_number: 1,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        target.announce_loaded(id, None);
        handle.wait().await.unwrap();

        let exported = plane.export_metrics();
        assert!(exported.contains("qcoord_jobs_submitted_total{kind=\"load_collection\"} 1"));
        assert!(exported.contains("qcoord_jobs_completed_total{kind=\"load_collection\",outcome=\"succeeded\"} 1"));
    }

    #[tokio::test]
    async fn stop_fails_jobs_still_queued() {
        let id = CollectionId::new(1);
        let mut config = ControlPlaneConfig::default();
        config.convergence_timeout = Duration::from_millis(30);
        let (plane, _target) = control_plane(config, seeded_broker(id));

        let load_handle = plane
            .load_collection(LoadCollectionRequest {
                collection_id: id,
                replica_number: 1,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })
            .unwrap();
        let release_handle = plane.release_collection(ReleaseCollectionRequest { collection_id: id }).unwrap();
        plane.stop();

        assert!(matches!(load_handle.wait().await, Err(ControlPlaneError::Timeout)));
        assert!(matches!(release_handle.wait().await, Err(ControlPlaneError::Cancelled)));

        let rejected = plane.release_collection(ReleaseCollectionRequest { collection_id: id });
        assert!(matches!(rejected, Err(ControlPlaneError::Cancelled)));
    }
}
