//! Collaborators every job needs, bundled so construction sites don't thread
//! five separate `Arc`s through every job constructor.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qcoord_broker::Broker;
use qcoord_catalog::Catalog;
use qcoord_meta::Meta;
use qcoord_proxy::ProxyManager;
use qcoord_target::{wait_for_loaded, CollectionObserver, TargetBackend};
use qcoord_types::{
    CollectionId, ControlPlaneError, ControlPlaneResult, JobMetricsSink, NoopMetricsSink, PartitionId, ReplicaId,
};

use crate::failed_load_cache::FailedLoadCache;

/// Shared, read-only collaborators plus tunables a job needs to run.
///
/// Constructed once by the embedder (the `qcoord` facade, or a test) and
/// handed to every job and to the scheduler: every external collaborator
/// is a plain constructed-once-and-passed-in value, not just the
/// failed-load cache.
#[derive(Clone)]
pub struct JobContext {
    pub catalog: Arc<dyn Catalog>,
    pub broker: Arc<dyn Broker>,
    pub proxy: Arc<dyn ProxyManager>,
    pub target: Arc<dyn TargetBackend>,
    pub observer: Arc<dyn CollectionObserver>,
    pub meta: Arc<Meta>,
    pub failed_load_cache: Option<Arc<FailedLoadCache>>,
    /// Bound on how long `Execute` waits for the collection observer to
    /// report `Loaded` before returning `Timeout`.
    pub convergence_timeout: Duration,
    /// Collector jobs and the scheduler report into. Defaults to a sink
    /// that discards everything; an embedder wires in a real collector
    /// with [`JobContext::with_metrics`].
    pub metrics: Arc<dyn JobMetricsSink>,
    replica_id_allocator: Arc<AtomicI64>,
}

impl JobContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: Arc<dyn Catalog>,
        broker: Arc<dyn Broker>,
        proxy: Arc<dyn ProxyManager>,
        target: Arc<dyn TargetBackend>,
        observer: Arc<dyn CollectionObserver>,
        meta: Arc<Meta>,
        failed_load_cache: Option<Arc<FailedLoadCache>>,
        convergence_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            broker,
            proxy,
            target,
            observer,
            meta,
            failed_load_cache,
            convergence_timeout,
            metrics: Arc::new(NoopMetricsSink),
            replica_id_allocator: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Replaces the metrics sink, e.g. with a facade's concrete collector.
    pub fn with_metrics(mut self, metrics: Arc<dyn JobMetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Allocates the next replica id from this context's counter.
    pub(crate) fn allocate_replica_id(&self) -> ReplicaId {
        ReplicaId::new(self.replica_id_allocator.fetch_add(1, Ordering::Relaxed))
    }

    /// Blocks until the collection observer reports `collection_id` (and,
    /// if given, `partition_id`) `Loaded`, bounded by
    /// [`Self::convergence_timeout`].
    pub(crate) async fn observer_wait(
        &self,
        collection_id: CollectionId,
        partition_id: Option<PartitionId>,
    ) -> ControlPlaneResult<()> {
        wait_for_loaded(self.observer.as_ref(), collection_id, partition_id, self.convergence_timeout)
            .await
            .map_err(|err| match err {
                qcoord_target::TargetError::Timeout => ControlPlaneError::Timeout,
                other => ControlPlaneError::internal(other),
            })
    }
}
