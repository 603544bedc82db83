//! qcoord-scheduler: serializes jobs per `CollectionID` while letting
//! different collections progress in parallel.
//!
//! Shaped after the reference workspace's core-routing runtime: one bounded
//! inbox per worker, an explicit stop signal, and a `try_send` that returns
//! backpressure to the caller instead of growing the queue without bound.
//! The routing key here is `CollectionID` instead of a fixed core count, so
//! queues are created lazily on first use rather than up front.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use qcoord_job::{Job, JobContext, JobHandle, JobKind};
use qcoord_types::{CollectionId, ControlPlaneError, ControlPlaneResult, JobMetricsSink};
use tokio::sync::mpsc;

/// Errors local to the scheduler, folded into [`ControlPlaneError::Internal`]
/// at the boundary so callers still only match on the stable six-variant
/// taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job queue for collection {0:?} is full")]
    QueueFull(CollectionId),
}

/// Serializes [`JobKind`]s per collection. One lightweight worker task is
/// spawned per collection the first time a job for it is added, and stays
/// alive for the scheduler's lifetime — one worker per active collection
/// queue, without the extra bookkeeping needed to tear a worker down
/// between bursts (see the grounding ledger for the tradeoff).
pub struct Scheduler {
    ctx: JobContext,
    queue_capacity: usize,
    queues: Mutex<HashMap<CollectionId, mpsc::Sender<Job>>>,
    stopped: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(ctx: JobContext, queue_capacity: usize) -> Self {
        Self {
            ctx,
            queue_capacity: queue_capacity.max(1),
            queues: Mutex::new(HashMap::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues `kind` behind any in-flight or already-queued job for the
    /// same collection and returns immediately; `Add` is non-blocking.
    /// Rejected once [`Scheduler::stop`] has been called, or once the
    /// collection's queue is at `queue_capacity`.
    pub fn add(&self, kind: JobKind) -> ControlPlaneResult<JobHandle> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ControlPlaneError::Cancelled);
        }

        let label = kind.label();
        let (job, handle) = Job::new(kind);
        let collection_id = job.collection_id();

        let mut queues = self.queues.lock().unwrap();
        let rejected = match queues.get(&collection_id) {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => None,
                Err(mpsc::error::TrySendError::Full(_)) => Some(()),
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    unreachable!("the spawned worker holds the receiver for as long as the sender lives in this map")
                }
            },
            None => {
                let (tx, rx) = mpsc::channel(self.queue_capacity);
                tx.try_send(job).expect("a freshly created channel has spare capacity");
                queues.insert(collection_id, tx);
                tokio::spawn(Self::run_queue(collection_id, rx, self.ctx.clone(), self.stopped.clone()));
                None
            }
        };
        drop(queues);

        match rejected {
            None => {
                self.ctx.metrics.record_submitted(label);
                Ok(handle)
            }
            Some(()) => {
                self.ctx.metrics.record_queue_full(label);
                Err(ControlPlaneError::internal(SchedulerError::QueueFull(collection_id)))
            }
        }
    }

    async fn run_queue(
        collection_id: CollectionId,
        mut rx: mpsc::Receiver<Job>,
        ctx: JobContext,
        stopped: Arc<AtomicBool>,
    ) {
        while let Some(job) = rx.recv().await {
            if stopped.load(Ordering::Acquire) {
                tracing::debug!(%collection_id, "scheduler stopped, failing queued job");
                job.fail(ControlPlaneError::Cancelled, ctx.metrics.as_ref());
                continue;
            }
            job.run(&ctx).await;
        }
    }

    /// Stops accepting new work. Jobs already running finish normally;
    /// anything still sitting in a queue is resolved with `Cancelled`
    /// instead of being dispatched.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use qcoord_broker::{RecoveryInfo, SegmentInfo, StaticBroker};
    use qcoord_catalog::InMemoryCatalog;
    use qcoord_job::{LoadCollectionJob, LoadCollectionRequest, ReleaseCollectionJob, ReleaseCollectionRequest};
    use qcoord_meta::Meta;
    use qcoord_proxy::RecordingProxyManager;
    use qcoord_target::InMemoryTargetBackend;
    use qcoord_types::{FieldId, NodeId, PartitionId, ResourceGroup, ResourceGroupName};

    fn test_context(broker: StaticBroker) -> (JobContext, Arc<InMemoryTargetBackend>) {
        let target = Arc::new(InMemoryTargetBackend::new());
        let meta = Arc::new(Meta::new());
        meta.upsert_resource_group(ResourceGroup {
            name: ResourceGroupName::default_group(),
            requests_node_num: 3,
            limits_node_num: 3,
            nodes: BTreeSet::from([NodeId::new(1), NodeId::new(2), NodeId::new(3)]),
        });

        let ctx = JobContext::new(
            Arc::new(InMemoryCatalog::new()),
            Arc::new(broker),
            Arc::new(RecordingProxyManager::new()),
            target.clone(),
            target.clone(),
            meta,
            None,
            Duration::from_millis(200),
        );
        (ctx, target)
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
                segments: vec![SegmentInfo {
                    segment_id: 100,
                    partition_id: PartitionId::new(10),
                }],
            },
        );
        broker
    }

    #[tokio::test]
    async fn load_then_release_run_in_fifo_order_for_one_collection() {
        let id = CollectionId::new(1);
        let (ctx, target) = test_context(seeded_broker(id));
        let scheduler = Scheduler::new(ctx, 8);

        let load_handle = scheduler
            .add(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
                collection_id: id,
                replica_number: 1,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })))
            .unwrap();
        let release_handle = scheduler
            .add(JobKind::ReleaseCollection(ReleaseCollectionJob::new(ReleaseCollectionRequest {
                collection_id: id,
            })))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        target.announce_loaded(id, None);

        assert!(load_handle.wait().await.is_ok());
        assert!(release_handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn different_collections_do_not_block_each_other() {
        let a = CollectionId::new(1);
        let b = CollectionId::new(2);
        let (ctx, target) = test_context({
            let mut broker = seeded_broker(a);
            broker.seed(
                b,
                vec![FieldId::new(100)],
                vec![PartitionId::new(20)],
                vec![],
                RecoveryInfo {
                    channels: vec!["ch-0".into()],
                    segments: vec![SegmentInfo {
                        segment_id: 200,
                        partition_id: PartitionId::new(20),
                    }],
                },
            );
            broker
        });
        let scheduler = Scheduler::new(ctx, 8);

        let handle_a = scheduler
            .add(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
                collection_id: a,
                replica_number: 1,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })))
            .unwrap();
        let handle_b = scheduler
            .add(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
                collection_id: b,
                replica_number: 1,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        target.announce_loaded(a, None);
        target.announce_loaded(b, None);

        assert!(handle_a.wait().await.is_ok());
        assert!(handle_b.wait().await.is_ok());
    }

    #[tokio::test]
    async fn add_after_stop_is_rejected() {
        let id = CollectionId::new(1);
        let (ctx, _target) = test_context(seeded_broker(id));
        let scheduler = Scheduler::new(ctx, 8);
        scheduler.stop();

        let result = scheduler.add(JobKind::ReleaseCollection(ReleaseCollectionJob::new(ReleaseCollectionRequest {
            collection_id: id,
        })));
        assert!(matches!(result, Err(ControlPlaneError::Cancelled)));
    }

    #[tokio::test]
    async fn queued_job_is_failed_once_stopped() {
        let id = CollectionId::new(1);
        let (mut ctx, _target) = test_context(seeded_broker(id));
        ctx.convergence_timeout = Duration::from_millis(30);
        let scheduler = Scheduler::new(ctx, 8);

        // The load never converges (nothing calls `announce_loaded`), so it
        // occupies the collection's worker until its timeout fires, keeping
        // the release job below behind it in the queue.
        let load_handle = scheduler
            .add(JobKind::LoadCollection(LoadCollectionJob::new(LoadCollectionRequest {
                collection_id: id,
                replica_number: 1,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })))
            .unwrap();
        let release_handle = scheduler
            .add(JobKind::ReleaseCollection(ReleaseCollectionJob::new(ReleaseCollectionRequest {
                collection_id: id,
            })))
            .unwrap();
        scheduler.stop();

        assert!(matches!(load_handle.wait().await, Err(ControlPlaneError::Timeout)));
        assert!(matches!(release_handle.wait().await, Err(ControlPlaneError::Cancelled)));
    }

    #[tokio::test]
    async fn add_beyond_queue_capacity_is_rejected() {
        let id = CollectionId::new(1);
        let (ctx, _target) = test_context(seeded_broker(id));
        let scheduler = Scheduler::new(ctx, 1);

        // The worker task is spawned but the current-thread test runtime
        // won't poll it until this function yields, so the first job still
        // occupies the capacity-1 buffer when the second is attempted.
        let _first = scheduler
            .add(JobKind::ReleaseCollection(ReleaseCollectionJob::new(ReleaseCollectionRequest {
                collection_id: id,
            })))
            .unwrap();
        let second = scheduler.add(JobKind::ReleaseCollection(ReleaseCollectionJob::new(ReleaseCollectionRequest {
            collection_id: id,
        })));

        let err = second.err().expect("queue is at capacity");
        assert!(err.downcast_ref::<SchedulerError>().is_some());
    }
}
