//! Local demo harness for the collection load/release control plane.
//!
//! Wires the in-memory catalog, broker, proxy and target implementations
//! into one [`qcoord::ControlPlane`], seeds a handful of partitions so a
//! load has something to converge against, then drives a single operation
//! end to end and prints its result. Not an RPC surface — see the
//! non-goals this crate stands in for.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use qcoord::{ControlPlane, ControlPlaneConfig};
use qcoord_broker::{RecoveryInfo, SegmentInfo, StaticBroker};
use qcoord_catalog::InMemoryCatalog;
use qcoord_meta::Meta;
use qcoord_proxy::RecordingProxyManager;
use qcoord_target::InMemoryTargetBackend;
use qcoord_types::{CollectionId, FieldId, NodeId, PartitionId, ResourceGroup, ResourceGroupName};

#[derive(Parser)]
#[command(name = "qcoord")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Number of query nodes in the default resource group.
    #[arg(long, default_value_t = 3, global = true)]
    nodes: u32,

    /// Partitions to seed in the broker, comma-separated.
    #[arg(long, value_delimiter = ',', default_value = "10,11", global = true)]
    seed_partitions: Vec<i64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a whole collection and wait for it to converge.
    LoadCollection {
        collection_id: i64,

        #[arg(long, default_value_t = 1)]
        replica_number: u32,
    },

    /// Load a subset of a collection's partitions.
    LoadPartitions {
        collection_id: i64,

        /// Partitions to load, comma-separated.
        #[arg(long, value_delimiter = ',')]
        partitions: Vec<i64>,

        #[arg(long, default_value_t = 1)]
        replica_number: u32,
    },

    /// Release an entire collection.
    ReleaseCollection { collection_id: i64 },

    /// Release a subset of a collection's partitions.
    ReleasePartitions {
        collection_id: i64,

        #[arg(long, value_delimiter = ',')]
        partitions: Vec<i64>,
    },

    /// Sync a partition created after its collection was already loaded.
    SyncPartition { collection_id: i64, partition_id: i64 },
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
                .map(|&p| SegmentInfo { segment_id: p * 10, partition_id: PartitionId::new(p) })
                .collect(),
        },
    );
    broker
}

fn build_control_plane(cli: &Cli, collection_id: CollectionId) -> (ControlPlane, Arc<InMemoryTargetBackend>) {
    let target = Arc::new(InMemoryTargetBackend::new());
    let meta = Arc::new(Meta::new());
    meta.upsert_resource_group(ResourceGroup {
        name: ResourceGroupName::default_group(),
        requests_node_num: cli.nodes,
        limits_node_num: cli.nodes,
        nodes: (1..=cli.nodes).map(|n| NodeId::new(i64::from(n))).collect::<BTreeSet<_>>(),
    });

    let plane = ControlPlane::new(
        ControlPlaneConfig::default().with_convergence_timeout(Duration::from_secs(5)),
        Arc::new(InMemoryCatalog::new()),
        Arc::new(seeded_broker(collection_id, &cli.seed_partitions)),
        Arc::new(RecordingProxyManager::new()),
        target.clone(),
        target.clone(),
        meta,
    );
    (plane, target)
}

/// Stands in for the query nodes that would report convergence in a real
/// deployment: announces `Loaded` shortly after a load is submitted.
fn simulate_convergence(target: Arc<InMemoryTargetBackend>, collection_id: CollectionId, partition_id: Option<PartitionId>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        target.announce_loaded(collection_id, partition_id);
    });
}

/// Like [`simulate_convergence`] but announces one `Loaded` event per
/// partition: `LoadPartitionJob::execute` waits on each partition
/// individually, so a single collection-wide announcement never matches.
fn simulate_partition_convergence(target: Arc<InMemoryTargetBackend>, collection_id: CollectionId, partition_ids: Vec<PartitionId>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        for partition_id in partition_ids {
            target.announce_loaded(collection_id, Some(partition_id));
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::LoadCollection { collection_id, replica_number } => {
            let collection_id = CollectionId::new(*collection_id);
            let (plane, target) = build_control_plane(&cli, collection_id);
            simulate_convergence(target, collection_id, None);

            let handle = plane.load_collection(qcoord::LoadCollectionRequest {
                collection_id,
                replica_number: *replica_number,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })?;
            println!("{:?}", handle.wait().await);
        }
        Commands::LoadPartitions { collection_id, partitions, replica_number } => {
            let collection_id = CollectionId::new(*collection_id);
            let (plane, target) = build_control_plane(&cli, collection_id);
            let partition_ids: Vec<PartitionId> = partitions.iter().map(|&p| PartitionId::new(p)).collect();
            simulate_partition_convergence(target, collection_id, partition_ids.clone());

            let handle = plane.load_partitions(qcoord::LoadPartitionsRequest {
                collection_id,
                partition_ids,
                replica_number: *replica_number,
                resource_groups: vec![],
                load_fields: vec![],
                schema: None,
                user_specified_replica_mode: false,
            })?;
            println!("{:?}", handle.wait().await);
        }
        Commands::ReleaseCollection { collection_id } => {
            let collection_id = CollectionId::new(*collection_id);
            let (plane, _target) = build_control_plane(&cli, collection_id);

            let handle = plane.release_collection(qcoord::ReleaseCollectionRequest { collection_id })?;
            println!("{:?}", handle.wait().await);
        }
        Commands::ReleasePartitions { collection_id, partitions } => {
            let collection_id = CollectionId::new(*collection_id);
            let (plane, _target) = build_control_plane(&cli, collection_id);

            let handle = plane.release_partitions(qcoord::ReleasePartitionsRequest {
                collection_id,
                partition_ids: partitions.iter().map(|&p| PartitionId::new(p)).collect(),
            })?;
            println!("{:?}", handle.wait().await);
        }
        Commands::SyncPartition { collection_id, partition_id } => {
            let collection_id = CollectionId::new(*collection_id);
            let partition_id = PartitionId::new(*partition_id);
            let (plane, target) = build_control_plane(&cli, collection_id);
            simulate_convergence(target, collection_id, Some(partition_id));

            let handle = plane.sync_new_created_partition(qcoord::SyncNewCreatedPartitionRequest {
                collection_id,
                partition_id,
            })?;
            println!("{:?}", handle.wait().await);
        }
    }

    Ok(())
}
