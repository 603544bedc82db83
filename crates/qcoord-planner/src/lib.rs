//! qcoord-planner: replica admission and node assignment.
//!
//! Pure computation: given a replica count, the resource groups a load
//! requested, and the current state of those groups, decide whether the
//! request is admissible and, if so, which nodes each replica gets. No IO,
//! no locking — callers own fetching the `ResourceGroup` snapshots and
//! persisting the result.

use std::collections::BTreeMap;

use qcoord_types::{NodeId, ResourceGroup, ResourceGroupName};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error("resource groups have {available} nodes but {requested} replicas were requested")]
    ResourceGroupNodeNotEnough { requested: u32, available: usize },
}

/// The node set a single replica should be assigned, and the resource group
/// it was carved out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPlacement {
    pub resource_group: ResourceGroupName,
    pub nodes: Vec<NodeId>,
}

/// Resolves an empty request list to `[default]`, matching the admission
/// rule that an empty resource-group request falls back to the default group.
fn groups_or_default(requested: &[ResourceGroupName]) -> Vec<ResourceGroupName> {
    if requested.is_empty() {
        vec![ResourceGroupName::default_group()]
    } else {
        let mut unique: Vec<ResourceGroupName> = requested.to_vec();
        unique.sort();
        unique.dedup();
        unique
    }
}

/// Plans node assignment for `replica_number` replicas across
/// `requested_groups`, given the current membership of every known resource
/// group in `groups`. Groups named in the request but absent from `groups`
/// are treated as having zero current nodes.
///
/// Returns one [`ReplicaPlacement`] per replica, in no particular order
/// relative to eventual `ReplicaID` allocation (the caller pairs them up).
pub fn plan_replicas(
    replica_number: u32,
    requested_groups: &[ResourceGroupName],
    groups: &BTreeMap<ResourceGroupName, ResourceGroup>,
) -> Result<Vec<ReplicaPlacement>, PlannerError> {
    let selected = groups_or_default(requested_groups);

    let node_counts: BTreeMap<&ResourceGroupName, usize> = selected
        .iter()
        .map(|name| {
            let count = groups.get(name).map(|g| g.nodes.len()).unwrap_or(0);
            (name, count)
        })
        .collect();

    let total_nodes: usize = node_counts.values().sum();
    if (total_nodes as u64) < replica_number as u64 {
        return Err(PlannerError::ResourceGroupNodeNotEnough {
            requested: replica_number,
            available: total_nodes,
        });
    }

    let allocations = apportion(replica_number, &node_counts);

    let mut placements = Vec::with_capacity(replica_number as usize);
    for name in &selected {
        let alloc = *allocations.get(name).unwrap_or(&0);
        if alloc == 0 {
            continue;
        }
        let mut nodes: Vec<NodeId> = groups
            .get(name)
            .map(|g| g.nodes.iter().copied().collect())
            .unwrap_or_default();
        nodes.sort();
        for block in split_into_blocks(&nodes, alloc) {
            placements.push(ReplicaPlacement {
                resource_group: name.clone(),
                nodes: block,
            });
        }
    }
    Ok(placements)
}

/// Largest-remainder apportionment of `total` replicas across groups,
/// weighted by each group's current node count, breaking ties by ascending
/// group name, for a deterministic tie-break order.
fn apportion(
    total: u32,
    node_counts: &BTreeMap<&ResourceGroupName, usize>,
) -> BTreeMap<ResourceGroupName, u32> {
    let denominator: usize = node_counts.values().sum();
    if denominator == 0 {
        return BTreeMap::new();
    }

    let mut alloc: BTreeMap<ResourceGroupName, u32> = BTreeMap::new();
    let mut remainders: Vec<(ResourceGroupName, u64)> = Vec::new();
    let mut assigned = 0u32;

    for (name, &nodes) in node_counts {
        let scaled = total as u64 * nodes as u64;
        let quota = scaled / denominator as u64;
        let remainder = scaled % denominator as u64;
        alloc.insert((*name).clone(), quota as u32);
        assigned += quota as u32;
        remainders.push(((*name).clone(), remainder));
    }

    let mut short = total.saturating_sub(assigned);
    // Largest remainder first; ascending group name breaks ties.
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
    for (name, _) in remainders {
        if short == 0 {
            break;
        }
        *alloc.entry(name).or_insert(0) += 1;
        short -= 1;
    }

    alloc
}

/// Splits `nodes` into `blocks` contiguous, near-equal-size groups. The
/// first `nodes.len() % blocks` blocks get one extra node.
fn split_into_blocks(nodes: &[NodeId], blocks: u32) -> Vec<Vec<NodeId>> {
    if blocks == 0 {
        return Vec::new();
    }
    let blocks = blocks as usize;
    let base = nodes.len() / blocks;
    let extra = nodes.len() % blocks;

    let mut result = Vec::with_capacity(blocks);
    let mut offset = 0;
    for i in 0..blocks {
        let size = base + usize::from(i < extra);
        result.push(nodes[offset..offset + size].to_vec());
        offset += size;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use proptest::prelude::*;
    use test_case::test_case;

    fn group(name: &str, node_ids: &[i64]) -> ResourceGroup {
        ResourceGroup {
            name: ResourceGroupName::new(name),
            requests_node_num: node_ids.len() as u32,
            limits_node_num: node_ids.len() as u32,
            nodes: node_ids.iter().map(|&n| NodeId::new(n)).collect::<BTreeSet<_>>(),
        }
    }

    #[test]
    fn empty_request_falls_back_to_default_group() {
        let mut groups = BTreeMap::new();
        groups.insert(
            ResourceGroupName::default_group(),
            group("__default_resource_group", &[1, 2, 3]),
        );

        let placements = plan_replicas(2, &[], &groups).unwrap();
        let total_nodes: usize = placements.iter().map(|p| p.nodes.len()).sum();
        assert_eq!(placements.len(), 2);
        assert_eq!(total_nodes, 3); // every node assigned, split near-evenly
    }

    #[test]
    fn insufficient_nodes_is_rejected() {
        let mut groups = BTreeMap::new();
        groups.insert(ResourceGroupName::new("rg1"), group("rg1", &[1]));

        let err = plan_replicas(3, &[ResourceGroupName::new("rg1")], &groups).unwrap_err();
        assert_eq!(
            err,
            PlannerError::ResourceGroupNodeNotEnough {
                requested: 3,
                available: 1
            }
        );
    }

    #[test]
    fn replica_node_sets_are_pairwise_disjoint() {
        let mut groups = BTreeMap::new();
        groups.insert(ResourceGroupName::new("rg1"), group("rg1", &[1, 2, 3, 4]));

        let placements = plan_replicas(2, &[ResourceGroupName::new("rg1")], &groups).unwrap();
        assert_eq!(placements.len(), 2);
        let a: BTreeSet<_> = placements[0].nodes.iter().collect();
        let b: BTreeSet<_> = placements[1].nodes.iter().collect();
        assert!(a.is_disjoint(&b));
        assert!(!placements[0].nodes.is_empty());
        assert!(!placements[1].nodes.is_empty());
    }

    #[test]
    fn proportional_split_weighted_by_node_count() {
        let mut groups = BTreeMap::new();
        groups.insert(ResourceGroupName::new("big"), group("big", &[1, 2, 3, 4]));
        groups.insert(ResourceGroupName::new("small"), group("small", &[5]));

        let placements = plan_replicas(
            5,
            &[ResourceGroupName::new("big"), ResourceGroupName::new("small")],
            &groups,
        )
        .unwrap();

        let big_replicas = placements
            .iter()
            .filter(|p| p.resource_group == ResourceGroupName::new("big"))
            .count();
        let small_replicas = placements
            .iter()
            .filter(|p| p.resource_group == ResourceGroupName::new("small"))
            .count();
        assert_eq!(big_replicas, 4);
        assert_eq!(small_replicas, 1);
    }

    #[test]
    fn a_group_cannot_host_more_replicas_than_it_has_nodes() {
        let mut groups = BTreeMap::new();
        groups.insert(ResourceGroupName::new("rg1"), group("rg1", &[1, 2]));
        groups.insert(ResourceGroupName::new("rg2"), group("rg2", &[3, 4, 5, 6]));

        let placements = plan_replicas(
            3,
            &[ResourceGroupName::new("rg1"), ResourceGroupName::new("rg2")],
            &groups,
        )
        .unwrap();

        let rg1_replicas = placements
            .iter()
            .filter(|p| p.resource_group == ResourceGroupName::new("rg1"))
            .count();
        assert!(rg1_replicas <= 2);
    }

    #[test_case(&[("rg1", 4)], 4, 4, 0; "single group exact fit")]
    #[test_case(&[("rg1", 4), ("rg2", 1)], 5, 4, 1; "two groups weighted by node count")]
    #[test_case(&[("rg1", 3), ("rg2", 5)], 4, 2, 2; "remainder tie-break favors ascending group name")]
    fn apportion_splits_by_node_count_weight(
        groups_and_nodes: &[(&str, i64)],
        replica_number: u32,
        expected_rg1: usize,
        expected_rg2: usize,
    ) {
        let mut groups = BTreeMap::new();
        let mut names = Vec::new();
        for &(name, node_count) in groups_and_nodes {
            let ids: Vec<i64> = (0..node_count).collect();
            groups.insert(ResourceGroupName::new(name), group(name, &ids));
            names.push(ResourceGroupName::new(name));
        }

        let placements = plan_replicas(replica_number, &names, &groups).unwrap();
        let count_in = |want: &str| placements.iter().filter(|p| p.resource_group.as_str() == want).count();
        assert_eq!(count_in("rg1"), expected_rg1);
        if groups_and_nodes.len() > 1 {
            assert_eq!(count_in("rg2"), expected_rg2);
        }
    }

    proptest! {
        /// Property: every node assigned by `plan_replicas` belongs to the
        /// resource group its placement names, and no node is assigned twice
        /// across the whole plan.
        #[test]
        fn prop_assigned_nodes_come_from_their_named_group_and_are_unique(
            rg1_nodes in 1_i64..12,
            rg2_nodes in 1_i64..12,
            replica_number in 1_u32..8,
        ) {
            let mut groups = BTreeMap::new();
            groups.insert(ResourceGroupName::new("rg1"), group("rg1", &(0..rg1_nodes).collect::<Vec<_>>()));
            groups.insert(ResourceGroupName::new("rg2"), group("rg2", &(100..100 + rg2_nodes).collect::<Vec<_>>()));

            let total_nodes = (rg1_nodes + rg2_nodes) as u32;
            prop_assume!(replica_number <= total_nodes);

            let placements = plan_replicas(
                replica_number,
                &[ResourceGroupName::new("rg1"), ResourceGroupName::new("rg2")],
                &groups,
            )
            .unwrap();

            let mut seen = BTreeSet::new();
            for placement in &placements {
                let membership = &groups.get(&placement.resource_group).unwrap().nodes;
                for node in &placement.nodes {
                    prop_assert!(membership.contains(node));
                    prop_assert!(seen.insert(*node), "node {:?} assigned more than once", node);
                }
            }
        }

        /// Property: the apportioned replica counts across all groups always
        /// sum to exactly the number requested, never more or less.
        #[test]
        fn prop_apportion_conserves_total_replica_count(
            rg1_nodes in 0_usize..10,
            rg2_nodes in 0_usize..10,
            rg3_nodes in 0_usize..10,
            total in 0_u32..20,
        ) {
            let mut node_counts: BTreeMap<&ResourceGroupName, usize> = BTreeMap::new();
            let names = [
                ResourceGroupName::new("rg1"),
                ResourceGroupName::new("rg2"),
                ResourceGroupName::new("rg3"),
            ];
            node_counts.insert(&names[0], rg1_nodes);
            node_counts.insert(&names[1], rg2_nodes);
            node_counts.insert(&names[2], rg3_nodes);

            let denominator: usize = node_counts.values().sum();
            let alloc = apportion(total, &node_counts);
            let allocated: u32 = alloc.values().sum();

            if denominator == 0 {
                prop_assert_eq!(allocated, 0);
            } else {
                prop_assert_eq!(allocated, total);
            }

            // No group can be handed more replicas than it has nodes to host.
            for (name, &nodes) in &node_counts {
                let got = *alloc.get(*name).unwrap_or(&0);
                prop_assert!((got as usize) <= nodes || nodes == 0 && got == 0);
            }
        }

        /// Property: splitting a node list into `blocks` groups never drops
        /// or duplicates a node, and block sizes differ by at most one.
        #[test]
        fn prop_split_into_blocks_partitions_without_loss(
            node_count in 0_usize..40,
            blocks in 1_u32..10,
        ) {
            let nodes: Vec<NodeId> = (0..node_count as i64).map(NodeId::new).collect();
            let result = split_into_blocks(&nodes, blocks);

            prop_assert_eq!(result.len(), blocks as usize);
            let flattened: Vec<NodeId> = result.iter().flatten().copied().collect();
            prop_assert_eq!(flattened, nodes);

            let sizes: Vec<usize> = result.iter().map(|b| b.len()).collect();
            if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
                prop_assert!(max - min <= 1);
            }
        }
    }
}
