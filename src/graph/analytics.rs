//! Graph connectivity analytics.
//!
//! Feeds the distribution tracker's connectivity category and the final
//! export. Clusters are connected components of the strong-edge subgraph
//! (strength at or above a threshold); weaker relationships still count
//! toward degree, so an entity with only weak ties is connected but not
//! clustered.

use std::collections::HashMap;

use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use crate::graph::GraphStore;
use crate::ident::EntityId;

/// Threshold configuration for cluster detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Minimum relationship strength for an edge to bind a cluster (default: 0.5).
    pub strong_edge_threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            strong_edge_threshold: 0.5,
        }
    }
}

/// Connectivity metrics over the current graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityMetrics {
    /// Number of clusters (strong components with at least two members).
    pub cluster_count: usize,
    /// Mean member count across clusters; 0 when there are no clusters.
    pub average_cluster_size: f64,
    /// Mean edge density within clusters: strong edges / possible pairs.
    pub intra_cluster_density: f64,
    /// Edges crossing cluster boundaries, over possible cross-cluster pairs.
    pub inter_cluster_density: f64,
    /// Fraction of entities with no non-archived relationship at all.
    pub isolated_ratio: f64,
}

impl ConnectivityMetrics {
    pub fn empty() -> Self {
        Self {
            cluster_count: 0,
            average_cluster_size: 0.0,
            intra_cluster_density: 0.0,
            inter_cluster_density: 0.0,
            isolated_ratio: 0.0,
        }
    }
}

/// Compute connectivity metrics for the store's current state.
pub fn connectivity(store: &GraphStore, config: &ClusteringConfig) -> ConnectivityMetrics {
    let entities = store.entities();
    if entities.is_empty() {
        return ConnectivityMetrics::empty();
    }

    // Dense index over entity ids; ids are sequential so this is a direct map.
    let index_of: HashMap<EntityId, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id, i))
        .collect();

    let mut degree = vec![0usize; entities.len()];
    let mut uf: UnionFind<usize> = UnionFind::new(entities.len());
    let mut strong_edges: Vec<(usize, usize)> = Vec::new();
    let mut all_edges: Vec<(usize, usize)> = Vec::new();

    for rel in store.relationships() {
        if rel.archived {
            continue;
        }
        let (Some(&a), Some(&b)) = (index_of.get(&rel.src), index_of.get(&rel.dst)) else {
            continue;
        };
        degree[a] += 1;
        degree[b] += 1;
        all_edges.push((a, b));
        if rel.strength >= config.strong_edge_threshold {
            uf.union(a, b);
            strong_edges.push((a, b));
        }
    }

    let isolated = degree.iter().filter(|d| **d == 0).count();
    let isolated_ratio = isolated as f64 / entities.len() as f64;

    // Group members by strong-component root; singletons are not clusters.
    let mut members: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..entities.len() {
        members.entry(uf.find(i)).or_default().push(i);
    }
    let mut cluster_roots: Vec<usize> = members
        .iter()
        .filter(|(_, m)| m.len() >= 2)
        .map(|(root, _)| *root)
        .collect();
    cluster_roots.sort_unstable();

    let cluster_count = cluster_roots.len();
    if cluster_count == 0 {
        return ConnectivityMetrics {
            cluster_count: 0,
            average_cluster_size: 0.0,
            intra_cluster_density: 0.0,
            inter_cluster_density: 0.0,
            isolated_ratio,
        };
    }

    let total_members: usize = cluster_roots.iter().map(|r| members[r].len()).sum();
    let average_cluster_size = total_members as f64 / cluster_count as f64;

    // Intra density: per-cluster strong edges over possible pairs, averaged.
    let mut intra_sum = 0.0;
    for root in &cluster_roots {
        let n = members[root].len();
        let possible = (n * (n - 1)) / 2;
        let within = strong_edges
            .iter()
            .filter(|(a, b)| uf.find(*a) == *root && uf.find(*b) == *root)
            .count();
        if possible > 0 {
            intra_sum += within.min(possible) as f64 / possible as f64;
        }
    }
    let intra_cluster_density = intra_sum / cluster_count as f64;

    // Inter density: any edge whose endpoints land in different clusters,
    // over the possible cross-cluster pairs.
    let in_cluster = |i: usize| {
        let root = uf.find(i);
        members.get(&root).map(|m| m.len() >= 2).unwrap_or(false)
    };
    let crossing = all_edges
        .iter()
        .filter(|(a, b)| in_cluster(*a) && in_cluster(*b) && uf.find(*a) != uf.find(*b))
        .count();
    let mut possible_cross = 0usize;
    for (i, ra) in cluster_roots.iter().enumerate() {
        for rb in cluster_roots.iter().skip(i + 1) {
            possible_cross += members[ra].len() * members[rb].len();
        }
    }
    let inter_cluster_density = if possible_cross > 0 {
        (crossing.min(possible_cross)) as f64 / possible_cross as f64
    } else {
        0.0
    };

    ConnectivityMetrics {
        cluster_count,
        average_cluster_size,
        intra_cluster_density,
        inter_cluster_density,
        isolated_ratio,
    }
}
