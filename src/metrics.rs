//! Graph metrics over the undirected interaction graph
//!
//! Centrality, clustering and component helpers. All functions assume a
//! simple graph (no parallel edges, no self loops), which `GraphStore`
//! guarantees by construction.

use crate::GraphError;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashSet, VecDeque};

/// Degree centrality: fraction of the other nodes this node is adjacent to
pub fn degree_centrality<N, E>(graph: &UnGraph<N, E>, node: NodeIndex) -> f64 {
    let n = graph.node_count();
    if n <= 1 {
        return 0.0;
    }
    graph.neighbors(node).count() as f64 / (n - 1) as f64
}

/// Betweenness centrality for every node, indexed by `NodeIndex::index()`.
///
/// Brandes' algorithm for unweighted graphs, normalized by
/// `1 / ((n - 1)(n - 2))`. O(n·m), callers bound `n` before calling.
pub fn betweenness_centrality<N, E>(graph: &UnGraph<N, E>) -> Vec<f64> {
    let n = graph.node_count();
    let mut centrality = vec![0.0; n];

    for source in graph.node_indices() {
        let mut stack = Vec::with_capacity(n);
        let mut predecessors: Vec<Vec<NodeIndex>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut distance: Vec<Option<usize>> = vec![None; n];

        sigma[source.index()] = 1.0;
        distance[source.index()] = Some(0);
        let mut queue = VecDeque::from([source]);

        while let Some(v) = queue.pop_front() {
            stack.push(v);
            let Some(dv) = distance[v.index()] else {
                continue;
            };
            for w in graph.neighbors(v) {
                if distance[w.index()].is_none() {
                    distance[w.index()] = Some(dv + 1);
                    queue.push_back(w);
                }
                if distance[w.index()] == Some(dv + 1) {
                    sigma[w.index()] += sigma[v.index()];
                    predecessors[w.index()].push(v);
                }
            }
        }

        let mut delta = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for v in &predecessors[w.index()] {
                delta[v.index()] +=
                    sigma[v.index()] / sigma[w.index()] * (1.0 + delta[w.index()]);
            }
            if w != source {
                centrality[w.index()] += delta[w.index()];
            }
        }
    }

    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for value in &mut centrality {
            *value *= scale;
        }
    }

    centrality
}

/// Closeness centrality: `(n - 1) / Σ shortest-path distances`.
///
/// Only defined here for connected graphs.
pub fn closeness_centrality<N, E>(
    graph: &UnGraph<N, E>,
    node: NodeIndex,
) -> Result<f64, GraphError> {
    let n = graph.node_count();
    if n <= 1 {
        return Ok(0.0);
    }

    let distances = bfs_distances(graph, node);
    if distances.iter().any(Option::is_none) {
        return Err(GraphError::GraphDisconnected(
            "closeness centrality requires a connected graph".to_string(),
        ));
    }

    let total: usize = distances.iter().flatten().sum();
    if total == 0 {
        return Ok(0.0);
    }
    Ok((n - 1) as f64 / total as f64)
}

/// Whether every node can reach every other node
pub fn is_connected<N, E>(graph: &UnGraph<N, E>) -> bool {
    match graph.node_indices().next() {
        Some(start) => connected_component(graph, start).len() == graph.node_count(),
        None => true,
    }
}

/// Local clustering coefficient: closed triangles over possible triangles
pub fn local_clustering<N, E>(graph: &UnGraph<N, E>, node: NodeIndex) -> f64 {
    let neighbors: HashSet<NodeIndex> = graph.neighbors(node).filter(|&n| n != node).collect();
    let k = neighbors.len();
    if k < 2 {
        return 0.0;
    }

    let mut links = 0usize;
    for &u in &neighbors {
        for w in graph.neighbors(u) {
            if w.index() > u.index() && neighbors.contains(&w) {
                links += 1;
            }
        }
    }

    2.0 * links as f64 / (k * (k - 1)) as f64
}

/// Mean local clustering coefficient over all nodes
pub fn average_clustering<N, E>(graph: &UnGraph<N, E>) -> f64 {
    let n = graph.node_count();
    if n == 0 {
        return 0.0;
    }
    graph
        .node_indices()
        .map(|node| local_clustering(graph, node))
        .sum::<f64>()
        / n as f64
}

/// Nodes in the same connected component as `node`, including itself
pub fn connected_component<N, E>(graph: &UnGraph<N, E>, node: NodeIndex) -> HashSet<NodeIndex> {
    let mut component = HashSet::from([node]);
    let mut queue = VecDeque::from([node]);

    while let Some(current) = queue.pop_front() {
        for next in graph.neighbors(current) {
            if component.insert(next) {
                queue.push_back(next);
            }
        }
    }

    component
}

pub fn component_count<N, E>(graph: &UnGraph<N, E>) -> usize {
    petgraph::algo::connected_components(graph)
}

/// Edges with exactly one endpoint inside `component`
pub fn external_edge_count<N, E>(graph: &UnGraph<N, E>, component: &HashSet<NodeIndex>) -> usize {
    component
        .iter()
        .flat_map(|&node| graph.neighbors(node))
        .filter(|neighbor| !component.contains(neighbor))
        .count()
}

fn bfs_distances<N, E>(graph: &UnGraph<N, E>, start: NodeIndex) -> Vec<Option<usize>> {
    let mut distance = vec![None; graph.node_count()];
    distance[start.index()] = Some(0);
    let mut queue = VecDeque::from([(start, 0usize)]);

    while let Some((current, d)) = queue.pop_front() {
        for next in graph.neighbors(current) {
            if distance[next.index()].is_none() {
                distance[next.index()] = Some(d + 1);
                queue.push_back((next, d + 1));
            }
        }
    }

    distance
}
