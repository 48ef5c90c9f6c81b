//! Network anomaly detectors
//!
//! Each detector looks at one structural signal around a merchant. Every
//! detected anomaly adds the same flat amount to the risk score regardless of
//! kind, so detectors only decide presence and describe what they saw.

use crate::graph_store::{GraphNode, GraphStore};
use crate::{metrics, AnalyzerConfig, GraphError};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Network anomaly types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Money flowing from the merchant back to the paying user
    CircularTransactions,
    /// Many transactions inside a very short window
    TransactionBurst,
    /// Merchant linked to many other merchants through shared customers
    MerchantChain,
    /// Small component with almost no ties to the wider network
    IsolatedCluster,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::CircularTransactions => "circular_transactions",
            AnomalyKind::TransactionBurst => "transaction_burst",
            AnomalyKind::MerchantChain => "merchant_chain",
            AnomalyKind::IsolatedCluster => "isolated_cluster",
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkAnomaly {
    pub kind: AnomalyKind,
    pub description: String,
    pub severity: Severity,
}

/// Run every detector for a merchant.
///
/// `component` is the merchant's connected component, already computed by
/// the caller for the clustering metrics.
pub fn detect_network_anomalies(
    store: &GraphStore,
    config: &AnalyzerConfig,
    merchant_idx: NodeIndex,
    user_id: Option<&str>,
    component: &HashSet<NodeIndex>,
) -> Result<Vec<NetworkAnomaly>, GraphError> {
    let mut anomalies = Vec::new();
    let merchant = store.node_at(merchant_idx)?;

    if let Some(user_id) = user_id {
        if detect_circular_pattern(store, merchant_idx, user_id, config.circular_max_path_nodes) {
            anomalies.push(NetworkAnomaly {
                kind: AnomalyKind::CircularTransactions,
                description: "Circular transaction pattern detected".to_string(),
                severity: Severity::High,
            });
        }
    }

    if detect_burst_pattern(merchant, config) {
        anomalies.push(NetworkAnomaly {
            kind: AnomalyKind::TransactionBurst,
            description: "Unusual transaction burst detected".to_string(),
            severity: Severity::Medium,
        });
    }

    let chain_length = merchant_chain_length(store, merchant_idx);
    if chain_length > config.merchant_chain_threshold {
        anomalies.push(NetworkAnomaly {
            kind: AnomalyKind::MerchantChain,
            description: format!("Part of {}-merchant chain", chain_length),
            severity: Severity::Medium,
        });
    }

    if is_isolated_cluster(store, component, config) {
        anomalies.push(NetworkAnomaly {
            kind: AnomalyKind::IsolatedCluster,
            description: "Merchant in isolated network cluster".to_string(),
            severity: Severity::Low,
        });
    }

    Ok(anomalies)
}

/// Whether funds can flow from the merchant back to the user along a short
/// directed path.
///
/// `max_path_nodes` counts both endpoints, so 5 allows at most 4 arcs. At
/// least one arc is required.
pub fn detect_circular_pattern(
    store: &GraphStore,
    merchant_idx: NodeIndex,
    user_id: &str,
    max_path_nodes: usize,
) -> bool {
    let Some(user_idx) = store.node_index(user_id) else {
        return false;
    };
    let max_hops = max_path_nodes.saturating_sub(1);
    if max_hops == 0 {
        return false;
    }

    let flows = store.flows();
    let mut visited = HashSet::from([merchant_idx]);
    let mut queue = VecDeque::from([(merchant_idx, 0usize)]);

    while let Some((current, hops)) = queue.pop_front() {
        if hops == max_hops {
            continue;
        }
        for next in flows.neighbors(current) {
            if next == user_idx {
                return true;
            }
            if visited.insert(next) {
                queue.push_back((next, hops + 1));
            }
        }
    }

    false
}

/// Many transactions packed into the merchant's whole observed lifetime
pub fn detect_burst_pattern(merchant: &GraphNode, config: &AnalyzerConfig) -> bool {
    let span_hours = hours(merchant.activity_span());
    span_hours < config.burst_window_hours
        && merchant.total_transaction_count > config.burst_min_transactions
}

/// Number of distinct merchants sharing at least one user with this
/// merchant, counting the merchant itself
pub fn merchant_chain_length(store: &GraphStore, merchant_idx: NodeIndex) -> usize {
    let graph = store.interactions();
    let mut linked = HashSet::new();

    for user in graph.neighbors(merchant_idx) {
        if graph[user].is_merchant() {
            continue;
        }
        for other in graph.neighbors(user) {
            if other != merchant_idx && graph[other].is_merchant() {
                linked.insert(other);
            }
        }
    }

    linked.len() + 1
}

/// Small component with fewer than the configured number of outward edges
pub fn is_isolated_cluster(
    store: &GraphStore,
    component: &HashSet<NodeIndex>,
    config: &AnalyzerConfig,
) -> bool {
    if component.len() >= config.isolated_cluster_max_size {
        return false;
    }
    let external = metrics::external_edge_count(store.interactions(), component);
    external < config.isolated_cluster_max_external_edges
}

pub(crate) fn hours(span: chrono::Duration) -> f64 {
    span.num_milliseconds() as f64 / 3_600_000.0
}
