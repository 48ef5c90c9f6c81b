//! User/merchant interaction graph
//!
//! Keeps two views of the same transactions: an undirected interaction graph
//! with aggregate bookkeeping per node and per (user, merchant) pair, and a
//! directed flow multigraph holding one arc per transaction for path queries.

use crate::{metrics, GraphError};
use chrono::{DateTime, Duration, Utc};
use petgraph::graph::{DiGraph, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which side of a transaction a node was first seen on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Merchant,
    User,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Merchant => write!(f, "merchant"),
            NodeKind::User => write!(f, "user"),
        }
    }
}

/// Role-specific node state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum NodeRole {
    Merchant { unique_customers: HashSet<String> },
    User { unique_merchants: HashSet<String> },
}

impl NodeRole {
    fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Merchant => NodeRole::Merchant {
                unique_customers: HashSet::new(),
            },
            NodeKind::User => NodeRole::User {
                unique_merchants: HashSet::new(),
            },
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRole::Merchant { .. } => NodeKind::Merchant,
            NodeRole::User { .. } => NodeKind::User,
        }
    }
}

/// A merchant or user in the interaction graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub role: NodeRole,
    pub total_transaction_count: u64,
    pub total_amount: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl GraphNode {
    fn new(id: &str, kind: NodeKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            role: NodeRole::empty(kind),
            total_transaction_count: 0,
            total_amount: 0.0,
            first_seen: timestamp,
            last_seen: timestamp,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.role.kind()
    }

    pub fn is_merchant(&self) -> bool {
        self.kind() == NodeKind::Merchant
    }

    /// Customers for a merchant, merchants for a user
    pub fn counterparties(&self) -> &HashSet<String> {
        match &self.role {
            NodeRole::Merchant { unique_customers } => unique_customers,
            NodeRole::User { unique_merchants } => unique_merchants,
        }
    }

    /// Time between the earliest and latest transaction touching this node
    pub fn activity_span(&self) -> Duration {
        self.last_seen.signed_duration_since(self.first_seen)
    }

    fn observe(&mut self, counterparty: &str, amount: f64, timestamp: DateTime<Utc>) {
        self.total_transaction_count += 1;
        self.total_amount += amount;
        self.first_seen = self.first_seen.min(timestamp);
        self.last_seen = self.last_seen.max(timestamp);

        let set = match &mut self.role {
            NodeRole::Merchant { unique_customers } => unique_customers,
            NodeRole::User { unique_merchants } => unique_merchants,
        };
        if !set.contains(counterparty) {
            set.insert(counterparty.to_string());
        }
    }
}

/// Aggregate of all transactions between one user and one merchant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEdge {
    pub transaction_count: u64,
    pub total_amount: f64,
    pub amounts: Vec<f64>,
    pub first_transaction: DateTime<Utc>,
    pub last_transaction: DateTime<Utc>,
}

impl InteractionEdge {
    fn new(amount: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            transaction_count: 1,
            total_amount: amount,
            amounts: vec![amount],
            first_transaction: timestamp,
            last_transaction: timestamp,
        }
    }

    fn record(&mut self, amount: f64, timestamp: DateTime<Utc>) {
        self.transaction_count += 1;
        self.total_amount += amount;
        self.amounts.push(amount);
        self.first_transaction = self.first_transaction.min(timestamp);
        self.last_transaction = self.last_transaction.max(timestamp);
    }

    pub fn average_amount(&self) -> f64 {
        self.total_amount / self.transaction_count as f64
    }

    /// Population variance of the recorded amounts
    pub fn amount_variance(&self) -> f64 {
        let n = self.amounts.len() as f64;
        let mean = self.amounts.iter().sum::<f64>() / n;
        self.amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n
    }

    pub fn relationship_age(&self) -> Duration {
        self.last_transaction
            .signed_duration_since(self.first_transaction)
    }
}

/// One transaction in the directed flow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowArc {
    pub transaction_id: Uuid,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

/// Size and shape of the whole network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub merchant_nodes: usize,
    pub user_nodes: usize,
    pub flow_arcs: usize,
    pub connected_components: usize,
    pub average_clustering: f64,
    pub density: f64,
    /// Rough heap footprint, for deciding when to snapshot and reset
    pub approx_memory_bytes: usize,
}

/// In-memory store for the interaction and flow graphs.
///
/// Nodes are added to both graphs at the same time and never removed, so a
/// `NodeIndex` is valid in either graph.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    interactions: UnGraph<GraphNode, InteractionEdge>,
    flows: DiGraph<String, FlowArc>,
    index: HashMap<String, NodeIndex>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction between a user and a merchant.
    ///
    /// Creates both nodes on first sight. Ids are opaque; only a negative or
    /// non-finite amount is rejected.
    pub fn record_transaction(
        &mut self,
        user_id: &str,
        merchant_id: &str,
        amount: f64,
        timestamp: DateTime<Utc>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), GraphError> {
        validate_amount(amount)?;

        let merchant_idx = self.ensure_node(merchant_id, NodeKind::Merchant, timestamp);
        let user_idx = self.ensure_node(user_id, NodeKind::User, timestamp);

        self.interactions[merchant_idx].observe(user_id, amount, timestamp);
        self.interactions[user_idx].observe(merchant_id, amount, timestamp);

        // Metrics assume a simple graph, so a self-payment only gets its flow arc
        if user_idx != merchant_idx {
            match self.interactions.find_edge(user_idx, merchant_idx) {
                Some(edge) => self.interactions[edge].record(amount, timestamp),
                None => {
                    self.interactions.add_edge(
                        user_idx,
                        merchant_idx,
                        InteractionEdge::new(amount, timestamp),
                    );
                }
            }
        }

        let transaction_id = Uuid::new_v4();
        self.flows.add_edge(
            user_idx,
            merchant_idx,
            FlowArc {
                transaction_id,
                amount,
                timestamp,
                metadata: metadata.unwrap_or_default(),
            },
        );

        debug!(
            %transaction_id,
            user_id,
            merchant_id,
            amount,
            "Recorded transaction edge"
        );

        Ok(())
    }

    fn ensure_node(&mut self, id: &str, kind: NodeKind, timestamp: DateTime<Utc>) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            let existing = self.interactions[idx].kind();
            if existing != kind {
                warn!(
                    node_id = id,
                    existing = %existing,
                    requested = %kind,
                    "Node seen in both roles, keeping original role"
                );
            }
            return idx;
        }

        let idx = self.interactions.add_node(GraphNode::new(id, kind, timestamp));
        let flow_idx = self.flows.add_node(id.to_string());
        debug_assert_eq!(idx, flow_idx);
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.interactions[idx])
    }

    pub fn edge(&self, user_id: &str, merchant_id: &str) -> Option<&InteractionEdge> {
        let a = *self.index.get(user_id)?;
        let b = *self.index.get(merchant_id)?;
        self.interactions
            .find_edge(a, b)
            .map(|edge| &self.interactions[edge])
    }

    /// Every recorded transaction from `user_id` to `merchant_id`, in insertion order
    pub fn flow_arcs(&self, user_id: &str, merchant_id: &str) -> Vec<&FlowArc> {
        let (Some(&from), Some(&to)) = (self.index.get(user_id), self.index.get(merchant_id))
        else {
            return Vec::new();
        };
        let mut arcs: Vec<_> = self
            .flows
            .edges(from)
            .filter(|edge| edge.target() == to)
            .map(|edge| (edge.id(), edge.weight()))
            .collect();
        arcs.sort_by_key(|(id, _)| *id);
        arcs.into_iter().map(|(_, arc)| arc).collect()
    }

    pub(crate) fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn node_at(&self, idx: NodeIndex) -> Result<&GraphNode, GraphError> {
        self.interactions
            .node_weight(idx)
            .ok_or_else(|| GraphError::NodeNotFound(format!("index {}", idx.index())))
    }

    pub(crate) fn interactions(&self) -> &UnGraph<GraphNode, InteractionEdge> {
        &self.interactions
    }

    pub(crate) fn flows(&self) -> &DiGraph<String, FlowArc> {
        &self.flows
    }

    pub fn node_count(&self) -> usize {
        self.interactions.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.interactions.edge_count()
    }

    pub fn flow_arc_count(&self) -> usize {
        self.flows.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Get network statistics
    pub fn network_stats(&self) -> NetworkStats {
        let total_nodes = self.node_count();
        let total_edges = self.edge_count();
        let merchant_nodes = self
            .interactions
            .node_weights()
            .filter(|node| node.is_merchant())
            .count();

        let density = if total_nodes > 1 {
            2.0 * total_edges as f64 / (total_nodes as f64 * (total_nodes - 1) as f64)
        } else {
            0.0
        };

        NetworkStats {
            total_nodes,
            total_edges,
            merchant_nodes,
            user_nodes: total_nodes - merchant_nodes,
            flow_arcs: self.flow_arc_count(),
            connected_components: metrics::component_count(&self.interactions),
            average_clustering: metrics::average_clustering(&self.interactions),
            density,
            approx_memory_bytes: self.approx_memory_bytes(),
        }
    }

    fn approx_memory_bytes(&self) -> usize {
        let nodes: usize = self
            .interactions
            .node_weights()
            .map(|node| {
                size_of::<GraphNode>()
                    + 2 * node.id.len()
                    + size_of::<NodeIndex>()
                    + node
                        .counterparties()
                        .iter()
                        .map(|c| size_of::<String>() + c.len())
                        .sum::<usize>()
            })
            .sum();
        let edges: usize = self
            .interactions
            .edge_weights()
            .map(|edge| size_of::<InteractionEdge>() + edge.amounts.len() * size_of::<f64>())
            .sum();
        let arcs: usize = self
            .flows
            .edge_weights()
            .map(|arc| {
                size_of::<FlowArc>()
                    + arc
                        .metadata
                        .iter()
                        .map(|(k, v)| k.len() + v.len() + 2 * size_of::<String>())
                        .sum::<usize>()
            })
            .sum();
        nodes + edges + arcs
    }
}

/// Reject amounts the graph cannot aggregate
pub fn validate_amount(amount: f64) -> Result<(), GraphError> {
    if !amount.is_finite() {
        return Err(GraphError::InvalidAmount(format!(
            "Amount must be finite, got {}",
            amount
        )));
    }

    if amount < 0.0 {
        return Err(GraphError::InvalidAmount(format!(
            "Amount must not be negative, got {}",
            amount
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creates_nodes_and_edge() {
        let mut store = GraphStore::new();
        let now = Utc::now();

        store
            .record_transaction("U1", "M1", 120.0, now, None)
            .unwrap();

        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.flow_arc_count(), 1);

        let merchant = store.node("M1").unwrap();
        assert!(merchant.is_merchant());
        assert_eq!(merchant.total_transaction_count, 1);
        assert!(merchant.counterparties().contains("U1"));

        let user = store.node("U1").unwrap();
        assert_eq!(user.kind(), NodeKind::User);
        assert!(user.counterparties().contains("M1"));
    }

    #[test]
    fn test_edge_accumulation_is_exact() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        let amounts = [10.5, 20.25, 0.0, 99.125, 3.5];

        for (i, amount) in amounts.iter().enumerate() {
            store
                .record_transaction("U1", "M1", *amount, now + Duration::minutes(i as i64), None)
                .unwrap();
        }

        let edge = store.edge("U1", "M1").unwrap();
        assert_eq!(edge.transaction_count, amounts.len() as u64);
        assert_eq!(edge.total_amount, amounts.iter().sum::<f64>());
        assert_eq!(edge.total_amount, edge.amounts.iter().sum::<f64>());
        assert_eq!(edge.amounts, amounts.to_vec());

        // Single undirected edge, one arc per transaction
        assert_eq!(store.edge_count(), 1);
        assert_eq!(store.flow_arcs("U1", "M1").len(), amounts.len());
    }

    #[test]
    fn test_edge_lookup_is_undirected() {
        let mut store = GraphStore::new();
        store
            .record_transaction("U1", "M1", 5.0, Utc::now(), None)
            .unwrap();

        assert!(store.edge("U1", "M1").is_some());
        assert!(store.edge("M1", "U1").is_some());
        assert!(store.edge("U1", "M2").is_none());
    }

    #[test]
    fn test_seen_bounds_track_min_and_max() {
        let mut store = GraphStore::new();
        let base = Utc::now();
        let offsets = [5, -30, 12, -2, 60];

        for (i, offset) in offsets.iter().enumerate() {
            store
                .record_transaction(
                    &format!("U{}", i),
                    "M1",
                    1.0,
                    base + Duration::minutes(*offset),
                    None,
                )
                .unwrap();
        }

        let merchant = store.node("M1").unwrap();
        assert_eq!(merchant.first_seen, base + Duration::minutes(-30));
        assert_eq!(merchant.last_seen, base + Duration::minutes(60));
        assert!(merchant.last_seen >= merchant.first_seen);
        assert_eq!(merchant.activity_span(), Duration::minutes(90));
    }

    #[test]
    fn test_edge_transaction_window() {
        let mut store = GraphStore::new();
        let base = Utc::now();

        store
            .record_transaction("U1", "M1", 1.0, base, None)
            .unwrap();
        store
            .record_transaction("U1", "M1", 1.0, base - Duration::days(3), None)
            .unwrap();

        let edge = store.edge("U1", "M1").unwrap();
        assert_eq!(edge.first_transaction, base - Duration::days(3));
        assert_eq!(edge.last_transaction, base);
        assert_eq!(edge.relationship_age().num_days(), 3);
    }

    #[test]
    fn test_rejects_invalid_amounts() {
        let mut store = GraphStore::new();
        let now = Utc::now();

        for amount in [-1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = store.record_transaction("U1", "M1", amount, now, None);
            assert!(matches!(result, Err(GraphError::InvalidAmount(_))));
        }

        // Rejected input leaves no trace
        assert!(store.is_empty());
        assert_eq!(store.flow_arc_count(), 0);
    }

    #[test]
    fn test_zero_amount_is_valid() {
        let mut store = GraphStore::new();
        assert!(store
            .record_transaction("U1", "M1", 0.0, Utc::now(), None)
            .is_ok());
    }

    #[test]
    fn test_accepts_opaque_identities() {
        let mut store = GraphStore::new();
        let now = Utc::now();

        store.record_transaction("", "M1", 1.0, now, None).unwrap();
        store.record_transaction("U1", "", 2.0, now, None).unwrap();

        assert!(store.contains(""));
        assert_eq!(store.node("").unwrap().total_transaction_count, 2);
        assert_eq!(store.edge("", "M1").unwrap().total_amount, 1.0);
        assert_eq!(store.edge("U1", "").unwrap().total_amount, 2.0);
    }

    #[test]
    fn test_self_payment_skips_interaction_loop() {
        let mut store = GraphStore::new();
        let now = Utc::now();

        store.record_transaction("X", "X", 5.0, now, None).unwrap();
        store.record_transaction("X", "X", 7.0, now, None).unwrap();

        assert_eq!(store.node_count(), 1);
        assert_eq!(store.edge_count(), 0);
        assert!(store.edge("X", "X").is_none());
        assert_eq!(store.flow_arcs("X", "X").len(), 2);

        // Both sides of each payment land on the same node
        let node = store.node("X").unwrap();
        assert!(node.is_merchant());
        assert_eq!(node.total_transaction_count, 4);
        assert_eq!(node.total_amount, 24.0);

        let stats = store.network_stats();
        assert_eq!(stats.total_edges, 0);
        assert_eq!(stats.average_clustering, 0.0);
    }

    #[test]
    fn test_role_conflict_keeps_original_role() {
        let mut store = GraphStore::new();
        let now = Utc::now();

        store.record_transaction("A", "M1", 1.0, now, None).unwrap();
        // "A" now shows up as a merchant
        store.record_transaction("U2", "A", 1.0, now, None).unwrap();

        let node = store.node("A").unwrap();
        assert_eq!(node.kind(), NodeKind::User);
        assert_eq!(node.total_transaction_count, 2);
        assert!(node.counterparties().contains("M1"));
        assert!(node.counterparties().contains("U2"));
    }

    #[test]
    fn test_flow_arcs_carry_metadata() {
        let mut store = GraphStore::new();
        let metadata = HashMap::from([("channel".to_string(), "pos".to_string())]);

        store
            .record_transaction("U1", "M1", 42.0, Utc::now(), Some(metadata.clone()))
            .unwrap();
        store
            .record_transaction("U1", "M1", 7.0, Utc::now(), None)
            .unwrap();

        let arcs = store.flow_arcs("U1", "M1");
        assert_eq!(arcs.len(), 2);
        assert_eq!(arcs[0].amount, 42.0);
        assert_eq!(arcs[0].metadata, metadata);
        assert!(arcs[1].metadata.is_empty());
        assert_ne!(arcs[0].transaction_id, arcs[1].transaction_id);

        // Flow graph is directed
        assert!(store.flow_arcs("M1", "U1").is_empty());
    }

    #[test]
    fn test_amount_variance() {
        let mut store = GraphStore::new();
        let now = Utc::now();
        for amount in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            store.record_transaction("U1", "M1", amount, now, None).unwrap();
        }

        let edge = store.edge("U1", "M1").unwrap();
        assert_eq!(edge.average_amount(), 5.0);
        assert_eq!(edge.amount_variance(), 4.0);
    }

    #[test]
    fn test_network_stats() {
        let mut store = GraphStore::new();
        let now = Utc::now();

        store.record_transaction("U1", "M1", 1000.0, now, None).unwrap();
        store.record_transaction("U1", "M1", 500.0, now, None).unwrap();
        store.record_transaction("U2", "M1", 750.0, now, None).unwrap();
        store.record_transaction("U3", "M2", 10.0, now, None).unwrap();

        let stats = store.network_stats();
        assert_eq!(stats.total_nodes, 5);
        assert_eq!(stats.total_edges, 3);
        assert_eq!(stats.merchant_nodes, 2);
        assert_eq!(stats.user_nodes, 3);
        assert_eq!(stats.flow_arcs, 4);
        assert_eq!(stats.connected_components, 2);
        assert_eq!(stats.average_clustering, 0.0);
        assert!((stats.density - 0.3).abs() < 1e-12);
        assert!(stats.approx_memory_bytes > 0);
    }
}
