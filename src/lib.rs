//! # Merchant Risk Graph
//!
//! Graph-based merchant fraud risk scoring for transaction ingestion pipelines.
//!
//! ## Features
//!
//! - **Interaction Graph**: Incrementally built user/merchant graph with per-pair bookkeeping
//! - **Flow Graph**: Directed per-transaction arcs for circular flow detection
//! - **Graph Metrics**: Degree, betweenness and closeness centrality, clustering, components
//! - **Velocity Checks**: Transactions per hour, new-merchant activity, customer diversity
//! - **Network Anomalies**: Circular flows, bursts, merchant chains, isolated clusters
//! - **Risk Cache**: One-hour analysis cache with exact invalidation on every mutation
//!
//! ## Usage
//!
//! Callers record every observed transaction and ask for a merchant's risk,
//! usually right after recording:
//!
//! ```
//! use chrono::Utc;
//! use merchant_risk_graph::MerchantGraphAnalyzer;
//!
//! let analyzer = MerchantGraphAnalyzer::new();
//! analyzer
//!     .record_transaction("user-1", "merchant-1", 42.0, Utc::now(), None)
//!     .unwrap();
//!
//! let analysis = analyzer.analyze_merchant_risk("merchant-1", Some("user-1"));
//! assert!((0.0..=1.0).contains(&analysis.risk_score));
//! ```

pub mod anomalies;
pub mod graph_store;
pub mod metrics;
pub mod risk_analysis;
pub mod risk_cache;

pub use anomalies::{AnomalyKind, NetworkAnomaly, Severity};
pub use graph_store::{
    FlowArc, GraphNode, GraphStore, InteractionEdge, NetworkStats, NodeKind, NodeRole,
};
pub use risk_analysis::{
    CentralityMetrics, ClusteringMetrics, RelationshipMetrics, RiskAnalysisResult, RiskAnalyzer,
    RiskLevel, VelocityMetrics,
};
pub use risk_cache::{CacheStats, RiskCache};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, info};

/// Graph errors
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Graph is not connected: {0}")]
    GraphDisconnected(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A transaction as seen by the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub user_id: String,
    pub merchant_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Analyzer thresholds and cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub high_centrality_threshold: f64,
    pub suspicious_clustering_threshold: f64,
    /// Transactions per hour
    pub velocity_threshold: f64,
    pub new_merchant_window_hours: f64,
    pub new_merchant_velocity_threshold: f64,
    /// Unique customers per transaction
    pub low_diversity_ratio: f64,
    pub large_community_size: usize,
    pub tight_community_clustering: f64,
    /// Betweenness is only computed below this node count
    pub betweenness_node_limit: usize,
    pub burst_window_hours: f64,
    pub burst_min_transactions: u64,
    pub merchant_chain_threshold: usize,
    pub isolated_cluster_max_size: usize,
    pub isolated_cluster_max_external_edges: usize,
    /// Path length in nodes, endpoints included
    pub circular_max_path_nodes: usize,
    pub frequent_relationship_threshold: u64,
    pub cache_ttl_seconds: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            high_centrality_threshold: 0.8,
            suspicious_clustering_threshold: 0.9,
            velocity_threshold: 100.0,
            new_merchant_window_hours: 24.0,
            new_merchant_velocity_threshold: 10.0,
            low_diversity_ratio: 0.1,
            large_community_size: 50,
            tight_community_clustering: 0.7,
            betweenness_node_limit: 1000,
            burst_window_hours: 1.0,
            burst_min_transactions: 20,
            merchant_chain_threshold: 5,
            isolated_cluster_max_size: 10,
            isolated_cluster_max_external_edges: 2,
            circular_max_path_nodes: 5,
            frequent_relationship_threshold: 50,
            cache_ttl_seconds: 3600,
        }
    }
}

impl AnalyzerConfig {
    /// Load from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        let ratios = [
            ("high_centrality_threshold", self.high_centrality_threshold),
            ("suspicious_clustering_threshold", self.suspicious_clustering_threshold),
            ("tight_community_clustering", self.tight_community_clustering),
            ("low_diversity_ratio", self.low_diversity_ratio),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(GraphError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        let rates = [
            ("velocity_threshold", self.velocity_threshold),
            ("new_merchant_window_hours", self.new_merchant_window_hours),
            ("new_merchant_velocity_threshold", self.new_merchant_velocity_threshold),
            ("burst_window_hours", self.burst_window_hours),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(GraphError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.cache_ttl_seconds < 0 {
            return Err(GraphError::InvalidConfig(format!(
                "cache_ttl_seconds must not be negative, got {}",
                self.cache_ttl_seconds
            )));
        }

        if Duration::try_seconds(self.cache_ttl_seconds).is_none() {
            return Err(GraphError::InvalidConfig(format!(
                "cache_ttl_seconds is out of range, got {}",
                self.cache_ttl_seconds
            )));
        }

        Ok(())
    }

    /// Cache lifetime, saturating at the largest representable duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::try_seconds(self.cache_ttl_seconds).unwrap_or(Duration::MAX)
    }
}

/// Merchant network risk analyzer.
///
/// Owns the graph and the analysis cache. Every method takes `&self`, so one
/// instance can be shared across request handlers behind an `Arc`. Mutations
/// hold the graph write lock while invalidating the cache, and analyses
/// publish into the cache while still holding the read lock they computed
/// under, so a cached entry never predates a mutation of its merchant or user.
pub struct MerchantGraphAnalyzer {
    config: AnalyzerConfig,
    store: RwLock<GraphStore>,
    cache: Mutex<RiskCache>,
}

impl MerchantGraphAnalyzer {
    /// Create an analyzer with default thresholds
    pub fn new() -> Self {
        Self::build(AnalyzerConfig::default())
    }

    /// Create an analyzer with custom thresholds
    pub fn with_config(config: AnalyzerConfig) -> Result<Self, GraphError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: AnalyzerConfig) -> Self {
        let cache = RiskCache::new(config.cache_ttl());
        info!(
            cache_ttl_seconds = config.cache_ttl_seconds,
            betweenness_node_limit = config.betweenness_node_limit,
            "Merchant graph analyzer initialized"
        );
        Self {
            config,
            store: RwLock::new(GraphStore::new()),
            cache: Mutex::new(cache),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Add a transaction to the graph and invalidate cached analyses of both parties
    pub fn record_transaction(
        &self,
        user_id: &str,
        merchant_id: &str,
        amount: f64,
        timestamp: DateTime<Utc>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), GraphError> {
        let mut store = self.store.write();
        store.record_transaction(user_id, merchant_id, amount, timestamp, metadata)?;

        let mut cache = self.cache.lock();
        let invalidated = cache.invalidate(merchant_id) + cache.invalidate(user_id);
        if invalidated > 0 {
            debug!(merchant_id, user_id, invalidated, "Invalidated cached risk analyses");
        }

        Ok(())
    }

    pub fn record(&self, record: &TransactionRecord) -> Result<(), GraphError> {
        self.record_transaction(
            &record.user_id,
            &record.merchant_id,
            record.amount,
            record.timestamp,
            record.metadata.clone(),
        )
    }

    /// Record multiple transactions; each succeeds or fails on its own
    pub fn record_batch(&self, records: &[TransactionRecord]) -> Vec<Result<(), GraphError>> {
        records.iter().map(|record| self.record(record)).collect()
    }

    /// Record a transaction, then score its merchant in the payer's context
    pub fn ingest(&self, record: &TransactionRecord) -> Result<RiskAnalysisResult, GraphError> {
        self.record(record)?;
        Ok(self.analyze_merchant_risk(&record.merchant_id, Some(&record.user_id)))
    }

    /// Analyze risk factors for a merchant.
    ///
    /// Always produces a score: internal failures degrade to a fixed 0.5
    /// result instead of surfacing an error.
    pub fn analyze_merchant_risk(
        &self,
        merchant_id: &str,
        user_id: Option<&str>,
    ) -> RiskAnalysisResult {
        Self::or_degraded(merchant_id, user_id, self.try_analyze(merchant_id, user_id))
    }

    fn or_degraded(
        merchant_id: &str,
        user_id: Option<&str>,
        outcome: Result<RiskAnalysisResult, GraphError>,
    ) -> RiskAnalysisResult {
        match outcome {
            Ok(result) => result,
            Err(err) => {
                error!(merchant_id, error = %err, "Merchant risk analysis failed");
                RiskAnalysisResult::degraded(merchant_id, user_id, &err)
            }
        }
    }

    fn try_analyze(
        &self,
        merchant_id: &str,
        user_id: Option<&str>,
    ) -> Result<RiskAnalysisResult, GraphError> {
        if let Some(cached) = self.cache.lock().get(merchant_id, user_id, Utc::now()) {
            debug!(merchant_id, "Serving cached risk analysis");
            return Ok(cached);
        }

        let store = self.store.read();
        if !store.contains(merchant_id) {
            return Ok(RiskAnalysisResult::unknown_merchant(merchant_id, user_id));
        }
        debug!(merchant_id, node_count = store.node_count(), "Computing risk analysis");

        let result = RiskAnalyzer::new(&store, &self.config).analyze(merchant_id, user_id)?;
        // Publish before releasing the read lock
        self.cache.lock().insert(result.clone(), Utc::now());
        drop(store);

        info!(
            merchant_id,
            risk_score = result.risk_score,
            anomalies = result.network_anomalies.len(),
            "Merchant risk analysis: {:.3}",
            result.risk_score
        );

        Ok(result)
    }

    pub fn node(&self, id: &str) -> Option<GraphNode> {
        self.store.read().node(id).cloned()
    }

    pub fn edge(&self, user_id: &str, merchant_id: &str) -> Option<InteractionEdge> {
        self.store.read().edge(user_id, merchant_id).cloned()
    }

    pub fn flow_arcs(&self, user_id: &str, merchant_id: &str) -> Vec<FlowArc> {
        self.store
            .read()
            .flow_arcs(user_id, merchant_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Get overall network statistics
    pub fn network_stats(&self) -> NetworkStats {
        self.store.read().network_stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Swap out the whole graph, leaving an empty one in its place.
    ///
    /// The graph grows without bound; operators call this when
    /// `network_stats().approx_memory_bytes` gets too large.
    pub fn snapshot_and_reset(&self) -> GraphStore {
        let mut store = self.store.write();
        let snapshot = std::mem::take(&mut *store);
        self.cache.lock().clear();
        info!(
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            "Merchant graph reset"
        );
        snapshot
    }
}

impl Default for MerchantGraphAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
