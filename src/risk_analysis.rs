//! Merchant risk scoring
//!
//! Combines centrality, clustering, velocity, network anomalies and the
//! user-merchant relationship into one additive score clamped to [0, 1].

use crate::anomalies::{self, hours, AnomalyKind, NetworkAnomaly};
use crate::graph_store::{GraphNode, GraphStore, InteractionEdge};
use crate::{metrics, AnalyzerConfig, GraphError};
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

const UNKNOWN_MERCHANT_SCORE: f64 = 0.1;
const DEGRADED_SCORE: f64 = 0.5;

const DEGREE_WEIGHT: f64 = 0.3;
const BETWEENNESS_WEIGHT: f64 = 0.2;
const CLUSTERING_WEIGHT: f64 = 0.2;
const TIGHT_COMMUNITY_WEIGHT: f64 = 0.3;
const VELOCITY_WEIGHT: f64 = 0.3;
const NEW_MERCHANT_WEIGHT: f64 = 0.2;
const LOW_DIVERSITY_WEIGHT: f64 = 0.2;
const ANOMALY_WEIGHT: f64 = 0.1;
const FREQUENT_RELATIONSHIP_WEIGHT: f64 = 0.2;
const VARIABLE_AMOUNTS_WEIGHT: f64 = 0.1;
const NEW_RELATIONSHIP_WEIGHT: f64 = 0.1;

/// Risk tier derived from the final score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    Low,      // <= 0.4
    Medium,   // 0.4 - 0.6
    High,     // 0.6 - 0.8
    Critical, // > 0.8
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            RiskLevel::Critical
        } else if score > 0.6 {
            RiskLevel::High
        } else if score > 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CentralityMetrics {
    pub degree: f64,
    pub betweenness: f64,
    pub closeness: f64,
    /// False when the graph was too large for betweenness
    pub betweenness_computed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusteringMetrics {
    pub local_clustering: f64,
    pub global_clustering: f64,
    /// Size of the merchant's connected component
    pub community_size: usize,
    pub total_communities: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VelocityMetrics {
    pub transactions_per_hour: f64,
    pub amount_per_hour: f64,
    pub unique_customers: usize,
    pub avg_transaction_amount: f64,
    /// Observed activity span, not floored
    pub time_span_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipMetrics {
    pub transaction_count: u64,
    pub total_amount: f64,
    pub avg_amount: f64,
    pub relationship_age_days: i64,
}

impl From<&InteractionEdge> for RelationshipMetrics {
    fn from(edge: &InteractionEdge) -> Self {
        Self {
            transaction_count: edge.transaction_count,
            total_amount: edge.total_amount,
            avg_amount: edge.average_amount(),
            relationship_age_days: edge.relationship_age().num_days(),
        }
    }
}

/// Risk analysis for one merchant, optionally in the context of one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAnalysisResult {
    pub merchant_id: String,
    pub user_id: Option<String>,
    pub risk_score: f64,
    pub factors: Vec<String>,
    pub centrality_metrics: CentralityMetrics,
    pub clustering_metrics: ClusteringMetrics,
    pub velocity_metrics: VelocityMetrics,
    pub relationship_metrics: Option<RelationshipMetrics>,
    pub network_anomalies: Vec<NetworkAnomaly>,
    pub recommendations: Vec<String>,
    /// Set only on the degraded result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RiskAnalysisResult {
    fn empty(merchant_id: &str, user_id: Option<&str>, risk_score: f64, factor: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            user_id: user_id.map(str::to_string),
            risk_score,
            factors: vec![factor.to_string()],
            centrality_metrics: CentralityMetrics::default(),
            clustering_metrics: ClusteringMetrics::default(),
            velocity_metrics: VelocityMetrics::default(),
            relationship_metrics: None,
            network_anomalies: Vec::new(),
            recommendations: Vec::new(),
            error: None,
        }
    }

    /// Result for a merchant the graph has never seen
    pub fn unknown_merchant(merchant_id: &str, user_id: Option<&str>) -> Self {
        Self::empty(merchant_id, user_id, UNKNOWN_MERCHANT_SCORE, "Unknown merchant")
    }

    /// Fixed medium-risk result returned when the analysis itself fails
    pub fn degraded(merchant_id: &str, user_id: Option<&str>, error: &GraphError) -> Self {
        let mut result = Self::empty(merchant_id, user_id, DEGRADED_SCORE, "Analysis error");
        result.error = Some(error.to_string());
        result
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.risk_score)
    }

    /// Graph-side flagging rule used at ingestion
    pub fn is_flagged(&self) -> bool {
        self.risk_score > 0.8
    }

    /// Whether the alert sink should hear about this analysis
    pub fn requires_alert(&self, threshold: f64) -> bool {
        self.risk_score > threshold
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }

    pub fn has_anomaly(&self, kind: AnomalyKind) -> bool {
        self.network_anomalies.iter().any(|a| a.kind == kind)
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// One scored dimension of the analysis
#[derive(Debug, Clone)]
struct Assessment<M> {
    metrics: M,
    risk_contribution: f64,
    factors: Vec<String>,
}

impl<M> Assessment<M> {
    fn new(metrics: M) -> Self {
        Self {
            metrics,
            risk_contribution: 0.0,
            factors: Vec::new(),
        }
    }

    fn add(&mut self, weight: f64, factor: String) {
        self.risk_contribution += weight;
        self.factors.push(factor);
    }
}

/// Read-only risk scoring over a borrowed graph
pub struct RiskAnalyzer<'a> {
    store: &'a GraphStore,
    config: &'a AnalyzerConfig,
}

impl<'a> RiskAnalyzer<'a> {
    pub fn new(store: &'a GraphStore, config: &'a AnalyzerConfig) -> Self {
        Self { store, config }
    }

    /// Analyze risk factors for a merchant, optionally for a specific payer
    pub fn analyze(
        &self,
        merchant_id: &str,
        user_id: Option<&str>,
    ) -> Result<RiskAnalysisResult, GraphError> {
        let Some(merchant_idx) = self.store.node_index(merchant_id) else {
            return Ok(RiskAnalysisResult::unknown_merchant(merchant_id, user_id));
        };
        let merchant = self.store.node_at(merchant_idx)?;

        let centrality = self.analyze_centrality(merchant_idx)?;
        let component = metrics::connected_component(self.store.interactions(), merchant_idx);
        let clustering = self.analyze_clustering(merchant_idx, &component);
        let velocity = self.analyze_velocity(merchant);
        let network_anomalies = anomalies::detect_network_anomalies(
            self.store,
            self.config,
            merchant_idx,
            user_id,
            &component,
        )?;
        let relationship = user_id.map(|user_id| self.analyze_relationship(user_id, merchant_id));

        let mut score = centrality.risk_contribution
            + clustering.risk_contribution
            + velocity.risk_contribution
            + network_anomalies.len() as f64 * ANOMALY_WEIGHT;

        let mut factors = Vec::new();
        factors.extend(centrality.factors);
        factors.extend(clustering.factors);
        factors.extend(velocity.factors);
        factors.extend(
            network_anomalies
                .iter()
                .filter(|a| a.kind == AnomalyKind::MerchantChain)
                .map(|a| a.description.clone()),
        );

        let mut relationship_metrics = None;
        if let Some(relationship) = relationship {
            score += relationship.risk_contribution;
            factors.extend(relationship.factors);
            relationship_metrics = relationship.metrics;
        }

        let risk_score = score.clamp(0.0, 1.0);
        let recommendations = generate_recommendations(risk_score, &factors);

        Ok(RiskAnalysisResult {
            merchant_id: merchant_id.to_string(),
            user_id: user_id.map(str::to_string),
            risk_score,
            factors,
            centrality_metrics: centrality.metrics,
            clustering_metrics: clustering.metrics,
            velocity_metrics: velocity.metrics,
            relationship_metrics,
            network_anomalies,
            recommendations,
            error: None,
        })
    }

    fn analyze_centrality(
        &self,
        merchant_idx: NodeIndex,
    ) -> Result<Assessment<CentralityMetrics>, GraphError> {
        let graph = self.store.interactions();
        let node_count = graph.node_count();
        let mut metrics = CentralityMetrics::default();

        if node_count > 1 {
            metrics.degree = metrics::degree_centrality(graph, merchant_idx);

            if node_count < self.config.betweenness_node_limit {
                let betweenness = metrics::betweenness_centrality(graph);
                metrics.betweenness = betweenness
                    .get(merchant_idx.index())
                    .copied()
                    .ok_or_else(|| {
                        GraphError::NodeNotFound(format!("index {}", merchant_idx.index()))
                    })?;
                metrics.betweenness_computed = true;
            } else {
                debug!(
                    node_count,
                    limit = self.config.betweenness_node_limit,
                    "Skipping betweenness centrality"
                );
            }

            if metrics::is_connected(graph) {
                metrics.closeness = metrics::closeness_centrality(graph, merchant_idx)?;
            }
        }

        let threshold = self.config.high_centrality_threshold;
        let mut assessment = Assessment::new(metrics);

        if assessment.metrics.degree > threshold {
            let value = assessment.metrics.degree;
            assessment.add(DEGREE_WEIGHT, format!("High degree centrality ({:.3})", value));
        }

        if assessment.metrics.betweenness > threshold {
            let value = assessment.metrics.betweenness;
            assessment.add(
                BETWEENNESS_WEIGHT,
                format!("High betweenness centrality ({:.3})", value),
            );
        }

        Ok(assessment)
    }

    fn analyze_clustering(
        &self,
        merchant_idx: NodeIndex,
        component: &HashSet<NodeIndex>,
    ) -> Assessment<ClusteringMetrics> {
        let graph = self.store.interactions();
        let local = metrics::local_clustering(graph, merchant_idx);

        let mut assessment = Assessment::new(ClusteringMetrics {
            local_clustering: local,
            global_clustering: metrics::average_clustering(graph),
            community_size: component.len(),
            total_communities: metrics::component_count(graph),
        });

        if local > self.config.suspicious_clustering_threshold {
            assessment.add(
                CLUSTERING_WEIGHT,
                format!("Suspicious clustering pattern ({:.3})", local),
            );
        }

        // Large tightly-knit communities can indicate collusion
        if component.len() > self.config.large_community_size
            && local > self.config.tight_community_clustering
        {
            assessment.add(
                TIGHT_COMMUNITY_WEIGHT,
                format!("Large tight community ({} members)", component.len()),
            );
        }

        assessment
    }

    fn analyze_velocity(&self, merchant: &GraphNode) -> Assessment<VelocityMetrics> {
        let time_span_hours = hours(merchant.activity_span());
        let rate_hours = time_span_hours.max(1.0);
        let count = merchant.total_transaction_count;
        let unique_customers = merchant.counterparties().len();

        let mut assessment = Assessment::new(VelocityMetrics {
            transactions_per_hour: count as f64 / rate_hours,
            amount_per_hour: merchant.total_amount / rate_hours,
            unique_customers,
            avg_transaction_amount: if count > 0 {
                merchant.total_amount / count as f64
            } else {
                0.0
            },
            time_span_hours,
        });
        let velocity = assessment.metrics.transactions_per_hour;

        if velocity > self.config.velocity_threshold {
            assessment.add(
                VELOCITY_WEIGHT,
                format!("High transaction velocity ({:.1}/hour)", velocity),
            );
        }

        if time_span_hours < self.config.new_merchant_window_hours
            && velocity > self.config.new_merchant_velocity_threshold
        {
            assessment.add(NEW_MERCHANT_WEIGHT, "High activity for new merchant".to_string());
        }

        // Same few customers driving many transactions
        if count > 0 && (unique_customers as f64 / count as f64) < self.config.low_diversity_ratio {
            assessment.add(LOW_DIVERSITY_WEIGHT, "Low customer diversity".to_string());
        }

        assessment
    }

    /// A relationship holding at most the transaction that created it counts as new
    fn analyze_relationship(
        &self,
        user_id: &str,
        merchant_id: &str,
    ) -> Assessment<Option<RelationshipMetrics>> {
        let edge = self.store.edge(user_id, merchant_id);
        let mut assessment = Assessment::new(edge.map(RelationshipMetrics::from));

        let edge = match edge {
            Some(edge) if edge.transaction_count > 1 => edge,
            _ => {
                assessment.add(NEW_RELATIONSHIP_WEIGHT, "New merchant relationship".to_string());
                return assessment;
            }
        };

        if edge.transaction_count > self.config.frequent_relationship_threshold {
            assessment.add(
                FREQUENT_RELATIONSHIP_WEIGHT,
                format!("Very frequent transactions ({})", edge.transaction_count),
            );
        }

        if edge.amount_variance() > edge.average_amount() * 2.0 {
            assessment.add(
                VARIABLE_AMOUNTS_WEIGHT,
                "Highly variable transaction amounts".to_string(),
            );
        }

        assessment
    }
}

/// Generate actionable recommendations from the final score and factors
pub fn generate_recommendations(risk_score: f64, factors: &[String]) -> Vec<String> {
    let mut recommendations: Vec<String> = match RiskLevel::from_score(risk_score) {
        RiskLevel::Critical => vec![
            "IMMEDIATE REVIEW: High-risk merchant requiring urgent investigation",
            "Consider temporary transaction limits",
            "Manual review of recent high-value transactions",
        ],
        RiskLevel::High => vec![
            "Enhanced monitoring recommended",
            "Review transaction patterns weekly",
            "Consider velocity limits",
        ],
        RiskLevel::Medium => vec![
            "Standard monitoring sufficient",
            "Include in routine risk reports",
        ],
        RiskLevel::Low => vec!["Low risk - standard processing"],
    }
    .into_iter()
    .map(String::from)
    .collect();

    for factor in factors {
        if factor.contains("High degree centrality") {
            recommendations.push("Monitor for potential money laundering hub activity".to_string());
        } else if factor.contains("High transaction velocity") {
            recommendations.push("Implement velocity-based transaction limits".to_string());
        } else if factor.contains("Large tight community") {
            recommendations.push("Investigate potential merchant collusion network".to_string());
        }
    }

    recommendations
}
