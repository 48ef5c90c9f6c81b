//! Merchant network attack simulation
//!
//! Feeds synthetic fraud scenarios through the analyzer and prints how each
//! one scores. Run with `RUST_LOG=debug` to see graph-level tracing.

use chrono::{Duration, Utc};
use merchant_risk_graph::{
    AnalyzerConfig, AnomalyKind, GraphError, MerchantGraphAnalyzer, RiskAnalysisResult,
    TransactionRecord,
};
use std::collections::HashMap;

fn print_result(result: &RiskAnalysisResult) {
    println!("   Merchant: {}", result.merchant_id);
    println!(
        "   Risk Score: {:.3} ({:?})",
        result.risk_score,
        result.risk_level()
    );
    println!("   Flagged: {}", result.is_flagged());
    println!("   Factors: {:?}", result.factors);
    let anomalies: Vec<String> = result
        .network_anomalies
        .iter()
        .map(|a| format!("{} [{}]", a.kind, a.severity))
        .collect();
    println!("   Anomalies: {:?}", anomalies);
    if let Some(first) = result.recommendations.first() {
        println!("   Top Recommendation: {}", first);
    }
    println!();
}

fn main() -> Result<(), GraphError> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_target(false)
        .init();

    println!("=== Merchant Network Attack Simulation ===\n");

    let analyzer = MerchantGraphAnalyzer::new();
    let now = Utc::now();

    // Baseline: an ordinary marketplace over the past month
    for day in 0..30i64 {
        for shopper in 0..8i64 {
            let user = format!("SHOPPER-{}", (day * 3 + shopper) % 40);
            let merchant = format!("STORE-{}", (day + shopper) % 12);
            analyzer.record_transaction(
                &user,
                &merchant,
                20.0 + (shopper * 7) as f64,
                now - Duration::days(30 - day) + Duration::hours(shopper),
                None,
            )?;
        }
    }

    println!("1. Legitimate Store");
    print_result(&analyzer.analyze_merchant_risk("STORE-3", Some("SHOPPER-5")));

    // Sybil swarm: hundreds of fresh accounts paying one merchant within an hour
    println!("2. Sybil Swarm");
    let swarm_start = now - Duration::minutes(50);
    for i in 0..120i64 {
        analyzer.record_transaction(
            &format!("SYBIL-{}", i),
            "SWARM-MERCHANT",
            9.99,
            swarm_start + Duration::seconds(i * 20),
            None,
        )?;
    }
    print_result(&analyzer.analyze_merchant_risk("SWARM-MERCHANT", Some("SYBIL-0")));

    // Collusion ring: money leaves the merchant and returns to the payer
    println!("3. Collusion Ring");
    let ring_start = now - Duration::days(3);
    let metadata = HashMap::from([("channel".to_string(), "p2p".to_string())]);
    analyzer.record_transaction("RING-A", "RING-SHOP", 900.0, ring_start, Some(metadata))?;
    analyzer.record_transaction(
        "RING-SHOP",
        "RING-MULE",
        850.0,
        ring_start + Duration::hours(2),
        None,
    )?;
    analyzer.record_transaction(
        "RING-MULE",
        "RING-A",
        800.0,
        ring_start + Duration::hours(4),
        None,
    )?;
    print_result(&analyzer.analyze_merchant_risk("RING-SHOP", Some("RING-A")));

    // Card testing: two accounts hammering a merchant with erratic amounts
    println!("4. Card Testing Burst");
    let burst_start = now - Duration::minutes(30);
    let records: Vec<TransactionRecord> = (0..60i64)
        .map(|i| TransactionRecord {
            user_id: format!("TESTER-{}", i % 2),
            merchant_id: "CARD-TEST-SHOP".to_string(),
            amount: if i % 3 == 0 { 1.0 } else { 499.0 },
            timestamp: burst_start + Duration::seconds(i * 25),
            metadata: None,
        })
        .collect();
    let failures = analyzer
        .record_batch(&records)
        .into_iter()
        .filter(Result::is_err)
        .count();
    println!("   Batch failures: {}", failures);
    let result = analyzer.analyze_merchant_risk("CARD-TEST-SHOP", Some("TESTER-0"));
    print_result(&result);
    println!(
        "   Burst detected: {}\n",
        result.has_anomaly(AnomalyKind::TransactionBurst)
    );

    // One buyer linking many storefronts together
    println!("5. Storefront Chain");
    for i in 0..8i64 {
        analyzer.record_transaction(
            "CHAIN-BUYER",
            &format!("FRONT-{}", i),
            150.0,
            now - Duration::days(10 - i),
            None,
        )?;
    }
    print_result(&analyzer.analyze_merchant_risk("FRONT-0", None));

    // Ingestion path: record and score in one step
    println!("6. Ingestion Path");
    let ingested = analyzer.ingest(&TransactionRecord {
        user_id: "SHOPPER-1".to_string(),
        merchant_id: "STORE-1".to_string(),
        amount: 35.0,
        timestamp: now,
        metadata: None,
    })?;
    println!("   Score: {:.3}", ingested.risk_score);
    println!("   Alert at 0.7: {}", ingested.requires_alert(0.7));
    println!();

    // Only unusable amounts are rejected; ids are opaque
    println!("7. Rejected Input");
    match analyzer.record_transaction("SHOPPER-1", "STORE-1", -10.0, now, None) {
        Ok(()) => println!("   Unexpectedly accepted"),
        Err(e) => println!("   Rejected: {}", e),
    }
    println!();

    // Strict configuration lowers the velocity bar
    println!("8. Strict Configuration");
    let strict = MerchantGraphAnalyzer::with_config(AnalyzerConfig {
        velocity_threshold: 20.0,
        high_centrality_threshold: 0.5,
        ..AnalyzerConfig::default()
    })?;
    for i in 0..40i64 {
        strict.record_transaction(
            &format!("U-{}", i),
            "HOT-SHOP",
            12.0,
            now - Duration::minutes(90) + Duration::minutes(i * 2),
            None,
        )?;
    }
    print_result(&strict.analyze_merchant_risk("HOT-SHOP", None));

    println!("=== Network Statistics ===");
    let stats = analyzer.network_stats();
    println!(
        "   Nodes: {} ({} merchants, {} users)",
        stats.total_nodes, stats.merchant_nodes, stats.user_nodes
    );
    println!("   Edges: {}", stats.total_edges);
    println!("   Flow Arcs: {}", stats.flow_arcs);
    println!("   Components: {}", stats.connected_components);
    println!("   Average Clustering: {:.4}", stats.average_clustering);
    println!("   Density: {:.6}", stats.density);
    println!("   Approx Memory: {} bytes", stats.approx_memory_bytes);

    let cache = analyzer.cache_stats();
    println!("\n=== Cache Statistics ===");
    println!("   Entries: {}", cache.entries);
    println!("   Hits: {}", cache.hits);
    println!("   Misses: {}", cache.misses);
    println!("   Invalidations: {}", cache.invalidations);

    Ok(())
}
