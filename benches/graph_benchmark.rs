//! Benchmarks for graph ingestion and merchant risk analysis

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use merchant_risk_graph::{AnalyzerConfig, GraphStore, MerchantGraphAnalyzer, RiskAnalyzer};

fn populated_store(users: usize, merchants: usize, transactions: usize) -> GraphStore {
    let mut store = GraphStore::new();
    let start = Utc::now() - Duration::days(30);
    for i in 0..transactions {
        let user = format!("U{}", (i * 7) % users);
        let merchant = format!("M{}", (i * 13) % merchants);
        store
            .record_transaction(
                &user,
                &merchant,
                (i % 500) as f64 + 1.0,
                start + Duration::minutes(i as i64),
                None,
            )
            .expect("valid bench input");
    }
    store
}

fn bench_record_transaction(c: &mut Criterion) {
    c.bench_function("record_transaction", |bencher| {
        let analyzer = MerchantGraphAnalyzer::new();
        let now = Utc::now();
        let mut i = 0u64;
        bencher.iter(|| {
            i += 1;
            let user = format!("U{}", i % 1000);
            let merchant = format!("M{}", i % 50);
            analyzer
                .record_transaction(&user, &merchant, 25.0, now, None)
                .expect("valid bench input");
        });
    });
}

fn bench_analyze(c: &mut Criterion) {
    let config = AnalyzerConfig::default();
    let mut group = c.benchmark_group("analyze_merchant");

    for &(users, merchants) in &[(50, 10), (200, 40), (800, 100)] {
        let store = populated_store(users, merchants, users * 4);
        group.bench_with_input(
            BenchmarkId::from_parameter(users + merchants),
            &store,
            |bencher, store| {
                let analyzer = RiskAnalyzer::new(store, &config);
                bencher.iter(|| black_box(analyzer.analyze(black_box("M1"), Some("U7"))));
            },
        );
    }

    group.finish();
}

fn bench_cached_analysis(c: &mut Criterion) {
    let analyzer = MerchantGraphAnalyzer::new();
    let start = Utc::now() - Duration::days(1);
    for i in 0..500i64 {
        analyzer
            .record_transaction(
                &format!("U{}", i % 120),
                &format!("M{}", i % 15),
                10.0,
                start + Duration::minutes(i),
                None,
            )
            .expect("valid bench input");
    }

    c.bench_function("analyze_merchant_risk (cached)", |bencher| {
        bencher.iter(|| black_box(analyzer.analyze_merchant_risk(black_box("M3"), None)));
    });
}

fn bench_network_stats(c: &mut Criterion) {
    let store = populated_store(400, 60, 2000);
    c.bench_function("network_stats", |bencher| {
        bencher.iter(|| black_box(store.network_stats()));
    });
}

criterion_group!(
    benches,
    bench_record_transaction,
    bench_analyze,
    bench_cached_analysis,
    bench_network_stats
);
criterion_main!(benches);
