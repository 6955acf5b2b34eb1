use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fedstat_core::combiner::percentile::merge_sketches;
use fedstat_core::config::AnalysisConfig;
use fedstat_core::gateway::{InMemoryJobGateway, InMemoryObjectStore, TesTaskBuilder};
use fedstat_core::normalizer::{decode_payloads, normalize};
use fedstat_core::{FederatedAnalyser, RunRequest, StatisticKind};
use serde_json::json;
use std::sync::Arc;
use tdigest::TDigest;

fn site_payloads(sites: usize) -> Vec<Bytes> {
    (0..sites)
        .map(|site| {
            let n = 100 + site;
            Bytes::from(
                json!({"n": n, "total": n as f64 * 3.5, "sum_x2": n as f64 * 20.0}).to_string(),
            )
        })
        .collect()
}

fn benchmark_moment_combination(c: &mut Criterion) {
    let mut group = c.benchmark_group("variance_combination");
    for sites in [4usize, 32, 256] {
        let payloads = site_payloads(sites);
        group.bench_with_input(BenchmarkId::from_parameter(sites), &payloads, |b, payloads| {
            b.iter(|| {
                let decoded = decode_payloads(payloads);
                let input = normalize(StatisticKind::Variance, &decoded).unwrap().input;
                let mut combiner = StatisticKind::Variance.combiner();
                combiner.reduce(&input).unwrap();
                black_box(combiner.finalize().unwrap())
            })
        });
    }
    group.finish();
}

fn benchmark_contingency_text(c: &mut Criterion) {
    let mut text = String::from("sex,smoker,region,n\n");
    for sex in ["F", "M", "X"] {
        for smoker in ["yes", "no"] {
            for region in 0..20 {
                text.push_str(&format!("{sex},{smoker},region-{region},{}\n", region + 1));
            }
        }
    }
    let payloads = vec![Bytes::from(text); 8];

    c.bench_function("contingency_table_8_sites", |b| {
        b.iter(|| {
            let decoded = decode_payloads(&payloads);
            let input = normalize(StatisticKind::ContingencyTable, &decoded).unwrap().input;
            let mut combiner = StatisticKind::ContingencyTable.combiner();
            combiner.reduce(&input).unwrap();
            black_box(combiner.finalize().unwrap())
        })
    });
}

fn benchmark_sketch_merge(c: &mut Criterion) {
    let digests: Vec<TDigest> = (0..16)
        .map(|site| {
            let values: Vec<f64> = (0..1_000).map(|i| f64::from(i * (site + 1))).collect();
            TDigest::new_with_size(100).merge_unsorted(values)
        })
        .collect();

    c.bench_function("sketch_merge_16_sites", |b| {
        b.iter(|| black_box(merge_sketches(digests.clone()).estimate_quantile(0.5)))
    });
}

fn benchmark_in_memory_run(c: &mut Criterion) {
    let sites = 16usize;
    let mut config = AnalysisConfig::default();
    config.polling.interval_ms = 1;
    config.polling.timeout_ms = 1_000;
    config.result_store.bucket = Some("results".to_string());
    config.analysis.sites = (0..sites).map(|site| format!("site-{site}")).collect();

    c.bench_function("in_memory_mean_run_16_sites", |b| {
        b.iter(|| {
            let gateway = Arc::new(InMemoryJobGateway::new(1, sites));
            let store = Arc::new(InMemoryObjectStore::new());
            for (site, payload) in site_payloads(sites).into_iter().enumerate() {
                store.put("results", &format!("{}/output.json", site + 2), payload);
            }
            let analyser = FederatedAnalyser::new(
                config.clone(),
                gateway,
                store,
                Arc::new(TesTaskBuilder::new("executor")),
            );
            let run = tokio_test::block_on(
                analyser.run(RunRequest::new(StatisticKind::Mean).with_query("SELECT value")),
            );
            black_box(run.unwrap())
        })
    });
}

criterion_group!(
    benches,
    benchmark_moment_combination,
    benchmark_contingency_text,
    benchmark_sketch_merge,
    benchmark_in_memory_run
);
criterion_main!(benches);
