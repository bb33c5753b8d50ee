//! Benchmarks the three repodata-loading tiers a client actually
//! experiences: a cold cache (fetch + parse + write + pickle), a warm
//! on-disk cache (deserialize the pickled sidecar, no network), and a warm
//! in-memory cache (the `Gateway`'s process-wide `Subdir` memo, no I/O at
//! all).

use std::net::SocketAddr;

use axum::{routing::get, Router};
use criterion::{criterion_group, criterion_main, Criterion};
use rattler_conda_types::{Channel, ExactName, Platform};
use rattler_repodata_gateway::Gateway;
use tokio::{net::TcpListener, runtime::Runtime};
use url::Url;

/// A `linux-64` repodata document with a few hundred synthetic packages,
/// large enough that parsing and indexing cost is measurable.
fn bench_repodata() -> String {
    let packages: serde_json::Map<String, serde_json::Value> = (0..500)
        .map(|i| {
            (
                format!("pkg{i}-1-0.tar.bz2"),
                serde_json::json!({
                    "name": format!("pkg{i}"),
                    "version": "1",
                    "build": "0",
                    "depends": ["pkg0", "pkg1"],
                    "size": 1,
                    "md5": "deadbeefdeadbeefdeadbeefdeadbeef",
                }),
            )
        })
        .collect();
    serde_json::json!({"info": {"subdir": "linux-64"}, "packages": packages}).to_string()
}

async fn repodata_ok() -> String {
    bench_repodata()
}

async fn not_found() -> axum::http::StatusCode {
    axum::http::StatusCode::NOT_FOUND
}

/// Spawns the fixture server once per benchmark run and returns the channel
/// URL pointing at it.
async fn spawn_fixture_server() -> Url {
    let app = Router::new()
        .route("/linux-64/repodata.json", get(repodata_ok))
        .route("/linux-64/repodata.json.zst", get(not_found))
        .route("/linux-64/repodata.json.bz2", get(not_found))
        .route("/linux-64/repodata.jlap", get(not_found));

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

fn bench_gateway_load(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let channel_url = rt.block_on(spawn_fixture_server());
    let channel = Channel::from_url(channel_url);
    let predicate = ExactName("pkg0".to_string());

    let mut group = c.benchmark_group("gateway_load");
    group.sample_size(10);

    // Cold cache: fresh cache dir each iteration forces fetch + parse +
    // write + pickle. Setup and teardown (tempdir drop) are outside the
    // measured region.
    group.bench_function("cold_cache", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let gateway = Gateway::builder().with_cache_dir(dir.path()).finish();
                (dir, gateway)
            },
            |(_dir, gateway)| {
                rt.block_on(async {
                    let records = gateway
                        .query(&channel, Platform::Linux64, &predicate, None)
                        .await
                        .unwrap();
                    std::hint::black_box(records.len())
                })
            },
            criterion::BatchSize::PerIteration,
        );
    });

    // Warm on-disk cache: the JSON, state and pickle sidecar already exist,
    // but each iteration constructs a fresh `Gateway` so the in-memory
    // `Subdir` memo is empty — this measures the pickle-sidecar
    // deserialize-and-fingerprint-check path, not a redownload.
    let warm_dir = tempfile::tempdir().unwrap();
    rt.block_on(async {
        let gateway = Gateway::builder().with_cache_dir(warm_dir.path()).finish();
        gateway
            .query(&channel, Platform::Linux64, &predicate, None)
            .await
            .unwrap();
    });
    group.bench_function("warm_disk_cache", |b| {
        b.iter(|| {
            rt.block_on(async {
                let gateway = Gateway::builder().with_cache_dir(warm_dir.path()).finish();
                let records = gateway
                    .query(&channel, Platform::Linux64, &predicate, None)
                    .await
                    .unwrap();
                std::hint::black_box(records.len())
            })
        });
    });

    // In-memory cache: same Gateway instance, the subdirectory already
    // memoized. Measures pure predicate-matching overhead without any I/O.
    let memoized_gateway = Gateway::builder().with_cache_dir(warm_dir.path()).finish();
    rt.block_on(async {
        memoized_gateway
            .query(&channel, Platform::Linux64, &predicate, None)
            .await
            .unwrap();
    });
    group.bench_function("in_memory", |b| {
        b.iter(|| {
            rt.block_on(async {
                let records = memoized_gateway
                    .query(&channel, Platform::Linux64, &predicate, None)
                    .await
                    .unwrap();
                std::hint::black_box(records.len())
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_gateway_load);
criterion_main!(benches);
