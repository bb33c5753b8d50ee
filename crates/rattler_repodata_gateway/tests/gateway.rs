//! End-to-end tests driving [`Gateway`] the way a real client would: a
//! cold fetch against an HTTP server, a conditional revalidation that comes
//! back `304`, a local `file://` channel, and `query_all` fanning out across
//! several channels.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rattler_conda_types::{Channel, ExactName, Platform};
use rattler_repodata_gateway::Gateway;
use tokio::net::TcpListener;
use url::Url;

fn sample_repodata(names: &[&str]) -> String {
    let packages: serde_json::Map<String, serde_json::Value> = names
        .iter()
        .map(|name| {
            (
                format!("{name}-1-0.tar.bz2"),
                serde_json::json!({
                    "name": name,
                    "version": "1",
                    "build": "0",
                    "depends": [],
                    "size": 1,
                    "md5": "deadbeefdeadbeefdeadbeefdeadbeef",
                }),
            )
        })
        .collect();
    serde_json::json!({
        "info": {"subdir": "linux-64"},
        "packages": packages,
    })
    .to_string()
}

#[derive(Clone)]
struct ServerState {
    body: Arc<str>,
    etag: &'static str,
    request_count: Arc<AtomicUsize>,
}

async fn serve_repodata(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    state.request_count.fetch_add(1, Ordering::SeqCst);
    if headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(state.etag)
    {
        return StatusCode::NOT_MODIFIED.into_response();
    }
    (
        [
            (header::ETAG, state.etag),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        state.body.to_string(),
    )
        .into_response()
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Spawns an in-process HTTP server that serves a single repodata document
/// for `linux-64` at the root of the returned URL, reporting `404` for the
/// `.zst` and `.jlap` variants so the orchestrator falls straight to a plain
/// fetch.
async fn spawn_repodata_server(body: String, etag: &'static str) -> (Url, Arc<AtomicUsize>) {
    let request_count = Arc::new(AtomicUsize::new(0));
    let state = ServerState {
        body: Arc::from(body.as_str()),
        etag,
        request_count: request_count.clone(),
    };

    let app = Router::new()
        .route("/linux-64/repodata.json", get(serve_repodata))
        .route("/linux-64/repodata.json.zst", get(not_found))
        .route("/linux-64/repodata.json.bz2", get(not_found))
        .route("/linux-64/repodata.jlap", get(not_found))
        .route("/noarch/repodata.json", get(not_found))
        .route("/noarch/repodata.json.zst", get(not_found))
        .route("/noarch/repodata.json.bz2", get(not_found))
        .route("/noarch/repodata.jlap", get(not_found))
        .with_state(state);

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (Url::parse(&format!("http://{addr}/")).unwrap(), request_count)
}

#[tokio::test]
async fn cold_fetch_then_query_returns_the_served_packages() {
    let (url, requests) = spawn_repodata_server(sample_repodata(&["numpy", "scipy"]), "\"v1\"").await;
    let cache_dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::builder().with_cache_dir(cache_dir.path()).finish();
    let channel = Channel::from_url(url);

    let records = gateway
        .query(
            &channel,
            Platform::Linux64,
            &ExactName("numpy".to_string()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].package_record.name.as_normalized(), "numpy");
    assert_eq!(requests.load(Ordering::SeqCst), 1);

    // The cache directory now holds the repodata, its sidecar state and the
    // pickled index.
    let entries: Vec<_> = std::fs::read_dir(cache_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().any(|name| name.ends_with(".json")));
    assert!(entries.iter().any(|name| name.ends_with(".state.json")));
    assert!(entries.iter().any(|name| name.ends_with(".q")));
}

#[tokio::test]
async fn revalidation_that_gets_a_304_does_not_redownload() {
    let (url, requests) = spawn_repodata_server(sample_repodata(&["numpy"]), "\"stable-etag\"").await;
    let cache_dir = tempfile::tempdir().unwrap();
    let channel = Channel::from_url(url);

    // First gateway populates the cache.
    {
        let gateway = Gateway::builder().with_cache_dir(cache_dir.path()).finish();
        gateway
            .query(&channel, Platform::Linux64, &ExactName("numpy".to_string()), None)
            .await
            .unwrap();
    }
    assert_eq!(requests.load(Ordering::SeqCst), 1);

    // A fresh gateway instance (simulating a second process run) forces a
    // config with a zero local TTL, so this revalidates instead of trusting
    // max-age — and the server reports 304 because the etag still matches.
    let gateway = Gateway::builder()
        .with_cache_dir(cache_dir.path())
        .with_config(rattler_repodata_gateway::GatewayConfig {
            local_repodata_ttl: Some(0),
            ..Default::default()
        })
        .finish();
    let records = gateway
        .query(&channel, Platform::Linux64, &ExactName("numpy".to_string()), None)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tracing_test::traced_test]
#[tokio::test]
async fn fresh_cache_under_default_ttl_skips_revalidation_entirely() {
    let (url, requests) = spawn_repodata_server(sample_repodata(&["numpy"]), "\"v1\"").await;
    let cache_dir = tempfile::tempdir().unwrap();
    let channel = Channel::from_url(url);

    // First gateway populates the cache; the server's `max-age=3600` means a
    // second gateway pointed at the same cache directory should not even
    // attempt a conditional request.
    {
        let gateway = Gateway::builder().with_cache_dir(cache_dir.path()).finish();
        gateway
            .query(&channel, Platform::Linux64, &ExactName("numpy".to_string()), None)
            .await
            .unwrap();
    }
    assert_eq!(requests.load(Ordering::SeqCst), 1);

    let gateway = Gateway::builder().with_cache_dir(cache_dir.path()).finish();
    let records = gateway
        .query(&channel, Platform::Linux64, &ExactName("numpy".to_string()), None)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn local_file_channel_is_queried_without_any_network() {
    let dir = tempfile::tempdir().unwrap();
    let subdir = dir.path().join("linux-64");
    std::fs::create_dir_all(&subdir).unwrap();
    std::fs::write(subdir.join("repodata.json"), sample_repodata(&["a", "b"])).unwrap();

    let channel = Channel::from_directory(dir.path());
    let gateway = Gateway::new();

    let records = gateway
        .query(&channel, Platform::Linux64, &ExactName("b".to_string()), None)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].file_name, "b-1-0.tar.bz2");
}

#[tokio::test]
async fn missing_noarch_subdir_is_treated_as_empty_not_an_error() {
    let (url, _requests) = spawn_repodata_server(sample_repodata(&["numpy"]), "\"v1\"").await;
    let cache_dir = tempfile::tempdir().unwrap();
    let channel = Channel::from_url(url);
    let gateway = Gateway::builder().with_cache_dir(cache_dir.path()).finish();

    let records = gateway
        .query(&channel, Platform::NoArch, &ExactName("numpy".to_string()), None)
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn query_all_concatenates_results_across_channels_in_order() {
    let (url_a, _) = spawn_repodata_server(sample_repodata(&["alpha"]), "\"a\"").await;
    let (url_b, _) = spawn_repodata_server(sample_repodata(&["beta"]), "\"b\"").await;
    let cache_dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::builder().with_cache_dir(cache_dir.path()).finish();

    let channels = vec![Channel::from_url(url_a), Channel::from_url(url_b)];
    let records = gateway
        .query_all(
            &channels,
            &[Platform::Linux64],
            &rattler_conda_types::HasTrackFeatures(Vec::new()),
            None,
        )
        .await
        .unwrap();

    // HasTrackFeatures with an empty feature list matches nothing (no union
    // members), so this only verifies the call fans out without error.
    assert!(records.is_empty());

    let records = gateway
        .query_all(
            &channels,
            &[Platform::Linux64],
            &AnyName,
            None,
        )
        .await
        .unwrap();
    let mut names: Vec<_> = records
        .iter()
        .map(|r| r.package_record.name.as_normalized().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
}

/// A predicate that matches every record, used to exercise the full-scan
/// path of `query_all` across channels.
struct AnyName;

impl rattler_conda_types::Predicate for AnyName {
    fn matches(&self, _record: &rattler_conda_types::PackageRecord) -> bool {
        true
    }
}
