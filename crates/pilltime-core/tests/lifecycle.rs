//! End-to-end lifecycle against a real HTTP server and on-disk caches.

use std::sync::Arc;

use pilltime_core::{
    CacheStorage, DiskStorage, HttpNetwork, Method, NetworkFailurePolicy, Request,
    ResponseType, ServiceWorker, WindowRegistry, WorkerConfig, WorkerError, WorkerHost,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Nothing listens on the discard port, so requests here fail at the transport.
const UNREACHABLE: &str = "http://127.0.0.1:9/missing.json";

async fn server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>pill time</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doses.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"pill":"aspirin"}]"#))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/doses.json"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .mount(&server)
        .await;
    server
}

fn worker(config: &WorkerConfig, storage: Arc<DiskStorage>) -> ServiceWorker {
    let network = HttpNetwork::new(config.scope_url().unwrap(), 5).unwrap();
    ServiceWorker::new(
        config,
        storage,
        Arc::new(network),
        Arc::new(WindowRegistry::new()),
    )
    .unwrap()
}

fn config_for(server: &MockServer, dir: &tempfile::TempDir) -> WorkerConfig {
    WorkerConfig {
        scope: format!("{}/", server.uri()),
        cache_dir: Some(dir.path().to_path_buf()),
        ..WorkerConfig::default()
    }
}

#[tokio::test]
async fn test_install_then_serve_cache_first() {
    let server = server().await;
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&server, &dir);
    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
    let host = WorkerHost::spawn(worker(&config, storage.clone()));

    host.start().await.unwrap();

    let index = host.fetch(Request::get("./index.html")).await.unwrap();
    assert_eq!(index.text(), "<html>pill time</html>");

    // Miss, then served from cache
    let first = host.fetch(Request::get("./doses.json")).await.unwrap();
    assert_eq!(first.status, 200);
    let second = host.fetch(Request::get("./doses.json")).await.unwrap();
    assert_eq!(second.text(), r#"[{"pill":"aspirin"}]"#);

    // Non-GET goes to network and is never stored
    let created = host
        .fetch(Request::new(Method::Post, "./doses.json").with_body(b"{}".to_vec()))
        .await
        .unwrap();
    assert_eq!(created.status, 201);

    let missing = host.fetch(Request::get(UNREACHABLE)).await.unwrap();
    assert_eq!(missing.kind, ResponseType::Error);

    let requests = server.received_requests().await.unwrap();
    let count = |p: &str, m: &str| {
        requests
            .iter()
            .filter(|r| r.url.path() == p && r.method.as_str() == m)
            .count()
    };
    assert_eq!(count("/index.html", "GET"), 1);
    assert_eq!(count("/doses.json", "GET"), 1);
    assert_eq!(count("/doses.json", "POST"), 1);

    let store = storage.open("pill-time-cache-v1").await.unwrap();
    let keys = store.keys().await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.method == Method::Get));
}

#[tokio::test]
async fn test_version_bump_removes_old_cache() {
    let server = server().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());

    let v1 = config_for(&server, &dir);
    WorkerHost::spawn(worker(&v1, storage.clone()))
        .start()
        .await
        .unwrap();

    let v2 = WorkerConfig {
        cache_name: "pill-time-cache-v2".to_string(),
        ..v1.clone()
    };
    let (_, activated) = WorkerHost::spawn(worker(&v2, storage.clone()))
        .start()
        .await
        .unwrap();

    assert_eq!(
        activated.unwrap().deleted,
        vec!["pill-time-cache-v1".to_string()]
    );
    assert_eq!(
        storage.keys().await.unwrap(),
        vec!["pill-time-cache-v2".to_string()]
    );
}

#[tokio::test]
async fn test_strict_install_fails_on_missing_asset() {
    let server = server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&server, &dir);
    config.assets.push("./not-deployed.css".to_string());
    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());

    let host = WorkerHost::spawn(worker(&config, storage.clone()));
    let err = host.start().await.unwrap_err();
    assert!(matches!(err, WorkerError::Install { .. }));
    assert!(!storage.has("pill-time-cache-v1").await.unwrap());

    // A later process must not mistake the failed install for an active one
    let reopened = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
    let fresh = worker(&config, reopened);
    assert!(matches!(
        fresh.resume().await,
        Err(WorkerError::NotInstalled(_))
    ));
}

#[tokio::test]
async fn test_propagate_policy_surfaces_network_error() {
    let server = server().await;
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        network_failure_policy: NetworkFailurePolicy::Propagate,
        ..config_for(&server, &dir)
    };
    let storage = Arc::new(DiskStorage::new(dir.path().to_path_buf()).unwrap());
    let host = WorkerHost::spawn(worker(&config, storage));
    host.start().await.unwrap();

    let err = host.fetch(Request::get(UNREACHABLE)).await.unwrap_err();
    assert!(matches!(err, WorkerError::Fetch(_)));
}
