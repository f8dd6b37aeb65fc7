//! Routing behavior of the dev server, driven in-process through the
//! router over a real project directory.

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use kiln_cache::CacheService;
use kiln_compile::{
    Pipeline, TransformOutput, TransformRequest, TransformStage, Transformer,
};
use kiln_core::Result;
use kiln_profile::{PluginMatrix, ProfileSet, RuntimeVersion, UsageStats};
use kiln_server::{DevServer, ServerConfig};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const CHROME_103: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/103.0.5060.53 Safari/537.36";
const CHROME_30: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/30.0.1599.101 Safari/537.36";

struct StampTransformer;

#[async_trait]
impl Transformer for StampTransformer {
    async fn transform(&self, request: TransformRequest) -> Result<TransformOutput> {
        Ok(match request.stage {
            TransformStage::Transpile => TransformOutput {
                code: Some(format!("{}\n/*transpiled*/", request.source)),
                source_map: Some(json!({
                    "version": 3,
                    "sources": [request.relative_path],
                    "mappings": "AAAA",
                })),
                ..TransformOutput::default()
            },
            _ => TransformOutput::default(),
        })
    }
}

/// One plugin, one runtime: chrome stops needing arrow-function transforms
/// at 45, so the set derives exactly a `best` and a `worst` group.
fn profile_set() -> ProfileSet {
    let mut matrix = PluginMatrix::new();
    matrix.insert(
        "transform-arrow-functions",
        "chrome",
        RuntimeVersion::new(45, 0, 0),
    );
    ProfileSet::build(&matrix, &UsageStats::default(), 2).unwrap()
}

fn scaffold_with(config: ServerConfig) -> (TempDir, DevServer) {
    let temp = TempDir::new().unwrap();
    let project = temp.path().to_path_buf();
    fs::create_dir_all(project.join("src")).unwrap();
    fs::write(project.join("src/app.js"), "let kiln = 1").unwrap();
    fs::write(project.join("index.html"), "<!doctype html><p>kiln</p>").unwrap();

    let pipeline = Arc::new(Pipeline::new(Arc::new(StampTransformer)));
    let service = Arc::new(CacheService::new(
        project.clone(),
        project.join(".kiln"),
        pipeline,
        true,
    ));
    let server = DevServer::new(project, service, Arc::new(profile_set()), config);
    (temp, server)
}

fn scaffold() -> (TempDir, DevServer) {
    scaffold_with(ServerConfig::default())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

#[tokio::test]
async fn compiled_module_is_served_with_cache_headers() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let response = router
        .clone()
        .oneshot(get("/.kiln/out/best/src/app.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(headers.get(header::VARY).unwrap(), "User-Agent");
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/javascript"
    );
    let etag = headers.get(header::ETAG).unwrap().to_str().unwrap();
    assert!(etag.starts_with('"') && etag.ends_with('"'));
    assert!(headers
        .get("x-location")
        .unwrap()
        .to_str()
        .unwrap()
        .contains(".kiln"));
    assert!(headers.get("x-request-id").is_some());

    let body = body_string(response).await;
    assert!(body.contains("/*transpiled*/"));

    // The instrumented folder is a separate compile space under the same
    // group, reachable with the same URL shape.
    let response = router
        .clone()
        .oneshot(get("/.kiln/out-instrumented/best/src/app.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn conditional_revisit_is_answered_not_modified() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let first = router
        .clone()
        .oneshot(get("/.kiln/out/best/src/app.js"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let etag = first.headers().get(header::ETAG).unwrap().clone();

    let request = Request::builder()
        .uri("/.kiln/out/best/src/app.js")
        .header(header::IF_NONE_MATCH, etag.clone())
        .body(Body::empty())
        .unwrap();
    let second = router.clone().oneshot(request).await.unwrap();
    assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers().get(header::ETAG).unwrap(), &etag);
    assert!(body_string(second).await.is_empty());
}

#[tokio::test]
async fn conditional_header_does_not_shortcut_a_fresh_compile() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let request = Request::builder()
        .uri("/.kiln/out/best/src/app.js")
        .header(header::IF_NONE_MATCH, "\"never-seen\"")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("/*transpiled*/"));
}

#[tokio::test]
async fn group_less_urls_redirect_by_user_agent() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let request = Request::builder()
        .uri("/.kiln/out/src/app.js")
        .header(header::USER_AGENT, CHROME_103)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/.kiln/out/best/src/app.js"
    );
    assert_eq!(response.headers().get(header::VARY).unwrap(), "User-Agent");

    // An engine predating the arrow-function threshold lands in the group
    // that still applies the transform.
    let request = Request::builder()
        .uri("/.kiln/out/src/app.js")
        .header(header::USER_AGENT, CHROME_30)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/.kiln/out/worst/src/app.js"
    );

    // No recognizable agent: serve the output that assumes nothing.
    let response = router
        .clone()
        .oneshot(get("/.kiln/out/src/app.js"))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/.kiln/out/otherwise/src/app.js"
    );
}

#[tokio::test]
async fn source_map_is_peeked_never_compiled() {
    let (_temp, server) = scaffold();
    let router = server.router();

    // Nothing has compiled yet, so there is no branch to peek into.
    let missing = router
        .clone()
        .oneshot(get("/.kiln/out/best/src/app.js.map"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let compiled = router
        .clone()
        .oneshot(get("/.kiln/out/best/src/app.js"))
        .await
        .unwrap();
    assert_eq!(compiled.status(), StatusCode::OK);

    let map = router
        .clone()
        .oneshot(get("/.kiln/out/best/src/app.js.map"))
        .await
        .unwrap();
    assert_eq!(map.status(), StatusCode::OK);
    assert_eq!(
        map.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert!(body_string(map).await.contains("mappings"));
}

#[tokio::test]
async fn map_request_for_a_directory_is_refused() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let response = router
        .oneshot(get("/.kiln/out/best/src.map"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_compiled_urls_are_client_errors() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let response = router
        .clone()
        .oneshot(get("/.kiln/dist/best/src/app.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("unknown output folder"));
    assert!(body["requestId"].is_string());

    // A group with no module path names nothing servable.
    let response = router
        .clone()
        .oneshot(get("/.kiln/out/best"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_module_reports_not_found_with_request_id() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let response = router
        .oneshot(get("/.kiln/out/best/src/missing.js"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let header_id = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = body_json(response).await;
    assert_eq!(body["requestId"].as_str().unwrap(), header_id);
    assert!(body["message"].as_str().unwrap().contains("read input"));
}

#[tokio::test]
async fn reload_stream_negotiates_connection_state() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let request = Request::builder()
        .uri("/")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // Once the room closes, reconnect attempts are told to stop retrying.
    server.room().close();
    let request = Request::builder()
        .uri("/")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn reload_stream_rejects_when_full() {
    let config = ServerConfig {
        max_connections: 0,
        ..ServerConfig::default()
    };
    let (_temp, server) = scaffold_with(config);
    let router = server.router();

    let request = Request::builder()
        .uri("/")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
}

#[tokio::test]
async fn static_fallback_serves_project_files_and_guards_the_root() {
    let (_temp, server) = scaffold();
    let router = server.router();

    let response = router.clone().oneshot(get("/index.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    assert!(body_string(response).await.contains("kiln"));

    let missing = router.clone().oneshot(get("/nope.txt")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let traversal = router
        .clone()
        .oneshot(get("/src/../../outside.txt"))
        .await
        .unwrap();
    assert_eq!(traversal.status(), StatusCode::FORBIDDEN);

    let directory = router.clone().oneshot(get("/src")).await.unwrap();
    assert_eq!(directory.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn profile_manifest_is_written_for_runtimes() {
    let (temp, server) = scaffold();

    let path = server.persist_profile_manifest().unwrap();
    assert!(path.starts_with(temp.path()));
    assert!(path.ends_with("profiles.json"));

    let manifest: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    let ids: Vec<&str> = manifest["profiles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|profile| profile["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["best", "worst"]);
    assert_eq!(manifest["fallback"]["id"], "otherwise");
}
