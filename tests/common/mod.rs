//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use sysadmin::config::AppConfig;
use sysadmin::lifecycle::{build_server, Shutdown};

/// Config pointing at a port nothing listens on, with short deadlines.
pub fn test_config(assets: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.port = 1;
    config.database.connect_timeout_secs = 1;
    config.database.acquire_timeout_secs = 1;
    config.database.query_timeout_secs = 1;
    config.assets.root = assets.path().display().to_string();
    config
}

/// Asset directory with `site.css` and `build/bundle.js`.
pub fn asset_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("site.css"), "body { margin: 0 }").unwrap();
    fs::create_dir(dir.path().join("build")).unwrap();
    fs::write(dir.path().join("build").join("bundle.js"), "console.log(1)").unwrap();
    dir
}

/// The fully layered router over a fresh asset directory.
pub fn test_router() -> (Router, TempDir) {
    let assets = asset_dir();
    let server = build_server(&test_config(&assets)).unwrap();
    (server.router(), assets)
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Serve on an ephemeral port until the returned coordinator is triggered.
pub async fn spawn_server() -> (SocketAddr, Shutdown, TempDir) {
    let assets = asset_dir();
    let server = build_server(&test_config(&assets)).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });
    (addr, shutdown, assets)
}
