use axum::{http::Method, routing::get, Router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::WebConfig;
use crate::storage::GenerationManager;

use super::api::{get_events, get_status, health_check, AppState};

/// Build the HTTP application. With a `static_dir`, every path not taken by
/// the API is served from it, `index.html` at `/`.
pub fn router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/events", get(get_events))
        .route("/api/status", get(get_status))
        .with_state(state);

    let app = match static_dir {
        Some(dir) => api_routes.fallback_service(ServeDir::new(dir)),
        None => api_routes,
    };

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET]),
    )
    .layer(TraceLayer::new_for_http())
}

/// Start the web server over `manager` and run it until `shutdown_rx` turns true.
pub async fn run_server(
    manager: Arc<GenerationManager>,
    web_config: WebConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let state = Arc::new(AppState::new(manager));
    let app = router(state, web_config.static_dir.as_deref());

    let listener = TcpListener::bind(&web_config.listen).await?;
    serve(listener, app, shutdown_rx).await
}

/// Serve `app` on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "Web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            info!("Web server shutting down");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::record::{OrderedRecord, ParsedEvent, WorkerInfo};
    use crate::storage::StorageSettings;
    use crate::wire::decode_events;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn manager_with_events(dir: &Path, count: i64) -> Arc<GenerationManager> {
        let manager = GenerationManager::open(dir, StorageSettings::default()).unwrap();
        let pod = Arc::new(WorkerInfo::new(
            "pod-a",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        for sid in 1..=count {
            let mut data = serde_json::Map::new();
            data.insert("message".into(), Value::from(format!("event {}", sid)));
            manager.receive_event(&OrderedRecord::Parsed(Arc::new(ParsedEvent {
                pod: Arc::clone(&pod),
                sid,
                time: 1_000 * sid,
                data,
            })));
        }
        manager
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::ORIGIN, "http://viewer.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_events_tail_by_sid() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = router(Arc::new(AppState::new(manager_with_events(dir.path(), 5))), None);

        let (status, headers, body) = get(app, "/api/events?sid=3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");

        let events = decode_events(body.as_slice()).unwrap();
        let sids: Vec<i64> = events.iter().map(|e| e.sid).collect();
        assert_eq!(sids, vec![3, 4, 5]);
        assert_eq!(events[0].data["message"], json!("event 3"));
    }

    #[tokio::test]
    async fn test_events_by_time_and_everything() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_with_events(dir.path(), 4);
        let app = router(Arc::new(AppState::new(manager)), None);

        let (_, _, body) = get(app.clone(), "/api/events?time=3000").await;
        let sids: Vec<i64> = decode_events(body.as_slice()).unwrap().iter().map(|e| e.sid).collect();
        assert_eq!(sids, vec![3, 4]);

        let (_, _, body) = get(app, "/api/events").await;
        assert_eq!(decode_events(body.as_slice()).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty_array() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = router(Arc::new(AppState::new(manager_with_events(dir.path(), 0))), None);

        let (status, _, body) = get(app, "/api/events?sid=0").await;
        assert_eq!(status, StatusCode::OK);
        assert!(decode_events(body.as_slice()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_parameter_is_plain_text_400() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = router(Arc::new(AppState::new(manager_with_events(dir.path(), 1))), None);

        let (status, headers, body) = get(app, "/api/events?sid=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(headers
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert!(String::from_utf8(body).unwrap().contains("abc"));
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = router(Arc::new(AppState::new(manager_with_events(dir.path(), 2))), None);

        let (status, _, body) = get(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        let (status, _, body) = get(app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["version"], json!(env!("CARGO_PKG_VERSION")));
        assert_eq!(value["storage"]["active_events"], json!(2));
        assert_eq!(value["storage"]["segments"], json!(0));
    }

    #[tokio::test]
    async fn test_static_files_fallback() {
        let dir = tempfile::TempDir::new().unwrap();
        let site = tempfile::TempDir::new().unwrap();
        std::fs::write(site.path().join("index.html"), "<html>viewer</html>").unwrap();
        std::fs::write(site.path().join("app.js"), "console.log(1)").unwrap();

        let state = Arc::new(AppState::new(manager_with_events(dir.path(), 1)));
        let app = router(state, Some(site.path()));

        let (status, _, body) = get(app.clone(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<html>viewer</html>");

        let (status, _, body) = get(app.clone(), "/app.js").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"console.log(1)");

        let (status, _, _) = get(app.clone(), "/missing.css").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = get(app, "/api/events?sid=1").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = tempfile::TempDir::new().unwrap();
        let app = router(Arc::new(AppState::new(manager_with_events(dir.path(), 0))), None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = tokio::spawn(serve(listener, app, shutdown_rx));
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
