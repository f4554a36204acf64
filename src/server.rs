use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use crate::agent::ThemeSynthesisAgent;
use crate::api::{self, AppState};
use crate::config::StoreConfig;
use crate::notify::Notifier;
use crate::orchestrator::Orchestrator;
use crate::store;
use crate::ws;

/// Configuration for the orchestrator server.
pub struct ServerConfig {
    pub port: u16,
    pub store: StoreConfig,
    pub artifact_dir: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4117,
            store: StoreConfig::Memory,
            artifact_dir: PathBuf::from(".greenlight/artifacts"),
            dev_mode: false,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Start the orchestrator server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let store = store::connect(&config.store).context("failed to open run store")?;
    let notifier = Notifier::new();
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(ThemeSynthesisAgent),
        notifier.clone(),
        config.artifact_dir.clone(),
    );

    let state = Arc::new(AppState {
        orchestrator,
        notifier,
    });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "greenlight listening");
    println!("greenlight running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Notifier::new();
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ThemeSynthesisAgent),
            notifier.clone(),
            dir.path(),
        );
        let state = Arc::new(AppState {
            orchestrator,
            notifier,
        });
        (build_router(state), dir)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_run_routes_mounted() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .uri("/runs")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_rejects_plain_get() {
        let (app, _dir) = test_router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        // Without an Upgrade handshake the route refuses the request
        // rather than 404ing, proving it is mounted.
        assert_ne!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_run_via_full_router() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .method("POST")
            .uri("/runs")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "industry": "puzzle",
                    "theme": "tide pools",
                    "goal": "Generate match-3 concepts"
                })
                .to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let run: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(run["brief"]["industry"], "puzzle");
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4117);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(
            config.artifact_dir,
            PathBuf::from(".greenlight/artifacts")
        );
        assert!(!config.dev_mode);
    }
}
