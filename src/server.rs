use axum::{
    extract::Request,
    http::{
        header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_ORIGIN},
        HeaderValue, Method, StatusCode,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::Settings;
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::forward::{self, client, handlers::AdapterRegistry};
use crate::logger;
use crate::services::Backends;

const ALLOWED_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AdapterRegistry>,
    pub backends: Arc<Backends>,
    pub db: Database,
}

impl AppState {
    pub fn new(registry: AdapterRegistry, backends: Backends, db: Database) -> Self {
        Self {
            registry: Arc::new(registry),
            backends: Arc::new(backends),
            db,
        }
    }

    /// Open the database and build adapters and backends from configuration.
    pub fn from_settings(cfg: &Settings) -> AppResult<Self> {
        let db = Database::open(&cfg.resolved_database_path()?)?;
        let registry =
            AdapterRegistry::from_settings(cfg).map_err(|e| AppError::Config(e.to_string()))?;
        let http = client::create_client(cfg.request_timeout_secs)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let backends = Backends::from_settings(cfg, &db, http)?;
        Ok(Self::new(registry, backends, db))
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Answer preflight requests on any path before routing.
async fn preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Method not allowed"})),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))).into_response()
}

pub fn app(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // ============================================
        // AI Endpoints
        // ============================================
        .route(
            "/ai-completion",
            post(forward::ai_completion).fallback(method_not_allowed),
        )
        .route("/ai-chat", post(forward::ai_chat).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(middleware::from_fn(preflight))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .with_state(state)
}

pub async fn serve(listen_addr: &str, state: AppState) -> AppResult<()> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid listen_addr '{}': {}", listen_addr, e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    logger::info("server", &format!("Listening on http://{}", listener.local_addr()?));
    axum::serve(listener, app(state)).await?;
    Ok(())
}
