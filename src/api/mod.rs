use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::middleware::auth::verify_authorization;
use crate::models::response::DataResult;
use crate::AppState;

pub mod handlers;

/// Path prefix shared by every public route.
pub const API_PREFIX: &str = "/apis/auth.engine.io";

/// Multipart framing on top of the largest accepted import file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Routes that need no caller identity. Relative to [`API_PREFIX`].
pub fn auth_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/token/auth", post(handlers::token_auth))
}

/// Management API. Relative to `{API_PREFIX}/v1`; every route requires a
/// bearer JWT.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/envs", get(handlers::list_envs))
        .route(
            "/workspaces/:workspaceId/tokens/list",
            post(handlers::list_tokens),
        )
        .route(
            "/workspaces/:workspaceId/tokens/allEnv/list",
            post(handlers::list_all_env_tokens),
        )
        .route(
            "/workspaces/:workspaceId/tokens/add",
            post(handlers::create_token),
        )
        .route(
            "/workspaces/:workspaceId/tokens/import",
            post(handlers::import_token),
        )
        .route(
            "/workspaces/:workspaceId/tokens/:tokenId",
            get(handlers::get_token)
                .put(handlers::update_token)
                .delete(handlers::delete_token),
        )
        .route(
            "/workspaces/:workspaceId/tokens/:tokenId/export",
            post(handlers::export_token),
        )
        .layer(middleware::from_fn(verify_authorization))
}

/// The complete service: health probes, both routers and the shared layers.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state
        .config
        .max_import_bytes
        .saturating_add(MULTIPART_OVERHEAD);
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(handlers::readiness_check))
        .nest(API_PREFIX, auth_router())
        .nest(&format!("{}/v1", API_PREFIX), api_router())
        .fallback(fallback_404)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> (StatusCode, Json<DataResult<&'static str>>) {
    (
        StatusCode::NOT_FOUND,
        Json(DataResult::error(404, "Not Found".into())),
    )
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: security headers on every response. Token secrets travel in
/// bodies, so nothing may be cached.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");
    resp
}
