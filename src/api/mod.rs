//! Wallet-side HTTP gateway.
//!
//! Axum router for the connect/approval surface the wallet frontend talks
//! to. Requests pass a fixed-window rate limit keyed by session header or
//! peer address before reaching any handler.

pub mod handlers;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::bootstrap::Services;
use crate::security::{limit_key, limits};

pub fn router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/connect", post(handlers::connect))
        .route("/api/session/{token}", get(handlers::session_probe))
        .route("/api/transaction/{tx_id}", get(handlers::get_transaction))
        .route(
            "/api/transaction/{tx_id}/sign",
            post(handlers::sign_transaction),
        )
        .route(
            "/api/transaction/{tx_id}/status",
            get(handlers::transaction_status),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&services),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(services)
}

/// Bind and serve until the process exits.
pub async fn serve(services: Arc<Services>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&services.config.gateway.bind_addr).await?;
    tracing::info!(address = %listener.local_addr()?, "HTTP gateway listening");

    axum::serve(
        listener,
        router(services).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Per-client request limit, keyed by the `x-session-id` header when the
/// frontend sends one, else by peer IP.
async fn rate_limit_middleware(
    State(services): State<Arc<Services>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string());

    match services
        .limiter
        .check(&limit_key("api", &key), limits::API, "api")
    {
        Ok(()) => next.run(request).await,
        Err(err) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(types::ErrorBody {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}
