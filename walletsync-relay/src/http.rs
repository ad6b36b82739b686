// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Server
//!
//! Wallet API under `/api/3`, plus health, readiness and Prometheus metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, DefaultBodyLimit, Query, State},
    http::{header, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{AuthScope, Authenticator};
use crate::error::{ApiError, ErrorBody};
use crate::metrics::RelayMetrics;
use crate::sync::WalletSync;
use crate::wallet::{WalletRecord, INITIAL_WALLET_VERSION, MAX_WALLET_VERSION};

pub const API_VERSION: &str = "3";
pub const PATH_PREFIX: &str = "/api/3";
pub const PATH_WALLET: &str = "/api/3/wallet";
pub const PATH_WEBSOCKET: &str = "/api/3/websocket";

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub sync: WalletSync,
    pub auth: Arc<dyn Authenticator>,
    pub metrics: RelayMetrics,
    pub start_time: Instant,
    pub metrics_token: Option<String>,
    pub max_body_bytes: usize,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub storage_ok: bool,
    pub wallet_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Body of `POST /api/3/wallet`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WalletRequest {
    pub token: String,
    pub encrypted_wallet: String,
    pub sequence: u64,
    pub hmac: String,
}

impl WalletRequest {
    /// Error text is safe to return to the client.
    fn validate(&self) -> Result<(), String> {
        if self.token.is_empty() {
            return Err("Missing 'token'".into());
        }
        if self.encrypted_wallet.is_empty() {
            return Err("Missing 'encryptedWallet'".into());
        }
        if self.hmac.is_empty() {
            return Err("Missing 'hmac'".into());
        }
        if self.sequence < INITIAL_WALLET_VERSION {
            return Err("Missing or zero-value 'sequence'".into());
        }
        if self.sequence > MAX_WALLET_VERSION {
            return Err("'sequence' out of range".into());
        }
        Ok(())
    }
}

/// 409 body: the error plus the store's current record, `null` if none.
#[derive(Debug, Serialize)]
pub struct ConflictResponse {
    pub error: String,
    pub latest: Option<WalletRecord>,
}

/// Middleware to check bearer token for metrics endpoint.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route(
            PATH_WALLET,
            get(get_wallet).post(post_wallet).fallback(method_not_allowed),
        )
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(root_handler))
        .fallback(fallback_handler)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

/// Counts the error and passes it on.
fn tracked<T>(metrics: &RelayMetrics, result: Result<T, ApiError>) -> Result<T, ApiError> {
    if let Err(ref e) = result {
        metrics.record_error(e.kind());
    }
    result
}

async fn get_wallet(
    State(state): State<HttpState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Result<Json<WalletRecord>, ApiError> {
    state.metrics.record_request("GET", "wallet");
    tracked(&state.metrics, fetch(&state, query).await)
}

async fn fetch(
    state: &HttpState,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> Result<Json<WalletRecord>, ApiError> {
    let token = query
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing token parameter".into()))?;

    let account_id = state.auth.resolve(&token, AuthScope::GetWallet)?;
    match state.sync.fetch_wallet(account_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound("No wallet".into())),
    }
}

async fn post_wallet(
    State(state): State<HttpState>,
    body: Result<Json<WalletRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.metrics.record_request("POST", "wallet");
    tracked(&state.metrics, submit(&state, body).await)
}

async fn submit(
    state: &HttpState,
    body: Result<Json<WalletRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(format!("Request failed validation: {}", e)))?;

    let account_id = state.auth.resolve(&request.token, AuthScope::Full)?;
    let result = state
        .sync
        .submit_wallet(
            account_id,
            &request.encrypted_wallet,
            &request.hmac,
            request.sequence,
        )
        .await?;

    if result.accepted {
        if request.sequence == INITIAL_WALLET_VERSION {
            info!("Initial wallet created");
        }
        return Ok((StatusCode::OK, Json(result.record)).into_response());
    }

    let body = ConflictResponse {
        error: ErrorBody::new(StatusCode::CONFLICT, "Bad sequence number").error,
        latest: result.record,
    };
    Ok((StatusCode::CONFLICT, Json(body)).into_response())
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed(String::new())
}

/// Anything unrouted. Paths under another API version get a hint.
async fn fallback_handler(uri: Uri) -> ApiError {
    let path = uri.path();
    if path == PATH_PREFIX || path.starts_with(&format!("{}/", PATH_PREFIX)) {
        ApiError::NotFound("Unknown Endpoint".into())
    } else if path.starts_with("/api/") {
        ApiError::NotFound(format!(
            "Wrong API version. Current version is {}.",
            API_VERSION
        ))
    } else {
        ApiError::NotFound(String::new())
    }
}

/// Root handler - returns basic info.
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "walletsync-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [PATH_WALLET, "/health", "/ready", "/metrics"]
    }))
}

/// Health check endpoint - always returns 200 if server is running.
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Readiness check endpoint - returns 200 if the wallet store answers.
async fn ready_handler(State(state): State<HttpState>) -> Response {
    let (storage_ok, wallet_count) = match state.sync.store().wallet_count() {
        Ok(count) => (true, count),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (false, 0)
        }
    };

    let response = ReadyResponse {
        ready: storage_ok,
        storage_ok,
        wallet_count,
    };

    if storage_ok {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    if let Ok(count) = state.sync.store().wallet_count() {
        state.metrics.wallets_stored.set(count as i64);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
