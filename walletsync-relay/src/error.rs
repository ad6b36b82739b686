// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay error types.
//!
//! One enum per layer. Only [`ApiError`] knows about HTTP status codes; the
//! lower layers never decide what a caller gets to see.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Wallet store failures.
///
/// A version conflict is not an error; see [`crate::storage::WriteOutcome`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid wallet version: {0}")]
    InvalidVersion(u64),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Outcome of resolving a credential token.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown or expired token.
    #[error("Token Not Found")]
    Unauthorized,

    /// Token is valid but its scope does not cover the request.
    #[error("Scope")]
    Forbidden,

    #[error("Token lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Notification registry failures. None of these ever fail a wallet write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry has begun shutting down and accepts no new connections.
    #[error("registry is shutting down")]
    ShuttingDown,

    /// An inbound queue stayed full past the enqueue timeout.
    #[error("registry queue is full")]
    Busy,

    /// The control loop is gone.
    #[error("registry is closed")]
    Closed,
}

/// Sync endpoint failures.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

/// Configuration errors raised while reading the environment.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// HTTP-facing errors.
///
/// The `Display` text of the inner detail is what the client sees, except for
/// [`ApiError::Internal`], whose detail is only logged.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("{context}: {detail}")]
    Internal { context: &'static str, detail: String },
}

/// JSON error body, `{"error": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    /// Builds the body the way every error response spells it: the status
    /// text, optionally followed by `": detail"`.
    pub fn new(status: StatusCode, detail: &str) -> Self {
        let text = status.canonical_reason().unwrap_or("Error");
        let error = if detail.is_empty() {
            text.to_string()
        } else {
            format!("{}: {}", text, detail)
        };
        ErrorBody { error }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label for the `errors_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad-request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not-found",
            Self::MethodNotAllowed(_) => "method-not-allowed",
            Self::PayloadTooLarge => "payload-too-large",
            Self::Internal { .. } => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::BadRequest(d)
            | Self::Unauthorized(d)
            | Self::Forbidden(d)
            | Self::NotFound(d)
            | Self::MethodNotAllowed(d) => ErrorBody::new(status, d),
            Self::PayloadTooLarge => ErrorBody::new(status, ""),
            Self::Internal { context, detail } => {
                tracing::error!("{}: {}", context, detail);
                ErrorBody::new(status, "")
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => Self::Unauthorized(e.to_string()),
            AuthError::Forbidden => Self::Forbidden(e.to_string()),
            AuthError::Store(inner) => Self::Internal {
                context: "Error getting Token",
                detail: inner.to_string(),
            },
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        Self::Internal {
            context: "Error saving or getting wallet",
            detail: e.to_string(),
        }
    }
}
