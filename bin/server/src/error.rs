//! Server error types.
//!
//! Startup failures abort the process with a report. Request failures never
//! carry internal detail to the browser: delegation failures are already
//! user-safe, and everything else collapses to a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;
use vouch_delegation::{DelegationFailure, FailureKind};

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded or is invalid.
    Config { reason: String },
    /// The session database is unreachable or could not be migrated.
    Database { reason: String },
    /// The correlation store could not be opened.
    CorrelationStore { reason: String },
    /// The HTTP client for callback exchanges could not be built.
    HttpClient { reason: String },
    /// The listener could not be bound or the server stopped with an error.
    Serve { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Database { reason } => write!(f, "session database error: {reason}"),
            Self::CorrelationStore { reason } => {
                write!(f, "correlation store unavailable: {reason}")
            }
            Self::HttpClient { reason } => write!(f, "failed to build HTTP client: {reason}"),
            Self::Serve { reason } => write!(f, "server error: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// HTTP status for a delegation failure.
#[must_use]
pub fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidCorrelation | FailureKind::ProviderError => StatusCode::BAD_REQUEST,
        FailureKind::PolicyDenied | FailureKind::NoProvider => StatusCode::FORBIDDEN,
        FailureKind::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
        FailureKind::TransportError => StatusCode::BAD_GATEWAY,
        FailureKind::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A delegation failure rendered as the error view model.
#[derive(Debug)]
pub struct FailureResponse(pub DelegationFailure);

impl IntoResponse for FailureResponse {
    fn into_response(self) -> Response {
        (failure_status(self.0.kind()), Json(self.0)).into_response()
    }
}

/// Request errors outside the delegation decision.
#[derive(Debug)]
pub enum ApiError {
    /// The session store failed while finishing a login.
    Session(String),
    /// The provider catalog could not be resolved.
    Catalog(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Session(msg) => {
                tracing::error!("Session store error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Session store unavailable")
            }
            Self::Catalog(msg) => {
                tracing::error!("Catalog resolution failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "The login service is misconfigured")
            }
        };

        (status, message).into_response()
    }
}
