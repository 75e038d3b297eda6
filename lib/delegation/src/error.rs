//! Error types for delegated authentication.
//!
//! `DelegationError` carries internal detail for logs. It is converted at
//! the orchestrator boundary into a [`DelegationFailure`], whose
//! [`ErrorView`] is safe to show to the user.

use serde::Serialize;
use std::fmt;
use vouch_core::{ProviderId, ServiceId};

use crate::request::ProviderErrorPayload;

/// Status reported for provider errors that carry no code of their own.
pub const DEFAULT_PROVIDER_ERROR_CODE: &str = "401";

/// Category of a failed delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    NoProvider,
    InvalidCorrelation,
    ProviderError,
    PolicyDenied,
    ProviderTimeout,
    TransportError,
    ConfigurationError,
}

impl FailureKind {
    /// Returns the kebab-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoProvider => "no-provider",
            Self::InvalidCorrelation => "invalid-correlation",
            Self::ProviderError => "provider-error",
            Self::PolicyDenied => "policy-denied",
            Self::ProviderTimeout => "provider-timeout",
            Self::TransportError => "transport-error",
            Self::ConfigurationError => "configuration-error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-safe error details. Every free-text field is HTML-escaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorView {
    pub code: String,
    pub error: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

/// The structured result of a failed delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationFailure {
    kind: FailureKind,
    #[serde(flatten)]
    view: ErrorView,
}

impl DelegationFailure {
    /// Returns the failure category.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the error view.
    #[must_use]
    pub fn view(&self) -> &ErrorView {
        &self.view
    }
}

/// Errors raised while deciding a login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationError {
    /// Configuration prevents evaluating this request.
    Configuration { reason: String },
    /// The callback's correlation state is missing, malformed, unknown,
    /// expired, already used, or does not match the returning provider.
    Correlation { reason: String },
    /// The provider reported an error instead of proof of identity.
    Provider {
        provider: Option<ProviderId>,
        payload: ProviderErrorPayload,
    },
    /// The provider did not answer the credential exchange in time.
    ProviderTimeout { provider: ProviderId },
    /// The provider is not allowed for the service.
    PolicyDenied {
        provider: Option<ProviderId>,
        service: Option<ServiceId>,
    },
    /// No provider is allowed for the service.
    NoProvider { service: Option<ServiceId> },
    /// A collaborator could not be reached.
    Transport { reason: String },
}

impl fmt::Display for DelegationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => write!(f, "configuration error: {reason}"),
            Self::Correlation { reason } => write!(f, "invalid correlation: {reason}"),
            Self::Provider { provider, payload } => write!(
                f,
                "provider {} reported error '{}'",
                provider.as_ref().map_or("<unknown>", ProviderId::as_str),
                payload.error.as_deref().unwrap_or("<none>")
            ),
            Self::ProviderTimeout { provider } => {
                write!(f, "provider '{provider}' timed out during credential exchange")
            }
            Self::PolicyDenied { provider, service } => write!(
                f,
                "provider {} denied for service {}",
                provider.as_ref().map_or("<none>", ProviderId::as_str),
                service.as_ref().map_or("<none>", ServiceId::as_str)
            ),
            Self::NoProvider { service } => write!(
                f,
                "no provider authorized for service {}",
                service.as_ref().map_or("<none>", ServiceId::as_str)
            ),
            Self::Transport { reason } => write!(f, "transport error: {reason}"),
        }
    }
}

impl std::error::Error for DelegationError {}

impl DelegationError {
    /// Returns the failure category.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration { .. } => FailureKind::ConfigurationError,
            Self::Correlation { .. } => FailureKind::InvalidCorrelation,
            Self::Provider { .. } => FailureKind::ProviderError,
            Self::ProviderTimeout { .. } => FailureKind::ProviderTimeout,
            Self::PolicyDenied { .. } => FailureKind::PolicyDenied,
            Self::NoProvider { .. } => FailureKind::NoProvider,
            Self::Transport { .. } => FailureKind::TransportError,
        }
    }

    /// Convert to a user-safe failure.
    #[must_use]
    pub fn into_failure(self) -> DelegationFailure {
        let kind = self.kind();
        let view = match self {
            Self::Provider { provider, payload } => provider_error_view(provider, payload),
            Self::ProviderTimeout { provider } => ErrorView {
                code: "504".to_string(),
                error: kind.as_str().to_string(),
                reason: "The identity provider did not respond in time".to_string(),
                description: None,
                provider_name: Some(html_escape(provider.as_str())),
            },
            Self::Configuration { .. } => generic(kind, "500", "The login service is misconfigured"),
            Self::Correlation { .. } => generic(
                kind,
                "400",
                "The login attempt is invalid or has expired; please start again",
            ),
            Self::PolicyDenied { .. } => generic(
                kind,
                "403",
                "The selected identity provider is not permitted for this application",
            ),
            Self::NoProvider { .. } => generic(
                kind,
                "403",
                "No identity provider is available for this application",
            ),
            Self::Transport { .. } => generic(
                kind,
                "502",
                "The login service is temporarily unavailable",
            ),
        };
        DelegationFailure { kind, view }
    }
}

fn generic(kind: FailureKind, code: &str, reason: &str) -> ErrorView {
    ErrorView {
        code: code.to_string(),
        error: kind.as_str().to_string(),
        reason: reason.to_string(),
        description: None,
        provider_name: None,
    }
}

fn provider_error_view(provider: Option<ProviderId>, payload: ProviderErrorPayload) -> ErrorView {
    let escape = |value: Option<String>| value.as_deref().map(html_escape);
    ErrorView {
        code: escape(payload.code).unwrap_or_else(|| DEFAULT_PROVIDER_ERROR_CODE.to_string()),
        error: escape(payload.error).unwrap_or_default(),
        reason: escape(payload.reason).unwrap_or_default(),
        description: escape(payload.description).or_else(|| escape(payload.message)),
        provider_name: provider.map(|p| html_escape(p.as_str())),
    }
}

/// HTML escape for XSS prevention.
#[must_use]
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
