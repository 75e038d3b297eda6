//! Error types for the access crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `CatalogError`: Invalid provider or policy configuration
//! - `PolicyError`: A policy that cannot be evaluated against the current catalog
//! - `SessionError`: Failures talking to the SSO session store

use std::fmt;
use vouch_core::{ProviderId, ServiceId, SessionId};

/// Errors raised while building a provider catalog or service directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Two providers share the same identifier.
    DuplicateProvider { provider: ProviderId },
    /// A provider endpoint is not a usable URL.
    InvalidEndpoint { provider: ProviderId, reason: String },
    /// A service pattern is not a valid regular expression.
    InvalidServicePattern { pattern: String, reason: String },
    /// The public base URL used to build selection links is not a valid URL.
    InvalidPublicUrl { url: String, reason: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateProvider { provider } => {
                write!(f, "provider '{provider}' is defined more than once")
            }
            Self::InvalidEndpoint { provider, reason } => {
                write!(f, "provider '{provider}' has an invalid endpoint: {reason}")
            }
            Self::InvalidServicePattern { pattern, reason } => {
                write!(f, "invalid service pattern '{pattern}': {reason}")
            }
            Self::InvalidPublicUrl { url, reason } => {
                write!(f, "invalid public url '{url}': {reason}")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

/// Errors from evaluating an access policy.
///
/// These are configuration errors: they are fatal to the request being
/// evaluated and never to the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The policy for a service names a provider the registry does not know.
    UnknownProvider {
        service: ServiceId,
        provider: ProviderId,
    },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider { service, provider } => {
                write!(
                    f,
                    "access policy for '{service}' references unknown provider '{provider}'"
                )
            }
        }
    }
}

impl std::error::Error for PolicyError {}

/// Errors from the SSO session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session store could not be reached or returned an error.
    StoreUnavailable { reason: String },
    /// A stored session could not be decoded.
    Corrupt { session_id: SessionId, reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreUnavailable { reason } => {
                write!(f, "session store unavailable: {reason}")
            }
            Self::Corrupt { session_id, reason } => {
                write!(f, "session {session_id} is corrupt: {reason}")
            }
        }
    }
}

impl std::error::Error for SessionError {}
