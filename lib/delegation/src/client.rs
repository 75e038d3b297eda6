//! The provider-protocol collaborator seam.
//!
//! Validating what a provider sends back (an authorization code, a SAML
//! response, a CAS service ticket) is protocol work done outside this crate.
//! The orchestrator hands the callback parameters to a [`ProviderClient`]
//! and gets back either a credential or the provider's error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vouch_access::ExternalIdentityProvider;
use vouch_core::{CredentialId, ProviderId};

use crate::request::ProviderErrorPayload;

/// Identity proven by an external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedCredential {
    id: CredentialId,
    provider: ProviderId,
    principal: String,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
}

impl DelegatedCredential {
    /// Creates a credential for `principal` vouched for by `provider`.
    #[must_use]
    pub fn new(provider: ProviderId, principal: impl Into<String>) -> Self {
        Self {
            id: CredentialId::new(),
            provider,
            principal: principal.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds a released attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Returns the credential id.
    #[must_use]
    pub fn id(&self) -> CredentialId {
        self.id
    }

    /// Returns the provider that vouched for the principal.
    #[must_use]
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Returns the authenticated principal.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Returns the released attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }
}

/// Result of a credential exchange the provider answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// The proof was valid.
    Credential(DelegatedCredential),
    /// The provider rejected the proof.
    Rejected(ProviderErrorPayload),
}

/// Errors reaching the protocol collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// The collaborator could not be reached.
    Unreachable { provider: ProviderId, reason: String },
    /// The collaborator answered with something that is not an exchange result.
    InvalidResponse { provider: ProviderId, reason: String },
    /// The provider has nowhere to exchange callbacks.
    NotConfigured { provider: ProviderId },
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { provider, reason } => {
                write!(f, "exchange with provider '{provider}' failed: {reason}")
            }
            Self::InvalidResponse { provider, reason } => {
                write!(f, "provider '{provider}' returned an invalid exchange response: {reason}")
            }
            Self::NotConfigured { provider } => {
                write!(f, "provider '{provider}' has no exchange endpoint")
            }
        }
    }
}

impl std::error::Error for ExchangeError {}

/// Exchanges callback proof for a delegated credential.
///
/// Implementations must not retry: callback proof is single-use.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Exchanges the callback `params` returned by `provider`.
    async fn exchange_callback(
        &self,
        provider: &ExternalIdentityProvider,
        params: &BTreeMap<String, String>,
    ) -> vouch_core::Result<ExchangeOutcome, ExchangeError>;
}
