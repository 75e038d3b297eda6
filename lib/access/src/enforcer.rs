//! Authorization of providers for services.
//!
//! The enforcer answers one question: may provider P vouch for a user of
//! service S? It is a pure function of the catalog snapshot and the resolved
//! policy, so a request can ask it any number of times and get the same answer.

use std::sync::Arc;
use tracing::warn;
use vouch_core::{ProviderId, ServiceId};

use crate::error::PolicyError;
use crate::policy::{ServiceAccessPolicy, ServiceDirectory};
use crate::registry::ProviderCatalog;
use crate::session::SsoSession;

/// The service a request targets, with its policy resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceScope {
    /// The request names no service.
    Unscoped,
    /// The request names a service no policy matches.
    Unregistered(ServiceId),
    /// The request names a registered service.
    Registered(ServiceId, Arc<ServiceAccessPolicy>),
}

impl ServiceScope {
    /// Resolves the scope for `service` through `directory`.
    pub fn resolve(service: Option<&ServiceId>, directory: &dyn ServiceDirectory) -> Self {
        match service {
            None => Self::Unscoped,
            Some(service) => match directory.resolve(service) {
                Some(policy) => Self::Registered(service.clone(), policy),
                None => Self::Unregistered(service.clone()),
            },
        }
    }

    /// Returns the requested service, if any.
    #[must_use]
    pub fn service(&self) -> Option<&ServiceId> {
        match self {
            Self::Unscoped => None,
            Self::Unregistered(service) | Self::Registered(service, _) => Some(service),
        }
    }

    /// Returns the resolved policy, if any.
    #[must_use]
    pub fn policy(&self) -> Option<&ServiceAccessPolicy> {
        match self {
            Self::Registered(_, policy) => Some(policy),
            _ => None,
        }
    }
}

/// Decides whether a provider may authenticate users for a service.
#[derive(Debug, Clone)]
pub struct AccessPolicyEnforcer {
    catalog: Arc<ProviderCatalog>,
}

impl AccessPolicyEnforcer {
    /// Creates an enforcer over a catalog snapshot.
    #[must_use]
    pub fn new(catalog: Arc<ProviderCatalog>) -> Self {
        Self { catalog }
    }

    /// Returns the catalog snapshot this enforcer evaluates against.
    #[must_use]
    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Checks `provider` against `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service's policy references a provider that is
    /// not in the catalog.
    pub fn check(&self, provider: &ProviderId, scope: &ServiceScope) -> Result<bool, PolicyError> {
        let known = self
            .catalog
            .find_by_id(provider)
            .is_some_and(|p| p.is_enabled());

        match scope {
            ServiceScope::Unscoped => Ok(known),
            ServiceScope::Unregistered(_) => Ok(false),
            ServiceScope::Registered(service, policy) => {
                if !policy.is_access_enabled() {
                    return Ok(false);
                }
                self.validate_policy(service, policy)?;
                Ok(known && policy.permits(provider))
            }
        }
    }

    /// Returns true if `provider` may authenticate for `scope`.
    ///
    /// Misconfigured policies deny.
    #[must_use]
    pub fn is_authorized(&self, provider: &ProviderId, scope: &ServiceScope) -> bool {
        self.check(provider, scope).unwrap_or_else(|e| {
            warn!(error = %e, "denying access under misconfigured policy");
            false
        })
    }

    /// Checks a session recorded as authenticated by `originating` against `scope`.
    ///
    /// A session without an originating provider came from a local login and
    /// is allowed wherever the policy does not restrict providers.
    ///
    /// # Errors
    ///
    /// Returns an error if the service's policy references an unknown provider.
    pub fn check_session(
        &self,
        originating: Option<&ProviderId>,
        scope: &ServiceScope,
    ) -> Result<bool, PolicyError> {
        if let Some(provider) = originating {
            return self.check(provider, scope);
        }

        match scope {
            ServiceScope::Unscoped => Ok(true),
            ServiceScope::Unregistered(_) => Ok(false),
            ServiceScope::Registered(service, policy) => {
                if !policy.is_access_enabled() {
                    return Ok(false);
                }
                self.validate_policy(service, policy)?;
                Ok(!policy.restricts_providers())
            }
        }
    }

    /// Returns true if `session` may be reused for `scope`.
    #[must_use]
    pub fn is_session_authorized(&self, session: &SsoSession, scope: &ServiceScope) -> bool {
        self.check_session(session.originating_provider(), scope)
            .unwrap_or_else(|e| {
                warn!(error = %e, session = %session.id(), "denying session under misconfigured policy");
                false
            })
    }

    fn validate_policy(
        &self,
        service: &ServiceId,
        policy: &ServiceAccessPolicy,
    ) -> Result<(), PolicyError> {
        match policy
            .allowed_provider_ids()
            .iter()
            .find(|id| !self.catalog.contains(id))
        {
            Some(unknown) => Err(PolicyError::UnknownProvider {
                service: service.clone(),
                provider: unknown.clone(),
            }),
            None => Ok(()),
        }
    }
}
