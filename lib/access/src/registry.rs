//! Provider registry.
//!
//! The registry holds an immutable [`CatalogSnapshot`] (providers and service
//! policies together) behind an `Arc`. Requests take a snapshot once and
//! evaluate everything against it, so a concurrent reload is observed either
//! entirely or not at all.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;
use vouch_core::{ProviderId, ServiceId};

use crate::enforcer::{AccessPolicyEnforcer, ServiceScope};
use crate::error::CatalogError;
use crate::policy::PolicySet;
use crate::provider::ExternalIdentityProvider;

/// An immutable, ordered set of providers.
///
/// Providers are kept sorted by `(order, id)`; this is the configured order
/// used for listing and for auto-redirect tie-breaks.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    providers: Vec<ExternalIdentityProvider>,
    index: HashMap<ProviderId, usize>,
}

impl ProviderCatalog {
    /// Builds a catalog, validating every provider.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicate ids or unusable endpoints.
    pub fn new(mut providers: Vec<ExternalIdentityProvider>) -> Result<Self, CatalogError> {
        providers.sort_by(|a, b| a.order().cmp(&b.order()).then_with(|| a.id().cmp(b.id())));

        let mut index = HashMap::with_capacity(providers.len());
        for (position, provider) in providers.iter().enumerate() {
            provider.validate()?;
            if index.insert(provider.id().clone(), position).is_some() {
                return Err(CatalogError::DuplicateProvider {
                    provider: provider.id().clone(),
                });
            }
        }

        Ok(Self { providers, index })
    }

    /// Creates an empty catalog.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns every provider in configured order, including disabled ones.
    #[must_use]
    pub fn find_all(&self) -> &[ExternalIdentityProvider] {
        &self.providers
    }

    /// Looks up a provider by id.
    #[must_use]
    pub fn find_by_id(&self, id: &ProviderId) -> Option<&ExternalIdentityProvider> {
        self.index.get(id).map(|&position| &self.providers[position])
    }

    /// Returns true if the catalog knows `id` (enabled or not).
    #[must_use]
    pub fn contains(&self, id: &ProviderId) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the number of providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if the catalog has no providers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// One generation of configuration: the providers and the policies that
/// reference them.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    providers: Arc<ProviderCatalog>,
    policies: PolicySet,
}

impl CatalogSnapshot {
    /// Pairs a provider catalog with its service policies.
    #[must_use]
    pub fn new(providers: ProviderCatalog, policies: PolicySet) -> Self {
        Self {
            providers: Arc::new(providers),
            policies,
        }
    }

    /// Returns the providers of this generation.
    #[must_use]
    pub fn providers(&self) -> &ProviderCatalog {
        &self.providers
    }

    /// Returns the service policies of this generation.
    #[must_use]
    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    /// Returns an enforcer over this generation's providers.
    #[must_use]
    pub fn enforcer(&self) -> AccessPolicyEnforcer {
        AccessPolicyEnforcer::new(Arc::clone(&self.providers))
    }

    /// Resolves `service` against this generation's policies.
    #[must_use]
    pub fn scope(&self, service: Option<&ServiceId>) -> ServiceScope {
        ServiceScope::resolve(service, &self.policies)
    }
}

/// Shared handle to the current provider catalog and service policies.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl ProviderRegistry {
    /// Creates a registry serving `providers` under `policies`.
    #[must_use]
    pub fn new(providers: ProviderCatalog, policies: PolicySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogSnapshot::new(providers, policies))),
        }
    }

    /// Returns the generation in effect right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically replaces providers and policies together, returning the
    /// previous generation.
    pub fn replace(&self, providers: ProviderCatalog, policies: PolicySet) -> Arc<CatalogSnapshot> {
        let next = Arc::new(CatalogSnapshot::new(providers, policies));
        let (provider_count, policy_count) = (next.providers().len(), next.policies().len());
        let previous = std::mem::replace(
            &mut *self.current.write().unwrap_or_else(PoisonError::into_inner),
            next,
        );
        info!(
            providers = provider_count,
            policies = policy_count,
            "provider catalog replaced"
        );
        previous
    }
}
