//! Shared application state.

use std::sync::Arc;
use vouch_access::{
    CatalogError, PolicyError, PolicySet, ProviderCatalog, ProviderCatalogResolver,
    ProviderRegistry, ResolvedCatalog,
};
use vouch_core::{ProviderId, ServiceId};
use vouch_correlation::CorrelationStore;
use vouch_delegation::{DelegationOrchestrator, LogoutCoordinator, ProviderClient};

use crate::config::{DelegationConfig, ServerConfig, SessionConfig};
use crate::sessions::SessionStore;

/// Shared application state.
pub struct AppState {
    /// Decides login requests.
    pub orchestrator: DelegationOrchestrator,
    /// Ends sessions and works out provider logout.
    pub logout: LogoutCoordinator,
    /// Current provider catalog and service policies.
    pub registry: Arc<ProviderRegistry>,
    /// Builds provider selection lists.
    pub resolver: ProviderCatalogResolver,
    /// Session storage.
    pub sessions: Arc<dyn SessionStore>,
    /// Session configuration.
    pub session_config: SessionConfig,
    /// Delegation configuration.
    pub delegation_config: DelegationConfig,
}

impl AppState {
    /// Creates the application state from configuration and collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider catalog, service policies or public
    /// URL are invalid.
    pub fn new<S>(
        config: &ServerConfig,
        sessions: Arc<S>,
        store: Arc<dyn CorrelationStore>,
        client: Arc<dyn ProviderClient>,
    ) -> Result<Self, CatalogError>
    where
        S: SessionStore + 'static,
    {
        let (catalog, policies) = load_catalog(config)?;
        let registry = Arc::new(ProviderRegistry::new(catalog, policies));
        let resolver = ProviderCatalogResolver::new(&config.public_url)?;

        let orchestrator = DelegationOrchestrator::new(
            registry.clone(),
            resolver.clone(),
            store,
            sessions.clone(),
            client,
        )
        .with_exchange_timeout(config.delegation.exchange_timeout());

        let mut logout = LogoutCoordinator::new(registry.clone(), sessions.clone());
        if let Some(url) = config.delegation.post_logout_redirect.as_deref() {
            logout = logout.with_post_logout_redirect(url);
        }

        Ok(Self {
            orchestrator,
            logout,
            registry,
            resolver,
            sessions,
            session_config: config.session.clone(),
            delegation_config: config.delegation.clone(),
        })
    }

    /// Swaps in the providers and services from `config`.
    ///
    /// Providers and policies are swapped together in one step, and nothing
    /// is replaced if either fails to load. Changes to the public URL, session
    /// or delegation settings need a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the new catalog or policies are invalid.
    pub fn reload(&self, config: &ServerConfig) -> Result<(), CatalogError> {
        let (catalog, policies) = load_catalog(config)?;
        self.registry.replace(catalog, policies);
        Ok(())
    }

    /// Returns the providers authorized for `service`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service's policy references an unknown provider.
    pub fn authorized_providers(
        &self,
        service: Option<&ServiceId>,
        remembered: Option<&ProviderId>,
    ) -> Result<ResolvedCatalog, PolicyError> {
        let snapshot = self.registry.snapshot();
        self.resolver
            .resolve(&snapshot.enforcer(), &snapshot.scope(service), remembered)
    }
}

/// Builds and cross-checks the catalog and policies.
fn load_catalog(config: &ServerConfig) -> Result<(ProviderCatalog, PolicySet), CatalogError> {
    let catalog = config.catalog()?;
    let policies = config.policies()?;

    for provider in catalog.find_all() {
        if provider.exchange_endpoint().is_none() {
            tracing::warn!(
                provider = %provider.id(),
                "provider has no exchange endpoint; its callbacks will fail"
            );
        }
    }
    for (policy, provider) in policies.unknown_providers(&catalog) {
        tracing::warn!(
            policy = %policy,
            provider = %provider,
            "service policy references unknown provider; requests for it will fail"
        );
    }

    tracing::info!(
        providers = catalog.len(),
        services = policies.len(),
        "loaded provider catalog"
    );
    Ok((catalog, policies))
}
