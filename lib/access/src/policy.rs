//! Per-application access policies and the service directory.
//!
//! A [`ServiceAccessPolicy`] decides which external providers may vouch for
//! users of one registered application. Policies are matched against the
//! requested service URL by an anchored regular expression.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use vouch_core::{ProviderId, ServiceId};

use crate::error::CatalogError;
use crate::registry::ProviderCatalog;

/// Delegated authentication policy attached to a registered application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccessPolicy {
    /// Name used in logs.
    #[serde(default)]
    name: String,
    /// Regular expression matched against the full service URL.
    service_id: String,
    /// Providers allowed to authenticate for this service; empty allows all.
    #[serde(default)]
    allowed_provider_ids: BTreeSet<ProviderId>,
    /// When set and exactly one provider is allowed, that provider is used
    /// without offering a choice.
    #[serde(default)]
    exclusive: bool,
    /// A disabled application accepts no provider at all.
    #[serde(default = "default_access_enabled")]
    access_enabled: bool,
    /// Lower values are matched first.
    #[serde(default)]
    evaluation_order: i32,
    /// Ask the provider to re-authenticate and never reuse a local session.
    #[serde(default)]
    force_authn: bool,
    /// Ask the provider not to interact with the user.
    #[serde(default)]
    passive: bool,
}

fn default_access_enabled() -> bool {
    true
}

impl ServiceAccessPolicy {
    /// Creates a policy allowing every provider for services matching `service_id`.
    #[must_use]
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            service_id: service_id.into(),
            allowed_provider_ids: BTreeSet::new(),
            exclusive: false,
            access_enabled: default_access_enabled(),
            evaluation_order: 0,
            force_authn: false,
            passive: false,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Restricts the policy to the given providers.
    #[must_use]
    pub fn allow<I, P>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProviderId>,
    {
        self.allowed_provider_ids
            .extend(providers.into_iter().map(Into::into));
        self
    }

    /// Sets the exclusive flag.
    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Enables or disables access for the application.
    #[must_use]
    pub fn access_enabled(mut self, enabled: bool) -> Self {
        self.access_enabled = enabled;
        self
    }

    /// Sets the evaluation order.
    #[must_use]
    pub fn evaluation_order(mut self, order: i32) -> Self {
        self.evaluation_order = order;
        self
    }

    /// Sets the force-authentication hint.
    #[must_use]
    pub fn force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    /// Sets the passive-authentication hint.
    #[must_use]
    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }

    /// Returns the policy name, falling back to the service pattern.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            &self.service_id
        } else {
            &self.name
        }
    }

    /// Returns the service pattern.
    #[must_use]
    pub fn service_pattern(&self) -> &str {
        &self.service_id
    }

    /// Returns the allowed provider ids.
    #[must_use]
    pub fn allowed_provider_ids(&self) -> &BTreeSet<ProviderId> {
        &self.allowed_provider_ids
    }

    /// Returns true if the policy restricts providers.
    #[must_use]
    pub fn restricts_providers(&self) -> bool {
        !self.allowed_provider_ids.is_empty()
    }

    /// Returns true if the policy lists `provider` (or allows all).
    #[must_use]
    pub fn permits(&self, provider: &ProviderId) -> bool {
        self.allowed_provider_ids.is_empty() || self.allowed_provider_ids.contains(provider)
    }

    /// Returns the exclusive flag.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns the provider an exclusive policy pins, if it names exactly one.
    #[must_use]
    pub fn exclusive_provider(&self) -> Option<&ProviderId> {
        if !self.exclusive || self.allowed_provider_ids.len() != 1 {
            return None;
        }
        self.allowed_provider_ids.iter().next()
    }

    /// Returns true if the application accepts delegated logins at all.
    #[must_use]
    pub fn is_access_enabled(&self) -> bool {
        self.access_enabled
    }

    /// Returns the evaluation order.
    #[must_use]
    pub fn order(&self) -> i32 {
        self.evaluation_order
    }

    /// Returns the force-authentication hint.
    #[must_use]
    pub fn forces_authn(&self) -> bool {
        self.force_authn
    }

    /// Returns the passive-authentication hint.
    #[must_use]
    pub fn is_passive(&self) -> bool {
        self.passive
    }
}

/// Resolves the policy that applies to a requested service.
pub trait ServiceDirectory: Send + Sync {
    /// Returns the policy for `service`, or `None` if the service is not registered.
    fn resolve(&self, service: &ServiceId) -> Option<Arc<ServiceAccessPolicy>>;
}

/// A compiled, ordered set of policies.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    entries: Vec<(Regex, Arc<ServiceAccessPolicy>)>,
}

impl PolicySet {
    /// Compiles `policies`, ordering them by evaluation order then declaration order.
    ///
    /// # Errors
    ///
    /// Returns an error if a service pattern is not a valid regular expression.
    pub fn new(policies: Vec<ServiceAccessPolicy>) -> Result<Self, CatalogError> {
        let mut entries = Vec::with_capacity(policies.len());
        for policy in policies {
            let pattern = Regex::new(&format!("^(?:{})$", policy.service_pattern())).map_err(
                |e| CatalogError::InvalidServicePattern {
                    pattern: policy.service_pattern().to_string(),
                    reason: e.to_string(),
                },
            )?;
            entries.push((pattern, Arc::new(policy)));
        }
        // Stable sort keeps declaration order among equal evaluation orders.
        entries.sort_by_key(|(_, policy)| policy.order());
        Ok(Self { entries })
    }

    /// Returns the first policy whose pattern matches `service`.
    #[must_use]
    pub fn find(&self, service: &ServiceId) -> Option<Arc<ServiceAccessPolicy>> {
        self.entries
            .iter()
            .find(|(pattern, _)| pattern.is_match(service.as_str()))
            .map(|(_, policy)| Arc::clone(policy))
    }

    /// Lists `(policy name, provider)` pairs naming providers absent from `catalog`.
    #[must_use]
    pub fn unknown_providers(&self, catalog: &ProviderCatalog) -> Vec<(String, ProviderId)> {
        self.entries
            .iter()
            .flat_map(|(_, policy)| {
                policy
                    .allowed_provider_ids()
                    .iter()
                    .filter(|id| !catalog.contains(id))
                    .map(|id| (policy.name().to_string(), id.clone()))
            })
            .collect()
    }

    /// Returns the number of policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no policies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ServiceDirectory for PolicySet {
    fn resolve(&self, service: &ServiceId) -> Option<Arc<ServiceAccessPolicy>> {
        let policy = self.find(service);
        debug!(
            service = %service,
            policy = policy.as_ref().map(|p| p.name()),
            "resolved service policy"
        );
        policy
    }
}
