//! Per-request provider catalog resolution.

use serde::Serialize;
use std::fmt;
use url::Url;
use vouch_core::ProviderId;

use crate::enforcer::{AccessPolicyEnforcer, ServiceScope};
use crate::error::{CatalogError, PolicyError};
use crate::provider::{ExternalIdentityProvider, ProtocolKind};

/// Request parameter naming the selected provider.
pub const CLIENT_NAME_PARAM: &str = "client_name";

/// Request parameter naming the target service.
pub const SERVICE_PARAM: &str = "service";

/// An authorized provider as offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderLink {
    id: ProviderId,
    name: String,
    #[serde(rename = "type")]
    protocol: ProtocolKind,
    #[serde(rename = "redirect_url")]
    url: String,
    css_class: String,
    auto_redirect: bool,
    remembered: bool,
}

impl ProviderLink {
    fn new(provider: &ExternalIdentityProvider, url: String, remembered: bool) -> Self {
        Self {
            id: provider.id().clone(),
            name: provider.display_name().to_string(),
            protocol: provider.protocol(),
            url,
            css_class: provider.css_class(),
            auto_redirect: provider.auto_redirect(),
            remembered,
        }
    }

    /// Returns the provider id.
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the protocol family.
    #[must_use]
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Returns the local selection URL for this provider.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the CSS class for login views.
    #[must_use]
    pub fn css_class(&self) -> &str {
        &self.css_class
    }

    /// Returns true if this provider was chosen on a previous login.
    #[must_use]
    pub fn is_remembered(&self) -> bool {
        self.remembered
    }
}

/// Why a provider was picked for auto-redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoRedirectReason {
    /// The service's exclusive policy names exactly this provider.
    ExclusivePolicy,
    /// First authorized provider flagged for auto-redirect.
    Flagged,
}

impl fmt::Display for AutoRedirectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExclusivePolicy => f.write_str("exclusive policy"),
            Self::Flagged => f.write_str("auto-redirect flag"),
        }
    }
}

/// The provider a request may be sent to without asking the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoRedirect {
    pub provider: ProviderId,
    pub reason: AutoRedirectReason,
}

/// Authorized providers for one request, in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedCatalog {
    providers: Vec<ProviderLink>,
    auto_redirect: Option<AutoRedirect>,
}

impl ResolvedCatalog {
    /// Returns the authorized providers.
    #[must_use]
    pub fn providers(&self) -> &[ProviderLink] {
        &self.providers
    }

    /// Returns the auto-redirect candidate.
    #[must_use]
    pub fn auto_redirect(&self) -> Option<&AutoRedirect> {
        self.auto_redirect.as_ref()
    }

    /// Returns true if `provider` is in the authorized set.
    #[must_use]
    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.providers.iter().any(|link| link.id() == provider)
    }

    /// Returns true if no provider is authorized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Returns the ids of authorized providers in order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|link| link.id().clone()).collect()
    }
}

/// Builds the authorized provider list for a request.
#[derive(Debug, Clone)]
pub struct ProviderCatalogResolver {
    login_url: Url,
}

impl ProviderCatalogResolver {
    /// Creates a resolver whose selection links point at `{public_url}/login`.
    ///
    /// # Errors
    ///
    /// Returns an error if `public_url` is not an absolute URL.
    pub fn new(public_url: &str) -> Result<Self, CatalogError> {
        let raw = format!("{}/login", public_url.trim_end_matches('/'));
        let login_url = Url::parse(&raw).map_err(|e| CatalogError::InvalidPublicUrl {
            url: public_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { login_url })
    }

    /// Resolves the providers `scope` may use and the auto-redirect candidate.
    ///
    /// `remembered` marks the provider chosen on a previous login; it never
    /// affects which provider is auto-redirected to.
    ///
    /// # Errors
    ///
    /// Returns an error if the service's policy references an unknown provider.
    pub fn resolve(
        &self,
        enforcer: &AccessPolicyEnforcer,
        scope: &ServiceScope,
        remembered: Option<&ProviderId>,
    ) -> Result<ResolvedCatalog, PolicyError> {
        let mut authorized = Vec::new();
        for provider in enforcer.catalog().find_all() {
            if provider.is_enabled() && enforcer.check(provider.id(), scope)? {
                authorized.push(provider);
            }
        }

        let exclusive = scope
            .policy()
            .and_then(|policy| policy.exclusive_provider())
            .filter(|id| authorized.iter().any(|p| p.id() == *id))
            .map(|id| AutoRedirect {
                provider: id.clone(),
                reason: AutoRedirectReason::ExclusivePolicy,
            });
        let auto_redirect = exclusive.or_else(|| {
            authorized
                .iter()
                .find(|p| p.auto_redirect())
                .map(|p| AutoRedirect {
                    provider: p.id().clone(),
                    reason: AutoRedirectReason::Flagged,
                })
        });

        let providers = authorized
            .into_iter()
            .map(|provider| {
                ProviderLink::new(
                    provider,
                    self.selection_url(provider.id(), scope),
                    remembered == Some(provider.id()),
                )
            })
            .collect();

        Ok(ResolvedCatalog {
            providers,
            auto_redirect,
        })
    }

    fn selection_url(&self, provider: &ProviderId, scope: &ServiceScope) -> String {
        let mut url = self.login_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(CLIENT_NAME_PARAM, provider.as_str());
            if let Some(service) = scope.service() {
                query.append_pair(SERVICE_PARAM, service.as_str());
            }
        }
        url.to_string()
    }
}
