//! External identity provider definitions.
//!
//! A provider is an external system (GitHub, an enterprise SAML IdP, another
//! CAS server, ...) that authentication can be delegated to. Provider
//! definitions are immutable once loaded; the registry swaps whole catalogs.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use vouch_core::ProviderId;

use crate::error::CatalogError;

/// Placeholder in a redirect endpoint template that receives the correlation value.
pub const STATE_PLACEHOLDER: &str = "{state}";

/// Request parameter that carries the correlation value for every protocol.
pub const CLIENT_ID_PARAM: &str = "delegatedclientid";

/// Query parameter added to provider logout URLs.
pub const POST_LOGOUT_PARAM: &str = "post_logout_redirect_uri";

/// The protocol family spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// OAuth 2.0 authorization code flow.
    OAuth2,
    /// SAML 2.0 web browser SSO.
    Saml2,
    /// OpenID Connect.
    Oidc,
    /// Another CAS server.
    Cas,
}

impl ProtocolKind {
    /// Returns the lowercase protocol name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OAuth2 => "oauth2",
            Self::Saml2 => "saml2",
            Self::Oidc => "oidc",
            Self::Cas => "cas",
        }
    }

    /// Returns the request parameter in which this protocol echoes opaque state.
    #[must_use]
    pub fn correlation_param(&self) -> &'static str {
        match self {
            Self::OAuth2 | Self::Oidc => "state",
            Self::Saml2 => "RelayState",
            Self::Cas => CLIENT_ID_PARAM,
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentityProvider {
    /// Unique provider identifier (also the `client_name` request parameter).
    id: ProviderId,
    /// Human readable name shown on the login page.
    display_name: String,
    /// Protocol family.
    protocol: ProtocolKind,
    /// Provider login endpoint. May contain `{state}`; otherwise the
    /// correlation value is appended as the protocol's state parameter.
    redirect_endpoint_template: String,
    /// Whether the browser may be sent to this provider without a choice.
    #[serde(default)]
    auto_redirect: bool,
    /// Position in the configured order (ascending).
    #[serde(default)]
    order: i32,
    /// Disabled providers are neither listed nor selectable.
    #[serde(default = "default_enabled")]
    enabled: bool,
    /// Front-channel logout endpoint. Presence means the provider must be
    /// notified through the browser when a session it vouched for ends.
    #[serde(default)]
    logout_endpoint: Option<String>,
    /// Endpoint of the protocol collaborator that validates callback proof.
    #[serde(default)]
    exchange_endpoint: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl ExternalIdentityProvider {
    /// Creates a provider with defaults for optional fields.
    #[must_use]
    pub fn new(
        id: impl Into<ProviderId>,
        display_name: impl Into<String>,
        protocol: ProtocolKind,
        redirect_endpoint_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            protocol,
            redirect_endpoint_template: redirect_endpoint_template.into(),
            auto_redirect: false,
            order: 0,
            enabled: default_enabled(),
            logout_endpoint: None,
            exchange_endpoint: None,
        }
    }

    /// Marks the provider as an auto-redirect candidate.
    #[must_use]
    pub fn with_auto_redirect(mut self, auto_redirect: bool) -> Self {
        self.auto_redirect = auto_redirect;
        self
    }

    /// Sets the configured order.
    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Enables or disables the provider.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the front-channel logout endpoint.
    #[must_use]
    pub fn with_logout_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.logout_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the callback exchange endpoint.
    #[must_use]
    pub fn with_exchange_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.exchange_endpoint = Some(endpoint.into());
        self
    }

    /// Returns the provider identifier.
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the protocol family.
    #[must_use]
    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    /// Returns the raw redirect endpoint template.
    #[must_use]
    pub fn redirect_endpoint_template(&self) -> &str {
        &self.redirect_endpoint_template
    }

    /// Returns true if the provider is flagged for auto-redirect.
    #[must_use]
    pub fn auto_redirect(&self) -> bool {
        self.auto_redirect
    }

    /// Returns the configured order.
    #[must_use]
    pub fn order(&self) -> i32 {
        self.order
    }

    /// Returns true if the provider is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the logout endpoint, if any.
    #[must_use]
    pub fn logout_endpoint(&self) -> Option<&str> {
        self.logout_endpoint.as_deref()
    }

    /// Returns true if session termination must be relayed to this provider.
    #[must_use]
    pub fn requires_front_channel_logout(&self) -> bool {
        self.logout_endpoint.is_some()
    }

    /// Returns the exchange endpoint, if any.
    #[must_use]
    pub fn exchange_endpoint(&self) -> Option<&str> {
        self.exchange_endpoint.as_deref()
    }

    /// Short type label used by login views (e.g. `oidc`).
    #[must_use]
    pub fn type_label(&self) -> &'static str {
        self.protocol.as_str()
    }

    /// CSS class for login views: `fa fa-lock` plus the id with non-word characters dashed.
    #[must_use]
    pub fn css_class(&self) -> String {
        let suffix: String = self
            .id
            .as_str()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '-' })
            .collect();
        format!("fa fa-lock {suffix}")
    }

    /// Builds the provider login URL carrying `correlation` as opaque state.
    ///
    /// # Errors
    ///
    /// Returns an error if the template is not a valid URL.
    pub fn redirect_url(&self, correlation: &str) -> Result<String, CatalogError> {
        if self.redirect_endpoint_template.contains(STATE_PLACEHOLDER) {
            return Ok(self
                .redirect_endpoint_template
                .replace(STATE_PLACEHOLDER, correlation));
        }

        let mut url = self.parse_endpoint(&self.redirect_endpoint_template)?;
        url.query_pairs_mut()
            .append_pair(self.protocol.correlation_param(), correlation);
        Ok(url.to_string())
    }

    /// Builds the front-channel logout URL, if the provider has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the logout endpoint is not a valid URL.
    pub fn logout_url(&self, return_to: Option<&str>) -> Result<Option<String>, CatalogError> {
        let Some(endpoint) = self.logout_endpoint.as_deref() else {
            return Ok(None);
        };

        let mut url = self.parse_endpoint(endpoint)?;
        if let Some(return_to) = return_to {
            url.query_pairs_mut().append_pair(POST_LOGOUT_PARAM, return_to);
        }
        Ok(Some(url.to_string()))
    }

    /// Checks that every configured endpoint can be turned into a URL.
    ///
    /// # Errors
    ///
    /// Returns the first invalid endpoint found.
    pub fn validate(&self) -> Result<(), CatalogError> {
        self.redirect_url("validation")?;
        self.logout_url(None)?;
        if let Some(endpoint) = self.exchange_endpoint.as_deref() {
            self.parse_endpoint(endpoint)?;
        }
        Ok(())
    }

    fn parse_endpoint(&self, endpoint: &str) -> Result<Url, CatalogError> {
        Url::parse(endpoint).map_err(|e| CatalogError::InvalidEndpoint {
            provider: self.id.clone(),
            reason: format!("'{endpoint}': {e}"),
        })
    }
}
