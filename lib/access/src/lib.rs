//! Identity provider catalog and access policies for vouch.
//!
//! This crate provides:
//! - External identity provider definitions (`ExternalIdentityProvider`)
//! - The hot-swappable provider registry (`ProviderRegistry`, `CatalogSnapshot`, `ProviderCatalog`)
//! - Per-application access policies (`ServiceAccessPolicy`, `ServiceDirectory`)
//! - The authorization predicate (`AccessPolicyEnforcer`)
//! - Per-request provider lists with auto-redirect selection (`ProviderCatalogResolver`)
//! - The SSO session collaborator seam (`SessionService`, `SsoSession`)
//!
//! # Example
//!
//! ```
//! use vouch_access::{
//!     ExternalIdentityProvider, PolicySet, ProtocolKind, ProviderCatalog,
//!     ProviderCatalogResolver, ProviderRegistry, ServiceAccessPolicy,
//! };
//! use vouch_core::{ProviderId, ServiceId};
//!
//! let catalog = ProviderCatalog::new(vec![
//!     ExternalIdentityProvider::new(
//!         "github",
//!         "GitHub",
//!         ProtocolKind::OAuth2,
//!         "https://github.com/login/oauth/authorize",
//!     ),
//!     ExternalIdentityProvider::new(
//!         "okta",
//!         "Okta",
//!         ProtocolKind::Oidc,
//!         "https://example.okta.com/oauth2/v1/authorize",
//!     ),
//! ])
//! .unwrap();
//!
//! let policies = PolicySet::new(vec![
//!     ServiceAccessPolicy::new("https://app\\.example\\.com/.*")
//!         .allow(["github"])
//!         .exclusive(true),
//! ])
//! .unwrap();
//! let registry = ProviderRegistry::new(catalog, policies);
//!
//! let snapshot = registry.snapshot();
//! let service = ServiceId::new("https://app.example.com/home");
//! let scope = snapshot.scope(Some(&service));
//! let enforcer = snapshot.enforcer();
//!
//! assert!(enforcer.is_authorized(&ProviderId::new("github"), &scope));
//! assert!(!enforcer.is_authorized(&ProviderId::new("okta"), &scope));
//!
//! let resolver = ProviderCatalogResolver::new("https://sso.example.com").unwrap();
//! let resolved = resolver.resolve(&enforcer, &scope, None).unwrap();
//! assert_eq!(resolved.auto_redirect().unwrap().provider, ProviderId::new("github"));
//! ```

pub mod catalog;
pub mod enforcer;
pub mod error;
pub mod policy;
pub mod provider;
pub mod registry;
pub mod session;

// Re-export main types at crate root
pub use catalog::{
    AutoRedirect, AutoRedirectReason, CLIENT_NAME_PARAM, ProviderCatalogResolver, ProviderLink,
    ResolvedCatalog, SERVICE_PARAM,
};
pub use enforcer::{AccessPolicyEnforcer, ServiceScope};
pub use error::{CatalogError, PolicyError, SessionError};
pub use policy::{PolicySet, ServiceAccessPolicy, ServiceDirectory};
pub use provider::{
    CLIENT_ID_PARAM, ExternalIdentityProvider, POST_LOGOUT_PARAM, ProtocolKind, STATE_PLACEHOLDER,
};
pub use registry::{CatalogSnapshot, ProviderCatalog, ProviderRegistry};
pub use session::{InMemorySessionService, SessionService, SsoSession};
