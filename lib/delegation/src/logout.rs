//! Provider-side logout coordination.
//!
//! Ending a session that an external provider vouched for may require
//! telling that provider through the browser. The coordinator works out
//! whether that round trip is needed and never lets provider trouble block
//! the user's local logout.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use vouch_access::{ProviderRegistry, SessionService, SsoSession};
use vouch_core::{ProviderId, SessionId};

/// How a logout completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Send the browser to the provider's logout endpoint.
    FrontChannel {
        provider: ProviderId,
        redirect_url: String,
    },
    /// Only the local session is ended.
    LocalOnly { warning: Option<String> },
}

impl LogoutOutcome {
    fn local() -> Self {
        Self::LocalOnly { warning: None }
    }

    fn degraded(warning: String) -> Self {
        warn!(%warning, "falling back to local-only logout");
        Self::LocalOnly {
            warning: Some(warning),
        }
    }
}

/// Decides and prepares provider logout notifications.
pub struct LogoutCoordinator {
    registry: Arc<ProviderRegistry>,
    sessions: Arc<dyn SessionService>,
    post_logout_redirect: Option<String>,
}

impl LogoutCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, sessions: Arc<dyn SessionService>) -> Self {
        Self {
            registry,
            sessions,
            post_logout_redirect: None,
        }
    }

    /// Sets where providers should send the browser after their logout.
    #[must_use]
    pub fn with_post_logout_redirect(mut self, url: impl Into<String>) -> Self {
        self.post_logout_redirect = Some(url.into());
        self
    }

    /// Ends the session with `id`, if it exists.
    pub async fn terminate(&self, id: &SessionId) -> LogoutOutcome {
        match self.sessions.get(id).await {
            Ok(Some(session)) => self.on_session_terminated(&session).await,
            Ok(None) => LogoutOutcome::local(),
            Err(e) => {
                error!(error = %e, session = %id, "failed to load session for logout");
                self.invalidate(id).await;
                LogoutOutcome::local()
            }
        }
    }

    /// Ends `session` locally and works out any provider notification.
    #[instrument(skip_all, fields(session = %session.id()))]
    pub async fn on_session_terminated(&self, session: &SsoSession) -> LogoutOutcome {
        let outcome = self.provider_logout(session);
        self.invalidate(&session.id()).await;
        outcome
    }

    fn provider_logout(&self, session: &SsoSession) -> LogoutOutcome {
        let Some(provider_id) = session.originating_provider() else {
            return LogoutOutcome::local();
        };

        let snapshot = self.registry.snapshot();
        let Some(provider) = snapshot.providers().find_by_id(provider_id) else {
            return LogoutOutcome::degraded(format!(
                "provider '{provider_id}' is no longer configured"
            ));
        };
        if !provider.requires_front_channel_logout() {
            return LogoutOutcome::local();
        }

        match provider.logout_url(self.post_logout_redirect.as_deref()) {
            Ok(Some(redirect_url)) => {
                info!(provider = %provider_id, "front-channel logout required");
                LogoutOutcome::FrontChannel {
                    provider: provider_id.clone(),
                    redirect_url,
                }
            }
            Ok(None) => LogoutOutcome::local(),
            Err(e) => LogoutOutcome::degraded(e.to_string()),
        }
    }

    async fn invalidate(&self, id: &SessionId) {
        if let Err(e) = self.sessions.invalidate(id).await {
            error!(error = %e, session = %id, "failed to invalidate session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use rootcause::prelude::Report;
    use vouch_access::{
        ExternalIdentityProvider, InMemorySessionService, PolicySet, ProtocolKind,
        ProviderCatalog, SessionError,
    };

    fn registry() -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::new(
            ProviderCatalog::new(vec![
                ExternalIdentityProvider::new(
                    "okta",
                    "Okta",
                    ProtocolKind::Oidc,
                    "https://okta.example.com/authorize",
                )
                .with_logout_endpoint("https://okta.example.com/logout"),
                ExternalIdentityProvider::new(
                    "github",
                    "GitHub",
                    ProtocolKind::OAuth2,
                    "https://github.com/login/oauth/authorize",
                ),
            ])
            .expect("valid catalog"),
            PolicySet::default(),
        ))
    }

    fn session(provider: Option<&str>) -> SsoSession {
        SsoSession::new(
            SessionId::new(),
            "alice",
            provider.map(ProviderId::new),
            Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn front_channel_provider_gets_redirect() {
        let sessions = InMemorySessionService::new();
        let session = session(Some("okta"));
        sessions.insert(session.clone());
        let coordinator = LogoutCoordinator::new(registry(), Arc::new(sessions.clone()))
            .with_post_logout_redirect("https://sso.example.com/logged-out");

        let outcome = coordinator.terminate(&session.id()).await;
        assert_eq!(
            outcome,
            LogoutOutcome::FrontChannel {
                provider: ProviderId::new("okta"),
                redirect_url: "https://okta.example.com/logout?post_logout_redirect_uri=https%3A%2F%2Fsso.example.com%2Flogged-out".to_string(),
            }
        );
        assert!(!sessions.contains(&session.id()));
    }

    #[tokio::test]
    async fn provider_without_logout_endpoint_is_local_only() {
        let sessions = InMemorySessionService::new();
        let coordinator = LogoutCoordinator::new(registry(), Arc::new(sessions));
        let outcome = coordinator
            .on_session_terminated(&session(Some("github")))
            .await;
        assert_eq!(outcome, LogoutOutcome::LocalOnly { warning: None });
    }

    #[tokio::test]
    async fn vanished_provider_degrades_with_warning() {
        let sessions = InMemorySessionService::new();
        let session = session(Some("retired"));
        sessions.insert(session.clone());
        let coordinator = LogoutCoordinator::new(registry(), Arc::new(sessions.clone()));

        let outcome = coordinator.on_session_terminated(&session).await;
        match outcome {
            LogoutOutcome::LocalOnly { warning: Some(w) } => assert!(w.contains("retired")),
            other => panic!("expected degraded logout, got {other:?}"),
        }
        assert!(!sessions.contains(&session.id()));
    }

    #[tokio::test]
    async fn local_session_is_local_only() {
        let coordinator =
            LogoutCoordinator::new(registry(), Arc::new(InMemorySessionService::new()));
        let outcome = coordinator.on_session_terminated(&session(None)).await;
        assert_eq!(outcome, LogoutOutcome::LocalOnly { warning: None });
    }

    struct BrokenSessions;

    #[async_trait]
    impl SessionService for BrokenSessions {
        async fn get(&self, _id: &SessionId) -> Result<Option<SsoSession>, Report<SessionError>> {
            Err(SessionError::StoreUnavailable {
                reason: "down".to_string(),
            }
            .into())
        }

        async fn invalidate(&self, _id: &SessionId) -> Result<(), Report<SessionError>> {
            Err(SessionError::StoreUnavailable {
                reason: "down".to_string(),
            }
            .into())
        }
    }

    #[tokio::test]
    async fn session_store_failure_never_blocks_logout() {
        let coordinator = LogoutCoordinator::new(registry(), Arc::new(BrokenSessions));

        let by_id = coordinator.terminate(&SessionId::new()).await;
        assert_eq!(by_id, LogoutOutcome::LocalOnly { warning: None });

        let outcome = coordinator.on_session_terminated(&session(Some("okta"))).await;
        assert!(matches!(outcome, LogoutOutcome::FrontChannel { .. }));
    }
}
