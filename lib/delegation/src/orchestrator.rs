//! The delegation state machine.
//!
//! [`DelegationOrchestrator::decide`] is the single entry point for login
//! requests. It reads collaborators but performs no side effects beyond the
//! correlation store: redirect issuance, session invalidation and credential
//! handoff are left to the caller through the returned [`Decision`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use vouch_access::{
    AccessPolicyEnforcer, CatalogSnapshot, PolicyError, ProviderCatalogResolver,
    ProviderRegistry, ServiceScope, SessionService,
};
use vouch_core::{ProviderId, ServiceId, SessionId};
use vouch_correlation::{CorrelationStore, CorrelationTicket, TicketId, properties};

use crate::client::{ExchangeOutcome, ProviderClient};
use crate::error::{DelegationError, FailureKind};
use crate::outcome::{Decision, DelegationOutcome, DelegationState};
use crate::request::DelegationRequest;

/// Default bound on the credential exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides what to do with each login request.
pub struct DelegationOrchestrator {
    registry: Arc<ProviderRegistry>,
    resolver: ProviderCatalogResolver,
    store: Arc<dyn CorrelationStore>,
    sessions: Arc<dyn SessionService>,
    client: Arc<dyn ProviderClient>,
    exchange_timeout: Duration,
}

impl DelegationOrchestrator {
    /// Creates an orchestrator over its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resolver: ProviderCatalogResolver,
        store: Arc<dyn CorrelationStore>,
        sessions: Arc<dyn SessionService>,
        client: Arc<dyn ProviderClient>,
    ) -> Self {
        Self {
            registry,
            resolver,
            store,
            sessions,
            client,
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    /// Sets the bound on the credential exchange.
    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Decides a login request.
    ///
    /// Every request is evaluated against one snapshot of the providers and
    /// service policies; a concurrent reload affects only later requests.
    #[instrument(
        skip_all,
        fields(
            service = request.service().map(ServiceId::as_str),
            client_name = request.client_name().map(ProviderId::as_str),
        )
    )]
    pub async fn decide(&self, request: &DelegationRequest) -> Decision {
        let snapshot = self.registry.snapshot();
        let mut path = vec![DelegationState::Start];
        let mut stale_session = None;

        let result = if request.is_cancelled() {
            self.cancel(request).await
        } else if request.is_callback() {
            path.push(DelegationState::ValidateCallback);
            self.validate_callback(request, &snapshot).await
        } else {
            self.start(request, &snapshot, &mut path, &mut stale_session)
                .await
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                log_failure(&err);
                DelegationOutcome::Failed(err.into_failure())
            }
        };

        let end = outcome.state();
        if path.last() != Some(&end) {
            path.push(end);
        }

        let decision = Decision {
            outcome,
            stale_session,
            path,
        };
        debug!(path = %decision.path_string(), "delegation decided");
        decision
    }

    async fn cancel(&self, request: &DelegationRequest) -> Result<DelegationOutcome, DelegationError> {
        if let Some(raw) = request.correlation() {
            self.burn(raw).await;
        }
        info!("delegation cancelled by user");
        Ok(DelegationOutcome::Cancelled)
    }

    async fn start(
        &self,
        request: &DelegationRequest,
        snapshot: &CatalogSnapshot,
        path: &mut Vec<DelegationState>,
        stale_session: &mut Option<SessionId>,
    ) -> Result<DelegationOutcome, DelegationError> {
        let enforcer = snapshot.enforcer();
        let scope = snapshot.scope(request.service());
        let force_authn =
            request.renew() || scope.policy().is_some_and(|policy| policy.forces_authn());

        if let Some(id) = request.session().filter(|_| !force_authn) {
            let session = self.sessions.get(&id).await.map_err(|e| {
                DelegationError::Transport {
                    reason: e.to_string(),
                }
            })?;

            match session {
                Some(session) if session.is_valid() => {
                    let authorized = enforcer
                        .check_session(session.originating_provider(), &scope)
                        .map_err(configuration)?;
                    if authorized {
                        path.push(DelegationState::ResumeSession);
                        info!(session = %id, "reusing existing session");
                        return Ok(DelegationOutcome::Resumed(session));
                    }
                    warn!(
                        session = %id,
                        provider = session.originating_provider().map(ProviderId::as_str),
                        "session no longer authorized for service; it must be invalidated"
                    );
                    *stale_session = Some(id);
                }
                Some(_) => {
                    debug!(session = %id, "session expired");
                    *stale_session = Some(id);
                }
                None => {}
            }
        }

        path.push(DelegationState::SelectProvider);
        self.select_provider(request, &enforcer, &scope, force_authn)
            .await
    }

    async fn select_provider(
        &self,
        request: &DelegationRequest,
        enforcer: &AccessPolicyEnforcer,
        scope: &ServiceScope,
        force_authn: bool,
    ) -> Result<DelegationOutcome, DelegationError> {
        let resolved = self
            .resolver
            .resolve(enforcer, scope, request.remembered_provider())
            .map_err(configuration)?;

        if resolved.is_empty() {
            return Err(DelegationError::NoProvider {
                service: scope.service().cloned(),
            });
        }

        let chosen = match request.client_name() {
            Some(selected) if resolved.contains(selected) => selected.clone(),
            Some(selected) => {
                return Err(DelegationError::PolicyDenied {
                    provider: Some(selected.clone()),
                    service: scope.service().cloned(),
                });
            }
            None => match resolved.auto_redirect() {
                Some(auto) => {
                    debug!(provider = %auto.provider, reason = %auto.reason, "auto-redirect");
                    auto.provider.clone()
                }
                None => return Ok(DelegationOutcome::SelectionRequired(resolved)),
            },
        };

        let provider =
            enforcer
                .catalog()
                .find_by_id(&chosen)
                .ok_or_else(|| DelegationError::Configuration {
                    reason: format!("authorized provider '{chosen}' missing from catalog"),
                })?;

        let mut props = request.context_properties();
        if force_authn {
            props.insert(properties::FORCE_AUTHN.to_string(), "true".to_string());
        }
        if scope.policy().is_some_and(|policy| policy.is_passive()) {
            props.insert(properties::PASSIVE.to_string(), "true".to_string());
        }

        let ticket = self
            .store
            .create(scope.service().cloned(), chosen.clone(), props)
            .await
            .map_err(|e| DelegationError::Transport {
                reason: e.to_string(),
            })?;

        let url = provider
            .redirect_url(ticket.id().as_str())
            .map_err(|e| DelegationError::Configuration {
                reason: e.to_string(),
            })?;

        info!(provider = %chosen, ticket = ticket.id().short(), "redirecting to provider");
        Ok(DelegationOutcome::Redirect {
            provider: chosen,
            ticket,
            url,
        })
    }

    async fn validate_callback(
        &self,
        request: &DelegationRequest,
        snapshot: &CatalogSnapshot,
    ) -> Result<DelegationOutcome, DelegationError> {
        if let Some(payload) = request.error() {
            let burned = match request.correlation() {
                Some(raw) => self.burn(raw).await,
                None => None,
            };
            let provider = request
                .client_name()
                .cloned()
                .or_else(|| burned.map(|ticket| ticket.provider_id().clone()));
            return Err(DelegationError::Provider {
                provider,
                payload: payload.clone(),
            });
        }

        let raw = request
            .correlation()
            .ok_or_else(|| correlation("callback carries no correlation state"))?;
        let id = TicketId::parse(raw).ok_or_else(|| correlation("malformed correlation state"))?;
        let ticket = self
            .store
            .consume_once(&id)
            .await
            .map_err(|e| DelegationError::Transport {
                reason: e.to_string(),
            })?
            .ok_or_else(|| correlation("ticket unknown, expired or already consumed"))?;

        if let Some(returning) = request
            .client_name()
            .filter(|name| *name != ticket.provider_id())
        {
            return Err(correlation(&format!(
                "ticket issued for '{}' but callback names '{returning}'",
                ticket.provider_id()
            )));
        }
        if request.service().is_some() && request.service() != ticket.service_id() {
            debug!("ignoring service parameter on callback in favour of the ticket");
        }

        let service = ticket.service_id().cloned();
        let provider_id = ticket.provider_id().clone();
        let provider = snapshot.providers().find_by_id(&provider_id).ok_or_else(|| {
            DelegationError::PolicyDenied {
                provider: Some(provider_id.clone()),
                service: service.clone(),
            }
        })?;

        let exchange = tokio::time::timeout(
            self.exchange_timeout,
            self.client.exchange_callback(provider, request.params()),
        )
        .await;
        let credential = match exchange {
            Err(_) => {
                return Err(DelegationError::ProviderTimeout {
                    provider: provider_id,
                });
            }
            Ok(Err(report)) => {
                return Err(DelegationError::Transport {
                    reason: report.to_string(),
                });
            }
            Ok(Ok(ExchangeOutcome::Rejected(payload))) => {
                return Err(DelegationError::Provider {
                    provider: Some(provider_id),
                    payload,
                });
            }
            Ok(Ok(ExchangeOutcome::Credential(credential))) => credential,
        };

        if credential.provider() != &provider_id {
            return Err(correlation(&format!(
                "credential from '{}' returned for ticket issued to '{provider_id}'",
                credential.provider()
            )));
        }

        let scope = snapshot.scope(service.as_ref());
        if !snapshot.enforcer().check(&provider_id, &scope).map_err(configuration)? {
            return Err(DelegationError::PolicyDenied {
                provider: Some(provider_id),
                service,
            });
        }

        info!(provider = %provider_id, principal = credential.principal(), "delegated authentication succeeded");
        Ok(DelegationOutcome::Authenticated {
            credential,
            service,
            properties: ticket.properties().clone(),
        })
    }

    /// Consumes a ticket so it can never be used, returning it if it was live.
    async fn burn(&self, raw: &str) -> Option<CorrelationTicket> {
        let id = TicketId::parse(raw)?;
        match self.store.consume_once(&id).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(error = %e, ticket = id.short(), "failed to burn correlation ticket");
                None
            }
        }
    }
}

fn configuration(err: PolicyError) -> DelegationError {
    DelegationError::Configuration {
        reason: err.to_string(),
    }
}

fn correlation(reason: &str) -> DelegationError {
    DelegationError::Correlation {
        reason: reason.to_string(),
    }
}

fn log_failure(err: &DelegationError) {
    match err.kind() {
        FailureKind::ConfigurationError | FailureKind::TransportError | FailureKind::ProviderTimeout => {
            error!(kind = %err.kind(), error = %err, "delegation failed");
        }
        _ => warn!(kind = %err.kind(), error = %err, "delegation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DelegatedCredential, ExchangeError};
    use crate::request::ProviderErrorPayload;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use rootcause::prelude::Report;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vouch_access::{
        ExternalIdentityProvider, InMemorySessionService, PolicySet, ProtocolKind,
        ProviderCatalog, ServiceAccessPolicy, SsoSession,
    };
    use vouch_correlation::{DEFAULT_TTL, InMemoryCorrelationStore};

    const S1: &str = "https://s1.example.com/app";

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Reject,
        Hang,
        Fail,
    }

    /// Protocol client double that records how often it was called.
    struct FakeClient {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeClient {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderClient for FakeClient {
        async fn exchange_callback(
            &self,
            provider: &ExternalIdentityProvider,
            _params: &BTreeMap<String, String>,
        ) -> Result<ExchangeOutcome, Report<ExchangeError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(ExchangeOutcome::Credential(DelegatedCredential::new(
                    provider.id().clone(),
                    "octocat",
                ))),
                Behavior::Reject => Ok(ExchangeOutcome::Rejected(ProviderErrorPayload::error(
                    "invalid_grant",
                ))),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ExchangeOutcome::Rejected(ProviderErrorPayload::default()))
                }
                Behavior::Fail => Err(ExchangeError::Unreachable {
                    provider: provider.id().clone(),
                    reason: "connection refused".to_string(),
                }
                .into()),
            }
        }
    }

    struct Harness {
        orchestrator: DelegationOrchestrator,
        client: Arc<FakeClient>,
        sessions: InMemorySessionService,
        registry: Arc<ProviderRegistry>,
    }

    fn provider(id: &str, order: i32) -> ExternalIdentityProvider {
        ExternalIdentityProvider::new(
            id,
            id,
            ProtocolKind::OAuth2,
            format!("https://{id}.example.com/authorize"),
        )
        .with_order(order)
    }

    fn harness(policies: Vec<ServiceAccessPolicy>, behavior: Behavior) -> Harness {
        let registry = Arc::new(ProviderRegistry::new(
            ProviderCatalog::new(vec![provider("github", 1), provider("okta", 2)])
                .expect("valid catalog"),
            PolicySet::new(policies).expect("valid policies"),
        ));
        let client = Arc::new(FakeClient::new(behavior));
        let sessions = InMemorySessionService::new();
        let orchestrator = DelegationOrchestrator::new(
            registry.clone(),
            ProviderCatalogResolver::new("https://sso.example.com").expect("valid url"),
            Arc::new(InMemoryCorrelationStore::new(DEFAULT_TTL).expect("valid ttl")),
            Arc::new(sessions.clone()),
            client.clone(),
        )
        .with_exchange_timeout(Duration::from_millis(50));

        Harness {
            orchestrator,
            client,
            sessions,
            registry,
        }
    }

    fn exclusive_github() -> Vec<ServiceAccessPolicy> {
        vec![
            ServiceAccessPolicy::new("https://s1\\.example\\.com/.*")
                .allow(["github"])
                .exclusive(true),
        ]
    }

    fn open_policy() -> Vec<ServiceAccessPolicy> {
        vec![ServiceAccessPolicy::new(".*")]
    }

    fn login(params: &[(&str, &str)]) -> DelegationRequest {
        DelegationRequest::from_params(params.iter().copied())
    }

    fn expect_redirect(decision: &Decision) -> (ProviderId, CorrelationTicket, String) {
        match &decision.outcome {
            DelegationOutcome::Redirect {
                provider,
                ticket,
                url,
            } => (provider.clone(), ticket.clone(), url.clone()),
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    fn expect_failure(decision: &Decision) -> FailureKind {
        decision
            .outcome
            .failure()
            .map(|f| f.kind())
            .unwrap_or_else(|| panic!("expected failure, got {:?}", decision.outcome))
    }

    #[tokio::test]
    async fn scenario_a_exclusive_policy_redirects_then_authenticates() {
        let h = harness(exclusive_github(), Behavior::Succeed);

        let decision = h.orchestrator.decide(&login(&[("service", S1)])).await;
        assert_eq!(
            decision.path,
            vec![
                DelegationState::Start,
                DelegationState::SelectProvider,
                DelegationState::AwaitRedirect
            ]
        );
        let (provider, ticket, url) = expect_redirect(&decision);
        assert_eq!(provider, ProviderId::new("github"));
        assert_eq!(ticket.service_id(), Some(&ServiceId::new(S1)));
        assert_eq!(ticket.provider_id(), &ProviderId::new("github"));
        assert!(url.starts_with("https://github.example.com/authorize?state="));
        assert!(url.ends_with(ticket.id().as_str()));

        let callback = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str()), ("code", "abc")]))
            .await;
        match &callback.outcome {
            DelegationOutcome::Authenticated {
                credential,
                service,
                ..
            } => {
                assert_eq!(credential.provider(), &ProviderId::new("github"));
                assert_eq!(service.as_ref(), Some(&ServiceId::new(S1)));
            }
            other => panic!("expected authenticated, got {other:?}"),
        }
        assert_eq!(
            callback.path,
            vec![
                DelegationState::Start,
                DelegationState::ValidateCallback,
                DelegationState::Authenticated
            ]
        );
    }

    #[tokio::test]
    async fn scenario_b_replayed_ticket_is_rejected() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let (_, ticket, _) = expect_redirect(&h.orchestrator.decide(&login(&[("service", S1)])).await);
        let callback = login(&[("state", ticket.id().as_str()), ("code", "abc")]);

        let first = h.orchestrator.decide(&callback).await;
        assert!(matches!(first.outcome, DelegationOutcome::Authenticated { .. }));

        let replay = h.orchestrator.decide(&callback).await;
        assert_eq!(expect_failure(&replay), FailureKind::InvalidCorrelation);
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn scenario_c_provider_error_is_escaped() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let decision = h
            .orchestrator
            .decide(&login(&[
                ("error", "access_denied"),
                ("error_description", "<script>alert(1)</script>"),
                ("client_name", "github"),
            ]))
            .await;

        let failure = decision.outcome.failure().expect("failure");
        assert_eq!(failure.kind(), FailureKind::ProviderError);
        assert_eq!(failure.view().code, "401");
        assert_eq!(failure.view().error, "access_denied");
        assert_eq!(
            failure.view().description.as_deref(),
            Some("&lt;script&gt;alert(1)&lt;/script&gt;")
        );
        assert_eq!(failure.view().provider_name.as_deref(), Some("github"));
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn provider_error_burns_presented_ticket() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let (_, ticket, _) = expect_redirect(&h.orchestrator.decide(&login(&[("service", S1)])).await);

        let error = h
            .orchestrator
            .decide(&login(&[
                ("error", "access_denied"),
                ("state", ticket.id().as_str()),
            ]))
            .await;
        let failure = error.outcome.failure().expect("failure");
        assert_eq!(failure.view().provider_name.as_deref(), Some("github"));

        let retry = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str()), ("code", "abc")]))
            .await;
        assert_eq!(expect_failure(&retry), FailureKind::InvalidCorrelation);
    }

    #[tokio::test]
    async fn unknown_correlation_never_invokes_provider() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let unknown = TicketId::generate().expect("entropy");

        let decision = h
            .orchestrator
            .decide(&login(&[("state", unknown.as_str()), ("code", "abc")]))
            .await;
        assert_eq!(expect_failure(&decision), FailureKind::InvalidCorrelation);

        let malformed = h
            .orchestrator
            .decide(&login(&[("RelayState", "not-a-ticket"), ("SAMLResponse", "x")]))
            .await;
        assert_eq!(expect_failure(&malformed), FailureKind::InvalidCorrelation);
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn callback_service_parameter_is_ignored() {
        let h = harness(
            vec![
                ServiceAccessPolicy::new("https://s1\\.example\\.com/.*"),
                ServiceAccessPolicy::new("https://evil\\.example\\.com/.*"),
            ],
            Behavior::Succeed,
        );
        let (_, ticket, _) = expect_redirect(
            &h.orchestrator
                .decide(&login(&[("service", S1), ("client_name", "okta")]))
                .await,
        );

        let decision = h
            .orchestrator
            .decide(&login(&[
                ("state", ticket.id().as_str()),
                ("service", "https://evil.example.com/steal"),
            ]))
            .await;
        match decision.outcome {
            DelegationOutcome::Authenticated { service, .. } => {
                assert_eq!(service, Some(ServiceId::new(S1)));
            }
            other => panic!("expected authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_client_name_fails_and_burns_ticket() {
        let h = harness(open_policy(), Behavior::Succeed);
        let (_, ticket, _) = expect_redirect(
            &h.orchestrator
                .decide(&login(&[("service", S1), ("client_name", "github")]))
                .await,
        );

        let mismatch = h
            .orchestrator
            .decide(&login(&[
                ("delegatedclientid", ticket.id().as_str()),
                ("client_name", "okta"),
            ]))
            .await;
        assert_eq!(expect_failure(&mismatch), FailureKind::InvalidCorrelation);

        let retry = h
            .orchestrator
            .decide(&login(&[
                ("delegatedclientid", ticket.id().as_str()),
                ("client_name", "github"),
            ]))
            .await;
        assert_eq!(expect_failure(&retry), FailureKind::InvalidCorrelation);
        assert_eq!(h.client.calls(), 0);
    }

    #[tokio::test]
    async fn authorized_session_is_resumed() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let session = SsoSession::new(
            SessionId::new(),
            "alice",
            Some(ProviderId::new("github")),
            ChronoDuration::hours(1),
        );
        h.sessions.insert(session.clone());

        let decision = h
            .orchestrator
            .decide(&login(&[("service", S1)]).with_session(Some(session.id())))
            .await;
        assert!(matches!(decision.outcome, DelegationOutcome::Resumed(ref s) if s.id() == session.id()));
        assert_eq!(
            decision.path,
            vec![
                DelegationState::Start,
                DelegationState::ResumeSession,
                DelegationState::Authenticated
            ]
        );
        assert!(decision.stale_session.is_none());
    }

    #[tokio::test]
    async fn session_from_revoked_provider_is_stale() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let session = SsoSession::new(
            SessionId::new(),
            "bob",
            Some(ProviderId::new("okta")),
            ChronoDuration::hours(1),
        );
        h.sessions.insert(session.clone());

        let decision = h
            .orchestrator
            .decide(&login(&[("service", S1)]).with_session(Some(session.id())))
            .await;

        assert_eq!(decision.stale_session, Some(session.id()));
        assert!(!matches!(
            decision.outcome,
            DelegationOutcome::Resumed(_) | DelegationOutcome::Authenticated { .. }
        ));
        assert!(!decision.path.contains(&DelegationState::ResumeSession));
        let (provider, _, _) = expect_redirect(&decision);
        assert_eq!(provider, ProviderId::new("github"));
        // The orchestrator leaves invalidation to the caller.
        assert!(h.sessions.contains(&session.id()));
    }

    #[tokio::test]
    async fn renew_skips_session_reuse() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let session = SsoSession::new(
            SessionId::new(),
            "alice",
            Some(ProviderId::new("github")),
            ChronoDuration::hours(1),
        );
        h.sessions.insert(session.clone());

        let decision = h
            .orchestrator
            .decide(&login(&[("service", S1), ("renew", "true")]).with_session(Some(session.id())))
            .await;
        let (_, ticket, _) = expect_redirect(&decision);
        assert_eq!(
            ticket.properties().get(properties::FORCE_AUTHN).map(String::as_str),
            Some("true")
        );
        assert!(decision.stale_session.is_none());
    }

    #[tokio::test]
    async fn request_context_survives_round_trip() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let (_, ticket, _) = expect_redirect(
            &h.orchestrator
                .decide(&login(&[("service", S1), ("theme", "dark"), ("locale", "fr")]))
                .await,
        );

        let decision = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str())]))
            .await;
        match decision.outcome {
            DelegationOutcome::Authenticated { properties, .. } => {
                assert_eq!(properties.get("theme").map(String::as_str), Some("dark"));
                assert_eq!(properties.get("locale").map(String::as_str), Some("fr"));
            }
            other => panic!("expected authenticated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn several_providers_require_selection() {
        let h = harness(open_policy(), Behavior::Succeed);
        let decision = h.orchestrator.decide(&login(&[("service", S1)])).await;
        match &decision.outcome {
            DelegationOutcome::SelectionRequired(catalog) => {
                assert_eq!(
                    catalog.provider_ids(),
                    vec![ProviderId::new("github"), ProviderId::new("okta")]
                );
            }
            other => panic!("expected selection, got {other:?}"),
        }
        assert_eq!(
            decision.path,
            vec![DelegationState::Start, DelegationState::SelectProvider]
        );
    }

    #[tokio::test]
    async fn unauthorized_selection_is_denied() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let decision = h
            .orchestrator
            .decide(&login(&[("service", S1), ("client_name", "okta")]))
            .await;
        assert_eq!(expect_failure(&decision), FailureKind::PolicyDenied);

        let unknown = h
            .orchestrator
            .decide(&login(&[("service", S1), ("client_name", "nobody")]))
            .await;
        assert_eq!(expect_failure(&unknown), FailureKind::PolicyDenied);
    }

    #[tokio::test]
    async fn unregistered_or_disabled_service_has_no_provider() {
        let h = harness(
            vec![ServiceAccessPolicy::new("https://s1\\.example\\.com/.*").access_enabled(false)],
            Behavior::Succeed,
        );

        let disabled = h.orchestrator.decide(&login(&[("service", S1)])).await;
        assert_eq!(expect_failure(&disabled), FailureKind::NoProvider);

        let unregistered = h
            .orchestrator
            .decide(&login(&[("service", "https://other.example.com/")]))
            .await;
        assert_eq!(expect_failure(&unregistered), FailureKind::NoProvider);
    }

    #[tokio::test]
    async fn policy_naming_unknown_provider_is_configuration_error() {
        let h = harness(
            vec![ServiceAccessPolicy::new(".*").allow(["gitlab"])],
            Behavior::Succeed,
        );
        let decision = h.orchestrator.decide(&login(&[("service", S1)])).await;
        assert_eq!(expect_failure(&decision), FailureKind::ConfigurationError);
    }

    #[tokio::test]
    async fn authorization_is_rechecked_after_exchange() {
        let h = harness(open_policy(), Behavior::Succeed);
        let (_, ticket, _) = expect_redirect(
            &h.orchestrator
                .decide(&login(&[("service", S1), ("client_name", "okta")]))
                .await,
        );

        h.registry.replace(
            ProviderCatalog::new(vec![provider("github", 1), provider("okta", 2)])
                .expect("valid catalog"),
            PolicySet::new(vec![ServiceAccessPolicy::new(".*").allow(["github"])])
                .expect("valid"),
        );

        let decision = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str())]))
            .await;
        assert_eq!(expect_failure(&decision), FailureKind::PolicyDenied);
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn reload_adding_provider_and_narrowing_policy_never_admits_it() {
        let h = harness(open_policy(), Behavior::Succeed);
        let partner = login(&[("service", "https://s1.example.com/"), ("client_name", "partner")]);

        let before = h.orchestrator.decide(&partner).await;
        assert_eq!(expect_failure(&before), FailureKind::PolicyDenied);

        h.registry.replace(
            ProviderCatalog::new(vec![
                provider("github", 1),
                provider("okta", 2),
                provider("partner", 3),
            ])
            .expect("valid catalog"),
            PolicySet::new(vec![ServiceAccessPolicy::new(".*").allow(["github"])])
                .expect("valid"),
        );

        let after = h.orchestrator.decide(&partner).await;
        assert_eq!(expect_failure(&after), FailureKind::PolicyDenied);
        assert_eq!(h.client.calls(), 0);

        let github = h
            .orchestrator
            .decide(&login(&[("service", "https://s1.example.com/"), ("client_name", "github")]))
            .await;
        let (provider, _, _) = expect_redirect(&github);
        assert_eq!(provider, ProviderId::new("github"));
    }

    #[tokio::test]
    async fn slow_exchange_times_out_without_retry() {
        let h = harness(exclusive_github(), Behavior::Hang);
        let (_, ticket, _) = expect_redirect(&h.orchestrator.decide(&login(&[("service", S1)])).await);

        let decision = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str())]))
            .await;
        assert_eq!(expect_failure(&decision), FailureKind::ProviderTimeout);
        assert_eq!(h.client.calls(), 1);
    }

    #[tokio::test]
    async fn unreachable_collaborator_is_transport_error() {
        let h = harness(exclusive_github(), Behavior::Fail);
        let (_, ticket, _) = expect_redirect(&h.orchestrator.decide(&login(&[("service", S1)])).await);

        let decision = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str())]))
            .await;
        let failure = decision.outcome.failure().expect("failure");
        assert_eq!(failure.kind(), FailureKind::TransportError);
        assert!(!failure.view().reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn rejected_proof_is_provider_error() {
        let h = harness(exclusive_github(), Behavior::Reject);
        let (_, ticket, _) = expect_redirect(&h.orchestrator.decide(&login(&[("service", S1)])).await);

        let decision = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str())]))
            .await;
        let failure = decision.outcome.failure().expect("failure");
        assert_eq!(failure.kind(), FailureKind::ProviderError);
        assert_eq!(failure.view().error, "invalid_grant");
    }

    #[tokio::test]
    async fn cancel_stops_and_burns_ticket() {
        let h = harness(exclusive_github(), Behavior::Succeed);
        let (_, ticket, _) = expect_redirect(&h.orchestrator.decide(&login(&[("service", S1)])).await);

        let cancelled = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str()), ("cancel", "true")]))
            .await;
        assert!(matches!(cancelled.outcome, DelegationOutcome::Cancelled));
        assert_eq!(
            cancelled.path,
            vec![DelegationState::Start, DelegationState::Stopped]
        );

        let late = h
            .orchestrator
            .decide(&login(&[("state", ticket.id().as_str())]))
            .await;
        assert_eq!(expect_failure(&late), FailureKind::InvalidCorrelation);
        assert_eq!(h.client.calls(), 0);
    }
}
