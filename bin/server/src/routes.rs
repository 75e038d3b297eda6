//! Login, logout and provider catalog routes.

use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use time::Duration as TimeDuration;
use tower_http::trace::TraceLayer;
use vouch_access::SsoSession;
use vouch_core::{ProviderId, ServiceId, SessionId};
use vouch_delegation::{
    DelegatedCredential, DelegationOutcome, DelegationRequest, LogoutOutcome,
};

use crate::error::{ApiError, FailureResponse};
use crate::state::AppState;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "session";

/// Remembered provider cookie name.
pub const REMEMBERED_PROVIDER_COOKIE: &str = "delegated_client";

/// How long the remembered provider cookie lives.
const REMEMBERED_PROVIDER_DAYS: i64 = 30;

/// Builds the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", get(login).post(login_form))
        .route("/logout", get(logout))
        .route("/providers", get(providers))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handles fresh logins, provider selections and callbacks sent as query parameters.
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    handle_login(&state, jar, params).await
}

/// Handles callbacks posted as forms (SAML `RelayState`).
pub async fn login_form(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let mut params = query;
    params.extend(form);
    handle_login(&state, jar, params).await
}

async fn handle_login(
    state: &AppState,
    jar: CookieJar,
    params: HashMap<String, String>,
) -> Response {
    let session = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| SessionId::from_str(cookie.value()).ok());
    let remembered = jar
        .get(REMEMBERED_PROVIDER_COOKIE)
        .map(|cookie| ProviderId::new(cookie.value()));

    let request = DelegationRequest::from_params(params)
        .with_session(session)
        .with_remembered_provider(remembered);
    let decision = state.orchestrator.decide(&request).await;

    let mut jar = jar;
    if let Some(stale) = decision.stale_session {
        if let Err(e) = state.sessions.invalidate(&stale).await {
            tracing::warn!(error = %e, session = %stale, "failed to invalidate stale session");
        }
        jar = jar.add(expired_cookie(SESSION_COOKIE));
    }

    match decision.outcome {
        DelegationOutcome::Resumed(session) => match resumed(request.service(), &session) {
            Ok(redirect) => (jar, redirect).into_response(),
            Err(view) => (jar, Json(view)).into_response(),
        },
        DelegationOutcome::Authenticated {
            credential,
            service,
            properties,
        } => match authenticated(state, jar, credential, service, properties).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        },
        DelegationOutcome::Redirect { provider, url, .. } => {
            if state.delegation_config.remember_provider {
                jar = jar.add(
                    Cookie::build((REMEMBERED_PROVIDER_COOKIE, provider.as_str().to_string()))
                        .path("/")
                        .http_only(true)
                        .secure(state.session_config.secure_cookies)
                        .same_site(SameSite::Lax)
                        .max_age(TimeDuration::days(REMEMBERED_PROVIDER_DAYS)),
                );
            }
            (jar, Redirect::to(&url)).into_response()
        }
        DelegationOutcome::SelectionRequired(catalog) => (jar, Json(catalog)).into_response(),
        DelegationOutcome::Failed(failure) => (jar, FailureResponse(failure)).into_response(),
        DelegationOutcome::Cancelled => (
            jar,
            Json(StatusView {
                status: "cancelled",
                warning: None,
            }),
        )
            .into_response(),
    }
}

/// Redirects a resumed session back to its service, or describes it.
fn resumed(service: Option<&ServiceId>, session: &SsoSession) -> Result<Redirect, LoginView> {
    match service {
        Some(service) => Ok(Redirect::to(service.as_str())),
        None => Err(LoginView {
            status: "authenticated",
            principal: session.principal().to_string(),
            provider: session.originating_provider().cloned(),
            attributes: BTreeMap::new(),
            properties: BTreeMap::new(),
        }),
    }
}

/// Establishes a session for a delegated credential.
async fn authenticated(
    state: &AppState,
    jar: CookieJar,
    credential: DelegatedCredential,
    service: Option<ServiceId>,
    properties: BTreeMap<String, String>,
) -> Result<Response, ApiError> {
    let duration = state.session_config.duration_minutes;
    let session = SsoSession::new(
        SessionId::new(),
        credential.principal(),
        Some(credential.provider().clone()),
        ChronoDuration::minutes(duration),
    );
    state
        .sessions
        .create(&session)
        .await
        .map_err(|e| ApiError::Session(e.to_string()))?;

    tracing::info!(
        principal = %session.principal(),
        provider = %credential.provider(),
        session = %session.id(),
        "delegated authentication succeeded"
    );

    let session_cookie = Cookie::build((SESSION_COOKIE, session.id().to_string()))
        .path("/")
        .http_only(true)
        .secure(state.session_config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(TimeDuration::minutes(duration));
    let jar = jar.add(session_cookie);

    Ok(match service {
        Some(service) => (jar, Redirect::to(service.as_str())).into_response(),
        None => (
            jar,
            Json(LoginView {
                status: "authenticated",
                principal: credential.principal().to_string(),
                provider: Some(credential.provider().clone()),
                attributes: credential.attributes().clone(),
                properties,
            }),
        )
            .into_response(),
    })
}

/// Logs out the current session.
pub async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| SessionId::from_str(cookie.value()).ok());

    let outcome = match session {
        Some(id) => state.logout.terminate(&id).await,
        None => LogoutOutcome::LocalOnly { warning: None },
    };

    let jar = jar.add(expired_cookie(SESSION_COOKIE));
    match outcome {
        LogoutOutcome::FrontChannel { redirect_url, .. } => {
            (jar, Redirect::to(&redirect_url)).into_response()
        }
        LogoutOutcome::LocalOnly { warning } => (
            jar,
            Json(StatusView {
                status: "logged-out",
                warning,
            }),
        )
            .into_response(),
    }
}

/// Query parameters for the provider catalog.
#[derive(Debug, Deserialize)]
pub struct ProvidersQuery {
    service: Option<String>,
}

/// Lists the providers authorized for a service.
pub async fn providers(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<ProvidersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = query
        .service
        .filter(|s| !s.is_empty())
        .map(ServiceId::from);
    let remembered = jar
        .get(REMEMBERED_PROVIDER_COOKIE)
        .map(|cookie| ProviderId::new(cookie.value()));

    let catalog = state
        .authorized_providers(service.as_ref(), remembered.as_ref())
        .map_err(|e| ApiError::Catalog(e.to_string()))?;
    Ok(Json(catalog))
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn expired_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .max_age(TimeDuration::ZERO)
        .build()
}

#[derive(Debug, Serialize)]
struct LoginView {
    status: &'static str,
    principal: String,
    provider: Option<ProviderId>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrelationConfig, DelegationConfig, ServerConfig, SessionConfig};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use rootcause::prelude::Report;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;
    use vouch_access::{
        ExternalIdentityProvider, InMemorySessionService, ProtocolKind, ServiceAccessPolicy,
    };
    use vouch_correlation::InMemoryCorrelationStore;
    use vouch_delegation::{ExchangeError, ExchangeOutcome, ProviderClient};

    const APP: &str = "https://app.example.com/home";

    #[derive(Default)]
    struct AcceptingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for AcceptingClient {
        async fn exchange_callback(
            &self,
            provider: &ExternalIdentityProvider,
            _params: &BTreeMap<String, String>,
        ) -> Result<ExchangeOutcome, Report<ExchangeError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExchangeOutcome::Credential(DelegatedCredential::new(
                provider.id().clone(),
                "alice",
            )))
        }
    }

    struct Harness {
        app: Router,
        sessions: InMemorySessionService,
        client: Arc<AcceptingClient>,
    }

    fn harness() -> Harness {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            public_url: "https://sso.example.com".to_string(),
            database_url: None,
            session: SessionConfig {
                secure_cookies: false,
                ..SessionConfig::default()
            },
            correlation: CorrelationConfig::default(),
            delegation: DelegationConfig::default(),
            providers: vec![
                ExternalIdentityProvider::new(
                    "github",
                    "GitHub",
                    ProtocolKind::OAuth2,
                    "https://github.com/login/oauth/authorize?client_id=abc",
                ),
                ExternalIdentityProvider::new(
                    "okta",
                    "Okta",
                    ProtocolKind::Oidc,
                    "https://okta.example.com/authorize",
                )
                .with_logout_endpoint("https://okta.example.com/logout"),
            ],
            services: vec![
                ServiceAccessPolicy::new("https://app\\.example\\.com/.*")
                    .allow(["github"])
                    .exclusive(true),
            ],
        };

        let sessions = InMemorySessionService::new();
        let client = Arc::new(AcceptingClient::default());
        let state = AppState::new(
            &config,
            Arc::new(sessions.clone()),
            Arc::new(
                InMemoryCorrelationStore::new(std::time::Duration::from_secs(60)).expect("store"),
            ),
            client.clone(),
        )
        .expect("valid state");

        Harness {
            app: router(Arc::new(state)),
            sessions,
            client,
        }
    }

    async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        app.clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("infallible")
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn location(response: &Response) -> String {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("location header")
            .to_string()
    }

    fn set_cookie(response: &Response, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| v.strip_prefix(&prefix))
            .map(|v| v.split(';').next().unwrap_or_default().to_string())
    }

    fn state_param(url: &str) -> String {
        reqwest::Url::parse(url)
            .expect("absolute url")
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .expect("state param")
    }

    fn service_query() -> String {
        format!("service={}", urlencode(APP))
    }

    fn urlencode(s: &str) -> String {
        s.replace(':', "%3A").replace('/', "%2F")
    }

    #[tokio::test]
    async fn exclusive_service_redirects_then_callback_authenticates() {
        let h = harness();

        let response = get(&h.app, &format!("/login?{}", service_query()), None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let url = location(&response);
        assert!(url.starts_with("https://github.com/login/oauth/authorize?client_id=abc&state="));
        assert_eq!(
            set_cookie(&response, REMEMBERED_PROVIDER_COOKIE).as_deref(),
            Some("github")
        );

        let ticket = state_param(&url);
        let callback = format!("/login?state={ticket}&code=xyz&client_name=github");
        let response = get(&h.app, &callback, None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), APP);

        let session = set_cookie(&response, SESSION_COOKIE).expect("session cookie");
        let id = SessionId::from_str(&session).expect("session id");
        assert!(h.sessions.contains(&id));
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 1);

        let replay = get(&h.app, &callback, None).await;
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(replay).await["kind"], "invalid-correlation");
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_error_callback_is_rendered_escaped() {
        let h = harness();
        let response = get(
            &h.app,
            "/login?error=access_denied&error_description=%3Cb%3Eno%3C%2Fb%3E&client_name=github",
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body["kind"], "provider-error");
        assert_eq!(body["code"], "401");
        assert_eq!(body["error"], "access_denied");
        assert_eq!(body["description"], "&lt;b&gt;no&lt;/b&gt;");
        assert_eq!(body["provider_name"], "github");
    }

    #[tokio::test]
    async fn unscoped_login_requires_selection() {
        let h = harness();
        let response = get(&h.app, "/login", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        let providers = body["providers"].as_array().expect("providers array");
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0]["id"], "github");
        assert!(body["auto_redirect"].is_null());
    }

    #[tokio::test]
    async fn existing_session_resumes_without_delegation() {
        let h = harness();
        let session = SsoSession::new(
            SessionId::new(),
            "alice",
            Some(ProviderId::new("github")),
            ChronoDuration::minutes(5),
        );
        h.sessions.insert(session.clone());

        let cookie = format!("{SESSION_COOKIE}={}", session.id());
        let response = get(
            &h.app,
            &format!("/login?{}", service_query()),
            Some(&cookie),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), APP);
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unauthorized_session_is_invalidated() {
        let h = harness();
        let session = SsoSession::new(
            SessionId::new(),
            "alice",
            Some(ProviderId::new("okta")),
            ChronoDuration::minutes(5),
        );
        h.sessions.insert(session.clone());

        let cookie = format!("{SESSION_COOKIE}={}", session.id());
        let response = get(
            &h.app,
            &format!("/login?{}", service_query()),
            Some(&cookie),
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("https://github.com/"));
        assert_eq!(set_cookie(&response, SESSION_COOKIE).as_deref(), Some(""));
        assert!(!h.sessions.contains(&session.id()));
    }

    #[tokio::test]
    async fn cancel_stops_the_attempt() {
        let h = harness();
        let response = get(&h.app, "/login?cancel=true", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "cancelled");
    }

    #[tokio::test]
    async fn providers_lists_authorized_catalog() {
        let h = harness();
        let response = get(&h.app, &format!("/providers?{}", service_query()), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        let providers = body["providers"].as_array().expect("providers array");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0]["id"], "github");
        assert_eq!(body["auto_redirect"]["provider"], "github");
    }

    #[tokio::test]
    async fn logout_front_channel_redirects_to_provider() {
        let h = harness();
        let session = SsoSession::new(
            SessionId::new(),
            "alice",
            Some(ProviderId::new("okta")),
            ChronoDuration::minutes(5),
        );
        h.sessions.insert(session.clone());

        let cookie = format!("{SESSION_COOKIE}={}", session.id());
        let response = get(&h.app, "/logout", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(location(&response).starts_with("https://okta.example.com/logout"));
        assert!(!h.sessions.contains(&session.id()));
    }

    #[tokio::test]
    async fn logout_without_session_is_local() {
        let h = harness();
        let response = get(&h.app, "/logout", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "logged-out");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let h = harness();
        let response = get(&h.app, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
