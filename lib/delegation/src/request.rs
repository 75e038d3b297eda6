//! Inbound login requests.
//!
//! A login request arrives in one of three shapes: a fresh login (no
//! delegation parameters), a provider selection (`client_name`), or a
//! provider callback (correlation state plus proof, or an error parameter
//! set). [`DelegationRequest`] normalizes all three from raw parameters.

use std::collections::BTreeMap;
use vouch_access::{CLIENT_ID_PARAM, CLIENT_NAME_PARAM, ProtocolKind, SERVICE_PARAM};
use vouch_core::{ProviderId, ServiceId, SessionId};
use vouch_correlation::properties;

/// Request parameter forcing re-authentication.
pub const RENEW_PARAM: &str = "renew";

/// Request parameter cancelling the login attempt.
pub const CANCEL_PARAM: &str = "cancel";

const ERROR_PARAM: &str = "error";
const ERROR_CODE_PARAM: &str = "error_code";
const ERROR_REASON_PARAM: &str = "error_reason";
const ERROR_DESCRIPTION_PARAM: &str = "error_description";
const ERROR_MESSAGE_PARAM: &str = "error_message";

/// Error details reported by a provider on its callback.
///
/// Values are kept exactly as received; they are escaped only when turned
/// into an error view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderErrorPayload {
    pub error: Option<String>,
    pub code: Option<String>,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub message: Option<String>,
}

impl ProviderErrorPayload {
    /// Extracts an error payload if any error parameter is present.
    #[must_use]
    pub fn from_params(params: &BTreeMap<String, String>) -> Option<Self> {
        let present = [
            ERROR_PARAM,
            ERROR_CODE_PARAM,
            ERROR_DESCRIPTION_PARAM,
            ERROR_MESSAGE_PARAM,
        ]
        .iter()
        .any(|key| params.contains_key(*key));
        if !present {
            return None;
        }

        let get = |key: &str| params.get(key).cloned();
        Some(Self {
            error: get(ERROR_PARAM),
            code: get(ERROR_CODE_PARAM),
            reason: get(ERROR_REASON_PARAM),
            description: get(ERROR_DESCRIPTION_PARAM),
            message: get(ERROR_MESSAGE_PARAM),
        })
    }

    /// Creates a payload carrying only an error code word (e.g. `access_denied`).
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// A normalized login request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationRequest {
    params: BTreeMap<String, String>,
    service: Option<ServiceId>,
    client_name: Option<ProviderId>,
    correlation: Option<String>,
    error: Option<ProviderErrorPayload>,
    renew: bool,
    cancel: bool,
    session: Option<SessionId>,
    remembered_provider: Option<ProviderId>,
}

impl DelegationRequest {
    /// Builds a request from query or form parameters.
    ///
    /// Empty values are treated as absent.
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        let service = params.get(SERVICE_PARAM).map(ServiceId::new);
        let client_name = params.get(CLIENT_NAME_PARAM).map(ProviderId::new);
        let correlation = correlation_params()
            .iter()
            .find_map(|key| params.get(*key).cloned());
        let error = ProviderErrorPayload::from_params(&params);
        let renew = flag(&params, RENEW_PARAM);
        let cancel = flag(&params, CANCEL_PARAM);

        Self {
            params,
            service,
            client_name,
            correlation,
            error,
            renew,
            cancel,
            session: None,
            remembered_provider: None,
        }
    }

    /// Attaches the caller's existing SSO session id.
    #[must_use]
    pub fn with_session(mut self, session: Option<SessionId>) -> Self {
        self.session = session;
        self
    }

    /// Attaches the provider remembered from a previous login.
    #[must_use]
    pub fn with_remembered_provider(mut self, provider: Option<ProviderId>) -> Self {
        self.remembered_provider = provider;
        self
    }

    /// Returns every non-empty parameter, as forwarded to the protocol collaborator.
    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Returns the requested service.
    #[must_use]
    pub fn service(&self) -> Option<&ServiceId> {
        self.service.as_ref()
    }

    /// Returns the selected or returning provider name.
    #[must_use]
    pub fn client_name(&self) -> Option<&ProviderId> {
        self.client_name.as_ref()
    }

    /// Returns the returned correlation value, if this is a callback.
    #[must_use]
    pub fn correlation(&self) -> Option<&str> {
        self.correlation.as_deref()
    }

    /// Returns the provider error payload, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ProviderErrorPayload> {
        self.error.as_ref()
    }

    /// Returns true if this request returns from a provider.
    #[must_use]
    pub fn is_callback(&self) -> bool {
        self.correlation.is_some() || self.error.is_some()
    }

    /// Returns true if re-authentication was requested.
    #[must_use]
    pub fn renew(&self) -> bool {
        self.renew
    }

    /// Returns true if the caller cancelled the attempt.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel
    }

    /// Returns the caller's SSO session id.
    #[must_use]
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Returns the remembered provider.
    #[must_use]
    pub fn remembered_provider(&self) -> Option<&ProviderId> {
        self.remembered_provider.as_ref()
    }

    /// Returns the request context to carry across the redirect.
    #[must_use]
    pub fn context_properties(&self) -> BTreeMap<String, String> {
        [properties::THEME, properties::LOCALE, properties::METHOD]
            .iter()
            .filter_map(|key| {
                self.params
                    .get(*key)
                    .map(|value| ((*key).to_string(), value.clone()))
            })
            .collect()
    }
}

/// Parameters that may carry correlation state, in lookup order.
fn correlation_params() -> [&'static str; 3] {
    [
        CLIENT_ID_PARAM,
        ProtocolKind::Saml2.correlation_param(),
        ProtocolKind::OAuth2.correlation_param(),
    ]
}

fn flag(params: &BTreeMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}
