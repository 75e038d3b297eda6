//! HTTP relay to the protocol collaborators that validate callback proof.
//!
//! Each provider names an `exchange_endpoint`. The callback parameters are
//! posted there as JSON and the collaborator answers with either the
//! authenticated principal or the provider's rejection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use vouch_access::{ExternalIdentityProvider, ProtocolKind};
use vouch_core::ProviderId;
use vouch_delegation::{
    DelegatedCredential, ExchangeError, ExchangeOutcome, ProviderClient, ProviderErrorPayload,
};

/// Body posted to the exchange endpoint.
#[derive(Debug, Serialize)]
struct ExchangeRequest<'a> {
    provider: &'a ProviderId,
    protocol: ProtocolKind,
    params: &'a BTreeMap<String, String>,
}

/// Body returned by the exchange endpoint.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ExchangeResponse {
    Authenticated {
        principal: String,
        #[serde(default)]
        attributes: BTreeMap<String, serde_json::Value>,
    },
    Rejected {
        error: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl ExchangeResponse {
    fn into_outcome(self, provider: &ProviderId) -> ExchangeOutcome {
        match self {
            Self::Authenticated {
                principal,
                attributes,
            } => {
                let credential = attributes.into_iter().fold(
                    DelegatedCredential::new(provider.clone(), principal),
                    |credential, (name, value)| credential.with_attribute(name, value),
                );
                ExchangeOutcome::Credential(credential)
            }
            Self::Rejected {
                error,
                code,
                reason,
                description,
            } => ExchangeOutcome::Rejected(ProviderErrorPayload {
                error,
                code,
                reason,
                description,
                message: None,
            }),
        }
    }
}

/// Exchanges callbacks over HTTP.
pub struct HttpExchangeClient {
    client: reqwest::Client,
}

impl HttpExchangeClient {
    /// Creates a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProviderClient for HttpExchangeClient {
    async fn exchange_callback(
        &self,
        provider: &ExternalIdentityProvider,
        params: &BTreeMap<String, String>,
    ) -> vouch_core::Result<ExchangeOutcome, ExchangeError> {
        let provider_id = provider.id();
        let Some(endpoint) = provider.exchange_endpoint() else {
            return Err(ExchangeError::NotConfigured {
                provider: provider_id.clone(),
            }
            .into());
        };

        tracing::debug!(provider = %provider_id, endpoint, "exchanging callback");

        let response = self
            .client
            .post(endpoint)
            .json(&ExchangeRequest {
                provider: provider_id,
                protocol: provider.protocol(),
                params,
            })
            .send()
            .await
            .map_err(|e| ExchangeError::Unreachable {
                provider: provider_id.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                provider = %provider_id,
                status = %status,
                body = %body,
                "exchange endpoint returned error"
            );
            return Err(ExchangeError::InvalidResponse {
                provider: provider_id.clone(),
                reason: format!("HTTP {status}"),
            }
            .into());
        }

        let body: ExchangeResponse =
            response
                .json()
                .await
                .map_err(|e| ExchangeError::InvalidResponse {
                    provider: provider_id.clone(),
                    reason: e.to_string(),
                })?;

        Ok(body.into_outcome(provider_id))
    }
}
