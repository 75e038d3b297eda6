//! Decision results.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use vouch_access::{ResolvedCatalog, SsoSession};
use vouch_core::{ProviderId, ServiceId, SessionId};
use vouch_correlation::CorrelationTicket;

use crate::client::DelegatedCredential;
use crate::error::DelegationFailure;

/// States visited while deciding a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationState {
    Start,
    ResumeSession,
    ValidateCallback,
    SelectProvider,
    AwaitRedirect,
    Authenticated,
    Failed,
    Stopped,
}

impl DelegationState {
    /// Returns true for states that end a decision.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AwaitRedirect | Self::Authenticated | Self::Failed | Self::Stopped
        )
    }
}

impl fmt::Display for DelegationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::ResumeSession => "RESUME_SESSION",
            Self::ValidateCallback => "VALIDATE_CALLBACK",
            Self::SelectProvider => "SELECT_PROVIDER",
            Self::AwaitRedirect => "AWAIT_REDIRECT",
            Self::Authenticated => "AUTHENTICATED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// What the caller should do with a login request.
#[derive(Debug, Clone)]
pub enum DelegationOutcome {
    /// An existing session is still good for the service; skip delegation.
    Resumed(SsoSession),
    /// Send the browser to the provider.
    Redirect {
        provider: ProviderId,
        ticket: CorrelationTicket,
        url: String,
    },
    /// The provider vouched for the user; hand the credential to the
    /// authentication pipeline.
    Authenticated {
        credential: DelegatedCredential,
        service: Option<ServiceId>,
        properties: BTreeMap<String, String>,
    },
    /// Several providers are allowed and none is auto-selected.
    SelectionRequired(ResolvedCatalog),
    /// The attempt failed.
    Failed(DelegationFailure),
    /// The user cancelled.
    Cancelled,
}

impl DelegationOutcome {
    /// Returns the state this outcome ends in.
    #[must_use]
    pub fn state(&self) -> DelegationState {
        match self {
            Self::Resumed(_) | Self::Authenticated { .. } => DelegationState::Authenticated,
            Self::Redirect { .. } => DelegationState::AwaitRedirect,
            Self::SelectionRequired(_) => DelegationState::SelectProvider,
            Self::Failed(_) => DelegationState::Failed,
            Self::Cancelled => DelegationState::Stopped,
        }
    }

    /// Returns the failure, if the attempt failed.
    #[must_use]
    pub fn failure(&self) -> Option<&DelegationFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// The full result of deciding one request.
#[derive(Debug, Clone)]
pub struct Decision {
    /// What the caller should do.
    pub outcome: DelegationOutcome,
    /// A session that lost its authority and must be invalidated by the caller.
    pub stale_session: Option<SessionId>,
    /// States visited, in order.
    pub path: Vec<DelegationState>,
}

impl Decision {
    /// Renders the visited states as `START -> ... -> END`.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
