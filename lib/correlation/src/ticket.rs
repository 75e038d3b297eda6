//! Correlation tickets.
//!
//! A ticket binds one delegation attempt to its callback. Its id travels to
//! the external provider as opaque state and comes back on the callback; the
//! ticket itself never leaves the server.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vouch_core::{ProviderId, ServiceId};

use crate::error::StoreError;

/// Number of random bytes in a ticket id.
pub const TICKET_ID_BYTES: usize = 32;

/// Length of an encoded ticket id.
const TICKET_ID_LEN: usize = 43;

/// Property keys restored from a ticket on callback.
pub mod properties {
    pub const THEME: &str = "theme";
    pub const LOCALE: &str = "locale";
    pub const METHOD: &str = "method";
    pub const FORCE_AUTHN: &str = "forceAuthn";
    pub const PASSIVE: &str = "passive";

    /// Every property key carried by a ticket.
    pub const ALL: [&str; 5] = [THEME, LOCALE, METHOD, FORCE_AUTHN, PASSIVE];
}

/// Opaque, unguessable ticket identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Generates a fresh id from the operating system's random source.
    ///
    /// # Errors
    ///
    /// Returns an error if the random source is unavailable.
    pub fn generate() -> Result<Self, StoreError> {
        let mut bytes = [0u8; TICKET_ID_BYTES];
        getrandom::fill(&mut bytes).map_err(|e| StoreError::Entropy {
            reason: e.to_string(),
        })?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Parses a correlation value returned by a provider.
    ///
    /// Returns `None` for anything that cannot be a ticket id, so malformed
    /// values never reach the store.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == TICKET_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(raw.to_string()))
    }

    /// Returns the id as sent to providers.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short prefix safe to write to logs.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Keep full ids out of debug output.
impl fmt::Debug for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TicketId({}…)", self.short())
    }
}

/// A single-use ticket binding a delegation attempt across the redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationTicket {
    id: TicketId,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    service_id: Option<ServiceId>,
    provider_id: ProviderId,
    #[serde(default)]
    consumed: bool,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl CorrelationTicket {
    /// Issues a new, unconsumed ticket valid for `ttl`.
    #[must_use]
    pub fn issue(
        id: TicketId,
        service_id: Option<ServiceId>,
        provider_id: ProviderId,
        properties: BTreeMap<String, String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            expires_at: now + ttl,
            service_id,
            provider_id,
            consumed: false,
            properties,
        }
    }

    /// Returns the ticket id.
    #[must_use]
    pub fn id(&self) -> &TicketId {
        &self.id
    }

    /// Returns when the ticket was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the ticket expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the service the attempt was started for.
    #[must_use]
    pub fn service_id(&self) -> Option<&ServiceId> {
        self.service_id.as_ref()
    }

    /// Returns the provider the browser was sent to.
    #[must_use]
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    /// Returns true if the ticket has been consumed.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Returns the request context stored with the ticket.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Returns true if the ticket has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the ticket can still be consumed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.consumed && !self.is_expired()
    }

    /// Marks the ticket consumed.
    #[must_use]
    pub fn into_consumed(mut self) -> Self {
        self.consumed = true;
        self
    }

    pub(crate) fn to_json_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Encoding {
            reason: e.to_string(),
        })
    }

    pub(crate) fn from_json_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Encoding {
            reason: e.to_string(),
        })
    }
}
