//! SSO sessions as seen by delegated authentication.
//!
//! Session persistence belongs to the host application. This module only
//! describes what delegation needs to read from a session (validity and the
//! provider that originally vouched for it) and the narrow service used to
//! look sessions up and invalidate them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use vouch_core::{ProviderId, SessionId};

use crate::error::SessionError;

/// An existing authenticated session eligible for reuse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoSession {
    /// Unique identifier for this session.
    id: SessionId,
    /// The authenticated principal.
    principal: String,
    /// Provider that authenticated the principal; `None` for local logins.
    originating_provider: Option<ProviderId>,
    /// When the session was created.
    created_at: DateTime<Utc>,
    /// When the session expires.
    expires_at: DateTime<Utc>,
}

impl SsoSession {
    /// Creates a session valid for `duration` from now.
    #[must_use]
    pub fn new(
        id: SessionId,
        principal: impl Into<String>,
        originating_provider: Option<ProviderId>,
        duration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self::from_parts(id, principal, originating_provider, now, now + duration)
    }

    /// Reassembles a session loaded from storage.
    #[must_use]
    pub fn from_parts(
        id: SessionId,
        principal: impl Into<String>,
        originating_provider: Option<ProviderId>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            principal: principal.into(),
            originating_provider,
            created_at,
            expires_at,
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the authenticated principal.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Returns the provider recorded at authentication time.
    #[must_use]
    pub fn originating_provider(&self) -> Option<&ProviderId> {
        self.originating_provider.as_ref()
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the session is still valid (not expired).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }
}

/// Lookup and invalidation of SSO sessions.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Loads a session by id. Expired sessions may be returned; callers check validity.
    async fn get(&self, id: &SessionId) -> vouch_core::Result<Option<SsoSession>, SessionError>;

    /// Invalidates a session. Invalidating an unknown session is not an error.
    async fn invalidate(&self, id: &SessionId) -> vouch_core::Result<(), SessionError>;
}

/// In-memory session service for tests and single-process development.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionService {
    sessions: Arc<Mutex<HashMap<SessionId, SsoSession>>>,
}

impl InMemorySessionService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session, replacing any with the same id.
    pub fn insert(&self, session: SsoSession) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id(), session);
    }

    /// Returns true if a session with `id` is stored.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Drops every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| session.is_valid());
        before - sessions.len()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get(&self, id: &SessionId) -> vouch_core::Result<Option<SsoSession>, SessionError> {
        Ok(self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn invalidate(&self, id: &SessionId) -> vouch_core::Result<(), SessionError> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        Ok(())
    }
}
