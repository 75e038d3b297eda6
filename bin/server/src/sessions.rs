//! Session storage used by the HTTP layer.
//!
//! The delegation crates only read and invalidate sessions. The server also
//! has to create them after a successful delegation and sweep expired ones.

use async_trait::async_trait;
use vouch_access::{InMemorySessionService, SessionError, SessionService, SsoSession};

/// Full session lifecycle.
#[async_trait]
pub trait SessionStore: SessionService {
    /// Persists a new session.
    async fn create(&self, session: &SsoSession) -> vouch_core::Result<(), SessionError>;

    /// Deletes expired sessions, returning how many were removed.
    async fn delete_expired(&self) -> vouch_core::Result<u64, SessionError>;
}

#[async_trait]
impl SessionStore for InMemorySessionService {
    async fn create(&self, session: &SsoSession) -> vouch_core::Result<(), SessionError> {
        self.insert(session.clone());
        Ok(())
    }

    async fn delete_expired(&self) -> vouch_core::Result<u64, SessionError> {
        Ok(self.purge_expired() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use vouch_core::{ProviderId, SessionId};

    #[tokio::test]
    async fn in_memory_store_creates_and_sweeps() {
        let store = InMemorySessionService::new();
        let live = SsoSession::new(
            SessionId::new(),
            "alice",
            Some(ProviderId::new("github")),
            Duration::minutes(5),
        );
        let now = Utc::now();
        let expired = SsoSession::from_parts(
            SessionId::new(),
            "bob",
            None,
            now - Duration::hours(2),
            now - Duration::hours(1),
        );

        store.create(&live).await.expect("create live");
        store.create(&expired).await.expect("create expired");

        assert_eq!(store.delete_expired().await.expect("sweep"), 1);
        assert!(store.contains(&live.id()));
        assert!(!store.contains(&expired.id()));
    }
}
